use crate::{Cli9Config, ConfigError};
use regex::{Captures, Regex};
use std::path::PathBuf;
use std::sync::OnceLock;

pub struct ConfigLoader {
    explicit_file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").unwrap())
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Some(home) = dirs::home_dir() {
            search_paths.push(home.join(".config/cli9/cli9.yaml"));
        }
        search_paths.push(PathBuf::from("./cli9.yaml"));

        #[cfg(unix)]
        search_paths.insert(0, PathBuf::from("/etc/cli9/cli9.yaml"));

        Self {
            explicit_file: None,
            search_paths,
        }
    }

    #[must_use]
    pub fn with_file(mut self, path: &str) -> Self {
        self.explicit_file = Some(PathBuf::from(path));
        self
    }

    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    pub fn load(&self) -> Result<Cli9Config, ConfigError> {
        let mut config = Cli9Config::default();

        let explicit = std::env::var("CLI9_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(|| self.explicit_file.clone());

        if let Some(path) = explicit {
            let content = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path, source })?;
            config = self.parse_yaml(&content)?;
        } else {
            for path in &self.search_paths {
                if !path.exists() {
                    continue;
                }
                match std::fs::read_to_string(path) {
                    Ok(content) => {
                        tracing::debug!(path = %path.display(), "merging config file");
                        config = self.merge_yaml(&config, &content)?;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable config file");
                    }
                }
            }
        }

        self.apply_env_overrides(&mut config)?;
        Ok(config)
    }

    fn parse_yaml(&self, content: &str) -> Result<Cli9Config, ConfigError> {
        let expanded = self.expand_env_vars(content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    fn merge_yaml(&self, base: &Cli9Config, content: &str) -> Result<Cli9Config, ConfigError> {
        let overlay = self.parse_yaml(content)?;
        Ok(Self::merge_configs(base, &overlay))
    }

    /// Sections of `overlay` that differ from the defaults replace those of
    /// `base`.
    fn merge_configs(base: &Cli9Config, overlay: &Cli9Config) -> Cli9Config {
        let defaults = Cli9Config::default();
        let mut result = base.clone();

        if overlay.limits != defaults.limits {
            result.limits = overlay.limits.clone();
        }
        if overlay.filesystem != defaults.filesystem {
            result.filesystem = overlay.filesystem.clone();
        }
        if overlay.shell != defaults.shell {
            result.shell = overlay.shell.clone();
        }
        if overlay.logging != defaults.logging {
            result.logging = overlay.logging.clone();
        }

        result
    }

    fn expand_env_vars(&self, content: &str) -> String {
        env_var_pattern()
            .replace_all(content, |caps: &Captures| {
                std::env::var(&caps[1]).unwrap_or_default()
            })
            .to_string()
    }

    fn apply_env_overrides(&self, config: &mut Cli9Config) -> Result<(), ConfigError> {
        if let Ok(level) = std::env::var("CLI9_LOG_LEVEL") {
            config.logging.level = serde_yaml::from_str(&level).map_err(|_| invalid("CLI9_LOG_LEVEL", &level))?;
        }
        if let Ok(n) = std::env::var("CLI9_MAX_ITERATIONS") {
            config.limits.max_iterations = n.parse().map_err(|_| invalid("CLI9_MAX_ITERATIONS", &n))?;
        }
        if let Ok(n) = std::env::var("CLI9_MAX_NESTING") {
            config.limits.max_nesting = n.parse().map_err(|_| invalid("CLI9_MAX_NESTING", &n))?;
        }
        if let Ok(n) = std::env::var("CLI9_MAX_FILE_SIZE") {
            config.limits.max_file_size = n.parse().map_err(|_| invalid("CLI9_MAX_FILE_SIZE", &n))?;
        }
        if let Ok(ids) = std::env::var("CLI9_ROOT_IDS") {
            config.shell.root_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().map_err(|_| invalid("CLI9_ROOT_IDS", s)))
                .collect::<Result<_, _>>()?;
        }
        if let Ok(id) = std::env::var("CLI9_USER_ID") {
            config.shell.user_id = id.parse().map_err(|_| invalid("CLI9_USER_ID", &id))?;
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn expand_env_vars_works() {
        std::env::set_var("CLI9_TEST_VAR_123", "hello");
        let loader = ConfigLoader::new();
        let result = loader.expand_env_vars("value: ${CLI9_TEST_VAR_123}");
        assert_eq!(result, "value: hello");
        std::env::remove_var("CLI9_TEST_VAR_123");
    }

    #[test]
    fn missing_env_var_becomes_empty() {
        let loader = ConfigLoader::new();
        let result = loader.expand_env_vars("value: ${NONEXISTENT_VAR_XYZ}");
        assert_eq!(result, "value: ");
    }

    #[test]
    fn env_overrides_config() {
        std::env::set_var("CLI9_ROOT_IDS", "5, 6");
        let mut config = Cli9Config::default();
        ConfigLoader::new().apply_env_overrides(&mut config).unwrap();
        assert_eq!(config.shell.root_ids, vec![5, 6]);
        std::env::remove_var("CLI9_ROOT_IDS");
    }

    #[test]
    fn later_files_override_earlier_sections() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.yaml");
        let second = dir.path().join("second.yaml");
        writeln!(
            std::fs::File::create(&first).unwrap(),
            "limits:\n  max_iterations: 50\nshell:\n  user_id: 7"
        )
        .unwrap();
        writeln!(
            std::fs::File::create(&second).unwrap(),
            "limits:\n  max_iterations: 60"
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_search_paths(vec![first, second, dir.path().join("missing.yaml")])
            .load()
            .unwrap();
        assert_eq!(config.limits.max_iterations, 60);
        assert_eq!(config.shell.user_id, 7);
    }

    #[test]
    fn explicit_file_must_exist() {
        let err = ConfigLoader::new()
            .with_file("/nonexistent/cli9.yaml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
