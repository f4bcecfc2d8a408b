//! CLI9 Configuration System
//!
//! # Configuration Loading Priority
//!
//! 1. Compiled-in defaults
//! 2. `/etc/cli9/cli9.yaml` (system-wide)
//! 3. `~/.config/cli9/cli9.yaml` (user)
//! 4. `./cli9.yaml` (project-local)
//! 5. `CLI9_CONFIG=/path/to/config.yaml` (explicit, replaces 2-4)
//! 6. `CLI9_*` environment variables (highest priority)
//!
//! # Example Configuration
//!
//! ```yaml
//! limits:
//!   max_iterations: 1000
//!   max_nesting: 24
//!   script_cache_entries: 256
//!   max_file_size: 8388608
//!   invocation_timeout_secs: 30
//!
//! filesystem:
//!   scripts_dir: "~/cli9/scripts"
//!
//! shell:
//!   user_id: 100000000000000001
//!   root_ids: [100000000000000001]
//!
//! logging:
//!   level: debug
//! ```

#![allow(missing_docs)]

mod error;
mod loader;
mod types;

use std::path::PathBuf;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::*;

/// Load configuration from default locations.
pub fn load() -> Result<Cli9Config, ConfigError> {
    ConfigLoader::new().load()
}

/// Load configuration from a specific file.
pub fn load_from_file(path: &str) -> Result<Cli9Config, ConfigError> {
    ConfigLoader::new().with_file(path).load()
}

/// Expand `~` and `$VAR` in a configured path; unknown variables are left
/// as written.
#[must_use]
pub fn expand_path(path: &str) -> PathBuf {
    shellexpand::full(path).map_or_else(|_| PathBuf::from(path), |p| PathBuf::from(p.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Cli9Config::default();
        assert_eq!(config.limits.max_iterations, 1000);
        assert_eq!(config.limits.max_file_size, 8 * 1024 * 1024);
        assert_eq!(config.limits.script_cache_entries, 256);
        assert_eq!(config.filesystem.public_inode_start, 10_000);
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = r"
limits:
  max_iterations: 10
";
        let config: Cli9Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.limits.max_iterations, 10);
        assert_eq!(config.limits.max_alias_depth, 16); // default
        assert_eq!(config.limits.max_nesting, 24);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
limits:
  max_iterations: 500
  max_file_size: 1024
  max_nesting: 8
  invocation_timeout_secs: 5

filesystem:
  public_inode_start: 2000
  scripts_dir: "/srv/scripts"

shell:
  prompt: "> "
  root_ids: [1, 2]
  user_id: 42
  guild_id: 99

logging:
  level: debug
  filter: "cli9=trace"
"#;
        let config: Cli9Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.limits.invocation_timeout_secs, Some(5));
        assert_eq!(config.limits.max_nesting, 8);
        assert_eq!(config.filesystem.scripts_path(), Some(PathBuf::from("/srv/scripts")));
        assert_eq!(config.shell.root_ids, vec![1, 2]);
        assert_eq!(config.shell.guild_id, Some(99));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.directive(), "cli9=trace");
    }

    #[test]
    fn prompt_substitutes_cwd() {
        let shell = ShellConfig::default();
        assert_eq!(shell.render_prompt("/home"), "cli9:/home> ");
    }

    #[test]
    fn expand_path_handles_home() {
        let expanded = expand_path("~/x");
        assert!(!expanded.to_string_lossy().starts_with('~') || dirs::home_dir().is_none());
    }
}
