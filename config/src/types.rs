use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cli9Config {
    pub limits: LimitsConfig,
    pub filesystem: FilesystemConfig,
    pub shell: ShellConfig,
    pub logging: LoggingConfig,
}

/// Safety valves applied to every invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Iterations a `while`/`until` loop may run before it is aborted.
    pub max_iterations: usize,
    /// Largest content a regular file accepts, in bytes.
    pub max_file_size: usize,
    /// How deep aliases may expand into other aliases.
    pub max_alias_depth: usize,
    /// How deep functions, scripts and `exec` may call into each other.
    pub max_nesting: usize,
    /// Parsed scripts kept for reuse; 0 disables the cache.
    pub script_cache_entries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_timeout_secs: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            max_file_size: 8 * 1024 * 1024,
            max_alias_depth: 16,
            max_nesting: 24,
            script_cache_entries: 256,
            invocation_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// First inode handed out to user-created (persisted) nodes.
    pub public_inode_start: u64,
    pub network_timeout_secs: u64,
    /// Host directory whose files are mirrored into `/scripts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts_dir: Option<String>,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            public_inode_start: 10_000,
            network_timeout_secs: 10,
            scripts_dir: None,
        }
    }
}

impl FilesystemConfig {
    #[must_use]
    pub fn scripts_path(&self) -> Option<PathBuf> {
        self.scripts_dir.as_deref().map(crate::expand_path)
    }
}

/// Console identity used when none is configured.
pub const DEFAULT_USER_ID: u64 = 100_000_000_000_000_001;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub prompt: String,
    pub history: HistoryConfig,
    /// Principal ids granted the `root` group.
    pub root_ids: Vec<u64>,
    /// Identity the local console acts as. Homes exist only for 17+ digit
    /// ids, so short ids have no `~`.
    pub user_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<u64>,
    /// Scripts run once when the console starts, before any input.
    pub rc_files: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "cli9:{cwd}> ".to_string(),
            history: HistoryConfig::default(),
            root_ids: Vec::new(),
            user_id: DEFAULT_USER_ID,
            guild_id: None,
            rc_files: Vec::new(),
        }
    }
}

impl ShellConfig {
    /// Prompt with `{cwd}` replaced.
    #[must_use]
    pub fn render_prompt(&self, cwd: &str) -> String {
        self.prompt.replace("{cwd}", cwd)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub file: String,
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "~/.cli9_history".to_string(),
            max_entries: 10000,
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn path(&self) -> PathBuf {
        crate::expand_path(&self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            filter: String::new(),
        }
    }
}

impl LoggingConfig {
    /// Directive string for an `EnvFilter`: the explicit filter when set,
    /// otherwise the level.
    #[must_use]
    pub fn directive(&self) -> String {
        if self.filter.is_empty() {
            self.level.as_str().to_string()
        } else {
            self.filter.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}
