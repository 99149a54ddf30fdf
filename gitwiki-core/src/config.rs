//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Main configuration struct matching the gitwiki.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Serve pages on demand instead of from the published snapshot
    #[serde(default)]
    pub live: bool,

    #[serde(default)]
    pub editable: bool,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub site_name: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_home_doc")]
    pub home_doc: String,

    #[serde(default)]
    pub ignore_header: bool,

    #[serde(default)]
    pub ignore_footer: bool,

    /// Inline markdown appended below the footer fragment
    #[serde(default)]
    pub server_footer: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Route prefixes hidden from readers in live mode
    #[serde(default)]
    pub private_paths: Vec<String>,

    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_listen() -> String {
    String::from("127.0.0.1:8080")
}

fn default_base_url() -> String {
    String::from("/")
}

fn default_home_doc() -> String {
    String::from("Home.md")
}

fn default_log_level() -> String {
    String::from("info")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_repo_dir")]
    pub repo: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output: PathBuf,

    /// Replaces the embedded theme assets when set
    #[serde(default)]
    pub theme: Option<PathBuf>,
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from("repo")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_bin")]
    pub bin: String,

    /// Empty means the working tree is local-only
    #[serde(default)]
    pub remote: String,

    #[serde(default = "default_author")]
    pub author: String,

    #[serde(default)]
    pub commit_message_prefix: String,

    /// Literal suffix, or a template containing `%s` for the client address
    #[serde(default)]
    pub commit_message_append_remote_addr: String,

    #[serde(default = "default_pull_interval")]
    pub pull_interval_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_git_bin() -> String {
    String::from("git")
}

fn default_author() -> String {
    String::from("Anonymous <anonymous@localhost>")
}

fn default_pull_interval() -> u64 {
    300
}

fn default_command_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_webhook_listen")]
    pub listen: String,

    /// Bearer token expected on webhook requests; empty disables the check
    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub polling: PollingConfig,
}

fn default_webhook_listen() -> String {
    String::from("127.0.0.1:8081")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub callback_url: String,

    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    3600
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo: default_repo_dir(),
            output: default_output_dir(),
            theme: None,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            bin: default_git_bin(),
            remote: String::new(),
            author: default_author(),
            commit_message_prefix: String::new(),
            commit_message_append_remote_addr: String::new(),
            pull_interval_secs: default_pull_interval(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            callback_url: String::new(),
            interval_secs: default_poll_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            live: false,
            editable: false,
            listen: default_listen(),
            site_name: String::new(),
            base_url: default_base_url(),
            home_doc: default_home_doc(),
            ignore_header: false,
            ignore_footer: false,
            server_footer: String::new(),
            log_level: default_log_level(),
            private_paths: Vec::new(),
            trusted_proxies: Vec::new(),
            paths: PathsConfig::default(),
            git: GitConfig::default(),
            webhook: WebhookConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Parse configuration from YAML text, applying defaults and validation
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        self.git.bin = self.git.bin.trim().to_string();
        self.git.remote = self.git.remote.trim().to_string();
        self.git.author = self.git.author.trim().to_string();
        if self.git.bin.is_empty() {
            self.git.bin = default_git_bin();
        }
        if self.git.author.is_empty() {
            self.git.author = default_author();
        }
        if self.git.command_timeout_secs == 0 {
            self.git.command_timeout_secs = default_command_timeout();
        }
        if self.home_doc.trim().is_empty() {
            self.home_doc = default_home_doc();
        }
        if self.log_level.trim().is_empty() {
            self.log_level = default_log_level();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let polling = &self.webhook.polling;
        if self.webhook.enabled && polling.enabled {
            if polling.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingField("webhook.polling.endpoint".into()));
            }
            if self.git.remote.is_empty() {
                return Err(ConfigError::MissingField("git.remote".into()));
            }
        }
        Ok(())
    }

    /// Working tree directory, resolved relative to config file
    pub fn repo_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.repo)
    }

    /// Get the output directory, resolved relative to config file
    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output)
    }

    /// Get the theme directory (None means use the embedded bundle)
    pub fn theme_dir(&self) -> Option<PathBuf> {
        self.paths.theme.as_ref().map(|p| self.resolve_path(p))
    }

    pub fn has_remote(&self) -> bool {
        !self.git.remote.is_empty()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.git.command_timeout_secs)
    }

    /// Interval of the background pull loop; `None` disables it
    pub fn pull_interval(&self) -> Option<Duration> {
        match self.git.pull_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        let polling = &self.webhook.polling;
        if !self.webhook.enabled || !polling.enabled || polling.interval_secs == 0 {
            return None;
        }
        Some(Duration::from_secs(polling.interval_secs))
    }

    /// Repository identifier sent to the notification service ("owner/name")
    pub fn repository_path(&self) -> Option<String> {
        let remote = self.git.remote.trim().trim_end_matches('/');
        let remote = remote.strip_suffix(".git").unwrap_or(remote);
        let tail = match remote.rsplit_once(':') {
            Some((head, tail)) if !head.contains("//") => tail,
            _ => remote.split_once("://").map(|(_, rest)| rest).unwrap_or(remote),
        };
        let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [.., owner, name] => Some(format!("{}/{}", owner, name)),
            _ => None,
        }
    }

    /// Whether a route falls under one of the configured private prefixes
    pub fn is_path_private(&self, route: &str) -> bool {
        let route = route.trim().to_lowercase();
        self.private_paths.iter().any(|raw| {
            let prefix = raw.trim().trim_end_matches('/').to_lowercase();
            if prefix.is_empty() {
                return false;
            }
            let prefix = if prefix.starts_with('/') {
                prefix
            } else {
                format!("/{}", prefix)
            };
            route == prefix || route.starts_with(&format!("{}/", prefix))
        })
    }

    /// Normalized base URL with leading and trailing slash ("/foo/" or "/")
    pub fn normalized_base_url(&self) -> String {
        normalize_base_url(&self.base_url)
    }

    /// Resolve a path relative to the config file location
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(config_path) = &self.config_path {
            if let Some(parent) = config_path.parent() {
                parent.join(path)
            } else {
                path.to_path_buf()
            }
        } else {
            path.to_path_buf()
        }
    }
}

/// Ensure base URLs have a leading and trailing slash
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}/", segments.join("/"))
}
