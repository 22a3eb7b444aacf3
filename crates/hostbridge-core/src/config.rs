//! Bridge configuration loaded from YAML.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Sentinel};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "HOSTBRIDGE_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Remote host settings
    pub host: HostSettings,
    /// Terminal type and geometry requested from the host
    pub terminal: TerminalSettings,
    /// Framing conventions
    pub protocol: ProtocolSettings,
    /// Sign-in negotiation
    pub login: LoginSettings,
    /// Output history bounds
    pub history: HistorySettings,
    /// HTTP server settings
    pub server: ServerSettings,
}

impl BridgeConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    /// Returns error if the YAML is malformed or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve and load configuration.
    ///
    /// Order: `explicit`, then `$HOSTBRIDGE_CONFIG`, then
    /// `<config dir>/hostbridge/config.yaml`, then built-in defaults.
    ///
    /// # Errors
    /// Returns error if a named file is unreadable or invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }
        if let Some(path) = default_config_path().filter(|p| p.is_file()) {
            tracing::debug!(path = %path.display(), "Loading configuration");
            return Self::from_file(path);
        }
        Ok(Self::default())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.address.trim().is_empty() {
            return Err(invalid("host.address cannot be empty"));
        }
        if self.host.port == 0 {
            return Err(invalid("host.port must be > 0"));
        }
        if self.terminal.cols == 0 || self.terminal.rows == 0 {
            return Err(invalid("terminal dimensions must be > 0"));
        }
        if self.protocol.line_terminator.is_empty() {
            return Err(invalid("protocol.line_terminator cannot be empty"));
        }
        let sentinel = self.protocol.sentinel;
        if sentinel.is_whitespace() || self.protocol.line_terminator.contains(sentinel) {
            return Err(invalid(
                "protocol.sentinel must not be whitespace or part of the line terminator",
            ));
        }
        if self.login.max_rounds == 0 {
            return Err(invalid("login.max_rounds must be > 0"));
        }
        if self.login.wait_timeout_ms == 0 {
            return Err(invalid("login.wait_timeout_ms must be > 0"));
        }
        if self.history.max_chars == 0 {
            return Err(invalid("history.max_chars must be > 0"));
        }
        self.login.markers.validate()
    }

    /// The configured sentinel as a framing value.
    #[must_use]
    pub const fn sentinel(&self) -> Sentinel {
        Sentinel::new(self.protocol.sentinel)
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hostbridge").join("config.yaml"))
}

/// Remote host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Host name or address
    pub address: String,
    /// SSH port
    pub port: u16,
    /// Account used to reach the host's login prompt
    pub user: String,
    /// SSH client executable
    pub ssh_program: String,
    /// Extra client arguments, shell-quoted
    pub ssh_options: String,
    /// How long to wait for the first output after connecting
    pub connect_timeout_ms: u64,
}

impl HostSettings {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 22,
            user: "hostbridge".to_string(),
            ssh_program: "ssh".to_string(),
            ssh_options: String::new(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Terminal type and geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    /// Value of `TERM` announced to the host
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            term: "vt100".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Framing conventions over the unframed stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Reserved delimiter sent after each command
    pub sentinel: char,
    /// Appended by line-oriented sends
    pub line_terminator: String,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            sentinel: Sentinel::DEFAULT_CHAR,
            line_terminator: "\r".to_string(),
        }
    }
}

/// Sign-in negotiation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSettings {
    /// Upper bound on negotiation rounds
    pub max_rounds: usize,
    /// Deadline for each wait
    pub wait_timeout_ms: u64,
    /// Prompts recognized during negotiation
    pub markers: LoginMarkers,
}

impl LoginSettings {
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            wait_timeout_ms: 30_000,
            markers: LoginMarkers::default(),
        }
    }
}

/// Host prompts recognized by substring during sign-in.
///
/// Candidates are checked in field order: rejections first, then the
/// main menu, then continuation prompts, then unknown prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginMarkers {
    pub rejected: Vec<String>,
    pub verify_code_change: Vec<String>,
    pub main_menu: Vec<String>,
    pub continue_prompts: Vec<ContinuePrompt>,
    /// Answered with a bare line terminator.
    ///
    /// The default only covers default-answer prompts (`//`). A catch-all
    /// such as `": "` would also match the access code prompt the host
    /// greets with, so site-specific prompts belong here instead. Any other
    /// prompt ends the round at the wait deadline.
    pub unknown_prompts: Vec<String>,
}

impl LoginMarkers {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.main_menu.is_empty() {
            return Err(invalid("login.markers.main_menu needs at least one marker"));
        }
        let all = self
            .rejected
            .iter()
            .chain(&self.verify_code_change)
            .chain(&self.main_menu)
            .chain(self.continue_prompts.iter().map(|p| &p.marker))
            .chain(&self.unknown_prompts);
        for marker in all {
            if marker.is_empty() {
                return Err(invalid("login markers cannot be empty"));
            }
        }
        Ok(())
    }
}

impl Default for LoginMarkers {
    fn default() -> Self {
        Self {
            rejected: vec!["Not a valid ACCESS CODE/VERIFY CODE pair".to_string()],
            verify_code_change: vec![
                "VERIFY CODE must be changed".to_string(),
                "You must change your VERIFY CODE".to_string(),
            ],
            main_menu: vec!["ption:".to_string()],
            continue_prompts: vec![
                ContinuePrompt::new("Press 'RETURN' to continue", "\r"),
                ContinuePrompt::new("Type <Enter> to continue", "\r"),
                ContinuePrompt::new("Press any key to continue", " "),
            ],
            unknown_prompts: vec!["//".to_string()],
        }
    }
}

/// Prompt answered with a single keystroke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuePrompt {
    pub marker: String,
    pub key: String,
}

impl ContinuePrompt {
    #[must_use]
    pub fn new(marker: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            key: key.into(),
        }
    }
}

/// Output history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Maximum characters retained
    pub max_chars: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { max_chars: 100_000 }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address
    pub bind: String,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_ok!(BridgeConfig::default().validate());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = assert_ok!(BridgeConfig::from_yaml(
            "host:\n  address: vista.example.org\n  port: 2222\nhistory:\n  max_chars: 500\n"
        ));
        assert_eq!(config.host.address, "vista.example.org");
        assert_eq!(config.host.port, 2222);
        assert_eq!(config.host.user, "hostbridge");
        assert_eq!(config.history.max_chars, 500);
        assert_eq!(config.login.max_rounds, 20);
        assert_eq!(config.terminal.cols, 80);
    }

    #[test]
    fn test_sentinel_from_yaml() {
        let config = assert_ok!(BridgeConfig::from_yaml("protocol:\n  sentinel: \"~\"\n"));
        assert_eq!(config.sentinel().as_char(), '~');
    }

    #[test]
    fn test_rejects_zero_geometry() {
        let err = assert_err!(BridgeConfig::from_yaml("terminal:\n  cols: 0\n"));
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_sentinel_in_terminator() {
        let yaml = "protocol:\n  sentinel: \"\\r\"\n  line_terminator: \"\\r\"\n";
        assert_err!(BridgeConfig::from_yaml(yaml));
    }

    #[test]
    fn test_rejects_empty_main_menu() {
        assert_err!(BridgeConfig::from_yaml("login:\n  markers:\n    main_menu: []\n"));
    }

    #[test]
    fn test_missing_file() {
        let err = assert_err!(BridgeConfig::from_file("/nonexistent/hostbridge.yaml"));
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
