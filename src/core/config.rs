//! Session configuration with documented constants
//!
//! Timing values here trade responsiveness of the battle display against
//! how long the simulation thread is parked waiting for the operator.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{CouncilError, Result};

/// Configuration for a battle session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // === STEP DISPLAY ===
    /// Delay between two animator ticks (milliseconds)
    ///
    /// Each tick moves the highlighted battle step forward by one. At 330ms
    /// a full round of eight steps is walked in under three seconds.
    pub step_interval_ms: u64,

    // === CONFIRMATIONS ===
    /// Whether plain confirmations wait for the operator
    ///
    /// When false, a confirmation auto-continues after
    /// `confirmation_timeout_ms`. When true the simulation thread waits
    /// until the operator presses continue (or shutdown fires).
    pub confirm_defensive_rolls: bool,

    /// Auto-continue delay for bounded confirmations (milliseconds)
    pub confirmation_timeout_ms: u64,

    // === CASUALTY CATEGORIES ===
    /// Keep units that can retreat apart from those that cannot
    pub separate_by_retreat_possibility: bool,

    /// Keep units with different transport costs apart
    pub separate_by_transport_cost: bool,

    // === UI THREAD ===
    /// Name given to the UI owner thread
    pub ui_thread_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: 330,

            confirm_defensive_rolls: false,
            confirmation_timeout_ms: 1500,

            separate_by_retreat_possibility: false,
            separate_by_transport_cost: false,

            ui_thread_name: "battle-ui".into(),
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.step_interval_ms == 0 {
            return Err(CouncilError::InvalidConfig(
                "step_interval_ms must be positive".into(),
            ));
        }

        // A zero timeout would make every bounded confirmation a no-op
        if self.confirmation_timeout_ms == 0 {
            return Err(CouncilError::InvalidConfig(
                "confirmation_timeout_ms must be positive".into(),
            ));
        }

        if self.ui_thread_name.trim().is_empty() {
            return Err(CouncilError::InvalidConfig(
                "ui_thread_name must not be empty".into(),
            ));
        }

        Ok(())
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Load a config from a TOML file
    pub fn load_from_toml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse a config from a TOML string, then validate it
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

// === GLOBAL CONFIG ACCESS ===

static CONFIG: OnceLock<SessionConfig> = OnceLock::new();

/// Get the global session config (initializes with defaults if not set)
pub fn config() -> &'static SessionConfig {
    CONFIG.get_or_init(SessionConfig::default)
}

/// Set the global session config (can only be called once)
///
/// Returns Err if config was already set.
pub fn set_config(config: SessionConfig) -> std::result::Result<(), SessionConfig> {
    CONFIG.set(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.step_interval(), Duration::from_millis(330));
        assert_eq!(config.confirmation_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = SessionConfig {
            step_interval_ms: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CouncilError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let toml_content = r#"
step_interval_ms = 10
confirm_defensive_rolls = true
"#;
        let config = SessionConfig::parse_toml(toml_content).expect("Failed to parse TOML");
        assert_eq!(config.step_interval_ms, 10);
        assert!(config.confirm_defensive_rolls);
        assert_eq!(config.confirmation_timeout_ms, 1500);
        assert_eq!(config.ui_thread_name, "battle-ui");
    }

    #[test]
    fn test_parse_toml_rejects_invalid_values() {
        let result = SessionConfig::parse_toml("confirmation_timeout_ms = 0");
        assert!(result.is_err());

        let result = SessionConfig::parse_toml("step_interval_ms = \"fast\"");
        assert!(matches!(result, Err(CouncilError::TomlError(_))));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "ui_thread_name = \"dice-ui\"\n").expect("write config");

        let config = SessionConfig::load_from_toml(&path).expect("load config");
        assert_eq!(config.ui_thread_name, "dice-ui");

        let missing = SessionConfig::load_from_toml(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(CouncilError::IoError(_))));
    }
}
