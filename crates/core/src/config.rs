use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CoreError;

/// Timing knobs for the autosave engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Inactivity required after the last edit to a row before it is saved.
    pub quiet_period_ms: u64,
    /// Minimum time the in-progress indicator stays visible.
    pub minimum_visible_ms: u64,
    /// Window after a bulk removal before a full reconciliation runs.
    pub batch_window_ms: u64,
    /// Times must fall on multiples of this many minutes.
    pub time_step_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 500,
            minimum_visible_ms: 1000,
            batch_window_ms: 1500,
            time_step_minutes: 15,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(s)?;
        if config.time_step_minutes == 0 {
            return Err(CoreError::InvalidData("time_step_minutes must be non-zero".into()));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn minimum_visible(&self) -> Duration {
        Duration::from_millis(self.minimum_visible_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = EngineConfig::from_toml_str("quiet_period_ms = 250").unwrap();
        assert_eq!(config.quiet_period(), Duration::from_millis(250));
        assert_eq!(config.minimum_visible(), Duration::from_millis(1000));
        assert_eq!(config.time_step_minutes, 15);
    }

    #[test]
    fn zero_time_step_is_rejected() {
        assert!(EngineConfig::from_toml_str("time_step_minutes = 0").is_err());
    }
}
