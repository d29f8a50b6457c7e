//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Wait/backoff policy governing one correlation or condition wait.
///
/// Durations are carried as milliseconds in config and scenario files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Interval between condition checks.
    #[serde(default = "default_poll_ms", rename = "poll_ms")]
    pub poll_interval_ms: u64,

    /// Maximum wall time before declaring "no matching event".
    #[serde(default = "default_window_ms", rename = "window_ms")]
    pub max_wait_ms: u64,

    /// Optional geometric growth applied to the poll interval.
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,

    /// After a first match binds, how long to keep draining for
    /// conflicting matches before settling the verdict.
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_window_ms: u64,
}

fn default_poll_ms() -> u64 {
    50
}

fn default_window_ms() -> u64 {
    5_000
}

fn default_coalesce_ms() -> u64 {
    150
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_ms(),
            max_wait_ms: default_window_ms(),
            backoff_multiplier: None,
            coalesce_window_ms: default_coalesce_ms(),
        }
    }
}

impl WaitPolicy {
    pub fn with_window(window: Duration) -> Self {
        Self {
            max_wait_ms: window.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Event retention buffer capacity. Sized to cover the longest
    /// configured wait window; late subscribers replay from here.
    pub event_buffer_capacity: usize,

    /// Default wait policy for steps that do not override it.
    pub wait: WaitPolicy,

    /// Where screenshots and reports land.
    pub artifact_dir: PathBuf,

    /// Capture a screenshot after every step, not just on request.
    pub screenshot_each_step: bool,

    /// Abort the scenario on the first driver error outside setup.
    /// Setup and login driver errors always abort.
    pub abort_on_driver_error: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            event_buffer_capacity: 1024,
            wait: WaitPolicy::default(),
            artifact_dir: PathBuf::from("vigil-results"),
            screenshot_each_step: false,
            abort_on_driver_error: false,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file, defaulting when absent.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self =
                toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.event_buffer_capacity == 0 {
            return Err(crate::Error::Config(
                "event_buffer_capacity must be nonzero".to_string(),
            ));
        }
        if self.wait.max_wait_ms == 0 {
            return Err(crate::Error::Config("window_ms must be nonzero".to_string()));
        }
        if let Some(m) = self.wait.backoff_multiplier {
            if m < 1.0 {
                return Err(crate::Error::Config(
                    "backoff_multiplier must be >= 1.0".to_string(),
                ));
            }
        }
        Ok(())
    }
}
