//! Worker configuration with TOML support.
//!
//! Every field has a default matching the bridge's built-in constants, and
//! the struct uses `#[serde(default)]` so a partial TOML file (e.g. only
//! overriding `poll_interval_ms`) works.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GearsError;

/// Environment variable naming a TOML options file read by the C ABI at
/// worker start.
pub const CONFIG_ENV: &str = "GEARS_CONFIG";

/// How the worker holds the queue lock while it executes jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Hold the lock for the whole drain cycle, including fence waits.
    /// Producers block behind GPU completion.
    #[default]
    HoldLock,
    /// Take the lock only to pop each job and to publish its result.
    ReleaseLock,
}

/// Adapter selection hint forwarded to the headless device bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    /// Prefer a discrete / high-performance adapter.
    #[default]
    HighPerformance,
    /// Prefer an integrated / low-power adapter.
    LowPower,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(p: PowerPreference) -> Self {
        match p {
            PowerPreference::HighPerformance => Self::HighPerformance,
            PowerPreference::LowPower => Self::LowPower,
        }
    }
}

/// Runtime options for the GPU worker and its backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerOptions {
    /// Sleep between drain cycles, in milliseconds.
    pub poll_interval_ms: u64,
    /// Lock policy during job execution.
    pub execution: ExecutionMode,
    /// Bracket each creation job with a graphics-debugger capture.
    pub frame_capture: bool,
    /// Adapter selection hint.
    pub power_preference: PowerPreference,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            execution: ExecutionMode::HoldLock,
            frame_capture: false,
            power_preference: PowerPreference::HighPerformance,
        }
    }
}

impl WorkerOptions {
    /// Sleep between drain cycles.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GearsError::Io`] if the file cannot be read, or
    /// [`GearsError::OptionsParse`] if it is not valid options TOML.
    pub fn load(path: &Path) -> Result<Self, GearsError> {
        let content = std::fs::read_to_string(path).map_err(GearsError::Io)?;
        toml::from_str(&content)
            .map_err(|e| GearsError::OptionsParse(e.to_string()))
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// Returns [`GearsError::OptionsParse`] if serialization fails or
    /// [`GearsError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), GearsError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GearsError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(GearsError::Io)?;
        }
        std::fs::write(path, content).map_err(GearsError::Io)
    }

    /// Options from the file named by [`CONFIG_ENV`], or defaults when the
    /// variable is unset. A broken file is logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let Some(path) = std::env::var_os(CONFIG_ENV) else {
            return Self::default();
        };
        match Self::load(Path::new(&path)) {
            Ok(options) => options,
            Err(e) => {
                log::warn!(
                    "Gears:: ignoring {CONFIG_ENV}={}: {e}",
                    Path::new(&path).display()
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = WorkerOptions::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: WorkerOptions = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
poll_interval_ms = 5
execution = "release_lock"
"#;
        let opts: WorkerOptions = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.poll_interval(), Duration::from_millis(5));
        assert_eq!(opts.execution, ExecutionMode::ReleaseLock);
        // Everything else should be default
        assert!(!opts.frame_capture);
        assert_eq!(opts.power_preference, PowerPreference::HighPerformance);
    }

    #[test]
    fn retired_offscreen_size_key_is_ignored() {
        let opts: WorkerOptions =
            toml::from_str("offscreen_size = 256\npoll_interval_ms = 7\n")
                .unwrap();
        assert_eq!(
            opts,
            WorkerOptions { poll_interval_ms: 7, ..WorkerOptions::default() }
        );
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir()
            .join(format!("gears-options-{}", std::process::id()));
        let path = dir.join("worker.toml");
        let opts = WorkerOptions {
            frame_capture: true,
            power_preference: PowerPreference::LowPower,
            ..WorkerOptions::default()
        };
        opts.save(&path).unwrap();
        assert_eq!(WorkerOptions::load(&path).unwrap(), opts);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_execution_mode_is_rejected() {
        let err = toml::from_str::<WorkerOptions>(r#"execution = "sometimes""#);
        assert!(err.is_err());
    }
}
