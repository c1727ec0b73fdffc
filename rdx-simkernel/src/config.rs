//! Defines the configuration structure for the simulator.
//!
//! `SimConfig` is designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`, layered with `SIMKERNEL_*` environment
//! variables. This lets the clock's granularity, ceiling and pacing, the
//! random seed and tracing be chosen outside the model code.

use crate::common::Time;
use crate::error::SimResult;
use serde::Deserialize;
use std::path::Path;

/// The top-level configuration for the `Simulator`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimConfig {
    /// Seed for the simulator's random source. `None` draws from OS entropy
    /// unless a seed is passed to `single_run`.
    #[serde(default)]
    pub seed: Option<u64>,

    /// The clock value every run starts from.
    #[serde(default)]
    pub start_time: Time,

    /// Quantization step. Every scheduled date is rounded to a multiple of it.
    #[serde(default)]
    pub granularity: Option<Time>,

    /// Hard ceiling for the clock.
    #[serde(default)]
    pub max_time: Option<Time>,

    /// Real seconds to pause per simulated time unit. Unset means no pacing.
    #[serde(default)]
    pub realtime_scale: Option<f64>,

    /// Enables the diagnostic trace stack.
    #[serde(default)]
    pub trace: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            start_time: 0.0,
            granularity: None,
            max_time: None,
            realtime_scale: None,
            trace: false,
        }
    }
}

impl SimConfig {
    /// Loads a configuration file, overridden by `SIMKERNEL_*` variables.
    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("SIMKERNEL").try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> SimResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.start_time, 0.0);
        assert!(cfg.seed.is_none());
        assert!(!cfg.trace);
    }

    #[test]
    fn test_from_toml() {
        let cfg = SimConfig::from_toml_str(
            r#"
            seed = 42
            granularity = 0.5
            max_time = 100.0
            trace = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.granularity, Some(0.5));
        assert_eq!(cfg.max_time, Some(100.0));
        assert_eq!(cfg.start_time, 0.0);
        assert!(cfg.realtime_scale.is_none());
        assert!(cfg.trace);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = SimConfig::load("definitely-not-here.toml").unwrap();
        assert_eq!(cfg.granularity, None);
    }
}
