//! Configuration for training runs.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> workspace config ->
//! explicit file -> environment -> overrides. Configuration is loaded from
//! `~/.config/ritmo/config.toml` and/or `.ritmo/config.toml` in the workspace directory.

use crate::elapsed::Period;
use crate::error::ConfigError;
use crate::schedule::FirePolicy;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Direction in which a monitored metric improves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Min,
    Max,
}

impl Mode {
    /// Whether `candidate` beats `best` by more than `min_delta`.
    pub fn improved(self, candidate: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Mode::Min => candidate < best - min_delta,
            Mode::Max => candidate > best + min_delta,
        }
    }

    /// Value every real metric improves on.
    pub fn worst(self) -> f64 {
        match self {
            Mode::Min => f64::INFINITY,
            Mode::Max => f64::NEG_INFINITY,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Min => write!(f, "min"),
            Mode::Max => write!(f, "max"),
        }
    }
}

/// Top-level configuration for a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Stop condition; the run ends once every set unit is reached.
    pub stop: Period,
    /// Firing policy for multi-unit `every` schedules.
    pub fire_policy: FirePolicy,
    pub log: LogConfig,
    pub eval: EvalConfig,
    pub early_stopping: EarlyStoppingConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            stop: Period::steps(200),
            fire_policy: FirePolicy::Any,
            log: LogConfig::default(),
            eval: EvalConfig::default(),
            early_stopping: EarlyStoppingConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

/// Progress logging cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub every: Period,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            every: Period::steps(20),
        }
    }
}

/// Periodic evaluation on held-out data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub every: Period,
    /// Number of validation batches per evaluation.
    pub batches: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            every: Period::steps(50),
            batches: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub enabled: bool,
    /// Metric name looked up in the accumulated logs.
    pub monitor: String,
    pub mode: Mode,
    /// Progress allowed without improvement before stopping.
    pub patience: Period,
    pub min_delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    pub restore_best: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor: "loss_valid".to_string(),
            mode: Mode::Min,
            patience: Period::steps(100),
            min_delta: 0.0,
            baseline: None,
            restore_best: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    /// Metric to rank checkpoints by; the latest ones are kept when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<String>,
    pub mode: Mode,
    /// Maximum number of checkpoints retained.
    pub keep: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor: Some("loss_valid".to_string()),
            mode: Mode::Min,
            keep: 3,
        }
    }
}

fn require_trigger(period: &Period, context: &str) -> Result<(), ConfigError> {
    if period.is_empty() {
        return Err(ConfigError::EmptyPeriod {
            context: context.to_string(),
        });
    }
    if let Some(unit) = period
        .units()
        .find(|unit| period.ticks(*unit) == Some(0))
    {
        return Err(ConfigError::ZeroPeriod { unit });
    }
    Ok(())
}

impl TrainConfig {
    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_trigger(&self.stop, "stop")?;
        require_trigger(&self.log.every, "log.every")?;
        if self.eval.batches > 0 {
            require_trigger(&self.eval.every, "eval.every")?;
        }
        if self.early_stopping.enabled {
            require_trigger(&self.early_stopping.patience, "early_stopping.patience")?;
            if self.early_stopping.monitor.is_empty() {
                return Err(ConfigError::Invalid {
                    message: "early_stopping.monitor must not be empty".to_string(),
                });
            }
            if self.early_stopping.min_delta < 0.0 {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "early_stopping.min_delta must be non-negative, got {}",
                        self.early_stopping.min_delta
                    ),
                });
            }
        }
        if self.checkpoint.enabled && self.checkpoint.keep == 0 {
            return Err(ConfigError::Invalid {
                message: "checkpoint.keep must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".ritmo").join("config.toml")
}

/// Path of the user-level config file, when a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ritmo", "ritmo")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from all layers.
///
/// `overrides` are dotted key paths such as `("stop.steps", 500.into())`, applied last.
pub fn load_config(
    workspace: Option<&Path>,
    file: Option<&Path>,
    overrides: &[(&str, serde_json::Value)],
) -> Result<TrainConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrainConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Explicit file must exist
    if let Some(path) = file {
        figment = figment.merge(Toml::file_exact(path));
    }

    // Environment variables (RITMO_STOP__STEPS, RITMO_EARLY_STOPPING__PATIENCE__STEPS, etc.)
    figment = figment.merge(Env::prefixed("RITMO_").split("__"));

    for (key, value) in overrides {
        figment = figment.merge(Serialized::default(key, value));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elapsed::Unit;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stop, Period::steps(200));
        assert_eq!(config.fire_policy, FirePolicy::Any);
        assert_eq!(config.checkpoint.keep, 3);
    }

    #[test]
    fn test_mode_improved() {
        assert!(Mode::Min.improved(0.4, 0.5, 0.0));
        assert!(!Mode::Min.improved(0.49, 0.5, 0.05));
        assert!(Mode::Max.improved(0.9, 0.8, 0.05));
        assert!(!Mode::Max.improved(0.8, 0.8, 0.0));
        assert!(Mode::Min.improved(1e9, Mode::Min.worst(), 0.0));
        assert!(Mode::Max.improved(-1e9, Mode::Max.worst(), 0.0));
    }

    #[test]
    fn test_validate_rejects_empty_stop() {
        let config = TrainConfig {
            stop: Period::default(),
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::EmptyPeriod {
                context: "stop".to_string()
            }
        );
    }

    #[test]
    fn test_validate_rejects_zero_log_period() {
        let mut config = TrainConfig::default();
        config.log.every = Period::samples(0);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::ZeroPeriod {
                unit: Unit::Samples
            }
        );
    }

    #[test]
    fn test_validate_checkpoint_keep() {
        let mut config = TrainConfig::default();
        config.checkpoint.keep = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
        config.checkpoint.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_skips_disabled_early_stopping() {
        let mut config = TrainConfig::default();
        config.early_stopping.patience = Period::default();
        assert!(config.validate().is_err());
        config.early_stopping.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = TrainConfig::default();
        config.stop = Period::steps(500).with_time(Duration::from_millis(2500));
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("time = 2.5"));
        let back: TrainConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TrainConfig = toml::from_str(
            r#"
fire_policy = "all"

[early_stopping]
monitor = "accuracy_valid"
mode = "max"
"#,
        )
        .unwrap();
        assert_eq!(config.fire_policy, FirePolicy::All);
        assert_eq!(config.early_stopping.mode, Mode::Max);
        assert_eq!(config.early_stopping.patience, Period::steps(100));
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_load_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path()), None, &[]).unwrap();
        assert_eq!(config.stop.steps, Some(200));
        assert_eq!(config.eval.batches, 4);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ritmo_dir = dir.path().join(".ritmo");
        std::fs::create_dir_all(&ritmo_dir).unwrap();
        std::fs::write(
            ritmo_dir.join("config.toml"),
            r#"
[log]
every = { samples = 640 }

[checkpoint]
keep = 5
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None, &[]).unwrap();
        assert_eq!(config.log.every.samples, Some(640));
        assert_eq!(config.checkpoint.keep, 5);
        assert_eq!(config.stop.steps, Some(200));
    }

    #[test]
    fn test_explicit_file_beats_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ritmo_dir = dir.path().join(".ritmo");
        std::fs::create_dir_all(&ritmo_dir).unwrap();
        std::fs::write(ritmo_dir.join("config.toml"), "[eval]\nbatches = 2\n").unwrap();
        let explicit = dir.path().join("run.toml");
        std::fs::write(&explicit, "[eval]\nbatches = 8\n").unwrap();

        let config = load_config(Some(dir.path()), Some(&explicit), &[]).unwrap();
        assert_eq!(config.eval.batches, 8);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(None, Some(&missing), &[]).is_err());
    }

    #[test]
    fn test_load_config_with_overrides() {
        let config = load_config(
            None,
            None,
            &[
                ("stop.steps", serde_json::json!(42)),
                ("early_stopping.enabled", serde_json::json!(false)),
            ],
        )
        .unwrap();
        assert_eq!(config.stop.steps, Some(42));
        assert!(!config.early_stopping.enabled);
    }
}
