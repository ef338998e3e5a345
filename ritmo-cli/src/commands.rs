//! CLI subcommand handlers.

use crate::ConfigAction;
use crate::demo::{Batch, DataSpec, LinearModel, SyntheticData, evaluate, sgd_step};
use crate::persistence::export_history;
use crate::{Commands, RunArgs};
use ritmo_callbacks::{
    Checkpoint, EarlyStopping, MemoryCheckpointStore, ProgressLogger, inner_loop,
};
use ritmo_core::config::{load_config, workspace_config_path};
use ritmo_core::{
    Elapsed, History, LoopCallback, LoopDriver, LoopStatus, TrainConfig, Unit, at, every,
};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => {
            let config = load_run_config(workspace, config_file, &args)?;
            let report = run_training(&config, &args)?;
            println!("{report}");
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

fn load_run_config(
    workspace: &Path,
    config_file: Option<&Path>,
    args: &RunArgs,
) -> anyhow::Result<TrainConfig> {
    let mut overrides = Vec::new();
    if let Some(steps) = args.steps {
        overrides.push(("stop.steps", serde_json::json!(steps)));
    }
    let config = load_config(Some(workspace), config_file, &overrides)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.validate()?;
    Ok(config)
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: LoopStatus,
    pub elapsed: Elapsed,
    pub commits: usize,
    pub train_loss: Option<f64>,
    /// Lowest validation loss and the step it was measured at.
    pub best_valid: Option<(f64, f64)>,
    pub checkpoints: usize,
    pub initial_distance: f64,
    pub final_distance: f64,
    pub history_path: Option<PathBuf>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {} after {} steps ({} samples, {:.2}s), {} commits",
            self.status,
            self.elapsed.steps,
            self.elapsed.samples,
            self.elapsed.time.as_secs_f64(),
            self.commits
        )?;
        if let Some(loss) = self.train_loss {
            writeln!(f, "  train loss:       {loss:.6}")?;
        }
        if let Some((loss, step)) = self.best_valid {
            writeln!(f, "  best loss_valid:  {loss:.6} (step {step})")?;
        }
        writeln!(f, "  checkpoints kept: {}", self.checkpoints)?;
        write!(
            f,
            "  distance to true model: {:.4} -> {:.4}",
            self.initial_distance, self.final_distance
        )?;
        if let Some(path) = &self.history_path {
            write!(f, "\n  history written to {}", path.display())?;
        }
        Ok(())
    }
}

fn last_value(history: &History, name: &str) -> Option<f64> {
    history.iter().rev().find_map(|entry| entry.logs.lookup_f64(name))
}

fn best_value(history: &History, name: &str) -> Option<(f64, f64)> {
    history
        .collect(Unit::Steps, &[name])
        .into_iter()
        .next()?
        .points
        .into_iter()
        .filter_map(|(step, value)| value.as_f64().map(|v| (v, step)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

/// Train the synthetic regression model with every stock callback wired in.
pub fn run_training(config: &TrainConfig, args: &RunArgs) -> anyhow::Result<RunReport> {
    let data = SyntheticData::generate(&DataSpec {
        features: args.features,
        train_samples: args.train_samples,
        valid_batches: config.eval.batches,
        batch_size: args.batch_size,
        noise: args.noise,
        seed: args.seed,
    });
    if data.train.is_empty() {
        anyhow::bail!("No training data: --train-samples must be at least 1");
    }
    info!(
        features = args.features,
        train_batches = data.train.len(),
        valid_batches = data.valid.len(),
        seed = args.seed,
        stop = %config.stop,
        "Generated synthetic dataset"
    );

    let initial = LinearModel::zeros(args.features);
    let initial_distance = initial.distance(&data.truth);
    let policy = config.fire_policy;
    let mut store: MemoryCheckpointStore<LinearModel> = MemoryCheckpointStore::new();
    let mut early: Option<EarlyStopping<LinearModel>> = if config.early_stopping.enabled {
        Some(EarlyStopping::from_config(&config.early_stopping)?)
    } else {
        None
    };

    let result = {
        let mut driver: LoopDriver<'_, LinearModel, &Batch> = LoopDriver::new()
            .step(sgd_step(args.learning_rate))
            .on(
                every(config.log.every)?.with_policy(policy),
                ProgressLogger::new("train").with_total(config.stop),
            );
        if !data.valid.is_empty() {
            let valid = &data.valid;
            let mut eval: Vec<Box<dyn LoopCallback<LinearModel, &Batch> + '_>> = vec![Box::new(
                inner_loop("valid", move |model: &LinearModel| evaluate(model, valid)),
            )];
            if config.checkpoint.enabled {
                eval.push(Box::new(Checkpoint::<LinearModel, _>::from_config(
                    &mut store,
                    &config.checkpoint,
                )?));
            }
            if let Some(early) = early.as_mut() {
                eval.push(Box::new(early));
            }
            driver = driver.on_all(every(config.eval.every)?.with_policy(policy), eval);
        }
        driver = driver.stop_at(at(config.stop));
        driver.run(initial, data.train.iter().cycle())
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(failure) => {
            if let Some(path) = &args.history_out {
                export_history(path, &failure.history)?;
                warn!(
                    path = %path.display(),
                    commits = failure.history.len(),
                    "Wrote partial history"
                );
            }
            return Err(anyhow::Error::new(failure));
        }
    };

    if let Some(path) = &args.history_out {
        export_history(path, &outcome.history)?;
        info!(path = %path.display(), commits = outcome.history.len(), "Wrote history");
    }

    Ok(RunReport {
        status: outcome.status,
        elapsed: outcome.elapsed,
        commits: outcome.history.len(),
        train_loss: last_value(&outcome.history, "loss"),
        best_valid: best_value(&outcome.history, "loss_valid"),
        checkpoints: store.len(),
        initial_distance,
        final_distance: outcome.state.distance(&data.truth),
        history_path: args.history_out.clone(),
    })
}

/// Write a default `.ritmo/config.toml`; returns the path and whether it was created.
pub fn init_config(workspace: &Path) -> anyhow::Result<(PathBuf, bool)> {
    let config_path = workspace_config_path(workspace);
    if config_path.exists() {
        return Ok((config_path, false));
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(&TrainConfig::default())?;
    std::fs::write(&config_path, toml_str)?;
    Ok((config_path, true))
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let (config_path, created) = init_config(workspace)?;
            if created {
                println!(
                    "Created default configuration at: {}",
                    config_path.display()
                );
            } else {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), config_file, &[])
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
