//! Early stopping on a monitored metric.
//!
//! Patience is a [`Period`] measured from the progress at the last
//! improvement, so "stop after 500 steps or 30 seconds without improving"
//! is expressed the same way as any other schedule.

use crate::error::monitored_value;
use ritmo_core::config::{EarlyStoppingConfig, Mode};
use ritmo_core::{
    CallbackOutput, CallbackResult, ConfigError, Elapsed, LoopCallback, LoopState, Period,
};
use tracing::{debug, info};

pub const BEST_KEY: &str = "early_stopping.best";
pub const WAIT_STEPS_KEY: &str = "early_stopping.wait_steps";

/// Requests a stop once `monitor` has not improved for `patience`.
#[derive(Debug, Clone)]
pub struct EarlyStopping<S> {
    monitor: String,
    mode: Mode,
    patience: Period,
    min_delta: f64,
    baseline: Option<f64>,
    restore_best: bool,
    best: Option<f64>,
    best_elapsed: Elapsed,
    best_state: Option<S>,
    stopped_at: Option<Elapsed>,
}

impl<S> EarlyStopping<S> {
    pub fn new(monitor: impl Into<String>, mode: Mode, patience: Period) -> Self {
        Self {
            monitor: monitor.into(),
            mode,
            patience,
            min_delta: 0.0,
            baseline: None,
            restore_best: false,
            best: None,
            best_elapsed: Elapsed::ZERO,
            best_state: None,
            stopped_at: None,
        }
    }

    pub fn from_config(config: &EarlyStoppingConfig) -> Result<Self, ConfigError> {
        if config.patience.is_empty() {
            return Err(ConfigError::EmptyPeriod {
                context: "early_stopping.patience".to_string(),
            });
        }
        Ok(Self::new(&config.monitor, config.mode, config.patience)
            .with_min_delta(config.min_delta)
            .with_baseline(config.baseline)
            .with_restore_best(config.restore_best))
    }

    /// Minimum change that counts as an improvement.
    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    /// Value the metric has to beat before anything counts as an improvement.
    pub fn with_baseline(mut self, baseline: Option<f64>) -> Self {
        self.baseline = baseline;
        self
    }

    /// Replace the state with the best one seen when stopping.
    pub fn with_restore_best(mut self, restore: bool) -> Self {
        self.restore_best = restore;
        self
    }

    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Progress at the last improvement.
    pub fn best_elapsed(&self) -> Elapsed {
        self.best_elapsed
    }

    /// Progress at which a stop was requested, if any.
    pub fn stopped_at(&self) -> Option<Elapsed> {
        self.stopped_at
    }
}

impl<S: Clone, B> LoopCallback<S, B> for EarlyStopping<S> {
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S> {
        let Some(value) = ctx.accumulated_logs().lookup(&self.monitor) else {
            debug!(
                monitor = %self.monitor,
                steps = ctx.elapsed().steps,
                "Monitored metric not logged yet"
            );
            return Ok(CallbackOutput::none());
        };
        // NaN fails every comparison, so a non-finite value only uses up patience.
        let current = monitored_value("early_stopping", &self.monitor, value)?;
        let elapsed = *ctx.elapsed();

        let reference = self
            .best
            .or(self.baseline)
            .unwrap_or_else(|| self.mode.worst());
        if self.mode.improved(current, reference, self.min_delta) {
            debug!(
                monitor = %self.monitor,
                value = current,
                steps = elapsed.steps,
                "Metric improved"
            );
            self.best = Some(current);
            self.best_elapsed = elapsed;
            if self.restore_best {
                self.best_state = Some(ctx.state().clone());
            }
            return Ok(CallbackOutput::none()
                .with_metadata(BEST_KEY, current)
                .with_metadata(WAIT_STEPS_KEY, 0u64));
        }

        let waited = elapsed.since(&self.best_elapsed);
        let output = if waited.ge(&self.patience) {
            info!(
                monitor = %self.monitor,
                best = self.best.or(self.baseline),
                waited_steps = waited.steps,
                patience = %self.patience,
                "Early stopping triggered"
            );
            self.stopped_at = Some(elapsed);
            match self.best_state.take() {
                Some(best_state) => CallbackOutput::state(best_state).with_stop(),
                None => CallbackOutput::stop(),
            }
        } else {
            CallbackOutput::none()
        };
        Ok(output
            .with_metadata(BEST_KEY, self.best.or(self.baseline))
            .with_metadata(WAIT_STEPS_KEY, waited.steps))
    }

    fn name(&self) -> &str {
        "early_stopping"
    }
}
