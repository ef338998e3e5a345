//! Periodic progress events.

use ritmo_core::{
    CallbackOutput, CallbackResult, Elapsed, LoopCallback, LoopState, Logs, Period, Unit,
};
use tracing::info;

/// Emits one `tracing` event per firing with progress, throughput and scalar metrics.
#[derive(Debug, Clone, Default)]
pub struct ProgressLogger {
    label: String,
    total: Option<Period>,
    last: Option<Elapsed>,
    emitted: u64,
}

impl ProgressLogger {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Known end of the run, used for the percentage field.
    pub fn with_total(mut self, total: Period) -> Self {
        self.total = Some(total);
        self
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Completion in percent of `total`.
///
/// A run stops once every set unit is reached, so the slowest unit decides.
pub fn percent_complete(elapsed: &Elapsed, total: &Period) -> Option<f64> {
    total
        .units()
        .filter_map(|unit| {
            let target = total.ticks(unit)?;
            if target == 0 {
                return Some(100.0);
            }
            Some((elapsed.ticks(unit) as f64 / target as f64 * 100.0).min(100.0))
        })
        .min_by(f64::total_cmp)
}

/// Steps per second between two snapshots.
pub fn steps_per_sec(from: &Elapsed, to: &Elapsed) -> Option<f64> {
    let delta = to.since(from);
    let secs = delta.axis_value(Unit::Time);
    (secs > 0.0).then(|| delta.steps as f64 / secs)
}

/// `name=value` pairs of the numeric metrics, in log order.
pub fn format_metrics(logs: &Logs) -> String {
    logs.iter()
        .filter_map(|(_, name, value)| value.as_f64().map(|v| format!("{name}={v:.4}")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl<S, B> LoopCallback<S, B> for ProgressLogger {
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S> {
        let elapsed = *ctx.elapsed();
        let percent = self
            .total
            .as_ref()
            .and_then(|total| percent_complete(&elapsed, total));
        let throughput = steps_per_sec(&self.last.unwrap_or(Elapsed::ZERO), &elapsed);
        info!(
            label = %self.label,
            steps = elapsed.steps,
            samples = elapsed.samples,
            secs = elapsed.time.as_secs_f64(),
            percent,
            steps_per_sec = throughput,
            metrics = %format_metrics(ctx.accumulated_logs()),
            "Progress"
        );
        self.last = Some(elapsed);
        self.emitted += 1;
        Ok(CallbackOutput::none())
    }

    fn name(&self) -> &str {
        "progress"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(steps: u64, samples: u64, ms: u64) -> Elapsed {
        Elapsed {
            steps,
            samples,
            time: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_percent_single_unit() {
        let pct = percent_complete(&at(25, 0, 0), &Period::steps(100)).unwrap();
        assert!((pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_uses_slowest_unit_and_clamps() {
        let total = Period::steps(10).with_samples(1000);
        let pct = percent_complete(&at(20, 250, 0), &total).unwrap();
        assert!((pct - 25.0).abs() < 1e-9);
        assert!(percent_complete(&at(1, 1, 0), &Period::default()).is_none());
    }

    #[test]
    fn test_steps_per_sec() {
        let rate = steps_per_sec(&at(10, 0, 1000), &at(30, 0, 3000)).unwrap();
        assert!((rate - 10.0).abs() < 1e-9);
        assert!(steps_per_sec(&at(1, 0, 5), &at(2, 0, 5)).is_none());
    }

    #[test]
    fn test_format_metrics_skips_non_numeric() {
        let mut logs = Logs::new();
        logs.add_loss("loss", 0.25)
            .add_metric("model", "linear")
            .add_metric("accuracy", 0.5);
        assert_eq!(format_metrics(&logs), "loss=0.2500 accuracy=0.5000");
    }

    #[test]
    fn test_call_counts_emissions_without_updates() {
        let mut logger = ProgressLogger::new("train").with_total(Period::steps(10));
        let ctx: LoopState<(), ()> = LoopState::new(()).with_elapsed(at(5, 5, 100));
        let out = logger.call(&ctx).unwrap();
        assert_eq!(out, CallbackOutput::none());
        assert_eq!(logger.emitted(), 1);
    }
}
