//! Nested loops run from inside a callback.
//!
//! The typical use is validation: every N steps, run a complete inner loop over
//! held-out data from the current state and report its final metrics under a
//! suffixed name (`loss` becomes `loss_valid`).

use ritmo_core::{
    CallbackOutput, CallbackResult, LoopCallback, LoopFailure, LoopOutcome, LoopState,
};
use tracing::debug;

/// Callback that runs an inner loop and reports its last committed logs.
pub struct InnerLoop<F> {
    name: String,
    run: F,
    keep_state: bool,
}

/// Build an [`InnerLoop`] named `name`; its metrics get the suffix `_{name}`.
pub fn inner_loop<F>(name: impl Into<String>, run: F) -> InnerLoop<F> {
    InnerLoop {
        name: name.into(),
        run,
        keep_state: false,
    }
}

impl<F> InnerLoop<F> {
    /// Replace the outer state with the inner loop's final state.
    pub fn keep_state(mut self, keep: bool) -> Self {
        self.keep_state = keep;
        self
    }
}

impl<S, B, F> LoopCallback<S, B> for InnerLoop<F>
where
    F: FnMut(&S) -> Result<LoopOutcome<S>, LoopFailure>,
{
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S> {
        let outcome = (self.run)(ctx.state())?;
        let logs = outcome
            .history
            .last()
            .map(|entry| entry.logs.suffixed(&self.name))
            .unwrap_or_default();
        debug!(
            inner = %self.name,
            inner_steps = outcome.elapsed.steps,
            metrics = logs.len(),
            steps = ctx.elapsed().steps,
            "Inner loop finished"
        );
        Ok(if self.keep_state {
            CallbackOutput::both(logs, outcome.state)
        } else {
            CallbackOutput::logs(logs)
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ritmo_core::logs::{LOSSES, STATEFUL_METRICS};
    use ritmo_core::{Logs, LoopDriver, Update};
    use serde_json::json;

    type Ctx = LoopState<f64, Vec<f64>>;

    /// Mean absolute error of a constant predictor, accumulated across batches.
    fn evaluate(state: &f64, data: &[Vec<f64>]) -> Result<LoopOutcome<f64>, LoopFailure> {
        let prediction = *state;
        let mut total = 0.0;
        let mut count = 0usize;
        let mut driver: LoopDriver<'_, f64, Vec<f64>> =
            LoopDriver::new().step(move |s: &f64, batch: &Vec<f64>| {
                total += batch.iter().map(|y| (y - prediction).abs()).sum::<f64>();
                count += batch.len();
                let mut logs = Logs::new();
                logs.add_loss("loss", 0.0);
                logs.add_stateful_metric("mae", total / count as f64);
                Ok((logs, *s))
            });
        driver.run(*state, data.to_vec())
    }

    #[test]
    fn test_suffixes_last_inner_logs() {
        let data = vec![vec![1.0, 3.0], vec![5.0]];
        let mut cb = inner_loop("valid", |state: &f64| evaluate(state, &data));
        let out = cb.call(&Ctx::new(2.0)).unwrap();
        let logs = match out.update {
            Update::LogsOnly(logs) => logs,
            other => panic!("expected logs only, got {other:?}"),
        };
        assert_eq!(logs.get(STATEFUL_METRICS, "mae_valid"), Some(&json!(5.0 / 3.0)));
        assert_eq!(logs.get(LOSSES, "loss_valid"), Some(&json!(0.0)));
        assert_eq!(logs.len(), 2);
    }

    #[test]
    fn test_keep_state_returns_both() {
        let mut cb = inner_loop("tune", |state: &f64| {
            let mut driver: LoopDriver<'_, f64, Vec<f64>> =
                LoopDriver::new().step(|s: &f64, _: &Vec<f64>| Ok((Logs::new(), s + 1.0)));
            driver.run(*state, vec![vec![0.0]; 3])
        })
        .keep_state(true);
        let out = cb.call(&Ctx::new(1.0)).unwrap();
        assert_eq!(out.update, Update::Both(Logs::new(), 4.0));
    }

    #[test]
    fn test_empty_inner_dataset_yields_empty_logs() {
        let mut cb = inner_loop("valid", |state: &f64| evaluate(state, &[]));
        let out = cb.call(&Ctx::new(0.0)).unwrap();
        assert_eq!(out.update, Update::LogsOnly(Logs::new()));
    }

    #[test]
    fn test_inner_failure_propagates() {
        let mut cb = inner_loop("valid", |state: &f64| {
            let mut driver: LoopDriver<'_, f64, Vec<f64>> =
                LoopDriver::new().step(|_: &f64, _: &Vec<f64>| Err("corrupt batch".into()));
            driver.run(*state, vec![vec![0.0]])
        });
        let err = cb.call(&Ctx::new(0.0)).unwrap_err();
        let failure = err.downcast_ref::<LoopFailure>().unwrap();
        assert_eq!(failure.error.to_string(), "corrupt batch");
        assert_eq!(LoopCallback::<f64, Vec<f64>>::name(&cb), "valid");
    }
}
