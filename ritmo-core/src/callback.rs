//! Callback dispatch protocol.
//!
//! Every callback receives the same immutable [`LoopState`] reference and
//! reports what it wants changed through its return value: an [`Update`]
//! (nothing, logs, state, or both), an optional stop request, and optional
//! metadata entries. The driver is the only writer of the loop state.

use crate::driver::LoopState;
use crate::error::{BoxError, CallbackProtocolError, LoopError};
use crate::logs::Logs;
use serde_json::Value;
use tracing::{debug, warn};

/// Open key/value store for callback-private bookkeeping.
pub type Metadata = serde_json::Map<String, Value>;

/// The four observable outcomes of a callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Update<S> {
    #[default]
    NoUpdate,
    LogsOnly(Logs),
    StateOnly(S),
    Both(Logs, S),
}

impl<S> Update<S> {
    pub fn into_parts(self) -> (Option<Logs>, Option<S>) {
        match self {
            Update::NoUpdate => (None, None),
            Update::LogsOnly(logs) => (Some(logs), None),
            Update::StateOnly(state) => (None, Some(state)),
            Update::Both(logs, state) => (Some(logs), Some(state)),
        }
    }
}

/// Full return value of a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutput<S> {
    pub update: Update<S>,
    /// Ask the driver to end the run after the current iteration is committed.
    pub stop_iteration: bool,
    /// Entries written into the loop metadata, overwriting existing keys.
    pub metadata: Metadata,
}

impl<S> Default for CallbackOutput<S> {
    fn default() -> Self {
        Self::none()
    }
}

impl<S> CallbackOutput<S> {
    pub fn none() -> Self {
        Self {
            update: Update::NoUpdate,
            stop_iteration: false,
            metadata: Metadata::new(),
        }
    }

    pub fn logs(logs: Logs) -> Self {
        Update::LogsOnly(logs).into()
    }

    pub fn state(state: S) -> Self {
        Update::StateOnly(state).into()
    }

    pub fn both(logs: Logs, state: S) -> Self {
        Update::Both(logs, state).into()
    }

    /// No update, but request the run to stop.
    pub fn stop() -> Self {
        Self::none().with_stop()
    }

    pub fn with_stop(mut self) -> Self {
        self.stop_iteration = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl<S> From<Update<S>> for CallbackOutput<S> {
    fn from(update: Update<S>) -> Self {
        Self {
            update,
            ..Self::none()
        }
    }
}

impl<S> From<Logs> for CallbackOutput<S> {
    fn from(logs: Logs) -> Self {
        Self::logs(logs)
    }
}

pub type CallbackResult<S> = Result<CallbackOutput<S>, BoxError>;

/// A unit of per-iteration side effect.
pub trait LoopCallback<S, B> {
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S>;

    /// Name used in log events and protocol errors.
    fn name(&self) -> &str {
        "callback"
    }
}

impl<S, B, C> LoopCallback<S, B> for Box<C>
where
    C: LoopCallback<S, B> + ?Sized,
{
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S> {
        (**self).call(ctx)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<S, B, C> LoopCallback<S, B> for &mut C
where
    C: LoopCallback<S, B> + ?Sized,
{
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S> {
        (**self).call(ctx)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Closure adapter created by [`callback_fn`].
pub struct FnCallback<F> {
    name: String,
    f: F,
}

/// Turn a closure into a named [`LoopCallback`].
pub fn callback_fn<S, B, F>(name: impl Into<String>, f: F) -> FnCallback<F>
where
    F: FnMut(&LoopState<S, B>) -> CallbackResult<S>,
{
    FnCallback {
        name: name.into(),
        f,
    }
}

impl<S, B, F> LoopCallback<S, B> for FnCallback<F>
where
    F: FnMut(&LoopState<S, B>) -> CallbackResult<S>,
{
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S> {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Invoke `callback` against `ctx` and apply its output.
///
/// Errors raised by the callback abort dispatch and are returned as
/// [`LoopError::User`] without being retried.
pub fn dispatch<S, B, C>(callback: &mut C, ctx: &mut LoopState<S, B>) -> Result<(), LoopError>
where
    C: LoopCallback<S, B> + ?Sized,
{
    let output = match callback.call(ctx) {
        Ok(output) => output,
        Err(err) => {
            warn!(
                callback = callback.name(),
                error = %err,
                steps = ctx.elapsed.steps,
                "Callback failed"
            );
            return Err(LoopError::User(err));
        }
    };
    debug!(callback = callback.name(), steps = ctx.elapsed.steps, "Callback dispatched");
    apply(callback.name(), output, ctx)
}

/// Apply a callback output: merge logs, replace state, raise stop, write metadata.
///
/// Returned logs are validated before anything is changed, so a protocol
/// violation leaves the context untouched.
pub fn apply<S, B>(
    name: &str,
    output: CallbackOutput<S>,
    ctx: &mut LoopState<S, B>,
) -> Result<(), LoopError> {
    let CallbackOutput {
        update,
        stop_iteration,
        metadata,
    } = output;
    let (logs, state) = update.into_parts();

    if let Some(logs) = logs {
        validate_logs(name, &logs)?;
        ctx.accumulated_logs.merge(logs);
    }
    if let Some(state) = state {
        ctx.state = state;
    }
    if stop_iteration {
        debug!(callback = name, steps = ctx.elapsed.steps, "Stop requested");
        ctx.stop_iteration = true;
    }
    ctx.metadata.extend(metadata);
    Ok(())
}

fn validate_logs(name: &str, logs: &Logs) -> Result<(), CallbackProtocolError> {
    if logs.categories().any(str::is_empty) {
        return Err(CallbackProtocolError::EmptyCategory {
            callback: name.to_string(),
        });
    }
    if let Some((category, _, _)) = logs.iter().find(|(_, metric, _)| metric.is_empty()) {
        return Err(CallbackProtocolError::EmptyMetricName {
            callback: name.to_string(),
            category: category.to_string(),
        });
    }
    Ok(())
}
