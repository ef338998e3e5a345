//! Loop driver and the state it exposes to callbacks.
//!
//! One iteration runs to completion before the next begins:
//! 1. pull a batch (exhaustion ends the run as `Completed`),
//! 2. advance [`Elapsed`] by the batch size and the wall-clock delta,
//! 3. run the step computation and merge its logs and state,
//! 4. evaluate every schedule in registration order and dispatch the
//!    callbacks of those that fire,
//! 5. commit the accumulated logs to [`History`],
//! 6. stop if a callback asked to (`Stopped`) or the stop schedule is
//!    reached (`Completed`).
//!
//! The driver owns the [`LoopState`] for the whole run and is its only writer.

use crate::callback::{self, CallbackOutput, LoopCallback, Metadata};
use crate::elapsed::Elapsed;
use crate::error::{BoxError, LoopError, LoopFailure};
use crate::history::History;
use crate::logs::Logs;
use crate::schedule::Schedule;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Anything that knows how many samples it carries.
pub trait BatchSize {
    fn batch_size(&self) -> u64;
}

impl<T> BatchSize for Vec<T> {
    fn batch_size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T> BatchSize for [T] {
    fn batch_size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T, const N: usize> BatchSize for [T; N] {
    fn batch_size(&self) -> u64 {
        N as u64
    }
}

/// `(inputs, targets)` pairs count the samples of their first element.
impl<X: BatchSize, Y> BatchSize for (X, Y) {
    fn batch_size(&self) -> u64 {
        self.0.batch_size()
    }
}

impl<T: BatchSize + ?Sized> BatchSize for &T {
    fn batch_size(&self) -> u64 {
        (**self).batch_size()
    }
}

/// Monotonic time source for the `time` unit of [`Elapsed`].
pub trait Clock {
    /// Time since an arbitrary fixed origin; never decreases.
    fn now(&mut self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&mut self) -> Duration {
        self.origin.elapsed()
    }
}

/// Deterministic clock that moves forward by `tick` on every reading.
#[derive(Debug, Clone)]
pub struct ManualClock {
    tick: Duration,
    current: Duration,
}

impl ManualClock {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            current: Duration::ZERO,
        }
    }
}

impl Clock for ManualClock {
    fn now(&mut self) -> Duration {
        self.current = self.current.saturating_add(self.tick);
        self.current
    }
}

/// Lifecycle of a [`LoopDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Idle,
    Running,
    /// Dataset exhausted or stop schedule reached.
    Completed,
    /// A callback requested early termination.
    Stopped,
    Failed,
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopStatus::Completed | LoopStatus::Stopped | LoopStatus::Failed
        )
    }

    fn can_transition_to(self, next: LoopStatus) -> bool {
        matches!(
            (self, next),
            (LoopStatus::Idle, LoopStatus::Running)
                | (LoopStatus::Running, LoopStatus::Completed)
                | (LoopStatus::Running, LoopStatus::Stopped)
                | (LoopStatus::Running, LoopStatus::Failed)
        )
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopStatus::Idle => write!(f, "idle"),
            LoopStatus::Running => write!(f, "running"),
            LoopStatus::Completed => write!(f, "completed"),
            LoopStatus::Stopped => write!(f, "stopped"),
            LoopStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The per-run context every callback reads.
///
/// Callbacks only ever see `&LoopState`; changes go through
/// [`CallbackOutput`] and are applied by the driver.
#[derive(Debug, Clone)]
pub struct LoopState<S, B> {
    pub(crate) state: S,
    pub(crate) batch: Option<B>,
    pub(crate) history: History,
    pub(crate) elapsed: Elapsed,
    pub(crate) logs: Logs,
    pub(crate) accumulated_logs: Logs,
    pub(crate) metadata: Metadata,
    pub(crate) stop_iteration: bool,
}

impl<S, B> LoopState<S, B> {
    /// Fresh context at zero progress with no batch.
    pub fn new(state: S) -> Self {
        Self {
            state,
            batch: None,
            history: History::new(),
            elapsed: Elapsed::ZERO,
            logs: Logs::new(),
            accumulated_logs: Logs::new(),
            metadata: Metadata::new(),
            stop_iteration: false,
        }
    }

    /// Set the progress snapshot; for exercising callbacks outside a driver.
    pub fn with_elapsed(mut self, elapsed: Elapsed) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_batch(mut self, batch: B) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_accumulated_logs(mut self, logs: Logs) -> Self {
        self.accumulated_logs = logs;
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Current batch; `None` during `on_start` / `on_end` hooks.
    pub fn batch(&self) -> Option<&B> {
        self.batch.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn elapsed(&self) -> &Elapsed {
        &self.elapsed
    }

    /// Raw logs of this iteration's step computation.
    pub fn logs(&self) -> &Logs {
        &self.logs
    }

    /// Logs merged so far in this iteration.
    pub fn accumulated_logs(&self) -> &Logs {
        &self.accumulated_logs
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn stop_iteration(&self) -> bool {
        self.stop_iteration
    }
}

/// Result of a run that reached `Completed` or `Stopped`.
#[derive(Debug, Clone)]
pub struct LoopOutcome<S> {
    pub state: S,
    pub history: History,
    pub elapsed: Elapsed,
    pub status: LoopStatus,
    /// Metadata written by callbacks over the whole run.
    pub metadata: Metadata,
}

type StepFn<'a, S, B> = Box<dyn FnMut(&S, &B) -> Result<(Logs, S), BoxError> + 'a>;
type BoxedCallback<'a, S, B> = Box<dyn LoopCallback<S, B> + 'a>;

struct Scheduled<'a, S, B> {
    schedule: Box<dyn Schedule + 'a>,
    callbacks: Vec<BoxedCallback<'a, S, B>>,
}

/// Builder and state machine for one training loop run.
pub struct LoopDriver<'a, S, B> {
    step: Option<StepFn<'a, S, B>>,
    scheduled: Vec<Scheduled<'a, S, B>>,
    on_start: Vec<BoxedCallback<'a, S, B>>,
    on_end: Vec<BoxedCallback<'a, S, B>>,
    stop: Option<Box<dyn Schedule + 'a>>,
    clock: Box<dyn Clock + 'a>,
    status: LoopStatus,
}

impl<S, B> Default for LoopDriver<'_, S, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, S, B> LoopDriver<'a, S, B> {
    pub fn new() -> Self {
        Self {
            step: None,
            scheduled: Vec::new(),
            on_start: Vec::new(),
            on_end: Vec::new(),
            stop: None,
            clock: Box::new(SystemClock::new()),
            status: LoopStatus::Idle,
        }
    }

    /// Per-batch computation returning `(logs, new_state)`; runs before any schedule.
    pub fn step<F>(mut self, step: F) -> Self
    where
        F: FnMut(&S, &B) -> Result<(Logs, S), BoxError> + 'a,
    {
        self.step = Some(Box::new(step));
        self
    }

    /// Register one callback under its own schedule.
    pub fn on<Sch, C>(self, schedule: Sch, callback: C) -> Self
    where
        Sch: Schedule + 'a,
        C: LoopCallback<S, B> + 'a,
    {
        self.on_all(schedule, vec![Box::new(callback)])
    }

    /// Register callbacks that run in order whenever `schedule` fires.
    pub fn on_all<Sch>(mut self, schedule: Sch, callbacks: Vec<BoxedCallback<'a, S, B>>) -> Self
    where
        Sch: Schedule + 'a,
    {
        self.scheduled.push(Scheduled {
            schedule: Box::new(schedule),
            callbacks,
        });
        self
    }

    /// Callback run once before the first batch.
    pub fn on_start<C>(mut self, callback: C) -> Self
    where
        C: LoopCallback<S, B> + 'a,
    {
        self.on_start.push(Box::new(callback));
        self
    }

    /// Callback run once after the loop completes or stops. Skipped on failure.
    pub fn on_end<C>(mut self, callback: C) -> Self
    where
        C: LoopCallback<S, B> + 'a,
    {
        self.on_end.push(Box::new(callback));
        self
    }

    /// Stop condition checked after every commit, typically an [`At`](crate::schedule::At).
    pub fn stop_at<Sch>(mut self, schedule: Sch) -> Self
    where
        Sch: Schedule + 'a,
    {
        self.stop = Some(Box::new(schedule));
        self
    }

    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'a,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn status(&self) -> LoopStatus {
        self.status
    }

    fn transition(&mut self, next: LoopStatus) -> Result<(), LoopError> {
        if !self.status.can_transition_to(next) {
            return Err(LoopError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        debug!(from = %self.status, to = %next, "Loop status changed");
        self.status = next;
        Ok(())
    }
}

impl<'a, S, B: BatchSize> LoopDriver<'a, S, B> {
    /// Drive `dataset` to completion, early stop, or failure.
    ///
    /// On failure the returned [`LoopFailure`] still carries every commit made
    /// before the failing iteration.
    pub fn run<I>(&mut self, state: S, dataset: I) -> Result<LoopOutcome<S>, LoopFailure>
    where
        I: IntoIterator<Item = B>,
    {
        if let Err(error) = self.transition(LoopStatus::Running) {
            return Err(LoopFailure {
                error,
                history: History::new(),
                elapsed: Elapsed::ZERO,
            });
        }
        info!(
            schedules = self.scheduled.len(),
            has_step = self.step.is_some(),
            stop = self.stop.as_ref().map(|s| s.describe()).unwrap_or_default(),
            "Loop started"
        );

        let mut ctx = LoopState::new(state);
        match self.drive(&mut ctx, dataset.into_iter()) {
            Ok(status) => {
                self.status = status;
                info!(
                    status = %status,
                    steps = ctx.elapsed.steps,
                    samples = ctx.elapsed.samples,
                    secs = ctx.elapsed.time.as_secs_f64(),
                    commits = ctx.history.len(),
                    "Loop finished"
                );
                Ok(LoopOutcome {
                    state: ctx.state,
                    history: ctx.history,
                    elapsed: ctx.elapsed,
                    status,
                    metadata: ctx.metadata,
                })
            }
            Err(error) => {
                self.status = LoopStatus::Failed;
                warn!(
                    error = %error,
                    steps = ctx.elapsed.steps,
                    commits = ctx.history.len(),
                    "Loop failed"
                );
                Err(LoopFailure {
                    error,
                    history: ctx.history,
                    elapsed: ctx.elapsed,
                })
            }
        }
    }

    fn drive(
        &mut self,
        ctx: &mut LoopState<S, B>,
        batches: impl Iterator<Item = B>,
    ) -> Result<LoopStatus, LoopError> {
        run_hooks("on_start", &mut self.on_start, ctx)?;
        let status = if ctx.stop_iteration {
            LoopStatus::Stopped
        } else {
            self.iterate(ctx, batches)?
        };
        ctx.batch = None;
        run_hooks("on_end", &mut self.on_end, ctx)?;
        Ok(status)
    }

    fn iterate(
        &mut self,
        ctx: &mut LoopState<S, B>,
        mut batches: impl Iterator<Item = B>,
    ) -> Result<LoopStatus, LoopError> {
        let mut last_tick = self.clock.now();
        loop {
            let Some(batch) = batches.next() else {
                debug!(steps = ctx.elapsed.steps, "Dataset exhausted");
                return Ok(LoopStatus::Completed);
            };
            let now = self.clock.now();
            ctx.elapsed = ctx
                .elapsed
                .advance(batch.batch_size(), now.saturating_sub(last_tick));
            last_tick = now;

            ctx.logs = Logs::new();
            if let Some(step) = self.step.as_mut() {
                let (logs, state) = step(&ctx.state, &batch).map_err(|err| {
                    warn!(error = %err, steps = ctx.elapsed.steps, "Step computation failed");
                    LoopError::User(err)
                })?;
                ctx.logs = logs.clone();
                callback::apply("step", CallbackOutput::both(logs, state), ctx)?;
            }
            ctx.batch = Some(batch);

            for scheduled in &mut self.scheduled {
                if !scheduled.schedule.evaluate(&ctx.elapsed) {
                    continue;
                }
                debug!(
                    schedule = %scheduled.schedule.describe(),
                    steps = ctx.elapsed.steps,
                    callbacks = scheduled.callbacks.len(),
                    "Schedule fired"
                );
                for cb in &mut scheduled.callbacks {
                    callback::dispatch(cb.as_mut(), ctx)?;
                }
            }

            let logs = std::mem::take(&mut ctx.accumulated_logs);
            trace!(steps = ctx.elapsed.steps, metrics = logs.len(), "Commit");
            ctx.history.commit(ctx.elapsed, logs);

            if ctx.stop_iteration {
                return Ok(LoopStatus::Stopped);
            }
            if let Some(stop) = self.stop.as_mut() {
                if stop.evaluate(&ctx.elapsed) {
                    return Ok(LoopStatus::Completed);
                }
            }
        }
    }
}

/// Lifecycle hooks apply state, stop requests and metadata; their logs are not committed.
fn run_hooks<S, B>(
    stage: &str,
    hooks: &mut [BoxedCallback<'_, S, B>],
    ctx: &mut LoopState<S, B>,
) -> Result<(), LoopError> {
    for hook in hooks.iter_mut() {
        callback::dispatch(hook.as_mut(), ctx)?;
    }
    if !ctx.accumulated_logs.is_empty() {
        debug!(
            stage,
            metrics = ctx.accumulated_logs.len(),
            "Discarding hook logs"
        );
        ctx.accumulated_logs = Logs::new();
    }
    Ok(())
}
