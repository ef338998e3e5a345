//! Checkpoint bookkeeping.
//!
//! [`Checkpoint`] decides *which* states are worth keeping: the `keep` best by a
//! monitored metric, or the `keep` most recent when no metric is monitored.
//! Persisting them is delegated to a [`CheckpointStore`].

use crate::error::{CallbackError, monitored_value};
use chrono::{DateTime, Utc};
use ritmo_core::config::{CheckpointConfig, Mode};
use ritmo_core::{
    BoxError, CallbackOutput, CallbackResult, ConfigError, Elapsed, LoopCallback, LoopState,
};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::{debug, info};
use uuid::Uuid;

pub const COUNT_KEY: &str = "checkpoint.count";
pub const BEST_ID_KEY: &str = "checkpoint.best_id";

/// Metadata about one saved state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub elapsed: Elapsed,
    /// Monitored metric value, absent when ranking by recency.
    pub value: Option<f64>,
}

/// Where checkpointed states live.
pub trait CheckpointStore<S> {
    fn save(&mut self, record: &CheckpointRecord, state: &S) -> Result<(), BoxError>;

    fn remove(&mut self, id: Uuid) -> Result<(), BoxError>;
}

impl<S, T> CheckpointStore<S> for &mut T
where
    T: CheckpointStore<S> + ?Sized,
{
    fn save(&mut self, record: &CheckpointRecord, state: &S) -> Result<(), BoxError> {
        (**self).save(record, state)
    }

    fn remove(&mut self, id: Uuid) -> Result<(), BoxError> {
        (**self).remove(id)
    }
}

/// In-memory store holding clones of the checkpointed states.
#[derive(Debug, Clone)]
pub struct MemoryCheckpointStore<S> {
    entries: Vec<(CheckpointRecord, S)>,
}

impl<S> Default for MemoryCheckpointStore<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S> MemoryCheckpointStore<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&S> {
        self.entries
            .iter()
            .find(|(record, _)| record.id == id)
            .map(|(_, state)| state)
    }

    /// Records in save order.
    pub fn records(&self) -> impl Iterator<Item = &CheckpointRecord> {
        self.entries.iter().map(|(record, _)| record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Clone> CheckpointStore<S> for MemoryCheckpointStore<S> {
    fn save(&mut self, record: &CheckpointRecord, state: &S) -> Result<(), BoxError> {
        self.entries.push((record.clone(), state.clone()));
        Ok(())
    }

    fn remove(&mut self, id: Uuid) -> Result<(), BoxError> {
        let before = self.entries.len();
        self.entries.retain(|(record, _)| record.id != id);
        if self.entries.len() == before {
            return Err(CallbackError::Store {
                operation: "remove".to_string(),
                message: format!("unknown checkpoint {id}"),
            }
            .into());
        }
        Ok(())
    }
}

/// Callback keeping the best (or latest) `keep` states in a store.
pub struct Checkpoint<S, St> {
    monitor: Option<String>,
    mode: Mode,
    keep: usize,
    store: St,
    /// Best first when monitoring, newest first otherwise.
    kept: Vec<CheckpointRecord>,
    _state: PhantomData<fn(&S)>,
}

impl<S, St: CheckpointStore<S>> Checkpoint<S, St> {
    /// Keep the `keep` best states by `monitor`.
    pub fn best(store: St, monitor: impl Into<String>, mode: Mode, keep: usize) -> Self {
        Self {
            monitor: Some(monitor.into()),
            mode,
            keep: keep.max(1),
            store,
            kept: Vec::new(),
            _state: PhantomData,
        }
    }

    /// Keep the `keep` most recent states.
    pub fn latest(store: St, keep: usize) -> Self {
        Self {
            monitor: None,
            mode: Mode::Min,
            keep: keep.max(1),
            store,
            kept: Vec::new(),
            _state: PhantomData,
        }
    }

    pub fn from_config(store: St, config: &CheckpointConfig) -> Result<Self, ConfigError> {
        if config.keep == 0 {
            return Err(ConfigError::Invalid {
                message: "checkpoint.keep must be at least 1".to_string(),
            });
        }
        Ok(match &config.monitor {
            Some(monitor) => Self::best(store, monitor, config.mode, config.keep),
            None => Self::latest(store, config.keep),
        })
    }

    /// Retained records, best (or newest) first.
    pub fn records(&self) -> &[CheckpointRecord] {
        &self.kept
    }

    pub fn best_record(&self) -> Option<&CheckpointRecord> {
        self.kept.first()
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn into_store(self) -> St {
        self.store
    }

    /// Position a new record takes in `kept`, or `None` if it does not qualify.
    fn rank(&self, value: Option<f64>) -> Option<usize> {
        let position = match value {
            // Ties go after existing records so earlier checkpoints win.
            Some(value) => self
                .kept
                .iter()
                .position(|r| r.value.is_none_or(|kept| self.mode.improved(value, kept, 0.0)))
                .unwrap_or(self.kept.len()),
            None => 0,
        };
        (position < self.keep).then_some(position)
    }
}

impl<S, B, St: CheckpointStore<S>> LoopCallback<S, B> for Checkpoint<S, St> {
    fn call(&mut self, ctx: &LoopState<S, B>) -> CallbackResult<S> {
        let value = match &self.monitor {
            Some(monitor) => {
                let Some(raw) = ctx.accumulated_logs().lookup(monitor) else {
                    debug!(
                        monitor = %monitor,
                        steps = ctx.elapsed().steps,
                        "Monitored metric not logged yet"
                    );
                    return Ok(CallbackOutput::none());
                };
                let value = monitored_value("checkpoint", monitor, raw)?;
                if value.is_nan() {
                    debug!(
                        monitor = %monitor,
                        steps = ctx.elapsed().steps,
                        "Skipping non-finite metric"
                    );
                    return Ok(CallbackOutput::none());
                }
                Some(value)
            }
            None => None,
        };

        let Some(position) = self.rank(value) else {
            debug!(value, steps = ctx.elapsed().steps, "Checkpoint not among the best");
            return Ok(CallbackOutput::none());
        };

        let record = CheckpointRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            elapsed: *ctx.elapsed(),
            value,
        };
        self.store.save(&record, ctx.state())?;
        info!(
            id = %record.id,
            steps = record.elapsed.steps,
            value,
            rank = position,
            "Checkpoint saved"
        );
        self.kept.insert(position, record);

        // A record leaves `kept` only once the store has dropped its state.
        while self.kept.len() > self.keep {
            let Some(evicted) = self.kept.last() else {
                break;
            };
            self.store.remove(evicted.id)?;
            debug!(id = %evicted.id, steps = evicted.elapsed.steps, "Checkpoint evicted");
            self.kept.pop();
        }

        let mut output = CallbackOutput::none().with_metadata(COUNT_KEY, self.kept.len());
        if let Some(best) = self.kept.first() {
            output = output.with_metadata(BEST_ID_KEY, best.id.to_string());
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        "checkpoint"
    }
}
