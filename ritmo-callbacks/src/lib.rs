//! # Ritmo Callbacks
//!
//! Stock callbacks built on the ritmo dispatch protocol: early stopping,
//! checkpoint bookkeeping, progress logging and nested loops.

pub mod checkpoint;
pub mod early_stopping;
pub mod error;
pub mod inner_loop;
pub mod progress;

pub use checkpoint::{Checkpoint, CheckpointRecord, CheckpointStore, MemoryCheckpointStore};
pub use early_stopping::EarlyStopping;
pub use error::CallbackError;
pub use inner_loop::{InnerLoop, inner_loop};
pub use progress::ProgressLogger;
