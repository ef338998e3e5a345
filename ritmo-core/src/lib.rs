//! # Ritmo Core
//!
//! Loop kernel for ritmo.
//! Provides progress tracking, schedules, structured logs, history,
//! the callback dispatch protocol, the loop driver, and configuration.

pub mod callback;
pub mod config;
pub mod driver;
pub mod elapsed;
pub mod error;
pub mod history;
pub mod logs;
pub mod schedule;

// Re-export commonly used types at the crate root.
pub use callback::{
    CallbackOutput, CallbackResult, FnCallback, LoopCallback, Metadata, Update, callback_fn,
    dispatch,
};
pub use config::{
    CheckpointConfig, EarlyStoppingConfig, EvalConfig, LogConfig, Mode, TrainConfig, load_config,
};
pub use driver::{
    BatchSize, Clock, LoopDriver, LoopOutcome, LoopState, LoopStatus, ManualClock, SystemClock,
};
pub use elapsed::{Elapsed, Period, Unit};
pub use error::{BoxError, CallbackProtocolError, ConfigError, LoopError, LoopFailure, Result};
pub use history::{History, HistoryEntry, Series};
pub use logs::Logs;
pub use schedule::{At, Every, FirePolicy, Schedule, at, every};
