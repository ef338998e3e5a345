//! Schedule predicates over [`Elapsed`] progress.
//!
//! [`Every`] is stateful and fires periodically; [`At`] is a stateless
//! threshold used as a stop condition. Any `FnMut(&Elapsed) -> bool` is a
//! schedule as well.

use crate::elapsed::{Elapsed, Period, Unit};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// A predicate over loop progress.
pub trait Schedule {
    /// Decide whether the schedule triggers at `elapsed`. May update internal state.
    fn evaluate(&mut self, elapsed: &Elapsed) -> bool;

    /// Short human-readable description used in log events.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

impl<F> Schedule for F
where
    F: FnMut(&Elapsed) -> bool,
{
    fn evaluate(&mut self, elapsed: &Elapsed) -> bool {
        self(elapsed)
    }
}

/// How an [`Every`] with several units decides to fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirePolicy {
    /// Fire when any unit crosses its own threshold; units keep independent cadences.
    #[default]
    Any,
    /// Fire only once every unit has crossed its threshold; all thresholds then advance together.
    All,
}

impl std::fmt::Display for FirePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirePolicy::Any => write!(f, "any"),
            FirePolicy::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone)]
struct Track {
    unit: Unit,
    period: u128,
    next: u128,
}

/// Periodic trigger, e.g. "every 1000 steps".
#[derive(Debug, Clone)]
pub struct Every {
    period: Period,
    policy: FirePolicy,
    tracks: Vec<Track>,
}

/// Build an [`Every`] schedule with the default [`FirePolicy::Any`].
pub fn every(period: Period) -> Result<Every, ConfigError> {
    Every::new(period)
}

/// Build an [`At`] schedule.
pub fn at(period: Period) -> At {
    At::new(period)
}

impl Every {
    /// The first firing happens once progress reaches one full period, never at zero.
    pub fn new(period: Period) -> Result<Self, ConfigError> {
        if period.is_empty() {
            return Err(ConfigError::EmptyPeriod {
                context: "every".to_string(),
            });
        }
        let mut tracks = Vec::new();
        for unit in period.units() {
            let ticks = period.ticks(unit).unwrap_or_default();
            if ticks == 0 {
                return Err(ConfigError::ZeroPeriod { unit });
            }
            tracks.push(Track {
                unit,
                period: ticks,
                next: ticks,
            });
        }
        Ok(Self {
            period,
            policy: FirePolicy::default(),
            tracks,
        })
    }

    pub fn with_policy(mut self, policy: FirePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn period(&self) -> &Period {
        &self.period
    }

    pub fn policy(&self) -> FirePolicy {
        self.policy
    }

    /// Next threshold for `unit` in ticks (nanoseconds for time), if tracked.
    pub fn next_threshold(&self, unit: Unit) -> Option<u128> {
        self.tracks.iter().find(|t| t.unit == unit).map(|t| t.next)
    }
}

/// Smallest multiple of `period` strictly above `current`.
fn next_multiple(current: u128, period: u128) -> u128 {
    (current / period).saturating_add(1).saturating_mul(period)
}

impl Schedule for Every {
    fn evaluate(&mut self, elapsed: &Elapsed) -> bool {
        match self.policy {
            FirePolicy::Any => {
                let mut fired = false;
                for track in &mut self.tracks {
                    let current = elapsed.ticks(track.unit);
                    if current >= track.next {
                        track.next = next_multiple(current, track.period);
                        fired = true;
                    }
                }
                fired
            }
            FirePolicy::All => {
                let crossed = self
                    .tracks
                    .iter()
                    .all(|track| elapsed.ticks(track.unit) >= track.next);
                if crossed {
                    for track in &mut self.tracks {
                        track.next = next_multiple(elapsed.ticks(track.unit), track.period);
                    }
                }
                crossed
            }
        }
    }

    fn describe(&self) -> String {
        format!("every {}", self.period)
    }
}

/// One-shot threshold, e.g. "at 10000 steps". Stays true once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct At {
    period: Period,
}

impl At {
    /// An empty period makes the schedule true from the start.
    pub fn new(period: Period) -> Self {
        Self { period }
    }

    pub fn period(&self) -> &Period {
        &self.period
    }
}

impl Schedule for At {
    fn evaluate(&mut self, elapsed: &Elapsed) -> bool {
        elapsed.ge(&self.period)
    }

    fn describe(&self) -> String {
        format!("at {}", self.period)
    }
}
