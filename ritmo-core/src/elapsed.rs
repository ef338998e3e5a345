//! Progress snapshots and sparse period thresholds.
//!
//! An [`Elapsed`] is produced once per iteration by the driver and never
//! mutated afterwards; each field only grows over the life of a run.
//! A [`Period`] sets any subset of the same three units and is compared
//! field-wise against an `Elapsed`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One axis of progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Steps,
    Samples,
    Time,
}

impl Unit {
    pub const ALL: [Unit; 3] = [Unit::Steps, Unit::Samples, Unit::Time];
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Steps => write!(f, "steps"),
            Unit::Samples => write!(f, "samples"),
            Unit::Time => write!(f, "time"),
        }
    }
}

/// Cumulative progress of a loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elapsed {
    pub steps: u64,
    pub samples: u64,
    #[serde(with = "secs")]
    pub time: Duration,
}

impl Elapsed {
    pub const ZERO: Elapsed = Elapsed {
        steps: 0,
        samples: 0,
        time: Duration::ZERO,
    };

    /// Snapshot after one more batch of `batch_size` samples taking `time_delta`.
    pub fn advance(&self, batch_size: u64, time_delta: Duration) -> Elapsed {
        Elapsed {
            steps: self.steps.saturating_add(1),
            samples: self.samples.saturating_add(batch_size),
            time: self.time.saturating_add(time_delta),
        }
    }

    /// Progress made since `earlier`, clamped at zero per unit.
    pub fn since(&self, earlier: &Elapsed) -> Elapsed {
        Elapsed {
            steps: self.steps.saturating_sub(earlier.steps),
            samples: self.samples.saturating_sub(earlier.samples),
            time: self.time.saturating_sub(earlier.time),
        }
    }

    /// `self >= period` for every unit the period sets. An empty period is always reached.
    pub fn ge(&self, period: &Period) -> bool {
        period
            .units()
            .all(|unit| period.ticks(unit).is_none_or(|t| self.ticks(unit) >= t))
    }

    /// Integer progress along `unit`; time is counted in nanoseconds.
    pub fn ticks(&self, unit: Unit) -> u128 {
        match unit {
            Unit::Steps => u128::from(self.steps),
            Unit::Samples => u128::from(self.samples),
            Unit::Time => self.time.as_nanos(),
        }
    }

    /// Progress along `unit` as a plot coordinate (time in seconds).
    pub fn axis_value(&self, unit: Unit) -> f64 {
        match unit {
            Unit::Steps => self.steps as f64,
            Unit::Samples => self.samples as f64,
            Unit::Time => self.time.as_secs_f64(),
        }
    }
}

/// Sparse threshold over the three progress units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_secs")]
    pub time: Option<Duration>,
}

impl Period {
    pub fn steps(steps: u64) -> Self {
        Self::default().with_steps(steps)
    }

    pub fn samples(samples: u64) -> Self {
        Self::default().with_samples(samples)
    }

    pub fn time(time: Duration) -> Self {
        Self::default().with_time(time)
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_samples(mut self, samples: u64) -> Self {
        self.samples = Some(samples);
        self
    }

    pub fn with_time(mut self, time: Duration) -> Self {
        self.time = Some(time);
        self
    }

    /// True when no unit is set; such a period is reached by any `Elapsed`.
    pub fn is_empty(&self) -> bool {
        self.steps.is_none() && self.samples.is_none() && self.time.is_none()
    }

    /// The units this period sets, in `steps, samples, time` order.
    pub fn units(&self) -> impl Iterator<Item = Unit> + '_ {
        Unit::ALL
            .into_iter()
            .filter(move |unit| self.ticks(*unit).is_some())
    }

    pub fn ticks(&self, unit: Unit) -> Option<u128> {
        match unit {
            Unit::Steps => self.steps.map(u128::from),
            Unit::Samples => self.samples.map(u128::from),
            Unit::Time => self.time.map(|t| t.as_nanos()),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "always");
        }
        let mut parts = Vec::new();
        if let Some(steps) = self.steps {
            parts.push(format!("{steps} steps"));
        }
        if let Some(samples) = self.samples {
            parts.push(format!("{samples} samples"));
        }
        if let Some(time) = self.time {
            parts.push(format!("{:.3}s", time.as_secs_f64()));
        }
        write!(f, "{}", parts.join(" | "))
    }
}

/// Durations as fractional seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_counts_steps_samples_time() {
        let e = Elapsed::ZERO
            .advance(32, Duration::from_millis(10))
            .advance(16, Duration::from_millis(5));
        assert_eq!(e.steps, 2);
        assert_eq!(e.samples, 48);
        assert_eq!(e.time, Duration::from_millis(15));
    }

    #[test]
    fn test_advance_does_not_mutate_previous_snapshot() {
        let first = Elapsed::ZERO.advance(4, Duration::ZERO);
        let second = first.advance(4, Duration::ZERO);
        assert_eq!(first.steps, 1);
        assert_eq!(second.steps, 2);
    }

    #[test]
    fn test_since_is_per_unit_and_clamped() {
        let later = Elapsed {
            steps: 10,
            samples: 320,
            time: Duration::from_secs(3),
        };
        let earlier = Elapsed {
            steps: 4,
            samples: 400,
            time: Duration::from_secs(1),
        };
        let delta = later.since(&earlier);
        assert_eq!(delta.steps, 6);
        assert_eq!(delta.samples, 0);
        assert_eq!(delta.time, Duration::from_secs(2));
    }

    #[test]
    fn test_advance_saturates() {
        let e = Elapsed {
            steps: u64::MAX,
            samples: u64::MAX - 1,
            time: Duration::MAX,
        };
        let next = e.advance(10, Duration::from_secs(1));
        assert_eq!(next.steps, u64::MAX);
        assert_eq!(next.samples, u64::MAX);
        assert_eq!(next.time, Duration::MAX);
    }

    #[test]
    fn test_ge_is_fieldwise_over_set_units() {
        let e = Elapsed {
            steps: 10,
            samples: 320,
            time: Duration::from_secs(3),
        };
        assert!(e.ge(&Period::steps(10)));
        assert!(!e.ge(&Period::steps(11)));
        assert!(e.ge(&Period::steps(5).with_samples(320)));
        assert!(!e.ge(&Period::steps(5).with_samples(321)));
        assert!(e.ge(&Period::time(Duration::from_secs(3))));
        assert!(!e.ge(&Period::time(Duration::from_millis(3001))));
    }

    #[test]
    fn test_empty_period_is_always_reached() {
        assert!(Period::default().is_empty());
        assert!(Elapsed::ZERO.ge(&Period::default()));
    }

    #[test]
    fn test_period_units_order() {
        let p = Period::time(Duration::from_secs(1)).with_steps(2);
        let units: Vec<Unit> = p.units().collect();
        assert_eq!(units, vec![Unit::Steps, Unit::Time]);
    }

    #[test]
    fn test_axis_value() {
        let e = Elapsed {
            steps: 7,
            samples: 70,
            time: Duration::from_millis(1500),
        };
        assert_eq!(e.axis_value(Unit::Steps), 7.0);
        assert_eq!(e.axis_value(Unit::Samples), 70.0);
        assert_eq!(e.axis_value(Unit::Time), 1.5);
    }

    #[test]
    fn test_period_display() {
        assert_eq!(Period::default().to_string(), "always");
        assert_eq!(
            Period::steps(100).with_samples(3200).to_string(),
            "100 steps | 3200 samples"
        );
    }

    #[test]
    fn test_period_time_serializes_as_seconds() {
        let p = Period::time(Duration::from_millis(2500));
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"time":2.5}"#);
        let back: Period = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_period_deserializes_sparse() {
        let p: Period = serde_json::from_str(r#"{"steps": 50}"#).unwrap();
        assert_eq!(p, Period::steps(50));
    }

    #[test]
    fn test_negative_time_rejected() {
        let result: Result<Period, _> = serde_json::from_str(r#"{"time": -1.0}"#);
        assert!(result.is_err());
    }
}
