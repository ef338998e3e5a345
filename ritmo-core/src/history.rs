//! Append-only record of per-iteration commits.
//!
//! Each commit owns its `Logs`; the driver hands over its accumulation buffer
//! and starts a fresh one, so entries never alias live state.

use crate::elapsed::{Elapsed, Unit};
use crate::logs::Logs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One committed iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub elapsed: Elapsed,
    pub logs: Logs,
}

/// A sparse series for one metric name, aligned to a single progress axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub axis: Unit,
    /// `(axis value, metric value)` in commit order.
    pub points: Vec<(f64, Value)>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.points.iter().map(|(x, _)| *x).collect()
    }

    pub fn values(&self) -> Vec<&Value> {
        self.points.iter().map(|(_, v)| v).collect()
    }

    /// Numeric values only; non-numeric points are skipped.
    pub fn f64_values(&self) -> Vec<f64> {
        self.points.iter().filter_map(|(_, v)| v.as_f64()).collect()
    }
}

/// Chronological list of `(Elapsed, Logs)` commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit. Takes ownership of `logs` so later buffer reuse cannot reach it.
    pub fn commit(&mut self, elapsed: Elapsed, logs: Logs) {
        self.entries.push(HistoryEntry { elapsed, logs });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One series per requested name, keyed on `axis`.
    ///
    /// Commits that did not log a name contribute no point to its series, so
    /// series are ragged rather than padded. A name logged under several
    /// categories of the same commit resolves to the first category.
    pub fn collect(&self, axis: Unit, names: &[&str]) -> Vec<Series> {
        names
            .iter()
            .map(|name| Series {
                name: (*name).to_string(),
                axis,
                points: self
                    .entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .logs
                            .lookup(name)
                            .map(|value| (entry.elapsed.axis_value(axis), value.clone()))
                    })
                    .collect(),
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn at_step(step: u64) -> Elapsed {
        Elapsed {
            steps: step,
            samples: step * 32,
            time: Duration::from_millis(step * 100),
        }
    }

    fn sample_history() -> History {
        let mut history = History::new();
        for step in 1..=6 {
            let mut logs = Logs::new();
            logs.add_loss("loss", 1.0 / step as f64);
            if step % 3 == 0 {
                logs.add_metric("accuracy_valid", step as f64 / 10.0);
            }
            history.commit(at_step(step), logs);
        }
        history
    }

    #[test]
    fn test_commit_appends_in_order() {
        let history = sample_history();
        assert_eq!(history.len(), 6);
        let steps: Vec<u64> = history.iter().map(|e| e.elapsed.steps).collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(history.last().unwrap().elapsed.steps, 6);
    }

    #[test]
    fn test_commit_snapshots_buffer() {
        let mut history = History::new();
        let mut buffer = Logs::new();
        buffer.add_metric("hits", 1);
        history.commit(at_step(1), std::mem::take(&mut buffer));
        buffer.add_metric("hits", 99);
        assert_eq!(history.entries()[0].logs.lookup("hits"), Some(&json!(1)));
    }

    #[test]
    fn test_collect_is_sparse_and_ordered() {
        let history = sample_history();
        let series = history.collect(Unit::Steps, &["loss", "accuracy_valid", "missing"]);
        assert_eq!(series.len(), 3);

        assert_eq!(series[0].len(), 6);
        assert_eq!(series[0].xs(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert_eq!(series[1].name, "accuracy_valid");
        assert_eq!(series[1].xs(), vec![3.0, 6.0]);
        assert_eq!(series[1].f64_values(), vec![0.3, 0.6]);

        assert!(series[2].is_empty());
    }

    #[test]
    fn test_collect_on_other_axes() {
        let history = sample_history();
        let samples = history.collect(Unit::Samples, &["accuracy_valid"]);
        assert_eq!(samples[0].xs(), vec![96.0, 192.0]);
        let time = history.collect(Unit::Time, &["accuracy_valid"]);
        assert_eq!(time[0].xs(), vec![0.3, 0.6]);
        assert_eq!(time[0].axis, Unit::Time);
    }

    #[test]
    fn test_history_serde_roundtrip() {
        let history = sample_history();
        let json = serde_json::to_string(&history).unwrap();
        let back: History = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
    }
}
