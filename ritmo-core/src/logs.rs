//! Structured, mergeable metric container.
//!
//! `Logs` maps category → metric name → value, preserving insertion order at
//! both levels so iteration and history collection are deterministic. Values
//! are opaque JSON values; consumers decide how to interpret them.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

pub const LOSSES: &str = "losses";
pub const METRICS: &str = "metrics";
pub const STATEFUL_LOSSES: &str = "stateful_losses";
pub const STATEFUL_METRICS: &str = "stateful_metrics";

/// Insertion-ordered string map. Lookups are linear; log maps stay small.
#[derive(Debug, Clone, PartialEq)]
struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn get_or_insert_with(&mut self, key: String, default: impl FnOnce() -> V) -> &mut V {
        let index = match self.entries.iter().position(|(k, _)| *k == key) {
            Some(index) => index,
            None => {
                self.entries.push((key, default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    /// Overwrites in place, keeping the first position of an existing key.
    fn insert(&mut self, key: String, value: V) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::default();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Two-level ordered metric container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Logs {
    categories: OrderedMap<OrderedMap<Value>>,
}

impl Logs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `logs[category][name] = value`.
    ///
    /// Non-finite floats have no JSON form and are stored as `null`.
    pub fn add(
        &mut self,
        category: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.categories
            .get_or_insert_with(category.into(), OrderedMap::default)
            .insert(name.into(), value.into());
        self
    }

    pub fn add_loss(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.add(LOSSES, name, value)
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.add(METRICS, name, value)
    }

    pub fn add_stateful_loss(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.add(STATEFUL_LOSSES, name, value)
    }

    pub fn add_stateful_metric(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.add(STATEFUL_METRICS, name, value)
    }

    /// Deep-merge `other` on top of `self`; `other` wins on collisions.
    pub fn merge(&mut self, other: Logs) {
        for (category, metrics) in other.categories.entries {
            let target = self
                .categories
                .get_or_insert_with(category, OrderedMap::default);
            for (name, value) in metrics.entries {
                target.insert(name, value);
            }
        }
    }

    pub fn get(&self, category: &str, name: &str) -> Option<&Value> {
        self.categories.get(category)?.get(name)
    }

    /// Find `name` in any category, first category in insertion order wins.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.categories
            .iter()
            .find_map(|(_, metrics)| metrics.get(name))
    }

    /// [`Logs::lookup`] narrowed to numeric values.
    pub fn lookup_f64(&self, name: &str) -> Option<f64> {
        self.lookup(name).and_then(Value::as_f64)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|(name, _)| name)
    }

    /// Metrics of one category in insertion order.
    pub fn category(&self, category: &str) -> impl Iterator<Item = (&str, &Value)> {
        self.categories
            .get(category)
            .into_iter()
            .flat_map(|metrics| metrics.iter())
    }

    /// Every `(category, name, value)` triple in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.categories.iter().flat_map(|(category, metrics)| {
            metrics
                .iter()
                .map(move |(name, value)| (category, name, value))
        })
    }

    /// Total number of metrics across all categories.
    pub fn len(&self) -> usize {
        self.categories.iter().map(|(_, m)| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy with every metric renamed from `name` to `name_{suffix}`.
    pub fn suffixed(&self, suffix: &str) -> Logs {
        let mut out = Logs::new();
        for (category, name, value) in self.iter() {
            out.add(category, format!("{name}_{suffix}"), value.clone());
        }
        out
    }
}
