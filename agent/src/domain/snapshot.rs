//! Point-in-time views of plugin-managed state and the delta between two.

use std::collections::BTreeMap;

use fleet_common::Value;

/// State captured by a change-detection source, keyed by a stable entity
/// name (for accounts: `user:<name>` and `group:<name>`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: BTreeMap<String, Value>,
}

/// What changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub created: BTreeMap<String, Value>,
    pub updated: BTreeMap<String, Value>,
    pub deleted: Vec<String>,
}

impl Snapshot {
    #[must_use]
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes that turn `self` into `after`. Updated entries carry their
    /// new value.
    #[must_use]
    pub fn diff(&self, after: &Snapshot) -> Delta {
        let mut delta = Delta::default();
        for (key, new) in &after.entries {
            match self.entries.get(key) {
                None => {
                    delta.created.insert(key.clone(), new.clone());
                }
                Some(old) if old != new => {
                    delta.updated.insert(key.clone(), new.clone());
                }
                Some(_) => {}
            }
        }
        delta.deleted = self
            .entries
            .keys()
            .filter(|key| !after.entries.contains_key(*key))
            .cloned()
            .collect();
        delta
    }
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(BTreeMap::from([
            ("created".to_string(), Value::Map(self.created)),
            ("updated".to_string(), Value::Map(self.updated)),
            (
                "deleted".to_string(),
                Value::List(self.deleted.into_iter().map(Value::Str).collect()),
            ),
        ]))
    }
}
