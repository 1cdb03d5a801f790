//! Snapshots and Payloads
//!
//! A [`Snapshot`] is the immutable value of one node at one instant. Its
//! [`Payload`] follows the remote store's data model: a node is absent (null),
//! a scalar, or an ordered map of children.
//!
//! # Normalisation
//!
//! Converting from JSON mirrors how the remote store stores data:
//!
//! - `null` children are dropped, and a map left with no children is null
//! - arrays become maps keyed by index (`"0"`, `"1"`, ...)
//!
//! so "absent" and "empty" are the same value, and equality on payloads is
//! equality of what a watcher would observe.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::Path;
use crate::error::{Result, WatchError};

static NULL: Payload = Payload::Null;

/// A scalar leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// The value stored at a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Payload {
    /// Absent or deleted.
    #[default]
    Null,
    Scalar(Scalar),
    /// Children by key. Keys are unique; order is kept for deterministic
    /// iteration only.
    Map(IndexMap<String, Payload>),
}

impl Payload {
    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Payload>> {
        match self {
            Payload::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Scalar(Scalar::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// Number of direct children (zero for null and scalars).
    pub fn len(&self) -> usize {
        self.as_map().map_or(0, IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload at a relative path, or null if any step is missing.
    pub fn get(&self, path: &Path) -> &Payload {
        let mut current = self;
        for segment in path.segments() {
            match current.as_map().and_then(|map| map.get(segment)) {
                Some(next) => current = next,
                None => return &NULL,
            }
        }
        current
    }

    /// Replace the payload at a relative path.
    ///
    /// Missing intermediate maps are created. Writing null deletes the node and
    /// prunes ancestors left empty.
    pub fn insert(&mut self, path: &Path, value: Payload) {
        let value = value.normalized();
        self.insert_at(path.segments(), value);
    }

    fn insert_at(&mut self, segments: &[String], value: Payload) {
        let Some((head, rest)) = segments.split_first() else {
            *self = value;
            return;
        };

        if value.is_null() {
            if let Payload::Map(map) = self {
                if let Some(child) = map.get_mut(head) {
                    child.insert_at(rest, Payload::Null);
                    if child.is_null() {
                        map.shift_remove(head);
                    }
                }
                if map.is_empty() {
                    *self = Payload::Null;
                }
            }
            return;
        }

        if !matches!(self, Payload::Map(_)) {
            *self = Payload::Map(IndexMap::new());
        }
        if let Payload::Map(map) = self {
            map.entry(head.clone()).or_default().insert_at(rest, value);
        }
    }

    fn normalized(self) -> Payload {
        match self {
            Payload::Map(map) => {
                let map: IndexMap<String, Payload> = map
                    .into_iter()
                    .map(|(k, v)| (k, v.normalized()))
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                if map.is_empty() {
                    Payload::Null
                } else {
                    Payload::Map(map)
                }
            }
            other => other,
        }
    }

    /// Convert back to JSON. Null becomes `null`, maps become objects.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Null => Value::Null,
            Payload::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            Payload::Scalar(Scalar::Number(n)) => Value::Number(n.clone()),
            Payload::Scalar(Scalar::String(s)) => Value::String(s.clone()),
            Payload::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        let payload = match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Payload::Scalar(Scalar::Number(n)),
            Value::String(s) => Payload::Scalar(Scalar::String(s)),
            Value::Array(items) => Payload::Map(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), Payload::from(v)))
                    .collect(),
            ),
            Value::Object(fields) => Payload::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Payload::from(v)))
                    .collect(),
            ),
        };
        payload.normalized()
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.to_json()
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Scalar(Scalar::Bool(b))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Scalar(Scalar::String(s.to_string()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Scalar(Scalar::String(s))
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Scalar(Scalar::Number(n.into()))
    }
}

/// The value of one node at one instant.
///
/// Cloning is cheap: the payload is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    path: Path,
    value: Arc<Payload>,
}

impl Snapshot {
    pub fn new(path: Path, value: Payload) -> Self {
        Self {
            path,
            value: Arc::new(value),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The node's own key (last path segment).
    pub fn key(&self) -> Option<&str> {
        self.path.key()
    }

    pub fn value(&self) -> &Payload {
        &self.value
    }

    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// A snapshot of a descendant, carved out of this one.
    pub fn child(&self, relative: &Path) -> Snapshot {
        Snapshot::new(self.path.join(relative), self.value.get(relative).clone())
    }

    /// Keys of the map found at `enumeration` inside this snapshot.
    ///
    /// A missing or null field, or a walk that runs into a non-map before
    /// reaching the field, yields no keys. A field that exists but holds a
    /// scalar is reported as [`WatchError::MalformedEnumeration`].
    pub fn child_keys(&self, enumeration: &Path) -> Result<Vec<String>> {
        let mut current: &Payload = &self.value;
        for segment in enumeration.segments() {
            match current.as_map().and_then(|map| map.get(segment)) {
                Some(next) => current = next,
                None => return Ok(Vec::new()),
            }
        }

        match current {
            Payload::Null => Ok(Vec::new()),
            Payload::Map(map) => Ok(map.keys().cloned().collect()),
            Payload::Scalar(_) => Err(WatchError::MalformedEnumeration {
                path: self.path.clone(),
                key: enumeration.clone(),
            }),
        }
    }

    /// Decode the payload into a typed value.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.to_json()).map_err(|source| WatchError::Decode {
            path: self.path.clone(),
            source,
        })
    }
}
