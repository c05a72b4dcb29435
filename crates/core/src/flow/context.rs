//! Shared context threaded through one flow run

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NodeError;

/// Key holding the structured error record of a failed run
pub const ERROR_KEY: &str = "error";
/// Key holding the failed run's error type label
pub const ERROR_TYPE_KEY: &str = "error_type";
/// Key holding the id of the node that failed
pub const ERROR_NODE_KEY: &str = "error_node";

/// Mutable key/value state passed to every node phase of a flow run
///
/// Values are JSON so any node can read what another wrote without sharing
/// Rust types. The accumulated contents are the run's result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedContext {
    values: Map<String, Value>,
}

impl SharedContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value under `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserialize the value under `key`, `None` when absent
    ///
    /// # Errors
    ///
    /// Returns an `InvalidInput` error when the value has the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, NodeError> {
        self.values
            .get(key)
            .map(|value| T::deserialize(value).map_err(|err| NodeError::invalid_input(key, err)))
            .transpose()
    }

    /// Deserialize the value under `key`, failing when absent
    ///
    /// # Errors
    ///
    /// Returns `MissingInput` when absent and `InvalidInput` when malformed.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, NodeError> {
        self.get_as(key)?.ok_or_else(|| NodeError::missing_input(key))
    }

    /// Store a JSON value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Serialize and store a value
    ///
    /// # Errors
    ///
    /// Returns an error when `value` cannot be represented as JSON.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> Result<(), NodeError> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.into(), value);
        Ok(())
    }

    /// Remove and return the value under `key`
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add `delta` to the integer counter under `key`, starting from zero
    ///
    /// Returns the new value. A non-integer value is replaced.
    pub fn increment(&mut self, key: &str, delta: i64) -> i64 {
        let next = self.values.get(key).and_then(Value::as_i64).unwrap_or(0) + delta;
        self.values.insert(key.to_string(), Value::from(next));
        next
    }

    /// Error type recorded by a failed run, if any
    pub fn error_type(&self) -> Option<&str> {
        self.values.get(ERROR_TYPE_KEY).and_then(Value::as_str)
    }

    /// Id of the node that failed, if any
    pub fn error_node(&self) -> Option<&str> {
        self.values.get(ERROR_NODE_KEY).and_then(Value::as_str)
    }

    /// Whether a run recorded an error into this context
    pub fn has_error(&self) -> bool {
        self.values.contains_key(ERROR_KEY)
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Take the underlying map
    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}

impl From<Map<String, Value>> for SharedContext {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for SharedContext {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }
}
