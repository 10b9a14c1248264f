//! Durable key-value storage available to room hooks and handlers.
//!
//! Values are JSON. A [`Storage::transaction`] applies a batch of writes
//! atomically after checking its preconditions, so hooks can reconcile
//! derived state without partial updates.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A transaction precondition did not hold; nothing was written.
    #[error("precondition failed for key {key}")]
    Conflict {
        /// Key whose current value did not match.
        key: String,
    },
    /// The backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One step of a [`Storage::transaction`].
#[derive(Clone, Debug, PartialEq)]
pub enum StorageOp {
    /// Write a value.
    Put {
        /// Key.
        key: String,
        /// New value.
        value: Value,
    },
    /// Remove a key.
    Delete {
        /// Key.
        key: String,
    },
    /// Require the current value to equal `value` (`None` = absent).
    Expect {
        /// Key.
        key: String,
        /// Expected value.
        value: Option<Value>,
    },
}

/// Durable per-room key-value store.
pub trait Storage: Send + Sync {
    /// Read a key.
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    /// Write a key.
    fn put(&self, key: &str, value: Value) -> Result<(), StorageError>;
    /// Remove a key; returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;
    /// All entries whose key starts with `prefix`, in key order.
    fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError>;
    /// Check every `Expect`, then apply every write, or apply nothing.
    fn transaction(&self, ops: Vec<StorageOp>) -> Result<(), StorageError>;
}

/// In-memory [`Storage`]. Outlives room instances when shared through an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _ = self.entries.lock().insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        let entries = self.entries.lock();
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn transaction(&self, ops: Vec<StorageOp>) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        for op in &ops {
            if let StorageOp::Expect { key, value } = op {
                if entries.get(key) != value.as_ref() {
                    return Err(StorageError::Conflict { key: key.clone() });
                }
            }
        }
        for op in ops {
            match op {
                StorageOp::Put { key, value } => {
                    let _ = entries.insert(key, value);
                }
                StorageOp::Delete { key } => {
                    let _ = entries.remove(&key);
                }
                StorageOp::Expect { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn put_get_delete() {
        let s = MemoryStorage::new();
        s.put("a", json!(1)).unwrap();
        assert_eq!(s.get("a").unwrap(), Some(json!(1)));
        assert!(s.delete("a").unwrap());
        assert!(!s.delete("a").unwrap());
        assert!(s.is_empty());
    }

    #[test]
    fn list_by_prefix_in_order() {
        let s = MemoryStorage::new();
        s.put("presence:bob", json!(2)).unwrap();
        s.put("presence:alice", json!(1)).unwrap();
        s.put("other", json!(0)).unwrap();
        s.put("presencf", json!(9)).unwrap();
        let keys: Vec<String> = s.list("presence:").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["presence:alice", "presence:bob"]);
    }

    #[test]
    fn transaction_applies_all() {
        let s = MemoryStorage::new();
        s.put("gone", json!(true)).unwrap();
        s.transaction(vec![
            StorageOp::Expect { key: "x".into(), value: None },
            StorageOp::Put { key: "x".into(), value: json!(1) },
            StorageOp::Delete { key: "gone".into() },
        ])
        .unwrap();
        assert_eq!(s.get("x").unwrap(), Some(json!(1)));
        assert_eq!(s.get("gone").unwrap(), None);
    }

    #[test]
    fn failed_precondition_writes_nothing() {
        let s = MemoryStorage::new();
        s.put("x", json!(1)).unwrap();
        let err = s
            .transaction(vec![
                StorageOp::Put { key: "y".into(), value: json!(2) },
                StorageOp::Expect { key: "x".into(), value: Some(json!(5)) },
            ])
            .unwrap_err();
        assert_matches!(err, StorageError::Conflict { key } if key == "x");
        assert_eq!(s.get("y").unwrap(), None);
    }
}
