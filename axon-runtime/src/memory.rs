//! Memory backend access for the `remember`/`recall` primitives (§5).
//!
//! The memory backend itself (semantic/exact/hybrid retrieval, decay) is
//! an external collaborator, same as a concrete model or tool provider —
//! this module only ships the narrow trait the executor's `remember` and
//! `recall` steps call through, plus a deterministic in-memory stub for
//! tests, shaped like a storage trait plus an `Arc<RwLock<HashMap<..>>>`
//! mock backing it: named memory regions holding JSON values under a
//! retrieval key.
//!
//! `remember`/`recall` are each treated as one atomic step (§5); this
//! trait's methods take `&self` with interior mutability so a single
//! registry reference can be shared across steps without the executor
//! needing `&mut` access to it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, thiserror::Error)]
#[error("memory backend '{0}' is not registered")]
pub struct MemoryError(pub String);

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn remember(&self, memory: &str, value: Value) -> Result<(), MemoryError>;
    async fn recall(&self, memory: &str, query: &Value) -> Result<Vec<Value>, MemoryError>;
}

/// Deterministic in-memory store: `remember` appends, `recall` returns
/// every remembered value for that region regardless of `query` (exact
/// semantic ranking needs an embedding backend, out of scope for this
/// core — §1).
#[derive(Default)]
pub struct InMemoryStore {
    regions: RwLock<HashMap<String, Vec<Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn remember(&self, memory: &str, value: Value) -> Result<(), MemoryError> {
        self.regions
            .write()
            .unwrap()
            .entry(memory.to_string())
            .or_default()
            .push(value);
        Ok(())
    }

    async fn recall(&self, memory: &str, _query: &Value) -> Result<Vec<Value>, MemoryError> {
        Ok(self.regions.read().unwrap().get(memory).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remember_then_recall_round_trips() {
        let store = InMemoryStore::new();
        store.remember("notes", Value::String("a fact".to_string())).await.unwrap();
        store.remember("notes", Value::String("another fact".to_string())).await.unwrap();
        let recalled = store.recall("notes", &Value::Null).await.unwrap();
        assert_eq!(recalled.len(), 2);
    }

    #[tokio::test]
    async fn recall_from_unused_region_is_empty() {
        let store = InMemoryStore::new();
        let recalled = store.recall("unused", &Value::Null).await.unwrap();
        assert!(recalled.is_empty());
    }
}
