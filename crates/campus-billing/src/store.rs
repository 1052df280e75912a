//! Document Storage
//!
//! Versioned document collections with conditional writes. Every successful
//! write bumps the document version; `replace` only succeeds when the caller
//! still holds the current version. There are no multi-document transactions,
//! so every cross-document workflow in this crate is built from these claims.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};

/// Retry budget for optimistic read-modify-write loops
pub const DEFAULT_MAX_RETRIES: u32 = 16;

/// A stored document together with its version marker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub doc: T,
}

/// Document collection trait
///
/// Implement this for each backend. `MemoryStore` is the in-process one.
#[async_trait]
pub trait DocumentStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Read a document
    async fn get(&self, id: &str) -> Result<Option<Versioned<T>>>;

    /// Create a document if `id` is free. Returns `false` if it already exists.
    async fn insert(&self, id: &str, doc: T) -> Result<bool>;

    /// Conditional write.
    ///
    /// Returns the new version, or `None` when `expected_version` is stale.
    async fn replace(&self, id: &str, doc: T, expected_version: u64) -> Result<Option<u64>>;

    /// Query documents matching a predicate
    async fn find(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
    ) -> Result<Vec<(String, Versioned<T>)>>;
}

/// In-memory document store (for development and tests)
pub struct MemoryStore<T> {
    docs: RwLock<HashMap<String, Versioned<T>>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<T> DocumentStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Result<Option<Versioned<T>>> {
        let docs = self.docs.read().await;
        Ok(docs.get(id).cloned())
    }

    async fn insert(&self, id: &str, doc: T) -> Result<bool> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(id.to_string(), Versioned { version: 1, doc });
        Ok(true)
    }

    async fn replace(&self, id: &str, doc: T, expected_version: u64) -> Result<Option<u64>> {
        let mut docs = self.docs.write().await;
        let current = docs
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;

        if current.version != expected_version {
            return Ok(None);
        }

        current.version += 1;
        current.doc = doc;
        Ok(Some(current.version))
    }

    async fn find(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
    ) -> Result<Vec<(String, Versioned<T>)>> {
        let docs = self.docs.read().await;
        Ok(docs
            .iter()
            .filter(|(_, v)| filter(&v.doc))
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect())
    }
}

/// Result of an optimistic update
#[derive(Clone, Debug)]
pub struct Modified<T> {
    /// Document state after the update (or as read, when nothing was written)
    pub current: Versioned<T>,
    /// Whether this call performed the write
    pub written: bool,
}

/// Optimistic read-modify-write.
///
/// `apply` mutates a copy of the current document and returns `Ok(true)` if
/// it should be written, `Ok(false)` to leave the document untouched. Errors
/// from `apply` abort the loop. On a version conflict the document is re-read
/// and `apply` runs again against the fresh copy.
pub async fn modify<T, F>(
    store: &dyn DocumentStore<T>,
    id: &str,
    max_retries: u32,
    mut apply: F,
) -> Result<Modified<T>>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(&mut T) -> Result<bool> + Send,
{
    for attempt in 0..=max_retries {
        let current = store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;

        let mut doc = current.doc.clone();
        if !apply(&mut doc)? {
            return Ok(Modified {
                current,
                written: false,
            });
        }

        if let Some(version) = store.replace(id, doc.clone(), current.version).await? {
            return Ok(Modified {
                current: Versioned { version, doc },
                written: true,
            });
        }

        tracing::debug!(id = %id, attempt, "Version conflict, retrying");
        backoff(attempt).await;
    }

    Err(PaymentError::Conflict(id.to_string()))
}

/// Short jittered pause between optimistic retries
pub(crate) async fn backoff(attempt: u32) {
    let jitter = u64::from(uuid::Uuid::new_v4().as_bytes()[0] % 5);
    let millis = u64::from(attempt.min(10)) * 2 + jitter;
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
