//! In-memory object store.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{ObjectStore, StorageError, expiry_timestamp};

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Body bytes.
    pub body: Vec<u8>,
    /// Content type given at write time.
    pub content_type: String,
    /// Content encoding given at write time.
    pub content_encoding: Option<String>,
}

/// Keeps objects in a map; counts writes.
///
/// Writes to keys containing a configured substring fail, which lets a
/// caller exercise partial-write failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    puts: AtomicUsize,
    fail_on: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write to a key containing `pattern` fail.
    pub fn fail_writes_matching(&self, pattern: impl Into<String>) {
        *self
            .fail_on
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(pattern.into());
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// A stored object, if present.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn url_prefix(&self) -> String {
        "memory://".to_string()
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        content_encoding: Option<&str>,
    ) -> Result<(), StorageError> {
        let failing = self
            .fail_on
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| key.contains(p.as_str()));
        if failing {
            return Err(StorageError::Upload {
                store: "memory".to_string(),
                key: key.to_string(),
                source: "injected write failure".into(),
            });
        }

        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: content_type.to_string(),
                    content_encoding: content_encoding.map(String::from),
                },
            );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.object(key).map(|o| o.body))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.object(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("memory://{key}?expires={}", expiry_timestamp(ttl)))
    }
}
