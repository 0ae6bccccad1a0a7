//! Local sync identifier -> remote object id mapping.

use crate::StoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectIdCacheEntry {
    pub object_id: String,
    pub inserted_at: DateTime<Utc>,
}

/// Remote ids for recently created records, keyed by sync identifier.
///
/// Serializes as a plain map so it can be embedded in the service's raw state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectIdCache {
    entries: HashMap<String, ObjectIdCacheEntry>,
}

impl ObjectIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sync_identifier: String, object_id: String, inserted_at: DateTime<Utc>) {
        self.entries.insert(
            sync_identifier,
            ObjectIdCacheEntry {
                object_id,
                inserted_at,
            },
        );
    }

    pub fn find_object_id(&self, sync_identifier: &str) -> Option<&str> {
        self.entries
            .get(sync_identifier)
            .map(|entry| entry.object_id.as_str())
    }

    /// Drop entries inserted strictly before `now - retention`. Returns how many went.
    pub fn purge(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let cutoff = now - retention;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.inserted_at >= cutoff);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache handle shared between concurrent reconciliation calls.
///
/// Every operation takes the lock once, so a batch insert or a purge is
/// atomic with respect to other categories.
#[derive(Debug, Clone, Default)]
pub struct SharedObjectIdCache {
    inner: Arc<Mutex<ObjectIdCache>>,
}

impl SharedObjectIdCache {
    pub fn new(cache: ObjectIdCache) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ObjectIdCache>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::LockPoisoned("object id cache".to_string()))
    }

    pub fn add_all<I>(&self, pairs: I, inserted_at: DateTime<Utc>) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut cache = self.lock()?;
        for (sync_identifier, object_id) in pairs {
            cache.add(sync_identifier, object_id, inserted_at);
        }
        Ok(())
    }

    pub fn find_object_id(&self, sync_identifier: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.find_object_id(sync_identifier).map(str::to_string))
    }

    pub fn purge(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize, StoreError> {
        Ok(self.lock()?.purge(now, retention))
    }

    /// Copy of the current contents, for persisting.
    pub fn snapshot(&self) -> Result<ObjectIdCache, StoreError> {
        Ok(self.lock()?.clone())
    }

    pub fn replace(&self, cache: ObjectIdCache) -> Result<(), StoreError> {
        *self.lock()? = cache;
        Ok(())
    }
}
