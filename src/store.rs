// src/store.rs
//! Where processed activities land. Upserts by activity UID.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::uid::TypedUid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredActivity {
    pub activity: Activity,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub stored_at: DateTime<Utc>,
}

impl StoredActivity {
    pub fn new(activity: Activity) -> Self {
        Self {
            activity,
            summary: None,
            embedding: None,
            stored_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Insert or replace by UID. Producing sources of an existing record are kept.
    async fn upsert(&self, record: StoredActivity) -> Result<()>;
    async fn get(&self, uid: &TypedUid) -> Result<Option<StoredActivity>>;
    /// Record more producing sources on a stored activity. Returns false when `uid` is not stored.
    async fn add_sources(&self, uid: &TypedUid, sources: &[TypedUid]) -> Result<bool>;
    /// Newest stored activity produced by `source_uid`; seeds a source's cursor.
    async fn latest_for_source(&self, source_uid: &TypedUid) -> Result<Option<Activity>>;
    async fn count(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    records: RwLock<HashMap<TypedUid, StoredActivity>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn upsert(&self, mut record: StoredActivity) -> Result<()> {
        let uid = record.activity.uid();
        let mut records = self.records.write();
        if let Some(existing) = records.get(&uid) {
            for source in existing.activity.source_uids() {
                record.activity.add_source_uid(source);
            }
        }
        records.insert(uid, record);
        Ok(())
    }

    async fn get(&self, uid: &TypedUid) -> Result<Option<StoredActivity>> {
        Ok(self.records.read().get(uid).cloned())
    }

    async fn add_sources(&self, uid: &TypedUid, sources: &[TypedUid]) -> Result<bool> {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(uid) else {
            return Ok(false);
        };
        for source in sources {
            record.activity.add_source_uid(source.clone());
        }
        Ok(true)
    }

    async fn latest_for_source(&self, source_uid: &TypedUid) -> Result<Option<Activity>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.activity.source_uids().contains(source_uid))
            .max_by_key(|r| r.activity.created_at())
            .map(|r| r.activity.clone()))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }
}
