//! The content record store: one keyed table of normalized content records
//! shared by posts, comments and replies.
//!
//! All mutations run under a single writer lock and write through to the
//! storage engine before the in-memory commit, so concurrent writers never
//! interleave a read-modify-write and readers only ever observe committed
//! batches. Change notifications fire after the commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::engine::{StorageEngine, WriteBatch, WriteOp};
use crate::error::CacheError;
use crate::events::{CacheEvent, Notifier};
use crate::merge;
use crate::types::{ContentId, ContentRecord, ContentUpdate, UserInteractions};

/// Keyed store of normalized content records.
pub struct ContentStore {
    engine: Arc<dyn StorageEngine>,
    records: RwLock<HashMap<ContentId, ContentRecord>>,
    notifier: Notifier,
}

impl ContentStore {
    /// Create a store over the given engine, hydrated with a snapshot of
    /// previously persisted records.
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        notifier: Notifier,
        initial: Vec<ContentRecord>,
    ) -> Self {
        let records = initial
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            engine,
            records: RwLock::new(records),
            notifier,
        }
    }

    /// Subscribe to change notifications for committed writes.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CacheEvent> {
        self.notifier.subscribe()
    }

    /// Upsert a batch of updates transactionally: either every update in the
    /// batch commits or none does, so a feed page is never half-written.
    ///
    /// Each update is merged against the cached record under the stale-write
    /// gate and the aggregate/interaction merge rules. Aggregate-only
    /// updates for ids not in the store are dropped as benign races.
    pub async fn upsert(&self, updates: Vec<ContentUpdate>) -> Result<(), CacheError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut records = self.records.write().await;

        let mut merged: Vec<ContentRecord> = Vec::with_capacity(updates.len());
        for update in updates {
            // Later updates in one batch must see earlier ones.
            let existing = merged
                .iter()
                .find(|r| r.id == update.id)
                .or_else(|| records.get(&update.id));
            if let Some(record) = merge::apply_update(existing, update) {
                merged.retain(|r| r.id != record.id);
                merged.push(record);
            }
        }

        if merged.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        for record in &merged {
            batch.push(WriteOp::PutRecord(record.clone()));
        }
        self.engine.apply(batch).await?;

        let mut ids = Vec::with_capacity(merged.len());
        for record in merged {
            trace!(id = %record.id, kind = %record.kind(), "store: record upserted");
            ids.push(record.id.clone());
            records.insert(record.id.clone(), record);
        }
        drop(records);

        for id in ids {
            self.notifier.send(CacheEvent::ContentUpserted { id });
        }
        Ok(())
    }

    /// Point lookup.
    pub async fn get(&self, id: &ContentId) -> Option<ContentRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Batch lookup returning only existing records, ordered to match the
    /// input id order. Call sites sort feed pages by the order the ids were
    /// requested in, not by storage order.
    pub async fn get_by_ids(&self, ids: &[ContentId]) -> Vec<ContentRecord> {
        let records = self.records.read().await;
        ids.iter().filter_map(|id| records.get(id).cloned()).collect()
    }

    /// Number of cached records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Delete a record. Deleting an absent id is a successful no-op; this
    /// absorbs races between a server delete event and a concurrent GC.
    pub async fn delete(&self, id: &ContentId) -> Result<(), CacheError> {
        let mut records = self.records.write().await;
        if !records.contains_key(id) {
            trace!(id = %id, "store: delete of absent record is a no-op");
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteRecord(id.clone()));
        self.engine.apply(batch).await?;

        records.remove(id);
        drop(records);

        trace!(id = %id, "store: record deleted");
        self.notifier
            .send(CacheEvent::ContentDeleted { id: id.clone() });
        Ok(())
    }

    /// Bulk garbage collection: delete every record whose id is not in
    /// `keep`. Used after a full feed resync to drop locally-cached items no
    /// longer present server-side.
    pub async fn delete_all_except(
        &self,
        keep: &HashSet<ContentId>,
    ) -> Result<Vec<ContentId>, CacheError> {
        let mut records = self.records.write().await;

        let doomed: Vec<ContentId> = records
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }

        let mut batch = WriteBatch::new();
        for id in &doomed {
            batch.push(WriteOp::DeleteRecord(id.clone()));
        }
        self.engine.apply(batch).await?;

        for id in &doomed {
            records.remove(id);
        }
        drop(records);

        debug!(dropped = doomed.len(), "store: bulk GC");
        for id in &doomed {
            self.notifier
                .send(CacheEvent::ContentDeleted { id: id.clone() });
        }
        Ok(doomed)
    }

    /// Clear every record's user interactions and aggregates. Used on
    /// logout so no other account's like state leaks.
    pub async fn reset_user_interactions(&self) -> Result<(), CacheError> {
        let mut records = self.records.write().await;

        let mut batch = WriteBatch::new();
        let mut cleared = Vec::with_capacity(records.len());
        for record in records.values() {
            let mut record = record.clone();
            record.interactions = UserInteractions::default();
            record.aggregates = None;
            batch.push(WriteOp::PutRecord(record.clone()));
            cleared.push(record);
        }
        self.engine.apply(batch).await?;

        for record in cleared {
            records.insert(record.id.clone(), record);
        }
        drop(records);

        debug!("store: user interactions reset");
        self.notifier.send(CacheEvent::InteractionsReset);
        Ok(())
    }

    /// Force every record's update date back to the epoch so the next fetch
    /// treats all content as stale. Used when the display language changes
    /// and server-translated text must be re-downloaded.
    pub async fn reset_update_timestamps(&self) -> Result<(), CacheError> {
        let mut records = self.records.write().await;

        let mut batch = WriteBatch::new();
        let mut reset = Vec::with_capacity(records.len());
        for record in records.values() {
            let mut record = record.clone();
            record.object.updated_at = DateTime::UNIX_EPOCH;
            batch.push(WriteOp::PutRecord(record.clone()));
            reset.push(record);
        }
        self.engine.apply(batch).await?;

        for record in reset {
            records.insert(record.id.clone(), record);
        }
        drop(records);

        debug!("store: all records marked stale");
        self.notifier.send(CacheEvent::AllMarkedStale);
        Ok(())
    }

    /// Which of these candidates need fetching: ids with no cached record,
    /// plus ids whose cached record is older than the server-reported update
    /// date. A server date equal to the cached one means the cached copy is
    /// current and must not be re-fetched.
    pub async fn get_missing(
        &self,
        candidates: &[(ContentId, DateTime<Utc>)],
    ) -> Vec<ContentId> {
        let records = self.records.read().await;
        candidates
            .iter()
            .filter(|(id, server_updated_at)| match records.get(id) {
                None => true,
                Some(record) => *server_updated_at > record.updated_at(),
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Serialized read-modify-write of a single record. The closure runs
    /// under the writer lock, so no other mutation can interleave between
    /// the read and the write.
    ///
    /// Returns `Ok(false)` if the record is absent (a benign race, not an
    /// error).
    pub async fn update_record<F>(&self, id: &ContentId, f: F) -> Result<bool, CacheError>
    where
        F: FnOnce(&mut ContentRecord),
    {
        let mut records = self.records.write().await;

        let Some(existing) = records.get(id) else {
            trace!(id = %id, "store: update of absent record is a no-op");
            return Ok(false);
        };

        let mut updated = existing.clone();
        f(&mut updated);

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutRecord(updated.clone()));
        self.engine.apply(batch).await?;

        records.insert(id.clone(), updated);
        drop(records);

        self.notifier
            .send(CacheEvent::ContentUpserted { id: id.clone() });
        Ok(true)
    }
}
