//! Abstract transactional storage engine.
//!
//! The cache persists two logical tables: content records keyed by id, and
//! feed membership rows keyed by (feed id, item id). The concrete embedded
//! engine behind them is an implementation detail; the cache only requires
//! all-or-nothing batch application and a startup snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::types::{ContentId, ContentRecord, FeedId, FeedItemInfo};

/// A single mutation against one of the two logical tables.
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutRecord(ContentRecord),
    DeleteRecord(ContentId),
    PutFeedItem(FeedItemInfo),
    DeleteFeedItem { feed_id: FeedId, item_id: ContentId },
    DeleteFeed(FeedId),
}

/// An ordered batch of mutations committed atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Snapshot of both tables, used to hydrate the in-memory state on open.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Vec<ContentRecord>,
    pub feed_items: Vec<FeedItemInfo>,
}

/// Abstract transactional store the cache writes through to.
///
/// `apply` must be all-or-nothing: either every op in the batch commits or
/// none does. A reported error therefore means the in-memory state was not
/// advanced either.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Commit a batch atomically.
    async fn apply(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Read a consistent snapshot of both tables.
    async fn load(&self) -> Result<Snapshot, StorageError>;
}

/// In-memory engine: the default when no durable engine is plugged in, and
/// the baseline for tests.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: Mutex<MemoryTables>,
}

#[derive(Debug, Default)]
struct MemoryTables {
    records: HashMap<ContentId, ContentRecord>,
    feed_items: HashMap<(FeedId, ContentId), FeedItemInfo>,
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        for op in batch.ops {
            match op {
                WriteOp::PutRecord(record) => {
                    tables.records.insert(record.id.clone(), record);
                }
                WriteOp::DeleteRecord(id) => {
                    tables.records.remove(&id);
                }
                WriteOp::PutFeedItem(item) => {
                    tables
                        .feed_items
                        .insert((item.feed_id.clone(), item.item_id.clone()), item);
                }
                WriteOp::DeleteFeedItem { feed_id, item_id } => {
                    tables.feed_items.remove(&(feed_id, item_id));
                }
                WriteOp::DeleteFeed(feed_id) => {
                    tables.feed_items.retain(|(feed, _), _| feed != &feed_id);
                }
            }
        }
        Ok(())
    }

    async fn load(&self) -> Result<Snapshot, StorageError> {
        let tables = self.tables.lock().await;
        Ok(Snapshot {
            records: tables.records.values().cloned().collect(),
            feed_items: tables.feed_items.values().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommentPayload, ContentObject, ContentPayload, ContentStatus};
    use chrono::DateTime;

    fn record(id: &str) -> ContentRecord {
        ContentRecord::new(
            ContentId::from(id),
            ContentObject {
                author_id: None,
                author_nickname: None,
                author_avatar_url: None,
                created_at: DateTime::UNIX_EPOCH,
                updated_at: DateTime::UNIX_EPOCH,
                status: ContentStatus::Published,
                status_reasons: vec![],
                parent_id: None,
                payload: ContentPayload::Comment(CommentPayload {
                    text: "t".to_string(),
                    media: vec![],
                }),
            },
        )
    }

    #[tokio::test]
    async fn apply_and_load_round_trip() {
        let engine = MemoryEngine::default();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutRecord(record("a")));
        batch.push(WriteOp::PutRecord(record("b")));
        batch.push(WriteOp::DeleteRecord(ContentId::from("a")));
        engine.apply(batch).await.unwrap();

        let snapshot = engine.load().await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].id, ContentId::from("b"));
    }

    #[tokio::test]
    async fn delete_feed_drops_only_that_feed() {
        let engine = MemoryEngine::default();

        let mut batch = WriteBatch::new();
        for (feed, item) in [("f1", "a"), ("f1", "b"), ("f2", "a")] {
            batch.push(WriteOp::PutFeedItem(FeedItemInfo {
                feed_id: FeedId::from(feed),
                item_id: ContentId::from(item),
                position: 0,
                updated_at: DateTime::UNIX_EPOCH,
            }));
        }
        batch.push(WriteOp::DeleteFeed(FeedId::from("f1")));
        engine.apply(batch).await.unwrap();

        let snapshot = engine.load().await.unwrap();
        assert_eq!(snapshot.feed_items.len(), 1);
        assert_eq!(snapshot.feed_items[0].feed_id, FeedId::from("f2"));
    }
}
