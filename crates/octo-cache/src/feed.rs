//! Per-feed ordered membership index.
//!
//! Maps (feed id, item id) to a position and the item's last-known server
//! update timestamp. Pages are read by position; pages are written by
//! wholesale replacement of an offset range, with positions for appended
//! pages seeded from the feed's current maximum.
//!
//! Each feed has its own async writer lock, so writers on different feeds
//! never contend while writers on the same feed are serialized.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::engine::{StorageEngine, WriteBatch, WriteOp};
use crate::error::CacheError;
use crate::events::{CacheEvent, Notifier};
use crate::types::{ContentId, FeedId, FeedItemInfo};

#[derive(Debug, Default)]
struct FeedState {
    items: HashMap<ContentId, FeedItemInfo>,
    order: BTreeMap<i64, ContentId>,
}

impl FeedState {
    fn next_position(&self) -> i64 {
        self.order
            .last_key_value()
            .map(|(position, _)| position + 1)
            .unwrap_or(0)
    }

    fn remove_item(&mut self, id: &ContentId) -> Option<FeedItemInfo> {
        let info = self.items.remove(id)?;
        self.order.remove(&info.position);
        Some(info)
    }

    fn insert_item(&mut self, info: FeedItemInfo) -> Option<ContentId> {
        // A position can hold one item; an item can hold one position.
        self.remove_item(&info.item_id);
        let displaced = self.order.insert(info.position, info.item_id.clone());
        if let Some(displaced) = &displaced {
            self.items.remove(displaced);
        }
        self.items.insert(info.item_id.clone(), info);
        displaced
    }
}

/// Ordered membership index over all known feeds.
pub struct FeedIndex {
    engine: Arc<dyn StorageEngine>,
    feeds: DashMap<FeedId, Arc<Mutex<FeedState>>>,
    notifier: Notifier,
}

impl FeedIndex {
    /// Create an index over the given engine, hydrated with previously
    /// persisted feed rows.
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        notifier: Notifier,
        initial: Vec<FeedItemInfo>,
    ) -> Self {
        let feeds: DashMap<FeedId, Arc<Mutex<FeedState>>> = DashMap::new();
        for info in initial {
            let cell = feeds
                .entry(info.feed_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(FeedState::default())))
                .clone();
            // No concurrent access during construction.
            if let Ok(mut state) = cell.try_lock() {
                state.insert_item(info);
            }
        }
        Self {
            engine,
            feeds,
            notifier,
        }
    }

    fn feed_cell(&self, feed_id: &FeedId) -> Arc<Mutex<FeedState>> {
        self.feeds
            .entry(feed_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(FeedState::default())))
            .clone()
    }

    /// Replace the page at rank `offset` with freshly fetched rows.
    ///
    /// Positions are reused from the replaced range when the page was
    /// already known, and seeded past the feed's current maximum when
    /// appending, so pages never collide. Rows previously in the range but
    /// absent from the new listing are dropped.
    pub async fn replace_page(
        &self,
        feed_id: &FeedId,
        offset: usize,
        entries: &[(ContentId, DateTime<Utc>)],
    ) -> Result<Vec<FeedItemInfo>, CacheError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let cell = self.feed_cell(feed_id);
        let mut state = cell.lock().await;

        let window: Vec<(i64, ContentId)> = state
            .order
            .iter()
            .skip(offset)
            .take(entries.len())
            .map(|(position, id)| (*position, id.clone()))
            .collect();
        let base = window
            .first()
            .map(|(position, _)| *position)
            .unwrap_or_else(|| state.next_position());

        let rows: Vec<FeedItemInfo> = entries
            .iter()
            .enumerate()
            .map(|(i, (id, updated_at))| FeedItemInfo {
                feed_id: feed_id.clone(),
                item_id: id.clone(),
                position: base + i as i64,
                updated_at: *updated_at,
            })
            .collect();

        let fresh_ids: HashSet<&ContentId> = entries.iter().map(|(id, _)| id).collect();
        let dropped: Vec<ContentId> = window
            .iter()
            .filter(|(_, id)| !fresh_ids.contains(id))
            .map(|(_, id)| id.clone())
            .collect();

        let mut batch = WriteBatch::new();
        for id in &dropped {
            batch.push(WriteOp::DeleteFeedItem {
                feed_id: feed_id.clone(),
                item_id: id.clone(),
            });
        }
        for row in &rows {
            batch.push(WriteOp::PutFeedItem(row.clone()));
        }
        self.engine.apply(batch).await?;

        for id in &dropped {
            state.remove_item(id);
        }
        for row in rows.clone() {
            state.insert_item(row);
        }
        drop(state);

        trace!(feed = %feed_id, offset, rows = rows.len(), "feed index: page replaced");
        self.notifier.send(CacheEvent::FeedPageReplaced {
            feed_id: feed_id.clone(),
        });
        Ok(rows)
    }

    /// Ids of one page, ordered by position ascending.
    pub async fn page(&self, feed_id: &FeedId, page_size: usize, offset: usize) -> Vec<ContentId> {
        let Some(cell) = self.feeds.get(feed_id).map(|c| c.clone()) else {
            return Vec::new();
        };
        let state = cell.lock().await;
        state
            .order
            .values()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect()
    }

    /// Row for one item of one feed.
    pub async fn item(&self, feed_id: &FeedId, item_id: &ContentId) -> Option<FeedItemInfo> {
        let cell = self.feeds.get(feed_id).map(|c| c.clone())?;
        let state = cell.lock().await;
        state.items.get(item_id).cloned()
    }

    /// Number of rows known for a feed.
    pub async fn len(&self, feed_id: &FeedId) -> usize {
        match self.feeds.get(feed_id).map(|c| c.clone()) {
            Some(cell) => cell.lock().await.items.len(),
            None => 0,
        }
    }

    /// Next free position for appending to a feed.
    pub async fn next_position(&self, feed_id: &FeedId) -> i64 {
        match self.feeds.get(feed_id).map(|c| c.clone()) {
            Some(cell) => cell.lock().await.next_position(),
            None => 0,
        }
    }

    /// Which of these candidates are missing from the feed or stale against
    /// the rows' last-known update timestamps. Same tie-break as the record
    /// store: an equal timestamp means the row is current.
    pub async fn get_missing(
        &self,
        feed_id: &FeedId,
        candidates: &[(ContentId, DateTime<Utc>)],
    ) -> Vec<ContentId> {
        let Some(cell) = self.feeds.get(feed_id).map(|c| c.clone()) else {
            return candidates.iter().map(|(id, _)| id.clone()).collect();
        };
        let state = cell.lock().await;
        candidates
            .iter()
            .filter(|(id, server_updated_at)| match state.items.get(id) {
                None => true,
                Some(row) => *server_updated_at > row.updated_at,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every item id referenced by any feed. This is the GC exception set
    /// after a resync: membership anywhere keeps a record alive.
    pub async fn all_ids(&self) -> HashSet<ContentId> {
        let cells: Vec<Arc<Mutex<FeedState>>> =
            self.feeds.iter().map(|entry| entry.value().clone()).collect();
        let mut ids = HashSet::new();
        for cell in cells {
            let state = cell.lock().await;
            ids.extend(state.items.keys().cloned());
        }
        ids
    }

    /// Drop every row ranked at or beyond `len`. Used after a full resync
    /// when the feed shrank server-side.
    pub async fn truncate(&self, feed_id: &FeedId, len: usize) -> Result<(), CacheError> {
        let Some(cell) = self.feeds.get(feed_id).map(|c| c.clone()) else {
            return Ok(());
        };
        let mut state = cell.lock().await;

        let doomed: Vec<ContentId> = state.order.values().skip(len).cloned().collect();
        if doomed.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        for id in &doomed {
            batch.push(WriteOp::DeleteFeedItem {
                feed_id: feed_id.clone(),
                item_id: id.clone(),
            });
        }
        self.engine.apply(batch).await?;

        for id in &doomed {
            state.remove_item(id);
        }
        drop(state);

        trace!(feed = %feed_id, dropped = doomed.len(), "feed index: truncated");
        self.notifier.send(CacheEvent::FeedPageReplaced {
            feed_id: feed_id.clone(),
        });
        Ok(())
    }

    /// Discard a feed and all its membership rows.
    pub async fn remove_feed(&self, feed_id: &FeedId) -> Result<(), CacheError> {
        let Some(cell) = self.feeds.get(feed_id).map(|c| c.clone()) else {
            return Ok(());
        };
        let mut state = cell.lock().await;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteFeed(feed_id.clone()));
        self.engine.apply(batch).await?;

        state.items.clear();
        state.order.clear();
        drop(state);
        self.feeds.remove(feed_id);

        debug!(feed = %feed_id, "feed index: feed removed");
        self.notifier.send(CacheEvent::FeedRemoved {
            feed_id: feed_id.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn index() -> FeedIndex {
        FeedIndex::new(Arc::new(MemoryEngine::default()), Notifier::new(), vec![])
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn entries(ids: &[&str], secs: i64) -> Vec<(ContentId, DateTime<Utc>)> {
        ids.iter().map(|id| (ContentId::from(*id), ts(secs))).collect()
    }

    #[tokio::test]
    async fn pages_are_ordered_by_position() {
        let index = index();
        let feed = FeedId::from("f");
        index
            .replace_page(&feed, 0, &entries(&["a", "b", "c"], 1))
            .await
            .unwrap();
        index
            .replace_page(&feed, 3, &entries(&["d", "e"], 1))
            .await
            .unwrap();

        let page = index.page(&feed, 3, 0).await;
        assert_eq!(page, vec![ContentId::from("a"), ContentId::from("b"), ContentId::from("c")]);

        let page = index.page(&feed, 3, 3).await;
        assert_eq!(page, vec![ContentId::from("d"), ContentId::from("e")]);
    }

    #[tokio::test]
    async fn appended_pages_do_not_collide() {
        let index = index();
        let feed = FeedId::from("f");
        index
            .replace_page(&feed, 0, &entries(&["a", "b"], 1))
            .await
            .unwrap();
        let rows = index
            .replace_page(&feed, 2, &entries(&["c", "d"], 1))
            .await
            .unwrap();

        assert_eq!(rows[0].position, 2);
        assert_eq!(rows[1].position, 3);
        assert_eq!(index.len(&feed).await, 4);
    }

    #[tokio::test]
    async fn refetching_a_known_page_replaces_the_range() {
        let index = index();
        let feed = FeedId::from("f");
        index
            .replace_page(&feed, 0, &entries(&["a", "b", "c"], 1))
            .await
            .unwrap();

        // Item b fell out of the page server-side; x took its place.
        index
            .replace_page(&feed, 0, &entries(&["a", "x", "c"], 2))
            .await
            .unwrap();

        let page = index.page(&feed, 3, 0).await;
        assert_eq!(page, vec![ContentId::from("a"), ContentId::from("x"), ContentId::from("c")]);
        assert!(index.item(&feed, &ContentId::from("b")).await.is_none());
    }

    #[tokio::test]
    async fn missing_detection_scoped_to_feed() {
        let index = index();
        let feed = FeedId::from("f");
        index
            .replace_page(&feed, 0, &entries(&["a"], 100))
            .await
            .unwrap();

        let candidates = vec![
            (ContentId::from("a"), ts(100)), // equal: current
            (ContentId::from("b"), ts(50)),  // no row: missing
        ];
        let missing = index.get_missing(&feed, &candidates).await;
        assert_eq!(missing, vec![ContentId::from("b")]);

        let missing = index
            .get_missing(&feed, &[(ContentId::from("a"), ts(101))])
            .await;
        assert_eq!(missing, vec![ContentId::from("a")]);
    }

    #[tokio::test]
    async fn remove_feed_drops_rows() {
        let index = index();
        let feed = FeedId::from("f");
        index
            .replace_page(&feed, 0, &entries(&["a", "b"], 1))
            .await
            .unwrap();

        index.remove_feed(&feed).await.unwrap();
        assert_eq!(index.len(&feed).await, 0);
        assert!(index.page(&feed, 10, 0).await.is_empty());
    }

    #[tokio::test]
    async fn all_ids_spans_feeds() {
        let index = index();
        index
            .replace_page(&FeedId::from("f1"), 0, &entries(&["a", "b"], 1))
            .await
            .unwrap();
        index
            .replace_page(&FeedId::from("f2"), 0, &entries(&["b", "c"], 1))
            .await
            .unwrap();

        let ids = index.all_ids().await;
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&ContentId::from("a")));
        assert!(ids.contains(&ContentId::from("c")));
    }
}
