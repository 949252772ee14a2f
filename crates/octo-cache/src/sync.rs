//! Feed synchronization and the application-facing surface.
//!
//! Orchestrates the read path (server feed page -> index replacement ->
//! missing/stale detection -> batch fetch of exactly the missing ids ->
//! transactional upsert -> ordered read-back) and routes every
//! count-affecting mutation through the merger/reconciler so optimistic
//! state and server aggregates never fight.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::content::{CommentRepository, PostRepository, ReplyRepository};
use crate::engine::{MemoryEngine, StorageEngine};
use crate::error::{CacheError, RemoteError, SyncError};
use crate::events::{CacheEvent, Notifier};
use crate::feed::FeedIndex;
use crate::reconcile::MutationReconciler;
use crate::remote::{ContentDraft, GetBatchOptions, RemoteService};
use crate::store::ContentStore;
use crate::types::{ContentId, ContentRecord, ContentUpdate, FeedId, ReactionKind, UserReaction};

/// Page size used when walking a whole feed during a resync.
const RESYNC_PAGE_SIZE: usize = 50;

/// The feed synchronization engine and application surface.
///
/// Cheap to clone; clones share the same store, index and remote.
#[derive(Clone)]
pub struct FeedSynchronizer {
    remote: Arc<dyn RemoteService>,
    store: Arc<ContentStore>,
    feeds: Arc<FeedIndex>,
    reconciler: MutationReconciler,
    notifier: Notifier,
    increment_view_count: bool,
}

impl FeedSynchronizer {
    /// Start building a synchronizer over the given remote service.
    pub fn builder(remote: Arc<dyn RemoteService>) -> FeedSynchronizerBuilder {
        FeedSynchronizerBuilder::new(remote)
    }

    /// The shared content record store.
    pub fn store(&self) -> Arc<ContentStore> {
        Arc::clone(&self.store)
    }

    /// The shared feed index.
    pub fn feed_index(&self) -> Arc<FeedIndex> {
        Arc::clone(&self.feeds)
    }

    /// Typed repositories over the shared store.
    pub fn posts(&self) -> PostRepository {
        PostRepository::new(self.store())
    }

    pub fn comments(&self) -> CommentRepository {
        CommentRepository::new(self.store())
    }

    pub fn replies(&self) -> ReplyRepository {
        ReplyRepository::new(self.store())
    }

    /// Subscribe to every change notification.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.notifier.subscribe()
    }

    /// Stream of events concerning one content id.
    pub fn subscribe_content(&self, id: ContentId) -> impl Stream<Item = CacheEvent> + use<> {
        BroadcastStream::new(self.notifier.subscribe()).filter_map(move |event| match event {
            Ok(event) if event.concerns_content(&id) => Some(event),
            // Lagged subscribers drop events; they re-read on the next one.
            _ => None,
        })
    }

    /// Stream of events concerning one feed.
    pub fn subscribe_feed(&self, feed_id: FeedId) -> impl Stream<Item = CacheEvent> + use<> {
        BroadcastStream::new(self.notifier.subscribe()).filter_map(move |event| match event {
            Ok(event) if event.concerns_feed(&feed_id) => Some(event),
            _ => None,
        })
    }

    /// Restartable pager over a feed.
    pub fn pager(&self, feed_id: FeedId, page_size: usize) -> FeedPager {
        FeedPager {
            sync: self.clone(),
            feed_id,
            page_size,
            offset: 0,
        }
    }

    /// Synchronize one page of a feed and return its records in feed order.
    ///
    /// Only ids that are locally missing or stale are fetched from the
    /// remote; everything else is served from the cache.
    pub async fn sync_page(
        &self,
        feed_id: &FeedId,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<ContentRecord>, SyncError> {
        let (_, records) = self.sync_page_inner(feed_id, page_size, offset).await?;
        Ok(records)
    }

    async fn sync_page_inner(
        &self,
        feed_id: &FeedId,
        page_size: usize,
        offset: usize,
    ) -> Result<(usize, Vec<ContentRecord>), SyncError> {
        let listing = self.remote.get_feed_page(feed_id, page_size, offset).await?;
        let candidates: Vec<(ContentId, chrono::DateTime<chrono::Utc>)> = listing
            .into_iter()
            .map(|entry| (entry.id, entry.updated_at))
            .collect();

        self.feeds.replace_page(feed_id, offset, &candidates).await?;

        let missing = self.store.get_missing(&candidates).await;
        if !missing.is_empty() {
            debug!(
                feed = %feed_id,
                page = candidates.len(),
                missing = missing.len(),
                "fetching missing or stale items"
            );
            let entries = self
                .remote
                .get_batch(&missing, GetBatchOptions::all(), self.increment_view_count)
                .await?;
            self.store
                .upsert(entries.into_iter().map(ContentUpdate::from).collect())
                .await?;
        }

        let ids: Vec<ContentId> = candidates.iter().map(|(id, _)| id.clone()).collect();
        let records = self.store.get_by_ids(&ids).await;
        Ok((ids.len(), records))
    }

    /// Walk the whole feed page by page, then garbage-collect records no
    /// longer referenced by any feed. The recovery path after a storage
    /// fault is exactly this: resync from scratch.
    pub async fn resync(&self, feed_id: &FeedId) -> Result<(), SyncError> {
        info!(feed = %feed_id, "full feed resync");

        let mut offset = 0;
        loop {
            let (listed, _) = self
                .sync_page_inner(feed_id, RESYNC_PAGE_SIZE, offset)
                .await?;
            offset += listed;
            if listed < RESYNC_PAGE_SIZE {
                break;
            }
        }
        self.feeds.truncate(feed_id, offset).await?;

        let keep = self.feeds.all_ids().await;
        let dropped = self.store.delete_all_except(&keep).await?;
        info!(feed = %feed_id, total = offset, dropped = dropped.len(), "resync complete");
        Ok(())
    }

    /// Discard a feed and its membership rows.
    pub async fn remove_feed(&self, feed_id: &FeedId) -> Result<(), CacheError> {
        self.feeds.remove_feed(feed_id).await
    }

    /// Point lookup with fetch-through: a cached record is returned as-is,
    /// an unknown id is batch-fetched and cached first.
    pub async fn get_content(&self, id: &ContentId) -> Result<Option<ContentRecord>, SyncError> {
        if let Some(record) = self.store.get(id).await {
            return Ok(Some(record));
        }
        let entries = self
            .remote
            .get_batch(
                std::slice::from_ref(id),
                GetBatchOptions::all(),
                self.increment_view_count,
            )
            .await?;
        self.store
            .upsert(entries.into_iter().map(ContentUpdate::from).collect())
            .await?;
        Ok(self.store.get(id).await)
    }

    /// Batch lookup with fetch-through, ordered to match the input ids.
    pub async fn get_contents(
        &self,
        ids: &[ContentId],
    ) -> Result<Vec<ContentRecord>, SyncError> {
        let cached = self.store.get_by_ids(ids).await;
        if cached.len() < ids.len() {
            let have: std::collections::HashSet<&ContentId> =
                cached.iter().map(|r| &r.id).collect();
            let wanted: Vec<ContentId> = ids
                .iter()
                .filter(|id| !have.contains(id))
                .cloned()
                .collect();
            let entries = self
                .remote
                .get_batch(&wanted, GetBatchOptions::all(), self.increment_view_count)
                .await?;
            self.store
                .upsert(entries.into_iter().map(ContentUpdate::from).collect())
                .await?;
        }
        Ok(self.store.get_by_ids(ids).await)
    }

    /// Toggle the user's like. The optimistic count adjustment is applied
    /// once the remote confirms, so there is nothing to roll back here;
    /// liking already-liked content (or unliking unliked content) is a
    /// no-op.
    pub async fn set_like(&self, id: &ContentId, liking: bool) -> Result<(), SyncError> {
        let Some(record) = self.store.get(id).await else {
            debug!(id = %id, "set_like on uncached content ignored");
            return Ok(());
        };

        match (record.interactions.like_id, liking) {
            (None, true) => {
                let like_id = self.remote.like(id).await?;
                self.reconciler.set_user_like(id, Some(like_id), true).await?;
            }
            (Some(like_id), false) => {
                self.remote.unlike(id, &like_id).await?;
                self.reconciler.set_user_like(id, None, true).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Set or clear the user's reaction. Setting the kind already recorded
    /// is a no-op; changing kinds applies the symmetric-difference count
    /// adjustment locally.
    pub async fn set_reaction(
        &self,
        id: &ContentId,
        kind: Option<ReactionKind>,
    ) -> Result<(), SyncError> {
        let Some(record) = self.store.get(id).await else {
            debug!(id = %id, "set_reaction on uncached content ignored");
            return Ok(());
        };
        let current = record.interactions.reaction;

        match kind {
            Some(kind) => {
                if current.as_ref().map(|r| &r.kind) == Some(&kind) {
                    return Ok(());
                }
                let reaction_id = self.remote.react(id, &kind).await?;
                self.reconciler
                    .set_user_reaction(
                        id,
                        Some(UserReaction {
                            id: reaction_id,
                            kind,
                        }),
                        true,
                    )
                    .await?;
            }
            None => {
                if let Some(current) = current {
                    self.remote.unreact(id, &current.id).await?;
                    self.reconciler.set_user_reaction(id, None, true).await?;
                }
            }
        }
        Ok(())
    }

    /// Create a post, comment or reply. The confirmed record is cached and
    /// the parent's visible child count moves immediately.
    pub async fn create_content(
        &self,
        draft: ContentDraft,
    ) -> Result<ContentRecord, SyncError> {
        let created = self.remote.create_content(draft).await?;
        let parent_id = created.object.parent_id.clone();

        self.store
            .upsert(vec![ContentUpdate::object(created.id.clone(), created.object)])
            .await?;
        if let Some(parent_id) = parent_id {
            self.reconciler.increment_child_count(&parent_id, 1).await?;
        }

        self.store
            .get(&created.id)
            .await
            .ok_or_else(|| {
                SyncError::Remote(RemoteError::Service(
                    "created content vanished from cache".to_string(),
                ))
            })
    }

    /// Delete a piece of content. A remote not-found is absorbed (the
    /// content is gone either way); the parent's child count moves down.
    pub async fn delete_content(&self, id: &ContentId) -> Result<(), SyncError> {
        let parent_id = self
            .store
            .get(id)
            .await
            .and_then(|record| record.object.parent_id);

        match self.remote.delete_content(id).await {
            Ok(()) => {}
            Err(RemoteError::NotFound(_)) => {
                debug!(id = %id, "remote already deleted content");
            }
            Err(err) => return Err(err.into()),
        }

        self.store.delete(id).await?;
        if let Some(parent_id) = parent_id {
            self.reconciler.increment_child_count(&parent_id, -1).await?;
        }
        Ok(())
    }

    /// Report content for moderation.
    pub async fn report_content(&self, id: &ContentId, reason: &str) -> Result<(), SyncError> {
        self.remote.report_content(id, reason).await?;
        Ok(())
    }

    /// Clear every record's interactions and aggregates; called on logout
    /// so no other account's like state leaks.
    pub async fn reset_on_logout(&self) -> Result<(), CacheError> {
        self.store.reset_user_interactions().await
    }

    /// Force every record stale; called when the display language changes
    /// so server-translated text is re-downloaded on the next fetch.
    pub async fn mark_all_stale(&self) -> Result<(), CacheError> {
        self.store.reset_update_timestamps().await
    }
}

/// Lazily-paginated, restartable read sequence over a feed.
pub struct FeedPager {
    sync: FeedSynchronizer,
    feed_id: FeedId,
    page_size: usize,
    offset: usize,
}

impl FeedPager {
    /// Synchronize and return the next page in feed order. An empty page
    /// means the feed is exhausted; the pager stays usable and re-querying
    /// after a resync returns the refreshed set.
    pub async fn next_page(&mut self) -> Result<Vec<ContentRecord>, SyncError> {
        let (listed, records) = self
            .sync
            .sync_page_inner(&self.feed_id, self.page_size, self.offset)
            .await?;
        self.offset += listed;
        Ok(records)
    }

    /// Restart from the first page.
    pub fn restart(&mut self) {
        self.offset = 0;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Builder for a [`FeedSynchronizer`].
pub struct FeedSynchronizerBuilder {
    remote: Arc<dyn RemoteService>,
    engine: Option<Arc<dyn StorageEngine>>,
    channel_capacity: Option<usize>,
    increment_view_count: bool,
}

impl FeedSynchronizerBuilder {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self {
            remote,
            engine: None,
            channel_capacity: None,
            increment_view_count: true,
        }
    }

    /// Plug in a durable storage engine. Defaults to [`MemoryEngine`].
    pub fn engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Capacity of the change-notification channel.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Whether batch fetches count as views server-side.
    pub fn increment_view_count(mut self, increment: bool) -> Self {
        self.increment_view_count = increment;
        self
    }

    /// Load the engine snapshot and build the synchronizer.
    pub async fn build(self) -> Result<FeedSynchronizer, CacheError> {
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(MemoryEngine::default()));
        let snapshot = engine.load().await?;
        info!(
            records = snapshot.records.len(),
            feed_items = snapshot.feed_items.len(),
            "cache hydrated from engine"
        );

        let notifier = match self.channel_capacity {
            Some(capacity) => Notifier::with_capacity(capacity),
            None => Notifier::new(),
        };
        let store = Arc::new(ContentStore::new(
            Arc::clone(&engine),
            notifier.clone(),
            snapshot.records,
        ));
        let feeds = Arc::new(FeedIndex::new(
            engine,
            notifier.clone(),
            snapshot.feed_items,
        ));
        let reconciler = MutationReconciler::new(Arc::clone(&store));

        Ok(FeedSynchronizer {
            remote: self.remote,
            store,
            feeds,
            reconciler,
            notifier,
            increment_view_count: self.increment_view_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::{BatchEntry, CreatedContent, FeedPageEntry};
    use crate::types::InteractionId;
    use async_trait::async_trait;

    struct NullRemote;

    #[async_trait]
    impl RemoteService for NullRemote {
        async fn get_batch(
            &self,
            _ids: &[ContentId],
            _options: GetBatchOptions,
            _increment_view_count: bool,
        ) -> Result<Vec<BatchEntry>, RemoteError> {
            Ok(vec![])
        }

        async fn get_feed_page(
            &self,
            _feed_id: &FeedId,
            _page_size: usize,
            _offset: usize,
        ) -> Result<Vec<FeedPageEntry>, RemoteError> {
            Ok(vec![])
        }

        async fn create_content(
            &self,
            _draft: ContentDraft,
        ) -> Result<CreatedContent, RemoteError> {
            Err(RemoteError::Service("not implemented".to_string()))
        }

        async fn delete_content(&self, _id: &ContentId) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn like(&self, _id: &ContentId) -> Result<InteractionId, RemoteError> {
            Ok(InteractionId::from("like"))
        }

        async fn unlike(
            &self,
            _id: &ContentId,
            _like_id: &InteractionId,
        ) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn react(
            &self,
            _id: &ContentId,
            _kind: &ReactionKind,
        ) -> Result<InteractionId, RemoteError> {
            Ok(InteractionId::from("reaction"))
        }

        async fn unreact(
            &self,
            _id: &ContentId,
            _reaction_id: &InteractionId,
        ) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn report_content(&self, _id: &ContentId, _reason: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn builder_defaults() {
        let sync = FeedSynchronizer::builder(Arc::new(NullRemote))
            .increment_view_count(false)
            .build()
            .await
            .unwrap();

        assert!(!sync.increment_view_count);
        assert!(sync.store().is_empty().await);
    }

    #[tokio::test]
    async fn empty_feed_yields_empty_pages() {
        let sync = FeedSynchronizer::builder(Arc::new(NullRemote))
            .build()
            .await
            .unwrap();

        let mut pager = sync.pager(FeedId::from("f"), 10);
        assert!(pager.next_page().await.unwrap().is_empty());
        assert_eq!(pager.offset(), 0);
    }

    #[tokio::test]
    async fn mutations_on_uncached_content_are_noops() {
        let sync = FeedSynchronizer::builder(Arc::new(NullRemote))
            .build()
            .await
            .unwrap();

        sync.set_like(&ContentId::from("ghost"), true).await.unwrap();
        sync.set_reaction(&ContentId::from("ghost"), Some(ReactionKind::from("joy")))
            .await
            .unwrap();
    }
}
