//! Typed repositories over the shared content record store.
//!
//! Posts, comments and replies share one identity/aggregate/interaction
//! structure; each repository adds the kind predicate to fetches and the
//! kind payload to upserts, delegating everything else to the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::CacheError;
use crate::store::ContentStore;
use crate::types::{ContentId, ContentKind, ContentRecord, ContentUpdate};

/// Kind-scoped view of the content store.
#[derive(Clone)]
pub struct TypedRepository {
    store: Arc<ContentStore>,
    kind: ContentKind,
}

impl TypedRepository {
    fn new(store: Arc<ContentStore>, kind: ContentKind) -> Self {
        Self { store, kind }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Upsert updates carrying this repository's kind. Updates whose object
    /// payload is of a different kind are dropped with a warning; updates
    /// without an object (snapshot-only) pass through untouched since the
    /// store merges them against whatever kind is cached.
    pub async fn upsert(&self, updates: Vec<ContentUpdate>) -> Result<(), CacheError> {
        let kind = self.kind;
        let filtered: Vec<ContentUpdate> = updates
            .into_iter()
            .filter(|update| match &update.object {
                Some(object) if object.payload.kind() != kind => {
                    warn!(
                        id = %update.id,
                        expected = %kind,
                        got = %object.payload.kind(),
                        "typed repository: dropping update of wrong kind"
                    );
                    false
                }
                _ => true,
            })
            .collect();
        self.store.upsert(filtered).await
    }

    /// Point lookup, filtered to this repository's kind.
    pub async fn get(&self, id: &ContentId) -> Option<ContentRecord> {
        self.store
            .get(id)
            .await
            .filter(|record| record.kind() == self.kind)
    }

    /// Batch lookup ordered to match the input id order, filtered to this
    /// repository's kind.
    pub async fn get_many(&self, ids: &[ContentId]) -> Vec<ContentRecord> {
        self.store
            .get_by_ids(ids)
            .await
            .into_iter()
            .filter(|record| record.kind() == self.kind)
            .collect()
    }

    /// Staleness/missing detection against the shared store; see
    /// [`ContentStore::get_missing`].
    pub async fn get_missing(
        &self,
        candidates: &[(ContentId, DateTime<Utc>)],
    ) -> Vec<ContentId> {
        self.store.get_missing(candidates).await
    }
}

/// Repository of root posts.
#[derive(Clone)]
pub struct PostRepository(pub TypedRepository);

impl PostRepository {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self(TypedRepository::new(store, ContentKind::Post))
    }
}

impl std::ops::Deref for PostRepository {
    type Target = TypedRepository;

    fn deref(&self) -> &TypedRepository {
        &self.0
    }
}

/// Repository of comments under posts.
#[derive(Clone)]
pub struct CommentRepository(pub TypedRepository);

impl CommentRepository {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self(TypedRepository::new(store, ContentKind::Comment))
    }
}

impl std::ops::Deref for CommentRepository {
    type Target = TypedRepository;

    fn deref(&self) -> &TypedRepository {
        &self.0
    }
}

/// Repository of replies under comments.
#[derive(Clone)]
pub struct ReplyRepository(pub TypedRepository);

impl ReplyRepository {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self(TypedRepository::new(store, ContentKind::Reply))
    }
}

impl std::ops::Deref for ReplyRepository {
    type Target = TypedRepository;

    fn deref(&self) -> &TypedRepository {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::events::Notifier;
    use crate::types::{
        CommentPayload, ContentObject, ContentPayload, ContentStatus, FeedId, PostPayload,
    };
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn store() -> Arc<ContentStore> {
        Arc::new(ContentStore::new(
            Arc::new(MemoryEngine::default()),
            Notifier::new(),
            vec![],
        ))
    }

    fn object(payload: ContentPayload, updated_secs: i64) -> ContentObject {
        ContentObject {
            author_id: None,
            author_nickname: None,
            author_avatar_url: None,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            updated_at: Utc.timestamp_opt(updated_secs, 0).unwrap(),
            status: ContentStatus::Published,
            status_reasons: vec![],
            parent_id: None,
            payload,
        }
    }

    fn post_update(id: &str) -> ContentUpdate {
        ContentUpdate::object(
            ContentId::from(id),
            object(
                ContentPayload::Post(PostPayload {
                    headline: None,
                    text: "post".to_string(),
                    media: vec![],
                    poll: None,
                    comments_newest_feed: FeedId::from("f-new"),
                    comments_oldest_feed: FeedId::from("f-old"),
                }),
                1,
            ),
        )
    }

    fn comment_update(id: &str) -> ContentUpdate {
        ContentUpdate::object(
            ContentId::from(id),
            object(
                ContentPayload::Comment(CommentPayload {
                    text: "comment".to_string(),
                    media: vec![],
                }),
                1,
            ),
        )
    }

    #[tokio::test]
    async fn kind_predicate_filters_fetches() {
        let store = store();
        let posts = PostRepository::new(store.clone());
        let comments = CommentRepository::new(store.clone());

        posts.upsert(vec![post_update("p1")]).await.unwrap();
        comments.upsert(vec![comment_update("c1")]).await.unwrap();

        assert!(posts.get(&ContentId::from("p1")).await.is_some());
        assert!(posts.get(&ContentId::from("c1")).await.is_none());
        assert!(comments.get(&ContentId::from("c1")).await.is_some());
    }

    #[tokio::test]
    async fn wrong_kind_upsert_is_dropped() {
        let store = store();
        let posts = PostRepository::new(store.clone());

        posts.upsert(vec![comment_update("c1")]).await.unwrap();
        assert!(store.get(&ContentId::from("c1")).await.is_none());
    }

    #[tokio::test]
    async fn get_many_preserves_request_order() {
        let store = store();
        let comments = CommentRepository::new(store.clone());
        comments
            .upsert(vec![
                comment_update("a"),
                comment_update("b"),
                comment_update("c"),
            ])
            .await
            .unwrap();

        let fetched = comments
            .get_many(&[ContentId::from("b"), ContentId::from("c"), ContentId::from("a")])
            .await;
        let ids: Vec<&str> = fetched.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
