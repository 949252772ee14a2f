//! The remote content service collaborator.
//!
//! Modeled as capability, not wire format: the transport/RPC layer lives
//! outside this crate and plugs in through [`RemoteService`]. Successful
//! mutations return typed payloads that feed upserts into the cache;
//! validation failures surface to the caller untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::types::{
    AggregatedInfo, ContentId, ContentObject, ContentPayload, ContentUpdate, FeedId,
    InteractionId, ReactionKind, UserInteractions,
};

/// Which facets of a content item a batch fetch should return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBatchOptions {
    pub object: bool,
    pub aggregates: bool,
    pub interactions: bool,
}

impl GetBatchOptions {
    /// Fetch everything.
    pub fn all() -> Self {
        Self {
            object: true,
            aggregates: true,
            interactions: true,
        }
    }

    /// Fetch only the object payload.
    pub fn object_only() -> Self {
        Self {
            object: true,
            ..Self::default()
        }
    }
}

/// One item of a batch-fetch response. Facets not requested (or not
/// available) are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub id: ContentId,
    pub object: Option<ContentObject>,
    pub aggregates: Option<AggregatedInfo>,
    pub interactions: Option<UserInteractions>,
}

impl From<BatchEntry> for ContentUpdate {
    fn from(entry: BatchEntry) -> Self {
        ContentUpdate {
            id: entry.id,
            object: entry.object,
            aggregates: entry.aggregates,
            interactions: entry.interactions,
        }
    }
}

/// One item of a server feed listing: the item id and the server's current
/// update date, which drives local staleness detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPageEntry {
    pub id: ContentId,
    pub updated_at: DateTime<Utc>,
}

/// A locally-authored piece of content to be created server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDraft {
    /// Owning post/comment; `None` for a root post.
    pub parent_id: Option<ContentId>,
    pub payload: ContentPayload,
}

/// Server confirmation of a created piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedContent {
    pub id: ContentId,
    pub object: ContentObject,
}

/// Capabilities of the remote content service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetch the requested facets for a batch of ids. With
    /// `increment_view_count` the server counts the fetch as a view.
    async fn get_batch(
        &self,
        ids: &[ContentId],
        options: GetBatchOptions,
        increment_view_count: bool,
    ) -> Result<Vec<BatchEntry>, RemoteError>;

    /// List one page of a feed, ordered server-side.
    async fn get_feed_page(
        &self,
        feed_id: &FeedId,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<FeedPageEntry>, RemoteError>;

    /// Create a post, comment or reply.
    async fn create_content(&self, draft: ContentDraft) -> Result<CreatedContent, RemoteError>;

    /// Delete a piece of content the user owns.
    async fn delete_content(&self, id: &ContentId) -> Result<(), RemoteError>;

    /// Like a piece of content; returns the interaction id needed to
    /// unlike it later.
    async fn like(&self, id: &ContentId) -> Result<InteractionId, RemoteError>;

    /// Remove a previously issued like.
    async fn unlike(&self, id: &ContentId, like_id: &InteractionId) -> Result<(), RemoteError>;

    /// Set the user's reaction; replaces any previous reaction and returns
    /// the new interaction id.
    async fn react(
        &self,
        id: &ContentId,
        kind: &ReactionKind,
    ) -> Result<InteractionId, RemoteError>;

    /// Remove a previously issued reaction.
    async fn unreact(
        &self,
        id: &ContentId,
        reaction_id: &InteractionId,
    ) -> Result<(), RemoteError>;

    /// Report content for moderation.
    async fn report_content(&self, id: &ContentId, reason: &str) -> Result<(), RemoteError>;
}
