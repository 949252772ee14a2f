//! Core types for the normalized content model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque content identifier, globally unique across posts, comments and
/// replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a feed (an ordered listing of content items).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub String);

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FeedId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FeedId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Server-issued identifier of a single user interaction (a like or a
/// reaction). Kept so the interaction can be targeted for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionId(pub String);

impl std::fmt::Display for InteractionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InteractionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque reaction kind (e.g. "heart", "joy").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionKind(pub String);

impl std::fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReactionKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Moderation status of a content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentStatus {
    Published,
    Moderated,
    Other,
}

impl Default for ContentStatus {
    fn default() -> Self {
        Self::Published
    }
}

/// Machine-readable reason attached to a non-published status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReason {
    pub code: String,
    pub message: String,
}

/// Per-kind reaction counter. The list it lives in preserves the server's
/// ordering; locally-discovered kinds are appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCount {
    pub kind: ReactionKind,
    pub count: u64,
}

/// Server-confirmed aggregate counters for one content record.
///
/// Absent on a [`ContentRecord`] means the aggregates were never fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedInfo {
    pub view_count: u64,
    pub like_count: u64,
    pub child_count: u64,
    pub reactions: Vec<ReactionCount>,
}

impl AggregatedInfo {
    /// Stored count for a reaction kind, if the kind is tracked.
    pub fn reaction_count(&self, kind: &ReactionKind) -> Option<u64> {
        self.reactions
            .iter()
            .find(|r| &r.kind == kind)
            .map(|r| r.count)
    }
}

/// The current user's own reaction on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReaction {
    pub id: InteractionId,
    pub kind: ReactionKind,
}

/// The current user's own interactions with a record, identified by
/// server-issued interaction ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInteractions {
    pub like_id: Option<InteractionId>,
    pub reaction: Option<UserReaction>,
}

impl UserInteractions {
    pub fn is_empty(&self) -> bool {
        self.like_id.is_none() && self.reaction.is_none()
    }

    /// Kind of the user's current reaction, if any.
    pub fn reaction_kind(&self) -> Option<&ReactionKind> {
        self.reaction.as_ref().map(|r| &r.kind)
    }
}

/// Reference to an attached media asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    pub mime_type: Option<String>,
}

/// One answer option of a post poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub text: String,
    pub vote_count: u64,
}

/// Poll attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub question: String,
    pub options: Vec<PollOption>,
}

/// Post-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    pub headline: Option<String>,
    pub text: String,
    pub media: Vec<MediaRef>,
    pub poll: Option<Poll>,
    /// Feed listing this post's comments newest-first.
    pub comments_newest_feed: FeedId,
    /// Feed listing this post's comments oldest-first.
    pub comments_oldest_feed: FeedId,
}

/// Comment-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    pub text: String,
    pub media: Vec<MediaRef>,
}

/// Reply-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    pub text: String,
    pub media: Vec<MediaRef>,
}

/// Content kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    Post,
    Comment,
    Reply,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Post => write!(f, "post"),
            ContentKind::Comment => write!(f, "comment"),
            ContentKind::Reply => write!(f, "reply"),
        }
    }
}

/// Kind-specific payload of a content record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContentPayload {
    Post(PostPayload),
    Comment(CommentPayload),
    Reply(ReplyPayload),
}

impl ContentPayload {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentPayload::Post(_) => ContentKind::Post,
            ContentPayload::Comment(_) => ContentKind::Comment,
            ContentPayload::Reply(_) => ContentKind::Reply,
        }
    }
}

/// The remotely-authored part of a content record: identity fields, status,
/// timestamps and the kind-specific payload. This is the unit the stale-write
/// gate accepts or discards as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentObject {
    pub author_id: Option<String>,
    pub author_nickname: Option<String>,
    pub author_avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Authority for staleness comparisons.
    pub updated_at: DateTime<Utc>,
    pub status: ContentStatus,
    pub status_reasons: Vec<StatusReason>,
    /// Owning post/comment; `None` for root posts.
    pub parent_id: Option<ContentId>,
    pub payload: ContentPayload,
}

/// A normalized content record: one row of the content table, shared by
/// posts, comments and replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: ContentId,
    pub object: ContentObject,
    /// `None` until aggregates have been fetched from the server.
    pub aggregates: Option<AggregatedInfo>,
    pub interactions: UserInteractions,
}

impl ContentRecord {
    pub fn new(id: ContentId, object: ContentObject) -> Self {
        Self {
            id,
            object,
            aggregates: None,
            interactions: UserInteractions::default(),
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.object.payload.kind()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.object.updated_at
    }

    /// Like count exposed to readers. While the user's own like is recorded
    /// locally the count is floored at 1, so content the user just liked
    /// never shows zero likes while the server aggregate catches up.
    pub fn like_count(&self) -> u64 {
        let stored = self.aggregates.as_ref().map(|a| a.like_count).unwrap_or(0);
        if self.interactions.like_id.is_some() {
            stored.max(1)
        } else {
            stored
        }
    }

    pub fn as_post(&self) -> Option<&PostPayload> {
        match &self.object.payload {
            ContentPayload::Post(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_comment(&self) -> Option<&CommentPayload> {
        match &self.object.payload {
            ContentPayload::Comment(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_reply(&self) -> Option<&ReplyPayload> {
        match &self.object.payload {
            ContentPayload::Reply(r) => Some(r),
            _ => None,
        }
    }
}

/// One row of the feed membership table: item `item_id` sits at `position`
/// within feed `feed_id`, and was last known to the server as updated at
/// `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItemInfo {
    pub feed_id: FeedId,
    pub item_id: ContentId,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}

/// One unit of upsert into the content store, mirroring a remote batch
/// entry: any combination of object, aggregates and interaction snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdate {
    pub id: ContentId,
    pub object: Option<ContentObject>,
    pub aggregates: Option<AggregatedInfo>,
    pub interactions: Option<UserInteractions>,
}

impl ContentUpdate {
    /// Update carrying a full object (and nothing else).
    pub fn object(id: ContentId, object: ContentObject) -> Self {
        Self {
            id,
            object: Some(object),
            aggregates: None,
            interactions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_like(like_count: u64, liked: bool) -> ContentRecord {
        let mut record = ContentRecord::new(
            ContentId::from("c1"),
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
                    text: "hi".to_string(),
                    media: vec![],
                }),
            },
        );
        record.aggregates = Some(AggregatedInfo {
            like_count,
            ..AggregatedInfo::default()
        });
        if liked {
            record.interactions.like_id = Some(InteractionId::from("like-1"));
        }
        record
    }

    #[test]
    fn like_count_floored_while_liked() {
        assert_eq!(record_with_like(0, true).like_count(), 1);
        assert_eq!(record_with_like(7, true).like_count(), 7);
    }

    #[test]
    fn like_count_verbatim_when_not_liked() {
        assert_eq!(record_with_like(0, false).like_count(), 0);
        assert_eq!(record_with_like(7, false).like_count(), 7);
    }

    #[test]
    fn like_count_zero_without_aggregates() {
        let mut record = record_with_like(3, false);
        record.aggregates = None;
        assert_eq!(record.like_count(), 0);
    }

    #[test]
    fn wire_shape_is_camel_case_with_tagged_payload() {
        let record = record_with_like(2, true);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["id"], "c1");
        assert_eq!(json["object"]["payload"]["kind"], "comment");
        assert_eq!(json["object"]["statusReasons"], serde_json::json!([]));
        assert_eq!(json["aggregates"]["likeCount"], 2);
        assert_eq!(json["interactions"]["likeId"], "like-1");

        let parsed: ContentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }
}
