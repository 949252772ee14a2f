//! Client-side content cache and feed synchronization for a community
//! content platform.
//!
//! This crate keeps a local, transactional mirror of server content
//! (posts, comments, replies, their aggregates and the user's own
//! interactions) and synchronizes it feed page by feed page, fetching
//! only what is missing or stale.
//!
//! ## Features
//!
//! - **Store**: batched, idempotent content record store over a
//!   pluggable transactional storage engine
//! - **Feeds**: ordered feed membership index with range page replacement
//! - **Merge**: staleness-aware payload/aggregate/interaction merging
//! - **Sync**: feed synchronizer with restartable pagers, optimistic
//!   mutations and broadcast change notifications

pub mod content;
pub mod engine;
mod error;
pub mod events;
pub mod feed;
mod merge;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod sync;
mod types;

pub use content::{CommentRepository, PostRepository, ReplyRepository, TypedRepository};
pub use engine::{MemoryEngine, Snapshot, StorageEngine, WriteBatch, WriteOp};
pub use error::{CacheError, RemoteError, StorageError, SyncError};
pub use events::{CacheEvent, Notifier};
pub use feed::FeedIndex;
pub use reconcile::MutationReconciler;
pub use remote::{
    BatchEntry, ContentDraft, CreatedContent, FeedPageEntry, GetBatchOptions, RemoteService,
};
pub use store::ContentStore;
pub use sync::{FeedPager, FeedSynchronizer, FeedSynchronizerBuilder};
pub use types::*;
