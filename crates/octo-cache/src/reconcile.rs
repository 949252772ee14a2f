//! Optimistic counter reconciliation.
//!
//! Applies local counter deltas directly against cached records, pending
//! the next aggregate refresh: child-count increments when children are
//! created or deleted, and like/reaction toggles. All adjustments are
//! floor-clamped at zero and run through the store's serialized
//! read-modify-write, so no two mutations interleave.

use std::sync::Arc;

use tracing::trace;

use crate::error::CacheError;
use crate::merge::{apply_count_delta, apply_reaction_transition};
use crate::store::ContentStore;
use crate::types::{ContentId, InteractionId, UserReaction};

/// Applies optimistic mutations against the content store.
#[derive(Clone)]
pub struct MutationReconciler {
    store: Arc<ContentStore>,
}

impl MutationReconciler {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self { store }
    }

    /// Adjust a record's visible child count by `delta`, clamped at zero.
    ///
    /// Triggered when a child is created or deleted, so the parent's count
    /// updates immediately without waiting for a server re-fetch. Targeting
    /// an id absent from the store is a benign race and a no-op, as is a
    /// record whose aggregates were never fetched.
    pub async fn increment_child_count(
        &self,
        id: &ContentId,
        delta: i64,
    ) -> Result<(), CacheError> {
        let touched = self
            .store
            .update_record(id, |record| {
                if let Some(aggregates) = record.aggregates.as_mut() {
                    aggregates.child_count = apply_count_delta(aggregates.child_count, delta);
                }
            })
            .await?;
        if !touched {
            trace!(id = %id, delta, "reconciler: child count target not cached");
        }
        Ok(())
    }

    /// Record the user's new reaction (or its removal). With
    /// `update_counts_locally`, the stored reaction counts get the same
    /// symmetric-difference adjustment the server merge applies, without a
    /// round trip.
    pub async fn set_user_reaction(
        &self,
        id: &ContentId,
        new_reaction: Option<UserReaction>,
        update_counts_locally: bool,
    ) -> Result<(), CacheError> {
        let touched = self
            .store
            .update_record(id, |record| {
                let old_kind = record.interactions.reaction_kind().cloned();
                let new_kind = new_reaction.as_ref().map(|r| r.kind.clone());
                record.interactions.reaction = new_reaction;
                if update_counts_locally
                    && let Some(aggregates) = record.aggregates.as_mut()
                {
                    apply_reaction_transition(
                        &mut aggregates.reactions,
                        old_kind.as_ref(),
                        new_kind.as_ref(),
                    );
                }
            })
            .await?;
        if !touched {
            trace!(id = %id, "reconciler: reaction target not cached");
        }
        Ok(())
    }

    /// Record the user's like (or its removal). With `update_count_locally`,
    /// the stored like count moves by one in the matching direction,
    /// clamped at zero.
    pub async fn set_user_like(
        &self,
        id: &ContentId,
        new_like_id: Option<InteractionId>,
        update_count_locally: bool,
    ) -> Result<(), CacheError> {
        let touched = self
            .store
            .update_record(id, |record| {
                let had_like = record.interactions.like_id.is_some();
                let has_like = new_like_id.is_some();
                record.interactions.like_id = new_like_id;
                if update_count_locally
                    && had_like != has_like
                    && let Some(aggregates) = record.aggregates.as_mut()
                {
                    let delta = if has_like { 1 } else { -1 };
                    aggregates.like_count = apply_count_delta(aggregates.like_count, delta);
                }
            })
            .await?;
        if !touched {
            trace!(id = %id, "reconciler: like target not cached");
        }
        Ok(())
    }
}
