//! Pure reconciliation of server snapshots into cached records.
//!
//! Two concerns live here: the stale-write gate on the object payload, and
//! the aggregate/interaction merge that keeps server counters consistent
//! with the user's own recorded interactions.

use tracing::trace;

use crate::types::{
    AggregatedInfo, ContentRecord, ContentUpdate, ReactionCount, ReactionKind, UserInteractions,
};

/// Apply a signed delta to a counter, floored at zero.
pub(crate) fn apply_count_delta(count: u64, delta: i64) -> u64 {
    if delta >= 0 {
        count.saturating_add(delta as u64)
    } else {
        count.saturating_sub(delta.unsigned_abs())
    }
}

/// Symmetric-difference adjustment of per-kind reaction counts when the
/// user's reaction moves from `old_kind` to `new_kind`.
///
/// Equal kinds leave the counts untouched. A decrement floors at zero; an
/// increment seeds a zero-count entry first if the kind was not tracked.
pub(crate) fn apply_reaction_transition(
    reactions: &mut Vec<ReactionCount>,
    old_kind: Option<&ReactionKind>,
    new_kind: Option<&ReactionKind>,
) {
    if old_kind == new_kind {
        return;
    }

    if let Some(old) = old_kind
        && let Some(entry) = reactions.iter_mut().find(|r| &r.kind == old)
    {
        entry.count = entry.count.saturating_sub(1);
    }

    if let Some(new) = new_kind {
        match reactions.iter_mut().find(|r| &r.kind == new) {
            Some(entry) => entry.count += 1,
            None => reactions.push(ReactionCount {
                kind: new.clone(),
                count: 1,
            }),
        }
    }
}

/// Merge freshly fetched aggregate and interaction snapshots into a record.
///
/// An absent aggregate snapshot leaves the stored aggregate untouched, so a
/// partial (object-only) fetch never erases previously known counts. View
/// and child counts are taken verbatim from the server; reaction counts get
/// the symmetric-difference adjustment against the interaction change.
pub(crate) fn merge_snapshots(
    record: &mut ContentRecord,
    aggregates: Option<AggregatedInfo>,
    interactions: Option<UserInteractions>,
) {
    let old_kind = record.interactions.reaction_kind().cloned();

    let merged_interactions = match interactions {
        Some(snapshot) => snapshot,
        None => record.interactions.clone(),
    };
    let new_kind = merged_interactions.reaction_kind().cloned();

    if let Some(mut aggregates) = aggregates {
        apply_reaction_transition(
            &mut aggregates.reactions,
            old_kind.as_ref(),
            new_kind.as_ref(),
        );
        record.aggregates = Some(aggregates);
    }

    record.interactions = merged_interactions;
}

/// Merge one update into the cached state, producing the record to store.
///
/// Returns `None` when there is nothing to store: an aggregate-only update
/// for an id that was never cached is a benign race (the content was deleted
/// or never fetched) and is dropped.
pub(crate) fn apply_update(
    existing: Option<&ContentRecord>,
    update: ContentUpdate,
) -> Option<ContentRecord> {
    match existing {
        None => {
            // First sighting: the object seeds the record and both
            // snapshots are taken verbatim. The transition logic only
            // applies when reconciling against previously stored state.
            let object = update.object?;
            let mut record = ContentRecord::new(update.id, object);
            record.aggregates = update.aggregates;
            record.interactions = update.interactions.unwrap_or_default();
            Some(record)
        }
        Some(existing) => {
            let mut merged = existing.clone();

            if let Some(object) = update.object {
                if object.updated_at > existing.updated_at() {
                    merged.object = object;
                } else {
                    // Out-of-order response: the payload must not revert,
                    // but the snapshots from the same response still apply.
                    trace!(
                        id = %update.id,
                        incoming = %object.updated_at,
                        cached = %existing.updated_at(),
                        "dropping stale object payload"
                    );
                }
            }

            merge_snapshots(&mut merged, update.aggregates, update.interactions);
            Some(merged)
        }
    }
}
