//! Per-entity typed id aliases. See [`crate::id`] for the underlying pattern.

use crate::id::{Id, V4, V7};

pub struct ProjectMarker;
pub struct ProjectFileMarker;
pub struct TextUnitMarker;
pub struct EntityMarker;
pub struct RelationshipMarker;
pub struct EntitySourceMarker;
pub struct RelationshipSourceMarker;

/// Surrogate (internal, V7, chronologically sortable) ids.
pub type ProjectId = Id<ProjectMarker, V7>;
pub type ProjectFileId = Id<ProjectFileMarker, V7>;
pub type TextUnitId = Id<TextUnitMarker, V7>;
pub type EntityId = Id<EntityMarker, V7>;
pub type RelationshipId = Id<RelationshipMarker, V7>;
pub type EntitySourceRowId = Id<EntitySourceMarker, V7>;
pub type RelationshipSourceRowId = Id<RelationshipSourceMarker, V7>;

/// Correlation ids are externally generated UUIDs (by the scheduler); v4.
pub type CorrelationId = Id<ProjectMarker, V4>;

/// Content-addressed public ids: generated once per logical object and
/// persisted, so retries upsert onto the same row instead of duplicating it.
pub type TextUnitPublicId = Id<TextUnitMarker, V4>;
pub type EntityPublicId = Id<EntityMarker, V4>;
pub type RelationshipPublicId = Id<RelationshipMarker, V4>;
pub type EntitySourcePublicId = Id<EntitySourceMarker, V4>;
pub type RelationshipSourcePublicId = Id<RelationshipSourceMarker, V4>;

// Batch ids and description job ids are small integers scoped to a
// correlation (§3: `batch_id: int`, `job_id: int`), not UUIDs.
pub type BatchId = i32;
pub type DescriptionJobId = i32;
