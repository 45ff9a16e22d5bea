use serde::{Deserialize, Serialize};

use crate::ids::{
    EntityId, EntityPublicId, EntitySourcePublicId, EntitySourceRowId, ProjectFileId, ProjectId,
    RelationshipId, RelationshipPublicId, RelationshipSourcePublicId, RelationshipSourceRowId,
    TextUnitId, TextUnitPublicId,
};

/// An embedding vector. Stored as `pgvector::Vector` at rest; kept as a
/// plain `Vec<f32>` in-memory so `graph-extract` doesn't need a pgvector
/// dependency.
pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: Option<TextUnitId>,
    pub public_id: TextUnitPublicId,
    pub project_file_id: ProjectFileId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Option<EntityId>,
    pub public_id: EntityPublicId,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    #[serde(default)]
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Option<RelationshipId>,
    pub public_id: RelationshipPublicId,
    pub project_id: ProjectId,
    /// Endpoint public ids while the relationship lives in an in-memory
    /// arena (§9: "relationships hold endpoint public_ids, not pointers,
    /// until persisted"); resolved to surrogate ids at merge time.
    pub source_public_id: EntityPublicId,
    pub target_public_id: EntityPublicId,
    pub source_id: Option<EntityId>,
    pub target_id: Option<EntityId>,
    pub rank: f32,
    pub description: String,
    #[serde(default)]
    pub embedding: Embedding,
}

impl Relationship {
    /// Canonical unordered key for a pair of endpoints, used by relationship
    /// dedup (§4.6) to fold duplicate undirected pairs.
    pub fn unordered_key(a: EntityPublicId, b: EntityPublicId) -> (EntityPublicId, EntityPublicId) {
        if a.as_uuid() <= b.as_uuid() {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_public_id == self.target_public_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySource {
    pub id: Option<EntitySourceRowId>,
    pub public_id: EntitySourcePublicId,
    pub entity_public_id: EntityPublicId,
    pub entity_id: Option<EntityId>,
    pub text_unit_public_id: TextUnitPublicId,
    pub text_unit_id: Option<TextUnitId>,
    pub description: String,
    #[serde(default)]
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSource {
    pub id: Option<RelationshipSourceRowId>,
    pub public_id: RelationshipSourcePublicId,
    pub relationship_public_id: RelationshipPublicId,
    pub relationship_id: Option<RelationshipId>,
    pub text_unit_public_id: TextUnitPublicId,
    pub text_unit_id: Option<TextUnitId>,
    pub description: String,
    #[serde(default)]
    pub embedding: Embedding,
}

/// Default entity type vocabulary (§4.3: "the allowed entity types (default
/// 8 + FACT)").
pub const DEFAULT_ENTITY_TYPES: &[&str] = &[
    "PERSON",
    "ORGANIZATION",
    "LOCATION",
    "EVENT",
    "PRODUCT",
    "DATE",
    "CONCEPT",
    "DOCUMENT",
];

pub const FACT_ENTITY_TYPE: &str = "FACT";
