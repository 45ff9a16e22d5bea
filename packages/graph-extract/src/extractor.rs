//! Per-unit entity/relationship extraction (§4.3 step 2 "Extract per
//! unit"): builds the system prompt, calls the model in structured-output
//! mode, repairs/parses the response, and materializes graph rows scoped to
//! the unit.

use serde::Deserialize;

use graph_types::{Entity, EntityId, EntityPublicId, EntitySource, EntitySourceRowId, ProjectId,
    Relationship, RelationshipId, RelationshipPublicId, RelationshipSource, RelationshipSourceRowId,
    TextUnitId, TextUnitPublicId, Id};

use crate::error::{ExtractError, Result};
use crate::json_repair::parse_flexible;
use crate::model::ModelClient;
use crate::prompts::{extract_schema, system_prompt, PromptKind, EXTRACT_SCHEMA_NAME};

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    source_entity: String,
    target_entity: String,
    description: String,
    relationship_strength: f32,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    entities: Vec<RawEntity>,
    relationships: Vec<RawRelationship>,
}

/// One unit's extraction result: entities and relationships, each carrying
/// exactly one source for the unit they came from.
pub struct UnitExtraction {
    pub entities: Vec<Entity>,
    pub entity_sources: Vec<EntitySource>,
    pub relationships: Vec<Relationship>,
    pub relationship_sources: Vec<RelationshipSource>,
}

/// Runs one unit through the model and builds entities/sources/relationships
/// scoped to `project_id`. `text_unit_id` is `None` until the unit is
/// persisted; callers fill it in during merge (§4.3, §4.4).
pub async fn extract_unit(
    client: &dyn ModelClient,
    kind: PromptKind,
    project_id: ProjectId,
    base_name: &str,
    metadata: Option<&serde_json::Value>,
    text_unit_public_id: TextUnitPublicId,
    text_unit_id: Option<TextUnitId>,
) -> Result<UnitExtraction> {
    let system = system_prompt(kind, base_name, metadata);
    let raw = client
        .generate_structured(&system, "", extract_schema(), EXTRACT_SCHEMA_NAME)
        .await
        .map_err(|e| ExtractError::Model(Box::new(e)))?;

    let parsed: RawExtraction =
        parse_flexible(&raw).map_err(ExtractError::Unparseable)?;

    let mut entities = Vec::with_capacity(parsed.entities.len());
    let mut entity_sources = Vec::with_capacity(parsed.entities.len());
    // name -> public_id, for resolving relationship endpoints by exact match.
    let mut by_name: std::collections::HashMap<String, EntityPublicId> = std::collections::HashMap::new();

    for raw_entity in parsed.entities {
        let entity_public_id = Id::new();
        by_name.insert(raw_entity.name.clone(), entity_public_id);

        entities.push(Entity {
            id: None,
            public_id: entity_public_id,
            project_id,
            name: raw_entity.name,
            entity_type: raw_entity.entity_type,
            description: raw_entity.description.clone(),
            embedding: Vec::new(),
        });

        entity_sources.push(EntitySource {
            id: None::<EntitySourceRowId>,
            public_id: Id::new(),
            entity_public_id,
            entity_id: None,
            text_unit_public_id,
            text_unit_id,
            description: raw_entity.description,
            embedding: Vec::new(),
        });
    }

    let mut relationships = Vec::with_capacity(parsed.relationships.len());
    let mut relationship_sources = Vec::with_capacity(parsed.relationships.len());
    for raw_rel in parsed.relationships {
        let (Some(&source_public_id), Some(&target_public_id)) = (
            by_name.get(&raw_rel.source_entity),
            by_name.get(&raw_rel.target_entity),
        ) else {
            continue;
        };

        let relationship_public_id: RelationshipPublicId = Id::new();
        relationships.push(Relationship {
            id: None::<RelationshipId>,
            public_id: relationship_public_id,
            project_id,
            source_public_id,
            target_public_id,
            source_id: None::<EntityId>,
            target_id: None::<EntityId>,
            rank: raw_rel.relationship_strength,
            description: raw_rel.description.clone(),
            embedding: Vec::new(),
        });

        relationship_sources.push(RelationshipSource {
            id: None::<RelationshipSourceRowId>,
            public_id: Id::new(),
            relationship_public_id,
            relationship_id: None,
            text_unit_public_id,
            text_unit_id,
            description: raw_rel.description,
            embedding: Vec::new(),
        });
    }

    Ok(UnitExtraction {
        entities,
        entity_sources,
        relationships,
        relationship_sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use async_trait::async_trait;

    struct StubClient(String);

    #[async_trait]
    impl ModelClient for StubClient {
        async fn generate_structured(
            &self,
            _system: &str,
            _user: &str,
            _schema: serde_json::Value,
            _schema_name: &str,
        ) -> std::result::Result<String, ModelError> {
            Ok(self.0.clone())
        }

        async fn generate_text(&self, _system: &str, _user: &str) -> std::result::Result<String, ModelError> {
            unimplemented!()
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ModelError> {
            unimplemented!()
        }

        async fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ModelError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn extracts_entities_and_resolves_relationships() {
        let raw = r#"{
            "entities": [
                {"name": "Alice", "type": "PERSON", "description": "A person"},
                {"name": "Acme", "type": "ORGANIZATION", "description": "A company"}
            ],
            "relationships": [
                {"source_entity": "Alice", "target_entity": "Acme", "description": "works at", "relationship_strength": 0.8}
            ]
        }"#;
        let client = StubClient(raw.to_string());
        let project_id = ProjectId::new();
        let unit_public_id = Id::new();

        let result = extract_unit(
            &client,
            PromptKind::Text,
            project_id,
            "doc.txt",
            None,
            unit_public_id,
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entity_sources.len(), 2);
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].source_public_id, result.entities[0].public_id);
        assert_eq!(result.relationships[0].target_public_id, result.entities[1].public_id);
    }

    #[tokio::test]
    async fn drops_relationships_with_unresolved_endpoints() {
        let raw = r#"{
            "entities": [{"name": "Alice", "type": "PERSON", "description": "A person"}],
            "relationships": [
                {"source_entity": "Alice", "target_entity": "Ghost", "description": "?", "relationship_strength": 0.5}
            ]
        }"#;
        let client = StubClient(raw.to_string());
        let result = extract_unit(
            &client,
            PromptKind::Text,
            ProjectId::new(),
            "doc.txt",
            None,
            Id::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.entities.len(), 1);
        assert!(result.relationships.is_empty());
    }
}
