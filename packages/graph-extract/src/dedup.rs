//! Document-local entity deduplication (§4.3 step 3): run after extraction,
//! before staging, so that a single file's units don't stage redundant
//! entities for the same real-world thing. Cross-document dedup (which
//! operates on persisted rows with source counts) is a separate, later
//! stage owned by `graph-core`.

use std::collections::HashMap;

use serde::Deserialize;

use graph_types::{Entity, EntitySource, Relationship};

use crate::error::{ExtractError, Result};
use crate::json_repair::parse_flexible;
use crate::model::ModelClient;

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub max_iterations: usize,
    pub batch_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            batch_size: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DuplicateGroup {
    #[serde(rename = "canonicalName")]
    canonical_name: String,
    entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DuplicatesResponse {
    duplicates: Vec<DuplicateGroup>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReorderStrategy {
    Identity,
    Interleave,
    Sorted,
}

fn strategy_for_iteration(iteration: usize) -> ReorderStrategy {
    match iteration % 3 {
        0 => ReorderStrategy::Identity,
        1 => ReorderStrategy::Interleave,
        _ => ReorderStrategy::Sorted,
    }
}

fn reorder(entities: &[Entity], strategy: ReorderStrategy, batch_size: usize) -> Vec<usize> {
    let n = entities.len();
    match strategy {
        ReorderStrategy::Identity => (0..n).collect(),
        ReorderStrategy::Interleave => {
            let num_batches = (n + batch_size - 1) / batch_size.max(1);
            let num_batches = num_batches.max(1);
            let mut order = Vec::with_capacity(n);
            for batch in 0..num_batches {
                let mut i = batch;
                while i < n {
                    order.push(i);
                    i += num_batches;
                }
            }
            order
        }
        ReorderStrategy::Sorted => {
            let mut idx: Vec<usize> = (0..n).collect();
            idx.sort_by(|&a, &b| {
                let key_a = format!("{}|{}", entities[a].name, entities[a].entity_type);
                let key_b = format!("{}|{}", entities[b].name, entities[b].entity_type);
                key_a.cmp(&key_b)
            });
            idx
        }
    }
}

fn batch_prompt(entities: &[&Entity]) -> String {
    let listing: Vec<serde_json::Value> = entities
        .iter()
        .map(|e| {
            serde_json::json!({
                "name": e.name,
                "type": e.entity_type,
                "description": e.description,
            })
        })
        .collect();
    format!(
        "Identify duplicate entities below that refer to the same real-world thing. \
         Respond with strict JSON: {{\"duplicates\": [{{\"canonicalName\": string, \
         \"entities\": [string, ...]}}]}}. If there are no duplicates, return \
         {{\"duplicates\": []}}.\n\nEntities:\n{}",
        serde_json::to_string(&listing).unwrap_or_default()
    )
}

/// Runs the iterative document-local dedup pass over one file's entities,
/// entity sources, and relationships, mutating all three in place.
pub async fn dedup_document(
    client: &dyn ModelClient,
    entities: &mut Vec<Entity>,
    entity_sources: &mut Vec<EntitySource>,
    relationships: &mut Vec<Relationship>,
    config: DedupConfig,
) -> Result<()> {
    for iteration in 0..config.max_iterations {
        let strategy = strategy_for_iteration(iteration);
        let order = reorder(entities, strategy, config.batch_size);

        let mut any_groups = false;
        let mut merge_map: HashMap<String, String> = HashMap::new(); // old name -> canonical name

        for chunk in order.chunks(config.batch_size) {
            let batch_entities: Vec<&Entity> = chunk.iter().map(|&i| &entities[i]).collect();
            let prompt = batch_prompt(&batch_entities);
            let raw = client
                .generate_text(
                    "You are deduplicating extracted entities. Respond with JSON only.",
                    &prompt,
                )
                .await
                .map_err(|e| ExtractError::Model(Box::new(e)))?;

            let parsed: DuplicatesResponse = match parse_flexible(&raw) {
                Ok(p) => p,
                Err(_) => continue,
            };

            for group in parsed.duplicates {
                if group.entities.len() < 2 {
                    continue;
                }
                any_groups = true;
                for name in &group.entities {
                    merge_map.insert(name.clone(), group.canonical_name.clone());
                }
            }
        }

        if !any_groups {
            break;
        }

        apply_merges(entities, entity_sources, relationships, &merge_map);
    }

    Ok(())
}

fn apply_merges(
    entities: &mut Vec<Entity>,
    entity_sources: &mut Vec<EntitySource>,
    relationships: &mut Vec<Relationship>,
    merge_map: &HashMap<String, String>,
) {
    // Group entity indices by canonical name.
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, entity) in entities.iter().enumerate() {
        if let Some(canonical_name) = merge_map.get(&entity.name) {
            groups.entry(canonical_name.clone()).or_default().push(idx);
        }
    }

    let mut old_to_canonical: HashMap<graph_types::EntityPublicId, graph_types::EntityPublicId> =
        HashMap::new();
    let mut drop: Vec<usize> = Vec::new();

    for (canonical_name, indices) in groups {
        if indices.len() < 2 {
            continue;
        }
        // Canonical = most sources; tie-break longer description.
        let canonical_idx = *indices
            .iter()
            .max_by_key(|&&i| {
                let source_count = entity_sources
                    .iter()
                    .filter(|s| s.entity_public_id == entities[i].public_id)
                    .count();
                (source_count, entities[i].description.len())
            })
            .unwrap();
        let canonical_public_id = entities[canonical_idx].public_id;

        let longest_description = indices
            .iter()
            .map(|&i| entities[i].description.clone())
            .max_by_key(|d| d.len())
            .unwrap_or_default();

        for &i in &indices {
            let public_id = entities[i].public_id;
            old_to_canonical.insert(public_id, canonical_public_id);
            if i != canonical_idx {
                drop.push(i);
            }
        }

        entities[canonical_idx].name = canonical_name;
        entities[canonical_idx].description = longest_description;
    }

    if drop.is_empty() {
        return;
    }

    // Repoint entity sources at their canonical entity, then dedup by
    // source public id.
    for source in entity_sources.iter_mut() {
        if let Some(&canonical) = old_to_canonical.get(&source.entity_public_id) {
            source.entity_public_id = canonical;
        }
    }
    let mut seen_sources = std::collections::HashSet::new();
    entity_sources.retain(|s| seen_sources.insert(s.public_id));

    // Remove the non-canonical entity rows, highest index first.
    drop.sort_unstable();
    for &i in drop.iter().rev() {
        entities.remove(i);
    }

    // Remap relationship endpoints, drop self-loops, fold duplicate
    // undirected pairs by averaging rank.
    for rel in relationships.iter_mut() {
        if let Some(&canonical) = old_to_canonical.get(&rel.source_public_id) {
            rel.source_public_id = canonical;
        }
        if let Some(&canonical) = old_to_canonical.get(&rel.target_public_id) {
            rel.target_public_id = canonical;
        }
    }
    relationships.retain(|r| !r.is_self_loop());

    let mut by_key: HashMap<(graph_types::EntityPublicId, graph_types::EntityPublicId), Vec<usize>> =
        HashMap::new();
    for (idx, rel) in relationships.iter().enumerate() {
        let key = Relationship::unordered_key(rel.source_public_id, rel.target_public_id);
        by_key.entry(key).or_default().push(idx);
    }

    let mut folded = Vec::new();
    for (_, indices) in by_key {
        if indices.len() == 1 {
            folded.push(relationships[indices[0]].clone());
            continue;
        }
        let mut merged = relationships[indices[0]].clone();
        let avg_rank: f32 =
            indices.iter().map(|&i| relationships[i].rank).sum::<f32>() / indices.len() as f32;
        merged.rank = avg_rank;
        let longest = indices
            .iter()
            .map(|&i| relationships[i].description.clone())
            .max_by_key(|d| d.len())
            .unwrap_or_default();
        merged.description = longest;
        folded.push(merged);
    }
    *relationships = folded;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use async_trait::async_trait;
    use graph_types::{Id, ProjectId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn generate_structured(
            &self,
            _system: &str,
            _user: &str,
            _schema: serde_json::Value,
            _schema_name: &str,
        ) -> std::result::Result<String, ModelError> {
            unimplemented!()
        }

        async fn generate_text(&self, _system: &str, _user: &str) -> std::result::Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(r#"{"duplicates": []}"#.to_string());
            }
            Ok(responses.remove(0))
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ModelError> {
            unimplemented!()
        }

        async fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ModelError> {
            unimplemented!()
        }
    }

    fn entity(project_id: ProjectId, name: &str, desc: &str) -> Entity {
        Entity {
            id: None,
            public_id: Id::new(),
            project_id,
            name: name.to_string(),
            entity_type: "PERSON".to_string(),
            description: desc.to_string(),
            embedding: Vec::new(),
        }
    }

    #[tokio::test]
    async fn merges_reported_duplicates_and_folds_relationships() {
        let project_id = ProjectId::new();
        let mut entities = vec![
            entity(project_id, "Alice Smith", "short"),
            entity(project_id, "A. Smith", "a much longer description of Alice"),
        ];
        let mut entity_sources = vec![
            EntitySource {
                id: None,
                public_id: Id::new(),
                entity_public_id: entities[0].public_id,
                entity_id: None,
                text_unit_public_id: Id::new(),
                text_unit_id: None,
                description: "short".to_string(),
                embedding: Vec::new(),
            },
            EntitySource {
                id: None,
                public_id: Id::new(),
                entity_public_id: entities[1].public_id,
                entity_id: None,
                text_unit_public_id: Id::new(),
                text_unit_id: None,
                description: "longer".to_string(),
                embedding: Vec::new(),
            },
            EntitySource {
                id: None,
                public_id: Id::new(),
                entity_public_id: entities[1].public_id,
                entity_id: None,
                text_unit_public_id: Id::new(),
                text_unit_id: None,
                description: "longer2".to_string(),
                embedding: Vec::new(),
            },
        ];
        let mut relationships = Vec::new();

        let client = ScriptedClient {
            responses: Mutex::new(vec![
                r#"{"duplicates": [{"canonicalName": "Alice Smith", "entities": ["Alice Smith", "A. Smith"]}]}"#
                    .to_string(),
            ]),
            calls: AtomicUsize::new(0),
        };

        dedup_document(
            &client,
            &mut entities,
            &mut entity_sources,
            &mut relationships,
            DedupConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(entities.len(), 1);
        // Canonical chosen by source count (2 sources) over the 1-source entity.
        assert_eq!(entities[0].description, "a much longer description of Alice");
        assert_eq!(entity_sources.len(), 3);
    }

    #[tokio::test]
    async fn stops_early_when_no_duplicates_reported() {
        let project_id = ProjectId::new();
        let mut entities = vec![entity(project_id, "Solo", "desc")];
        let mut entity_sources = Vec::new();
        let mut relationships = Vec::new();

        let client = ScriptedClient {
            responses: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        };

        dedup_document(
            &client,
            &mut entities,
            &mut entity_sources,
            &mut relationships,
            DedupConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
