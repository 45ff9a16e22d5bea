//! Cross-document deduplication (§4.6). Runs at the end of merge, inside a
//! single transaction that rolls back on any error. Candidate generation is
//! trigram similarity over entity names; components are merged iteratively
//! with the model, the same reorder/batch/canonical-selection shape as
//! `graph_extract::dedup`'s document-local pass, but operating on persisted
//! rows (source counts come from the DB, not an in-memory source list).

use std::collections::HashMap;

use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};

use graph_extract::{parse_flexible, ModelClient};
use graph_types::{EntityId, ProjectId};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy)]
pub struct CrossDocDedupConfig {
    pub trigram_threshold: f64,
    pub max_iterations: usize,
    pub batch_size: usize,
}

impl Default for CrossDocDedupConfig {
    fn default() -> Self {
        Self {
            trigram_threshold: 0.6,
            max_iterations: 100,
            batch_size: 300,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SimilarPair {
    e1: EntityId,
    e2: EntityId,
}

/// Candidate generation: all ordered entity pairs within the project whose
/// normalized names are similar by the trigram threshold (requires the
/// `pg_trgm` extension and a trigram index on `lower(entities.name)`).
async fn find_similar_entity_pairs(
    tx: &mut Transaction<'_, Postgres>,
    project_id: ProjectId,
    threshold: f64,
) -> Result<Vec<(EntityId, EntityId)>> {
    let rows = sqlx::query_as::<_, SimilarPair>(
        r#"
        SELECT e1.id AS e1, e2.id AS e2
        FROM entities e1
        JOIN entities e2
          ON e1.project_id = e2.project_id AND e1.id < e2.id
        WHERE e1.project_id = $1
          AND similarity(lower(e1.name), lower(e2.name)) >= $2
        "#,
    )
    .bind(project_id.as_uuid())
    .bind(threshold)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.into_iter().map(|r| (r.e1, r.e2)).collect())
}

/// Builds connected components from a set of pairs via union-find.
fn connected_components(pairs: &[(EntityId, EntityId)]) -> Vec<Vec<EntityId>> {
    let mut parent: HashMap<EntityId, EntityId> = HashMap::new();

    fn find(parent: &mut HashMap<EntityId, EntityId>, x: EntityId) -> EntityId {
        let p = *parent.entry(x).or_insert(x);
        if p == x {
            x
        } else {
            let root = find(parent, p);
            parent.insert(x, root);
            root
        }
    }

    for &(a, b) in pairs {
        find(&mut parent, a);
        find(&mut parent, b);
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra != rb {
            parent.insert(ra, rb);
        }
    }

    let mut groups: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
    let keys: Vec<EntityId> = parent.keys().copied().collect();
    for id in keys {
        let root = find(&mut parent, id);
        groups.entry(root).or_default().push(id);
    }

    groups.into_values().filter(|g| g.len() > 1).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct EntityWithSourceCount {
    id: EntityId,
    name: String,
    #[sqlx(rename = "type")]
    entity_type: String,
    description: String,
    source_count: i64,
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

fn reorder_names<'a>(
    entities: &'a [EntityWithSourceCount],
    iteration: usize,
    batch_size: usize,
) -> Vec<&'a EntityWithSourceCount> {
    let n = entities.len();
    match iteration % 3 {
        0 => entities.iter().collect(),
        1 => {
            let num_batches = ((n + batch_size - 1) / batch_size.max(1)).max(1);
            let mut order = Vec::with_capacity(n);
            for batch in 0..num_batches {
                let mut i = batch;
                while i < n {
                    order.push(&entities[i]);
                    i += num_batches;
                }
            }
            order
        }
        _ => {
            let mut order: Vec<&EntityWithSourceCount> = entities.iter().collect();
            order.sort_by(|a, b| format!("{}|{}", a.name, a.entity_type).cmp(&format!("{}|{}", b.name, b.entity_type)));
            order
        }
    }
}

/// Merges one connected component of similar entities, iterating (at most
/// `config.max_iterations` times) until the model reports no duplicates or
/// no merge changes anything.
async fn merge_component(
    tx: &mut Transaction<'_, Postgres>,
    model: &dyn ModelClient,
    component: &[EntityId],
    config: CrossDocDedupConfig,
) -> Result<()> {
    for iteration in 0..config.max_iterations {
        let ids: Vec<uuid::Uuid> = component.iter().map(|id| *id.as_uuid()).collect();
        let mut entities = sqlx::query_as::<_, EntityWithSourceCount>(
            r#"
            SELECT e.id, e.name, e.type, e.description,
                   COUNT(es.id) AS source_count
            FROM entities e
            LEFT JOIN entity_sources es ON es.entity_id = e.id
            WHERE e.id = ANY($1::uuid[])
            GROUP BY e.id
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await?;

        if entities.len() < 2 {
            return Ok(());
        }

        entities.sort_by_key(|e| e.id);
        let order = reorder_names(&entities, iteration, config.batch_size);

        let mut any_merges = false;

        for chunk in order.chunks(config.batch_size) {
            let listing: Vec<serde_json::Value> = chunk
                .iter()
                .map(|e| serde_json::json!({"name": e.name, "type": e.entity_type, "description": e.description}))
                .collect();
            let prompt = format!(
                "Identify duplicate entities below that refer to the same real-world thing. \
                 Respond with strict JSON: {{\"duplicates\": [{{\"canonicalName\": string, \
                 \"entities\": [string, ...]}}]}}. If there are none, return {{\"duplicates\": []}}.\n\n\
                 Entities:\n{}",
                serde_json::to_string(&listing).unwrap_or_default()
            );

            let raw = model
                .generate_text("You are deduplicating graph entities. Respond with JSON only.", &prompt)
                .await
                .map_err(|e| CoreError::Model(Box::new(e)))?;

            let parsed: DuplicatesResponse = match parse_flexible(&raw) {
                Ok(p) => p,
                Err(_) => continue,
            };

            for group in parsed.duplicates {
                if group.entities.len() < 2 {
                    continue;
                }
                let members: Vec<&EntityWithSourceCount> = chunk
                    .iter()
                    .copied()
                    .filter(|e| group.entities.contains(&e.name))
                    .collect();
                if members.len() < 2 {
                    continue;
                }
                any_merges = true;
                apply_entity_merge(tx, &members, &group.canonical_name).await?;
            }
        }

        if !any_merges {
            return Ok(());
        }

        if iteration + 1 == config.max_iterations {
            tracing::warn!(component_size = component.len(), "cross-document dedup hit iteration cap");
        }
    }

    Ok(())
}

async fn apply_entity_merge(
    tx: &mut Transaction<'_, Postgres>,
    members: &[&EntityWithSourceCount],
    canonical_name: &str,
) -> Result<()> {
    let canonical = members
        .iter()
        .max_by_key(|e| (e.source_count, e.description.len() as i64))
        .expect("members is non-empty");
    let canonical_id = canonical.id;

    let duplicate_ids: Vec<uuid::Uuid> = members
        .iter()
        .filter(|e| e.id != canonical_id)
        .map(|e| *e.id.as_uuid())
        .collect();
    if duplicate_ids.is_empty() {
        return Ok(());
    }

    sqlx::query("UPDATE entities SET name = $1 WHERE id = $2")
        .bind(canonical_name)
        .bind(canonical_id.as_uuid())
        .execute(&mut **tx)
        .await?;

    sqlx::query("UPDATE entity_sources SET entity_id = $1 WHERE entity_id = ANY($2::uuid[])")
        .bind(canonical_id.as_uuid())
        .bind(&duplicate_ids)
        .execute(&mut **tx)
        .await?;

    sqlx::query("UPDATE relationships SET source_id = $1 WHERE source_id = ANY($2::uuid[])")
        .bind(canonical_id.as_uuid())
        .bind(&duplicate_ids)
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE relationships SET target_id = $1 WHERE target_id = ANY($2::uuid[])")
        .bind(canonical_id.as_uuid())
        .bind(&duplicate_ids)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM entities WHERE id = ANY($1::uuid[])")
        .bind(&duplicate_ids)
        .execute(&mut **tx)
        .await?;

    // Repointing both endpoints at the canonical entity can turn a former
    // A->B / B->A pair into a self-loop (§8 scenario 6: "no self-loops").
    sqlx::query("DELETE FROM relationships WHERE source_id = $1 AND target_id = $1")
        .bind(canonical_id.as_uuid())
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct RelationshipPairRow {
    id: graph_types::RelationshipId,
    source_id: EntityId,
    target_id: EntityId,
    rank: f32,
}

/// Folds duplicate *undirected* pairs: an A->B row and a separately
/// extracted B->A row referring to the same canonical entities are the same
/// relationship (§8 scenario 6, "no duplicate undirected pairs"), so pairs
/// are grouped by `(min(source_id, target_id), max(source_id, target_id))`
/// rather than raw column order. Keeps one row per group, transfers
/// sources, averages ranks, and deletes the rest.
async fn dedup_relationships(tx: &mut Transaction<'_, Postgres>, project_id: ProjectId) -> Result<()> {
    let rows = sqlx::query_as::<_, RelationshipPairRow>(
        "SELECT id, source_id, target_id, rank FROM relationships WHERE project_id = $1",
    )
    .bind(project_id.as_uuid())
    .fetch_all(&mut **tx)
    .await?;

    let mut groups: HashMap<(EntityId, EntityId), Vec<RelationshipPairRow>> = HashMap::new();
    for row in rows {
        let key = if row.source_id <= row.target_id {
            (row.source_id, row.target_id)
        } else {
            (row.target_id, row.source_id)
        };
        groups.entry(key).or_default().push(row);
    }

    for (_, mut rows) in groups {
        if rows.len() < 2 {
            continue;
        }
        rows.sort_by_key(|r| r.id);

        let keep = rows[0].id;
        let avg_rank = rows.iter().map(|r| r.rank).sum::<f32>() / rows.len() as f32;
        let duplicates: Vec<uuid::Uuid> = rows[1..].iter().map(|r| *r.id.as_uuid()).collect();

        sqlx::query("UPDATE relationships SET rank = $1 WHERE id = $2")
            .bind(avg_rank)
            .bind(keep.as_uuid())
            .execute(&mut **tx)
            .await?;

        sqlx::query(
            "UPDATE relationship_sources SET relationship_id = $1 WHERE relationship_id = ANY($2::uuid[])",
        )
        .bind(keep.as_uuid())
        .bind(&duplicates)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM relationships WHERE id = ANY($1::uuid[])")
            .bind(&duplicates)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

/// Runs the full cross-document dedup pass inside `tx`. Caller owns the
/// transaction boundary (commit/rollback) as part of the larger merge
/// transaction (§4.6).
pub async fn run_cross_document_dedup(
    tx: &mut Transaction<'_, Postgres>,
    model: &dyn ModelClient,
    project_id: ProjectId,
    config: CrossDocDedupConfig,
) -> Result<()> {
    let pairs = find_similar_entity_pairs(tx, project_id, config.trigram_threshold).await?;
    let components = connected_components(&pairs);

    for component in &components {
        merge_component(tx, model, component, config).await?;
    }

    dedup_relationships(tx, project_id).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_find_groups_transitively_connected_pairs() {
        let a = EntityId::new();
        let b = EntityId::new();
        let c = EntityId::new();
        let d = EntityId::new();
        let pairs = vec![(a, b), (b, c)];
        let components = connected_components(&pairs);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 3);
        assert!(!components[0].contains(&d));
    }

    #[test]
    fn union_find_keeps_disjoint_pairs_separate() {
        let a = EntityId::new();
        let b = EntityId::new();
        let c = EntityId::new();
        let d = EntityId::new();
        let pairs = vec![(a, b), (c, d)];
        let components = connected_components(&pairs);
        assert_eq!(components.len(), 2);
    }

    #[test]
    fn default_config_matches_recommended_threshold() {
        let config = CrossDocDedupConfig::default();
        assert_eq!(config.trigram_threshold, 0.6);
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.batch_size, 300);
    }
}
