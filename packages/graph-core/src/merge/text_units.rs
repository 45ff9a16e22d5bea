//! Phase B step 1: upsert `TextUnit`s by `public_id` (chunk 1000), grounded
//! on the `UNNEST`-array bulk-operation style of
//! `domains/listings/models/listing.rs`.

use std::collections::HashMap;

use sqlx::PgPool;

use graph_types::{ProjectFileId, TextUnit, TextUnitId, TextUnitPublicId};

use crate::error::Result;

pub const TEXT_UNIT_CHUNK_SIZE: usize = 1000;

#[derive(sqlx::FromRow)]
struct UpsertedTextUnit {
    id: TextUnitId,
    public_id: TextUnitPublicId,
}

/// Upserts text units and returns the assigned internal id for each
/// `public_id` (§4.3 Phase B step 1).
pub async fn upsert_text_units(
    pool: &PgPool,
    units: &[TextUnit],
) -> Result<HashMap<TextUnitPublicId, TextUnitId>> {
    let mut ids = HashMap::with_capacity(units.len());

    for chunk in units.chunks(TEXT_UNIT_CHUNK_SIZE) {
        let public_ids: Vec<uuid::Uuid> = chunk.iter().map(|u| *u.public_id.as_uuid()).collect();
        let project_file_ids: Vec<uuid::Uuid> =
            chunk.iter().map(|u| *u.project_file_id.as_uuid()).collect();
        let texts: Vec<&str> = chunk.iter().map(|u| u.text.as_str()).collect();

        let rows = sqlx::query_as::<_, UpsertedTextUnit>(
            r#"
            INSERT INTO text_units (public_id, project_file_id, text)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::text[])
            ON CONFLICT (public_id) DO UPDATE
            SET project_file_id = EXCLUDED.project_file_id, text = EXCLUDED.text
            RETURNING id, public_id
            "#,
        )
        .bind(&public_ids)
        .bind(&project_file_ids)
        .bind(&texts as &[&str])
        .fetch_all(pool)
        .await?;

        for row in rows {
            ids.insert(row.public_id, row.id);
        }
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_matches_spec() {
        assert_eq!(TEXT_UNIT_CHUNK_SIZE, 1000);
    }

    #[test]
    fn project_file_id_type_is_stable() {
        let id = ProjectFileId::new();
        assert!(!id.is_nil());
    }
}
