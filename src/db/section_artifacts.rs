use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArtifactRow {
    pub section_id: String,
    pub valuation_id: String,
    pub input_hash: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[tracing::instrument(name = "db.section_artifacts.get", skip(pool))]
pub async fn get_artifact(
    pool: &PgPool,
    section_id: &str,
    valuation_id: &str,
) -> Result<Option<ArtifactRow>, sqlx::Error> {
    sqlx::query_as::<_, ArtifactRow>(
        "SELECT section_id, valuation_id, input_hash, payload, updated_at \
         FROM section_artifacts WHERE section_id = $1 AND valuation_id = $2",
    )
    .bind(section_id)
    .bind(valuation_id)
    .fetch_optional(pool)
    .await
}

#[tracing::instrument(name = "db.section_artifacts.upsert", skip(pool, payload))]
pub async fn upsert_artifact(
    pool: &PgPool,
    section_id: &str,
    valuation_id: &str,
    input_hash: &str,
    payload: &serde_json::Value,
    updated_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO section_artifacts (section_id, valuation_id, input_hash, payload, updated_at) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (section_id, valuation_id) DO UPDATE \
         SET input_hash = EXCLUDED.input_hash, payload = EXCLUDED.payload, \
             updated_at = EXCLUDED.updated_at",
    )
    .bind(section_id)
    .bind(valuation_id)
    .bind(input_hash)
    .bind(payload)
    .bind(updated_at)
    .execute(pool)
    .await?;

    Ok(())
}
