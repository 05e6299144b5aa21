use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheRow {
    pub section_id: String,
    pub month_label: String,
    pub payload: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

#[tracing::instrument(name = "db.shared_cache.get", skip(pool))]
pub async fn get_entry(
    pool: &PgPool,
    section_id: &str,
    month_label: &str,
) -> Result<Option<CacheRow>, sqlx::Error> {
    sqlx::query_as::<_, CacheRow>(
        "SELECT section_id, month_label, payload, generated_at \
         FROM shared_section_cache WHERE section_id = $1 AND month_label = $2",
    )
    .bind(section_id)
    .bind(month_label)
    .fetch_optional(pool)
    .await
}

/// Single-statement upsert; an older `generated_at` never replaces a newer one.
#[tracing::instrument(name = "db.shared_cache.put_if_newer", skip(pool, payload))]
pub async fn put_if_newer(
    pool: &PgPool,
    section_id: &str,
    month_label: &str,
    payload: &serde_json::Value,
    generated_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO shared_section_cache (section_id, month_label, payload, generated_at) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (section_id, month_label) DO UPDATE \
         SET payload = EXCLUDED.payload, generated_at = EXCLUDED.generated_at \
         WHERE shared_section_cache.generated_at < EXCLUDED.generated_at",
    )
    .bind(section_id)
    .bind(month_label)
    .bind(payload)
    .bind(generated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
