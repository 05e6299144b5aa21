use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{NewReport, ReportSummary, StoredReport};

#[tracing::instrument(name = "db.reports.insert", skip_all, fields(valuation.id = %params.valuation_id))]
pub async fn insert_report(pool: &PgPool, params: &NewReport<'_>) -> Result<Uuid, sqlx::Error> {
    let row: (Uuid,) = sqlx::query_as(
        "INSERT INTO assembled_reports \
         (id, run_id, valuation_id, contents, section_order, limitations, \
          page_count, document, manifest) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING id",
    )
    .bind(params.id)
    .bind(params.run_id)
    .bind(params.valuation_id)
    .bind(params.contents)
    .bind(params.section_order)
    .bind(params.limitations)
    .bind(params.page_count)
    .bind(params.document)
    .bind(params.manifest)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

#[tracing::instrument(name = "db.reports.get", skip(pool))]
pub async fn get_report(pool: &PgPool, id: Uuid) -> Result<Option<StoredReport>, sqlx::Error> {
    sqlx::query_as::<_, StoredReport>(
        "SELECT id, run_id, valuation_id, contents, section_order, limitations, \
         page_count, document, manifest, created_at \
         FROM assembled_reports WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

#[tracing::instrument(name = "db.reports.list", skip(pool))]
pub async fn list_reports(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<ReportSummary>, sqlx::Error> {
    sqlx::query_as::<_, ReportSummary>(
        "SELECT id, run_id, valuation_id, page_count, created_at \
         FROM assembled_reports ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
