use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    ArtifactStore, CacheStore, NewReport, ReportStore, ReportSummary, SectionArtifact,
    SharedCacheEntry, StoreError, StoredReport, parse_section_id,
};
use crate::db;
use crate::sections::SectionId;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PgStore {
    async fn get(
        &self,
        section_id: SectionId,
        month_label: &str,
    ) -> Result<Option<SharedCacheEntry>, StoreError> {
        let Some(row) =
            db::cache_entries::get_entry(&self.pool, section_id.as_str(), month_label).await?
        else {
            return Ok(None);
        };
        Ok(Some(SharedCacheEntry {
            section_id: parse_section_id(&row.section_id)?,
            month_label: row.month_label,
            payload: serde_json::from_value(row.payload)?,
            generated_at: row.generated_at,
        }))
    }

    async fn put_if_newer(&self, entry: &SharedCacheEntry) -> Result<bool, StoreError> {
        let payload = serde_json::to_value(&entry.payload)?;
        let written = db::cache_entries::put_if_newer(
            &self.pool,
            entry.section_id.as_str(),
            &entry.month_label,
            &payload,
            entry.generated_at,
        )
        .await?;
        Ok(written)
    }
}

#[async_trait]
impl ArtifactStore for PgStore {
    async fn get_artifact(
        &self,
        section_id: SectionId,
        valuation_id: &str,
    ) -> Result<Option<SectionArtifact>, StoreError> {
        let Some(row) =
            db::section_artifacts::get_artifact(&self.pool, section_id.as_str(), valuation_id)
                .await?
        else {
            return Ok(None);
        };
        Ok(Some(SectionArtifact {
            section_id: parse_section_id(&row.section_id)?,
            valuation_id: row.valuation_id,
            input_hash: row.input_hash,
            payload: serde_json::from_value(row.payload)?,
            updated_at: row.updated_at,
        }))
    }

    async fn put_artifact(&self, artifact: &SectionArtifact) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&artifact.payload)?;
        db::section_artifacts::upsert_artifact(
            &self.pool,
            artifact.section_id.as_str(),
            &artifact.valuation_id,
            &artifact.input_hash,
            &payload,
            artifact.updated_at,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn insert_report(&self, report: &NewReport<'_>) -> Result<Uuid, StoreError> {
        Ok(db::reports::insert_report(&self.pool, report).await?)
    }

    async fn list_reports(&self, limit: i64, offset: i64) -> Result<Vec<ReportSummary>, StoreError> {
        Ok(db::reports::list_reports(&self.pool, limit, offset).await?)
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<StoredReport>, StoreError> {
        Ok(db::reports::get_report(&self.pool, id).await?)
    }
}
