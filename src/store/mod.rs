//! Persistence seams. The pipeline only sees these traits; Postgres backs
//! them in the server and the in-memory store backs them in tests.

#[cfg(test)]
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::sections::{SectionId, SectionOutput};

#[cfg(test)]
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored payload is not a section output: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unknown section id in store: {0}")]
    UnknownSection(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The month-scoped section, keyed by `(section_id, month_label)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedCacheEntry {
    pub section_id: SectionId,
    pub month_label: String,
    pub payload: SectionOutput,
    pub generated_at: DateTime<Utc>,
}

/// One persisted section result, keyed by `(section_id, valuation_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionArtifact {
    pub section_id: SectionId,
    pub valuation_id: String,
    /// Hash of the property record the payload was built from.
    pub input_hash: String,
    pub payload: SectionOutput,
    pub updated_at: DateTime<Utc>,
}

pub struct NewReport<'a> {
    pub id: Uuid,
    pub run_id: Uuid,
    pub valuation_id: &'a str,
    pub contents: &'a Value,
    pub section_order: &'a [String],
    pub limitations: &'a [String],
    pub page_count: i32,
    pub document: &'a str,
    pub manifest: &'a Value,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredReport {
    pub id: Uuid,
    pub run_id: Uuid,
    pub valuation_id: String,
    pub contents: Value,
    pub section_order: Vec<String>,
    pub limitations: Vec<String>,
    pub page_count: i32,
    pub document: String,
    pub manifest: Value,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReportSummary {
    pub id: Uuid,
    pub run_id: Uuid,
    pub valuation_id: String,
    pub page_count: i32,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(
        &self,
        section_id: SectionId,
        month_label: &str,
    ) -> Result<Option<SharedCacheEntry>, StoreError>;

    /// Writes `entry` unless the stored entry for the key is at least as
    /// new. Returns whether the write happened. Atomic per key.
    async fn put_if_newer(&self, entry: &SharedCacheEntry) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get_artifact(
        &self,
        section_id: SectionId,
        valuation_id: &str,
    ) -> Result<Option<SectionArtifact>, StoreError>;

    async fn put_artifact(&self, artifact: &SectionArtifact) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert_report(&self, report: &NewReport<'_>) -> Result<Uuid, StoreError>;

    async fn list_reports(&self, limit: i64, offset: i64) -> Result<Vec<ReportSummary>, StoreError>;

    async fn get_report(&self, id: Uuid) -> Result<Option<StoredReport>, StoreError>;
}

pub(crate) fn parse_section_id(raw: &str) -> Result<SectionId, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::UnknownSection(raw.to_string()))
}
