use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ArtifactStore, CacheStore, NewReport, ReportStore, ReportSummary, SectionArtifact,
    SharedCacheEntry, StoreError, StoredReport,
};
use crate::sections::SectionId;

/// Process-local store for tests.
#[derive(Default)]
pub struct MemoryStore {
    cache: RwLock<HashMap<(SectionId, String), SharedCacheEntry>>,
    artifacts: RwLock<HashMap<(SectionId, String), SectionArtifact>>,
    reports: RwLock<Vec<StoredReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(
        &self,
        section_id: SectionId,
        month_label: &str,
    ) -> Result<Option<SharedCacheEntry>, StoreError> {
        let cache = self.cache.read().await;
        Ok(cache.get(&(section_id, month_label.to_string())).cloned())
    }

    async fn put_if_newer(&self, entry: &SharedCacheEntry) -> Result<bool, StoreError> {
        let mut cache = self.cache.write().await;
        let key = (entry.section_id, entry.month_label.clone());
        if let Some(existing) = cache.get(&key)
            && existing.generated_at >= entry.generated_at
        {
            return Ok(false);
        }
        cache.insert(key, entry.clone());
        Ok(true)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get_artifact(
        &self,
        section_id: SectionId,
        valuation_id: &str,
    ) -> Result<Option<SectionArtifact>, StoreError> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts.get(&(section_id, valuation_id.to_string())).cloned())
    }

    async fn put_artifact(&self, artifact: &SectionArtifact) -> Result<(), StoreError> {
        let mut artifacts = self.artifacts.write().await;
        artifacts.insert(
            (artifact.section_id, artifact.valuation_id.clone()),
            artifact.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn insert_report(&self, report: &NewReport<'_>) -> Result<Uuid, StoreError> {
        let mut reports = self.reports.write().await;
        reports.push(StoredReport {
            id: report.id,
            run_id: report.run_id,
            valuation_id: report.valuation_id.to_string(),
            contents: report.contents.clone(),
            section_order: report.section_order.to_vec(),
            limitations: report.limitations.to_vec(),
            page_count: report.page_count,
            document: report.document.to_string(),
            manifest: report.manifest.clone(),
            created_at: Some(Utc::now()),
        });
        Ok(report.id)
    }

    async fn list_reports(&self, limit: i64, offset: i64) -> Result<Vec<ReportSummary>, StoreError> {
        let reports = self.reports.read().await;
        Ok(reports
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|r| ReportSummary {
                id: r.id,
                run_id: r.run_id,
                valuation_id: r.valuation_id.clone(),
                page_count: r.page_count,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<StoredReport>, StoreError> {
        let reports = self.reports.read().await;
        Ok(reports.iter().find(|r| r.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::sections::SectionOutput;

    fn entry(headline: &str, days: i64) -> SharedCacheEntry {
        let spec = SectionId::MarketCommentary.spec();
        SharedCacheEntry {
            section_id: spec.id,
            month_label: "January 2026".to_string(),
            payload: SectionOutput::deterministic(
                spec,
                "test",
                json!({"headline": headline, "subsections": [{"heading": "h", "content": "c"}]}),
                vec![],
                vec![],
            ),
            generated_at: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap() + Duration::days(days),
        }
    }

    #[tokio::test]
    async fn test_put_if_newer_keeps_newest() {
        let store = MemoryStore::new();
        assert!(store.put_if_newer(&entry("first", 2)).await.unwrap());
        assert!(!store.put_if_newer(&entry("older", 1)).await.unwrap());
        assert!(!store.put_if_newer(&entry("same", 2)).await.unwrap());
        assert!(store.put_if_newer(&entry("newer", 3)).await.unwrap());

        let stored = store
            .get(SectionId::MarketCommentary, "January 2026")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload.data["headline"], "newer");
        assert!(store.get(SectionId::MarketCommentary, "February 2026").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reports_listed_newest_first() {
        let store = MemoryStore::new();
        let contents = json!([]);
        let manifest = json!({});
        for valuation_id in ["v01", "v02", "v03"] {
            store
                .insert_report(&NewReport {
                    id: Uuid::new_v4(),
                    run_id: Uuid::nil(),
                    valuation_id,
                    contents: &contents,
                    section_order: &[],
                    limitations: &[],
                    page_count: 4,
                    document: "",
                    manifest: &manifest,
                })
                .await
                .unwrap();
        }

        let page = store.list_reports(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].valuation_id, "v03");

        let rest = store.list_reports(10, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].valuation_id, "v01");

        let found = store.get_report(page[1].id).await.unwrap().unwrap();
        assert_eq!(found.valuation_id, "v02");
    }
}
