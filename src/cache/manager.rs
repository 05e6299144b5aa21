use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};

use super::Clock;
use crate::sections::{GenerationError, SectionId, SectionOutput};
use crate::store::{CacheStore, SharedCacheEntry};
use crate::telemetry::metrics::SHARED_CACHE_LOOKUPS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Fresh entry read from the store; nothing was generated.
    Hit,
    /// Generated by this lookup.
    Generated,
    /// Another lookup in the same run settled the key first.
    Reused,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Generated => "generated",
            CacheStatus::Reused => "reused",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedLookup {
    pub output: Arc<SectionOutput>,
    pub status: CacheStatus,
    /// Set when generation succeeded but persisting the entry did not.
    pub write_error: Option<GenerationError>,
}

#[derive(Debug, Clone)]
struct Settled {
    output: Arc<SectionOutput>,
    from_store: bool,
    write_error: Option<GenerationError>,
}

type Flight = Result<Settled, GenerationError>;

/// Single-flight front for the shared cache store. One manager lives for one
/// run: each key is settled at most once per run, and that outcome (success
/// or failure) is handed to every caller in the run.
pub struct SharedCacheManager {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    flights: Mutex<HashMap<(SectionId, String), Arc<OnceCell<Flight>>>>,
}

impl SharedCacheManager {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            store,
            clock,
            max_age,
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn month_label(&self) -> String {
        super::month_key(self.clock.now())
    }

    #[tracing::instrument(
        name = "cache.get_or_generate",
        skip(self, generate),
        fields(section.id = %section_id, cache.outcome = tracing::field::Empty)
    )]
    pub async fn get_or_generate<F, Fut>(
        &self,
        section_id: SectionId,
        month_key: &str,
        generate: F,
    ) -> Result<SharedLookup, GenerationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SectionOutput, GenerationError>>,
    {
        let cell = {
            let mut flights = self.flights.lock().await;
            flights
                .entry((section_id, month_key.to_string()))
                .or_default()
                .clone()
        };

        let mut leader = false;
        let flight = cell
            .get_or_init(|| {
                leader = true;
                self.settle(section_id, month_key, generate)
            })
            .await
            .clone();

        let settled = match flight {
            Ok(settled) => settled,
            Err(err) => {
                tracing::Span::current().record("cache.outcome", "failed");
                SHARED_CACHE_LOOKUPS.add(1, &[KeyValue::new("outcome", "failed")]);
                return Err(err);
            }
        };

        let status = match (leader, settled.from_store) {
            (false, _) => CacheStatus::Reused,
            (true, true) => CacheStatus::Hit,
            (true, false) => CacheStatus::Generated,
        };
        tracing::Span::current().record("cache.outcome", status.as_str());
        SHARED_CACHE_LOOKUPS.add(1, &[KeyValue::new("outcome", status.as_str())]);

        Ok(SharedLookup {
            output: settled.output,
            status,
            write_error: if leader { settled.write_error } else { None },
        })
    }

    async fn settle<F, Fut>(&self, section_id: SectionId, month_key: &str, generate: F) -> Flight
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SectionOutput, GenerationError>>,
    {
        match self.store.get(section_id, month_key).await {
            Ok(Some(entry)) => {
                let age = self.clock.now() - entry.generated_at;
                if age >= self.max_age {
                    tracing::info!(age_days = age.num_days(), "Shared entry is stale, regenerating");
                } else if let Err(err) = entry.payload.validate() {
                    tracing::warn!(error = %err, "Shared entry no longer matches its schema, regenerating");
                } else {
                    return Ok(Settled {
                        output: Arc::new(entry.payload),
                        from_store: true,
                        write_error: None,
                    });
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Shared cache read failed, generating");
            }
        }

        let output = generate().await?;

        let entry = SharedCacheEntry {
            section_id,
            month_label: month_key.to_string(),
            payload: output,
            generated_at: self.clock.now(),
        };
        let write_error = match self.store.put_if_newer(&entry).await {
            Ok(written) => {
                if !written {
                    tracing::debug!("A newer shared entry already exists; keeping it");
                }
                None
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to persist shared entry");
                Some(GenerationError::CacheWrite(err.to_string()))
            }
        };

        Ok(Settled {
            output: Arc::new(entry.payload),
            from_store: false,
            write_error,
        })
    }
}
