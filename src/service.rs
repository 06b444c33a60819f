//! Service facade
//!
//! Ties configuration, ingestion, and the query layer together behind one
//! shared handle. Blocking database work stays in `*_blocking` methods;
//! async callers go through the `spawn_blocking` wrappers so a long ingest
//! never stalls the runtime. A single atomic flag keeps concurrent ingest
//! requests from interleaving, and the chat-list cache is invalidated the
//! moment an ingest commits new data.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::TtlSlot;
use crate::config::AppConfig;
use crate::error::{ChatPrepError, Result};
use crate::ingest;
use crate::logging::OperationTimer;
use crate::metrics as prep_metrics;
use crate::models::{ChatSummary, IngestOutcome, MessageView, SearchCriteria, StreamItem};
use crate::query::QueryEngine;
use crate::source::SourceStore;
use crate::store::PreparedStore;
use crate::validation::InputValidator;

/// Staleness and progress snapshot for the status command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Most recent message timestamp in the source, if readable
    pub source_max_date: Option<String>,
    /// Most recent message timestamp in the prepared store
    pub last_processed_date: Option<String>,
    /// Total prepared message rows
    pub message_count: i64,
    /// Source message ROWID high-water mark
    pub last_message_rowid: i64,
    /// Source handle ROWID high-water mark
    pub last_contact_rowid: i64,
    /// True when the source holds newer messages than the prepared store
    pub stale: bool,
}

/// Shared application service.
pub struct ChatPrepService {
    config: AppConfig,
    store: Arc<PreparedStore>,
    engine: Arc<QueryEngine>,
    ingest_in_flight: AtomicBool,
    chat_list_cache: Mutex<TtlSlot<Vec<ChatSummary>>>,
}

/// Resets the in-flight flag on every exit path, including panics.
struct IngestPermit<'a>(&'a AtomicBool);

impl Drop for IngestPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ChatPrepService {
    /// Open the prepared store and build the service.
    pub fn new(config: AppConfig) -> Result<Self> {
        let store_path = config.store_db_path();
        InputValidator::validate_store_path(&store_path)?;
        let store = Arc::new(PreparedStore::open_sized(
            &store_path,
            config.store.max_connections,
        )?);
        let engine = Arc::new(QueryEngine::with_cache_capacity(
            Arc::clone(&store),
            config.query.decode_cache_capacity,
        ));
        let ttl = Duration::from_secs(config.query.chat_list_ttl_secs);

        Ok(Self {
            config,
            store,
            engine,
            ingest_in_flight: AtomicBool::new(false),
            chat_list_cache: Mutex::new(TtlSlot::new(ttl)),
        })
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn source_path(&self) -> PathBuf {
        self.config.source_db_path()
    }

    fn source_busy_timeout(&self) -> Duration {
        Duration::from_secs(self.config.source.busy_timeout_secs)
    }

    fn cache_key(&self) -> String {
        self.store.path().display().to_string()
    }

    /// Run one ingestion pass. An overlapping call while another pass is
    /// in flight is a no-op with zero counts, not an error and not a queued
    /// retry.
    pub fn ingest_blocking(&self, force_rebuild: bool) -> Result<IngestOutcome> {
        if self
            .ingest_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("ingestion already in progress, skipping overlapping run");
            return Ok(IngestOutcome {
                prepared_db_path: self.store.path().display().to_string(),
                messages_processed: 0,
                contacts_processed: 0,
                rebuilt: false,
            });
        }
        let _permit = IngestPermit(&self.ingest_in_flight);

        let timer = OperationTimer::new("ingest");
        InputValidator::validate_batch_size(self.config.ingest.batch_size)?;
        let source_path = self.source_path();
        InputValidator::validate_source_path(&source_path)
            .map_err(|_| ChatPrepError::SourceUnavailable(source_path.clone()))?;

        let source = SourceStore::open_with_timeout(&source_path, self.source_busy_timeout())?;
        let outcome = ingest::ingest(
            &source,
            &self.store,
            self.config.ingest.batch_size,
            force_rebuild,
        )?;

        if outcome.messages_processed > 0 || outcome.rebuilt {
            if let Ok(mut cache) = self.chat_list_cache.lock() {
                cache.clear();
            }
        }
        prep_metrics::record_store_size(self.store.message_count()?);
        timer.finish();
        Ok(outcome)
    }

    /// Chat list, served from the short-TTL cache when fresh.
    pub fn chat_list_blocking(&self) -> Result<Vec<ChatSummary>> {
        let key = self.cache_key();
        if let Ok(mut cache) = self.chat_list_cache.lock() {
            if let Some(chats) = cache.get(&key) {
                prep_metrics::record_cache_lookup(true);
                return Ok(chats);
            }
        }

        let chats = self.engine.chat_list()?;
        if let Ok(mut cache) = self.chat_list_cache.lock() {
            cache.put(&key, chats.clone());
        }
        Ok(chats)
    }

    /// Chats matching a name fragment.
    pub fn search_chats_blocking(&self, query: &str) -> Result<Vec<ChatSummary>> {
        InputValidator::validate_search_query(query)?;
        let query = InputValidator::sanitize_text(query);
        self.engine.search_chats_by_name(&query)
    }

    /// Advanced multi-criteria search.
    pub fn advanced_search_blocking(&self, criteria: &SearchCriteria) -> Result<Vec<ChatSummary>> {
        InputValidator::validate_date_range(
            criteria.start_date.as_deref(),
            criteria.end_date.as_deref(),
        )?;
        if let Some(limit) = criteria.limit {
            InputValidator::validate_limit(limit)?;
        }
        let source_path = self.source_path();
        self.engine.advanced_search(criteria, Some(&source_path))
    }

    /// Streaming advanced search; results arrive on the returned channel and
    /// end with a `Done` or `TimedOut` sentinel.
    pub fn stream_search(
        &self,
        criteria: SearchCriteria,
    ) -> Result<std::sync::mpsc::Receiver<StreamItem>> {
        InputValidator::validate_date_range(
            criteria.start_date.as_deref(),
            criteria.end_date.as_deref(),
        )?;
        let timeout = Duration::from_secs(self.config.query.stream_timeout_secs);
        Ok(self
            .engine
            .stream_advanced_search(criteria, Some(self.source_path()), timeout))
    }

    /// Paged recent messages for a set of source chat ids.
    pub fn recent_messages_blocking(
        &self,
        chat_ids: &[i64],
        limit: usize,
        offset: usize,
        ascending: bool,
        search: Option<&str>,
    ) -> Result<Vec<MessageView>> {
        InputValidator::validate_limit(limit)?;
        self.engine
            .recent_messages(chat_ids, limit, offset, ascending, search)
    }

    /// Progress and staleness snapshot.
    pub fn status_blocking(&self) -> Result<StatusReport> {
        let source_max_date =
            match SourceStore::open_with_timeout(&self.source_path(), self.source_busy_timeout()) {
            Ok(source) => source.max_message_date()?,
            Err(e) => {
                warn!(error = %e, "source unreadable while computing status");
                None
            }
        };
        let last_processed_date = self.store.last_processed_date()?;
        let checkpoint = self.store.checkpoint()?;

        let stale = match (&source_max_date, &last_processed_date) {
            (Some(source), Some(processed)) => source > processed,
            (Some(_), None) => true,
            _ => false,
        };

        Ok(StatusReport {
            source_max_date,
            last_processed_date,
            message_count: self.store.message_count()?,
            last_message_rowid: checkpoint.last_message_rowid,
            last_contact_rowid: checkpoint.last_contact_rowid,
            stale,
        })
    }

    // Async wrappers. All blocking database work runs on the blocking pool.

    pub async fn ingest(self: Arc<Self>, force_rebuild: bool) -> Result<IngestOutcome> {
        run_blocking(move || self.ingest_blocking(force_rebuild)).await
    }

    pub async fn chat_list(self: Arc<Self>) -> Result<Vec<ChatSummary>> {
        run_blocking(move || self.chat_list_blocking()).await
    }

    pub async fn search_chats(self: Arc<Self>, query: String) -> Result<Vec<ChatSummary>> {
        run_blocking(move || self.search_chats_blocking(&query)).await
    }

    pub async fn advanced_search(
        self: Arc<Self>,
        criteria: SearchCriteria,
    ) -> Result<Vec<ChatSummary>> {
        run_blocking(move || self.advanced_search_blocking(&criteria)).await
    }

    pub async fn recent_messages(
        self: Arc<Self>,
        chat_ids: Vec<i64>,
        limit: usize,
        offset: usize,
        ascending: bool,
        search: Option<String>,
    ) -> Result<Vec<MessageView>> {
        run_blocking(move || {
            self.recent_messages_blocking(&chat_ids, limit, offset, ascending, search.as_deref())
        })
        .await
    }

    pub async fn status(self: Arc<Self>) -> Result<StatusReport> {
        run_blocking(move || self.status_blocking()).await
    }

    /// Spawn the periodic background refresh loop, if configured.
    ///
    /// Each tick runs one incremental ingest; an overlap rejection from the
    /// in-flight guard is logged and skipped, never fatal.
    pub fn spawn_refresh_loop(service: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let secs = service.config.ingest.refresh_interval_secs;
        if secs == 0 {
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup stays fast.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match Arc::clone(&service).ingest(false).await {
                    Ok(outcome) => {
                        if outcome.messages_processed > 0 {
                            info!(
                                messages = outcome.messages_processed,
                                contacts = outcome.contacts_processed,
                                "background refresh ingested new data"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "background refresh failed"),
                }
            }
        }))
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatPrepError::Other(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_in(dir: &tempfile::TempDir) -> ChatPrepService {
        let mut config = AppConfig::default();
        config.source.database_path = dir.path().join("missing-chat.db").display().to_string();
        config.store.database_path = dir.path().join("prepared.db").display().to_string();
        ChatPrepService::new(config).expect("service")
    }

    #[test]
    fn ingest_while_another_is_in_flight_is_a_zero_count_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service_in(&dir);

        // Another pass holds the guard.
        service.ingest_in_flight.store(true, Ordering::SeqCst);

        let outcome = service.ingest_blocking(false).expect("no-op outcome");
        assert_eq!(outcome.messages_processed, 0);
        assert_eq!(outcome.contacts_processed, 0);
        assert!(!outcome.rebuilt);
        // The no-op path must not release a guard it never took.
        assert!(service.ingest_in_flight.load(Ordering::SeqCst));

        // Once the holder finishes, the real path runs again and reaches
        // source validation.
        service.ingest_in_flight.store(false, Ordering::SeqCst);
        let err = service.ingest_blocking(false).expect_err("source is missing");
        assert!(err.to_string().contains("No accessible source database"));
        // A failed pass drops its permit on the way out.
        assert!(!service.ingest_in_flight.load(Ordering::SeqCst));
    }
}
