//! Metrics collection
//!
//! Thin wrappers over the `metrics` facade so instrumentation sites stay
//! one-liners. Without an installed recorder these are no-ops.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Record one committed ingestion batch.
pub fn record_ingest_batch(rows: usize) {
    counter!("chat_prep_ingest_batches_total").increment(1);
    counter!("chat_prep_ingest_rows_total").increment(rows as u64);
}

/// Record a rich-text blob that failed to decode.
pub fn record_decode_failure() {
    counter!("chat_prep_decode_failures_total").increment(1);
}

/// Record a decode-cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let status = if hit { "hit" } else { "miss" };
    counter!("chat_prep_decode_cache_lookups_total", "status" => status).increment(1);
}

/// Record a query-layer operation and its duration.
pub fn record_query(operation: &'static str, duration: Duration) {
    counter!("chat_prep_queries_total", "operation" => operation).increment(1);
    histogram!("chat_prep_query_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record the current prepared-store message count after an ingest pass.
pub fn record_store_size(messages: i64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("chat_prep_store_messages").set(messages as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_calls_are_noops_without_recorder() {
        record_ingest_batch(10);
        record_decode_failure();
        record_cache_lookup(true);
        record_cache_lookup(false);
        record_query("chat_list", Duration::from_millis(5));
        record_store_size(42);
    }
}
