//! Chat Prep - Incremental Message Ingestion and Search
//!
//! A Rust library that ingests an Apple Messages chat.db into a derived,
//! locally-owned prepared store optimized for the queries a playlist-building
//! workflow needs: grouped chat lists, reaction-aware message pages, and
//! multi-criteria search with full-text matching.
//!
//! # Features
//!
//! - Checkpointed, idempotent, resumable ingestion from chat.db
//! - Rich-text blob decoding for messages without plain text
//! - Canonical chat grouping across split conversations
//! - Full-text search with a raw-source fallback
//! - Streaming search with explicit completion sentinels

/// In-memory caches (decode LRU, chat-list TTL slot)
pub mod cache;
/// Canonical chat grouping
pub mod canonical;
/// Configuration management
pub mod config;
/// Rich-text blob decoding
pub mod decoder;
/// Error types
pub mod error;
/// Contact handle canonicalization
pub mod handles;
/// Checkpointed ingestion engine
pub mod ingest;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Text normalization, link extraction, content hashing
pub mod normalize;
/// Query layer over the prepared store
pub mod query;
/// Prepared-store schema definitions
pub mod schema;
/// Service facade
pub mod service;
/// Read-only source chat.db access
pub mod source;
/// Prepared-store persistence
pub mod store;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use error::{ChatPrepError, Result};
pub use ingest::ingest;
pub use models::{ChatSummary, IngestOutcome, MessageView, SearchCriteria, StreamItem};
pub use query::QueryEngine;
pub use service::ChatPrepService;
pub use source::SourceStore;
pub use store::PreparedStore;
