use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a source chat.db path
    pub fn validate_source_path(path: &Path) -> Result<()> {
        if path.to_string_lossy().is_empty() {
            return Err(anyhow!("Source database path cannot be empty"));
        }

        if !path.exists() {
            return Err(anyhow!("Source database path does not exist: {path:?}"));
        }

        if !path.is_file() {
            return Err(anyhow!("Source database path is not a file: {path:?}"));
        }

        Ok(())
    }

    /// Validate a prepared-store path
    pub fn validate_store_path(path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        if path_str.is_empty() {
            return Err(anyhow!("Prepared store path cannot be empty"));
        }

        if path_str.len() > 4096 {
            return Err(anyhow!("Prepared store path too long (max 4096 characters)"));
        }

        if path.is_dir() {
            return Err(anyhow!("Prepared store path is a directory: {path:?}"));
        }

        Ok(())
    }

    /// Validate ingestion batch size
    pub fn validate_batch_size(batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(anyhow!("Batch size must be greater than 0"));
        }

        if batch_size > 10_000 {
            return Err(anyhow!("Batch size too large (max 10,000)"));
        }

        Ok(())
    }

    /// Validate a query result limit
    pub fn validate_limit(limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(anyhow!("Limit must be greater than 0"));
        }

        if limit > 10_000 {
            return Err(anyhow!("Limit too large (max 10,000)"));
        }

        Ok(())
    }

    /// Validate a `YYYY-MM-DD` date string
    pub fn validate_date(date: &str) -> Result<()> {
        NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| anyhow!("Invalid date (expected YYYY-MM-DD): {date}"))?;
        Ok(())
    }

    /// Validate an optional date range
    pub fn validate_date_range(start: Option<&str>, end: Option<&str>) -> Result<()> {
        if let Some(start) = start {
            Self::validate_date(start)?;
        }
        if let Some(end) = end {
            Self::validate_date(end)?;
        }

        if let (Some(start), Some(end)) = (start, end) {
            let start_date = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")?;
            let end_date = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d")?;
            if start_date > end_date {
                return Err(anyhow!("Start date cannot be after end date"));
            }

            // Warn about very large date ranges that may impact performance
            let days = (end_date - start_date).num_days();
            if days > 365 * 5 {
                tracing::warn!(days, "large date range may impact query performance");
            }
        }

        Ok(())
    }

    /// Validate a free-text search query
    pub fn validate_search_query(query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(anyhow!("Search query cannot be empty"));
        }

        if query.len() > 1000 {
            return Err(anyhow!("Search query too long (max 1000 characters)"));
        }

        if query.contains('\0') {
            return Err(anyhow!("Search query contains invalid characters"));
        }

        Ok(())
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect::<String>()
            .trim()
            .to_string()
    }
}
