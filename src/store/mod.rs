//! Storage abstraction for the harvester.
//!
//! Two traits split the persistent state in the same way the pipeline uses
//! it:
//!
//! - [`RecordStore`] holds sources, jobs, harvest attempts and the errors
//!   recorded against them. It owns the "one current attempt per GUID"
//!   pointer.
//! - [`CatalogWriter`] holds the catalog entries that accepted attempts are
//!   projected into.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! [`memory::InMemoryStore`] and [`crate::sqlite_store::SqliteStore`] both
//! implement the two traits.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::CatalogError;
use crate::models::{
    AttemptError, CatalogEntry, CatalogEntryPayload, EntryState, ErrorStage, GatherErrorRecord,
    HarvestAttempt, HarvestJob, HarvestSource, JobStatus,
};

/// Durable history of harvest runs.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_current_by_guid`](RecordStore::find_current_by_guid) | Every attempt flagged current for a GUID |
/// | [`save_attempt`](RecordStore::save_attempt) | Insert or update an attempt |
/// | [`mark_current`](RecordStore::mark_current) | Move the current pointer to a new attempt |
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update a source definition.
    async fn upsert_source(&self, source: &HarvestSource) -> Result<()>;

    async fn get_source(&self, id: &str) -> Result<Option<HarvestSource>>;

    async fn list_sources(&self) -> Result<Vec<HarvestSource>>;

    async fn create_job(&self, job: &HarvestJob) -> Result<()>;

    /// Set the terminal status of a job and stamp its finish time.
    async fn finish_job(&self, job_id: &str, status: JobStatus) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<HarvestJob>>;

    /// Jobs for a source, newest first.
    async fn jobs_for_source(&self, source_id: &str) -> Result<Vec<HarvestJob>>;

    /// Insert or update an attempt. The `current` flag is not written here;
    /// only [`mark_current`](RecordStore::mark_current) moves it.
    async fn save_attempt(&self, attempt: &HarvestAttempt) -> Result<()>;

    async fn get_attempt(&self, id: &str) -> Result<Option<HarvestAttempt>>;

    /// Attempts created by a job, in creation order.
    async fn attempts_for_job(&self, job_id: &str) -> Result<Vec<HarvestAttempt>>;

    /// Every attempt ever made for a GUID, oldest first.
    async fn attempts_for_guid(&self, guid: &str) -> Result<Vec<HarvestAttempt>>;

    /// Attempts flagged current for a GUID. More than one result is a
    /// consistency violation the caller must report.
    async fn find_current_by_guid(&self, guid: &str) -> Result<Vec<HarvestAttempt>>;

    /// Current attempts whose source is `source_id`.
    async fn current_attempts_for_source(&self, source_id: &str) -> Result<Vec<HarvestAttempt>>;

    /// In one transaction, clear `current` on every attempt linked to
    /// `entry_id` or sharing `guid`, then flag `attempt_id` current, link it
    /// to `entry_id` and set its GUID to `guid`.
    async fn mark_current(&self, attempt_id: &str, entry_id: &str, guid: &str) -> Result<()>;

    async fn record_gather_error(&self, job_id: &str, message: &str) -> Result<()>;

    async fn gather_errors(&self, job_id: &str) -> Result<Vec<GatherErrorRecord>>;

    async fn record_attempt_error(
        &self,
        attempt_id: &str,
        stage: ErrorStage,
        message: &str,
    ) -> Result<()>;

    async fn attempt_errors(&self, attempt_id: &str) -> Result<Vec<AttemptError>>;
}

/// Keyed create/update of catalog entries.
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    async fn get_entry(&self, id: &str) -> Result<Option<CatalogEntry>>;

    /// Whether any entry (active or deleted) already uses `name`.
    async fn name_exists(&self, name: &str) -> Result<bool>;

    /// Create a new entry. Fails with [`CatalogError::Validation`] when the
    /// payload is not acceptable.
    async fn create_entry(&self, payload: &CatalogEntryPayload)
        -> Result<CatalogEntry, CatalogError>;

    /// Update an existing entry in place, keeping its id.
    async fn update_entry(
        &self,
        id: &str,
        payload: &CatalogEntryPayload,
    ) -> Result<CatalogEntry, CatalogError>;

    /// Change an entry's lifecycle state, e.g. to withdraw it from the catalog.
    async fn set_entry_state(&self, id: &str, state: EntryState) -> Result<()>;
}

/// Payload checks every catalog backend applies before writing.
///
/// Name uniqueness is not checked here because it needs the backend.
pub fn validate_payload(payload: &CatalogEntryPayload) -> Result<(), CatalogError> {
    let mut problems = Vec::new();

    let name_len = payload.name.chars().count();
    if !(2..=100).contains(&name_len) {
        problems.push(format!(
            "name: Name must be between 2 and 100 characters long (got {})",
            name_len
        ));
    }
    if !payload
        .name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        problems.push(
            "name: Must be purely lowercase alphanumeric (ascii) characters and these symbols: -_"
                .to_string(),
        );
    }
    if payload.title.trim().is_empty() {
        problems.push("title: Missing value".to_string());
    }
    for tag in &payload.tags {
        if tag.name.is_empty() {
            problems.push("tags: Tag name must not be empty".to_string());
        }
    }
    if let Some(spatial) = payload.extras.get("spatial") {
        if let Err(reason) = check_polygon(spatial) {
            problems.push(format!("spatial: {}", reason));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(CatalogError::Validation(problems.join("; ")))
    }
}

fn check_polygon(geojson: &str) -> std::result::Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(geojson).map_err(|e| format!("Error decoding JSON object: {}", e))?;
    if value.get("type").and_then(|t| t.as_str()) != Some("Polygon") {
        return Err("Geometry must be a Polygon".to_string());
    }
    let rings = value
        .get("coordinates")
        .and_then(|c| c.as_array())
        .ok_or_else(|| "Polygon has no coordinates".to_string())?;
    for ring in rings {
        let points = ring
            .as_array()
            .ok_or_else(|| "Polygon ring must be an array".to_string())?;
        if points.len() < 4 {
            return Err("Polygon ring must have at least four positions".to_string());
        }
        if points.first() != points.last() {
            return Err("Polygon ring must be closed".to_string());
        }
    }
    Ok(())
}
