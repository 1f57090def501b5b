//! In-memory [`RecordStore`] and [`CatalogWriter`] for tests and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! [`mark_current`](RecordStore::mark_current) runs under a single write
//! lock, so the current pointer moves atomically.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::CatalogError;
use crate::models::{
    AttemptError, CatalogEntry, CatalogEntryPayload, EntryState, ErrorStage, GatherErrorRecord,
    HarvestAttempt, HarvestJob, HarvestSource, JobStatus,
};

use super::{validate_payload, CatalogWriter, RecordStore};

/// In-memory store implementing both storage traits.
pub struct InMemoryStore {
    sources: RwLock<HashMap<String, HarvestSource>>,
    jobs: RwLock<Vec<HarvestJob>>,
    attempts: RwLock<Vec<HarvestAttempt>>,
    gather_errors: RwLock<Vec<GatherErrorRecord>>,
    attempt_errors: RwLock<Vec<AttemptError>>,
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            jobs: RwLock::new(Vec::new()),
            attempts: RwLock::new(Vec::new()),
            gather_errors: RwLock::new(Vec::new()),
            attempt_errors: RwLock::new(Vec::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn upsert_source(&self, source: &HarvestSource) -> Result<()> {
        let mut sources = self.sources.write().unwrap();
        sources.insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<HarvestSource>> {
        Ok(self.sources.read().unwrap().get(id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<HarvestSource>> {
        let mut sources: Vec<HarvestSource> =
            self.sources.read().unwrap().values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn create_job(&self, job: &HarvestJob) -> Result<()> {
        self.jobs.write().unwrap().push(job.clone());
        Ok(())
    }

    async fn finish_job(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.iter_mut().find(|j| j.id == job_id) {
            Some(job) => {
                job.status = status;
                job.finished_at = Some(Utc::now());
                Ok(())
            }
            None => anyhow::bail!("No such harvest job: {}", job_id),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<HarvestJob>> {
        Ok(self.jobs.read().unwrap().iter().find(|j| j.id == id).cloned())
    }

    async fn jobs_for_source(&self, source_id: &str) -> Result<Vec<HarvestJob>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| j.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn save_attempt(&self, attempt: &HarvestAttempt) -> Result<()> {
        let mut attempts = self.attempts.write().unwrap();
        match attempts.iter_mut().find(|a| a.id == attempt.id) {
            Some(existing) => {
                let current = existing.current;
                *existing = attempt.clone();
                existing.current = current;
            }
            None => {
                let mut stored = attempt.clone();
                stored.current = false;
                attempts.push(stored);
            }
        }
        Ok(())
    }

    async fn get_attempt(&self, id: &str) -> Result<Option<HarvestAttempt>> {
        Ok(self
            .attempts
            .read()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn attempts_for_job(&self, job_id: &str) -> Result<Vec<HarvestAttempt>> {
        let attempts = self.attempts.read().unwrap();
        Ok(attempts.iter().filter(|a| a.job_id == job_id).cloned().collect())
    }

    async fn attempts_for_guid(&self, guid: &str) -> Result<Vec<HarvestAttempt>> {
        let attempts = self.attempts.read().unwrap();
        Ok(attempts.iter().filter(|a| a.guid == guid).cloned().collect())
    }

    async fn find_current_by_guid(&self, guid: &str) -> Result<Vec<HarvestAttempt>> {
        let attempts = self.attempts.read().unwrap();
        Ok(attempts
            .iter()
            .filter(|a| a.guid == guid && a.current)
            .cloned()
            .collect())
    }

    async fn current_attempts_for_source(&self, source_id: &str) -> Result<Vec<HarvestAttempt>> {
        let attempts = self.attempts.read().unwrap();
        Ok(attempts
            .iter()
            .filter(|a| a.source_id == source_id && a.current)
            .cloned()
            .collect())
    }

    async fn mark_current(&self, attempt_id: &str, entry_id: &str, guid: &str) -> Result<()> {
        let mut attempts = self.attempts.write().unwrap();
        if !attempts.iter().any(|a| a.id == attempt_id) {
            anyhow::bail!("No such harvest attempt: {}", attempt_id);
        }
        for attempt in attempts.iter_mut() {
            if attempt.entry_id.as_deref() == Some(entry_id) || attempt.guid == guid {
                attempt.current = false;
            }
        }
        for attempt in attempts.iter_mut().filter(|a| a.id == attempt_id) {
            attempt.current = true;
            attempt.entry_id = Some(entry_id.to_string());
            attempt.guid = guid.to_string();
        }
        Ok(())
    }

    async fn record_gather_error(&self, job_id: &str, message: &str) -> Result<()> {
        self.gather_errors.write().unwrap().push(GatherErrorRecord {
            job_id: job_id.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn gather_errors(&self, job_id: &str) -> Result<Vec<GatherErrorRecord>> {
        let errors = self.gather_errors.read().unwrap();
        Ok(errors.iter().filter(|e| e.job_id == job_id).cloned().collect())
    }

    async fn record_attempt_error(
        &self,
        attempt_id: &str,
        stage: ErrorStage,
        message: &str,
    ) -> Result<()> {
        self.attempt_errors.write().unwrap().push(AttemptError {
            attempt_id: attempt_id.to_string(),
            stage,
            message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn attempt_errors(&self, attempt_id: &str) -> Result<Vec<AttemptError>> {
        let errors = self.attempt_errors.read().unwrap();
        Ok(errors
            .iter()
            .filter(|e| e.attempt_id == attempt_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogWriter for InMemoryStore {
    async fn get_entry(&self, id: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.entries.read().unwrap().get(id).cloned())
    }

    async fn name_exists(&self, name: &str) -> Result<bool> {
        Ok(self.entries.read().unwrap().values().any(|e| e.name == name))
    }

    async fn create_entry(
        &self,
        payload: &CatalogEntryPayload,
    ) -> Result<CatalogEntry, CatalogError> {
        validate_payload(payload)?;
        let mut entries = self.entries.write().unwrap();
        if entries.values().any(|e| e.name == payload.name) {
            return Err(CatalogError::Validation(
                "name: That URL is already in use.".to_string(),
            ));
        }
        let entry = CatalogEntry::from_payload(Uuid::new_v4().to_string(), payload);
        entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn update_entry(
        &self,
        id: &str,
        payload: &CatalogEntryPayload,
    ) -> Result<CatalogEntry, CatalogError> {
        validate_payload(payload)?;
        let mut entries = self.entries.write().unwrap();
        if entries.values().any(|e| e.name == payload.name && e.id != id) {
            return Err(CatalogError::Validation(
                "name: That URL is already in use.".to_string(),
            ));
        }
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("No such catalog entry: {}", id))?;
        entry.apply(payload);
        Ok(entry.clone())
    }

    async fn set_entry_state(&self, id: &str, state: EntryState) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.state = state;
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => anyhow::bail!("No such catalog entry: {}", id),
        }
    }
}
