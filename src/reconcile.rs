//! Reconciliation of fetched documents against harvest history.
//!
//! For every fetched attempt the engine decides one of create, update,
//! skip or reject, builds the catalog payload for the first two, writes it,
//! and moves the identity's "current" pointer onto the attempt.
//!
//! # Decision order
//!
//! 1. Responsible-party exclusion list (skip, before validation)
//! 2. Validation (reject only when configured to)
//! 3. Field extraction, zero-area extent, metadata date
//! 4. History: at most one current attempt per GUID
//! 5. [`decide`]: same-job duplicate, publisher guard, date comparison,
//!    deleted-entry reactivation
//!
//! Nothing per-identity escapes [`ReconciliationEngine::import`]: every
//! failure comes back as an [`ImportOutcome`] and is recorded against the
//! attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::HarvestConfig;
use crate::error::{CatalogError, ConsistencyError, ParseError};
use crate::gemini::{GeminiDocument, GeminiValues};
use crate::models::{
    AttemptState, CatalogEntry, EntryState, ErrorStage, HarvestAttempt, HarvestSource,
    ReportStatus, DATETIME_FORMAT,
};
use crate::payload::{build_payload, PayloadError, PayloadInput};
use crate::probe::ServiceProbe;
use crate::store::{CatalogWriter, RecordStore};
use crate::validation::Validators;

/// Diff lines kept in a content-changed rejection.
const MAX_DIFF_LINES: usize = 200;
/// Above this many line pairs the diff lists every line as changed.
const MAX_DIFF_CELLS: usize = 4_000_000;

// ═══════════════════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════════════════

/// Why an attempt was rejected. The display text is the reason recorded
/// against the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportAbort {
    #[error("Empty content for object {attempt_id}")]
    EmptyContent { attempt_id: String },

    /// Validation failed with rejection enabled; carries the diagnostic.
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("The Extent's geographic bounding box has zero area for GUID {guid}")]
    ZeroAreaExtent { guid: String },

    #[error("Could not extract reference date for GUID {guid} ({date})")]
    BadMetadataDate { guid: String, date: String },

    #[error("fileIdentifier \"{guid}\" is already used in this harvest - cannot import twice.")]
    DuplicateInJob { guid: String },

    #[error("The document with GUID {guid} matches a record from another publisher with a different title ({name}). GUIDs must be globally unique.")]
    PublisherCollision { guid: String, name: String },

    #[error("The document with GUID {guid} matches a record from another publisher ({name}). If you are trying to transfer a record between publishers, contact an administrator to do this.")]
    PublisherTransfer { guid: String, name: String },

    #[error("The contents of document with GUID {guid} changed, but the metadata date has not been updated.\nDiff:\n{diff}")]
    ContentChanged { guid: String, diff: String },

    #[error("Could not generate a unique name from the title or the GUID. Please choose a more unique title.")]
    NoUniqueName,

    #[error("Validation Error: {0}")]
    CatalogValidation(String),
}

impl ImportAbort {
    /// Message recorded in the attempt's import errors.
    pub fn record_message(&self) -> String {
        if let ImportAbort::EmptyContent { .. } = self {
            return self.to_string();
        }
        let reason = self.to_string();
        if reason.trim().is_empty() {
            "Error importing Gemini document.".to_string()
        } else {
            format!("Error importing Gemini document\n{}", reason)
        }
    }
}

/// Result of importing one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Created { entry_id: String },
    Updated { entry_id: String, reactivated: bool },
    /// The attempt was consciously not applied.
    Skipped { reason: String },
    Rejected(ImportAbort),
    SystemError(String),
}

impl ImportOutcome {
    pub fn report_status(&self) -> ReportStatus {
        match self {
            ImportOutcome::Created { .. } => ReportStatus::Added,
            ImportOutcome::Updated { .. } => ReportStatus::Updated,
            ImportOutcome::Skipped { .. } => ReportStatus::NotModified,
            ImportOutcome::Rejected(_) | ImportOutcome::SystemError(_) => ReportStatus::Errored,
        }
    }

    pub fn attempt_state(&self) -> AttemptState {
        match self {
            ImportOutcome::Rejected(_) | ImportOutcome::SystemError(_) => AttemptState::Error,
            _ => AttemptState::Complete,
        }
    }

    pub fn is_error(&self) -> bool {
        self.attempt_state() == AttemptState::Error
    }
}

enum Failure {
    Reject(ImportAbort),
    System(String),
}

impl From<ImportAbort> for Failure {
    fn from(abort: ImportAbort) -> Self {
        Failure::Reject(abort)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::System(format!("{:#}", err))
    }
}

impl From<ParseError> for Failure {
    fn from(err: ParseError) -> Self {
        Failure::Reject(ImportAbort::Parse(err))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Decision table
// ═══════════════════════════════════════════════════════════════════════

/// What is known about the identity's current attempt and its entry.
#[derive(Debug, Clone)]
pub struct PriorState<'a> {
    pub job_id: &'a str,
    pub metadata_date: Option<NaiveDateTime>,
    pub content: Option<&'a str>,
    pub source_active: bool,
    pub entry: &'a CatalogEntry,
}

/// The incoming attempt, reduced to what the decision needs.
#[derive(Debug, Clone)]
pub struct Incoming<'a> {
    pub guid: &'a str,
    pub job_id: &'a str,
    pub metadata_date: NaiveDateTime,
    pub content: &'a str,
    pub title: &'a str,
    pub owner: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create,
    Update { reactivate: bool },
    Skip { reason: String },
    Reject(ImportAbort),
}

/// Decide what to do with `incoming` given the identity's current attempt.
pub fn decide(prior: Option<&PriorState<'_>>, incoming: &Incoming<'_>, force: bool) -> Decision {
    let Some(prior) = prior else {
        return Decision::Create;
    };
    let guid = incoming.guid;
    let entry = prior.entry;
    let deleted = entry.state == EntryState::Deleted;

    if prior.job_id == incoming.job_id && !force {
        return Decision::Reject(ImportAbort::DuplicateInJob {
            guid: guid.to_string(),
        });
    }

    if entry.owner.as_deref() != incoming.owner && !deleted {
        let name = entry.name.clone();
        let guid = guid.to_string();
        return Decision::Reject(if entry.title != incoming.title {
            ImportAbort::PublisherCollision { guid, name }
        } else {
            ImportAbort::PublisherTransfer { guid, name }
        });
    }

    // A missing prior date is older than any date.
    let prior_is_older = prior
        .metadata_date
        .map_or(true, |d| d < incoming.metadata_date);
    let dates_equal = prior.metadata_date == Some(incoming.metadata_date);

    if prior_is_older || force || (dates_equal && !prior.source_active) {
        if !deleted {
            return Decision::Update { reactivate: false };
        }
        if prior_is_older {
            return Decision::Update { reactivate: true };
        }
        return Decision::Skip {
            reason: format!(
                "Remote record with GUID {} is not more recent than a deleted entry",
                guid
            ),
        };
    }

    let prior_content = prior.content.unwrap_or_default();
    if dates_equal && prior_content != incoming.content {
        return Decision::Reject(ImportAbort::ContentChanged {
            guid: guid.to_string(),
            diff: line_diff(prior_content, incoming.content),
        });
    }
    Decision::Skip {
        reason: format!("Skipping unchanged record GUID {}", guid),
    }
}

/// Parse a metadata date written as a date or a date-time.
pub fn parse_metadata_date(value: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).ok()
}

/// Removed (`-`) and added (`+`) lines between two documents.
pub fn line_diff(old: &str, new: &str) -> String {
    let a: Vec<&str> = old.split('\n').collect();
    let b: Vec<&str> = new.split('\n').collect();

    let mut out: Vec<String> = Vec::new();
    if a.len().saturating_mul(b.len()) > MAX_DIFF_CELLS {
        out.extend(a.iter().map(|l| format!("-{}", l)));
        out.extend(b.iter().map(|l| format!("+{}", l)));
    } else {
        // Longest common subsequence table, filled from the end.
        let mut lcs = vec![vec![0u32; b.len() + 1]; a.len() + 1];
        for i in (0..a.len()).rev() {
            for j in (0..b.len()).rev() {
                lcs[i][j] = if a[i] == b[j] {
                    lcs[i + 1][j + 1] + 1
                } else {
                    lcs[i + 1][j].max(lcs[i][j + 1])
                };
            }
        }
        let (mut i, mut j) = (0, 0);
        while i < a.len() || j < b.len() {
            if i < a.len() && j < b.len() && a[i] == b[j] {
                i += 1;
                j += 1;
            } else if i < a.len() && (j == b.len() || lcs[i + 1][j] >= lcs[i][j + 1]) {
                out.push(format!("-{}", a[i]));
                i += 1;
            } else {
                out.push(format!("+{}", b[j]));
                j += 1;
            }
        }
    }

    if out.len() > MAX_DIFF_LINES {
        let more = out.len() - MAX_DIFF_LINES;
        out.truncate(MAX_DIFF_LINES);
        out.push(format!("... ({} more lines)", more));
    }
    out.join("\n")
}

// ═══════════════════════════════════════════════════════════════════════
// Identity locks
// ═══════════════════════════════════════════════════════════════════════

/// One async mutex per GUID, so imports of one identity never overlap in
/// this process. A GUID's mutex lives only while someone holds or waits
/// for it.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IdentityLocks {
    pub async fn lock(&self, guid: &str) -> IdentityGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(guid.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        IdentityGuard {
            locks: self,
            guid: guid.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held while one identity is imported.
pub struct IdentityGuard<'a> {
    locks: &'a IdentityLocks,
    guid: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap();
        // Release under the map lock so no new waiter can clone the mutex
        // between the release and the count check.
        drop(self.guard.take());
        if locks
            .get(&self.guid)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.guid);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════

/// Import settings, from `[harvest]`.
#[derive(Debug, Clone, Default)]
pub struct ImportSettings {
    pub validator_profiles: Vec<String>,
    pub reject_invalid: bool,
    pub skip_responsible_party: Vec<String>,
    pub extras_not_overwritten: Vec<String>,
}

impl ImportSettings {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            validator_profiles: config.validator_profiles.clone(),
            reject_invalid: config.reject_invalid,
            skip_responsible_party: config
                .skip_responsible_party
                .as_ref()
                .map(|s| s.to_vec())
                .unwrap_or_default(),
            extras_not_overwritten: config.extras_not_overwritten.clone(),
        }
    }
}

pub struct ReconciliationEngine {
    records: Arc<dyn RecordStore>,
    catalog: Arc<dyn CatalogWriter>,
    probe: Arc<dyn ServiceProbe>,
    settings: ImportSettings,
    locks: IdentityLocks,
}

impl ReconciliationEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        catalog: Arc<dyn CatalogWriter>,
        probe: Arc<dyn ServiceProbe>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            records,
            catalog,
            probe,
            settings,
            locks: IdentityLocks::default(),
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Import one fetched attempt and record the outcome on it.
    ///
    /// The attempt is saved with its final state, report status, metadata
    /// date and (on success) its current flag and entry link. Rejections and
    /// system errors are also recorded as import-stage attempt errors.
    pub async fn import(
        &self,
        attempt: &mut HarvestAttempt,
        source: &HarvestSource,
        force: bool,
    ) -> ImportOutcome {
        let outcome = match self.run(attempt, source, force).await {
            Ok(outcome) => outcome,
            Err(Failure::Reject(abort)) => {
                info!(guid = %attempt.guid, reason = %abort, "Import rejected");
                ImportOutcome::Rejected(abort)
            }
            Err(Failure::System(reason)) => {
                error!(guid = %attempt.guid, error = %reason, "System error during import");
                ImportOutcome::SystemError(reason)
            }
        };

        attempt.state = outcome.attempt_state();
        attempt.report_status = Some(outcome.report_status());

        let message = match &outcome {
            ImportOutcome::Rejected(abort) => Some(abort.record_message()),
            ImportOutcome::SystemError(reason) if reason.trim().is_empty() => {
                Some("System Error importing Gemini document.".to_string())
            }
            ImportOutcome::SystemError(reason) => {
                Some(format!("System Error importing Gemini document\n{}", reason))
            }
            _ => None,
        };
        if let Some(message) = message {
            if let Err(e) = self
                .records
                .record_attempt_error(&attempt.id, ErrorStage::Import, &message)
                .await
            {
                error!(attempt_id = %attempt.id, error = %e, "Failed to record import error");
            }
        }
        if let Err(e) = self.records.save_attempt(attempt).await {
            error!(attempt_id = %attempt.id, error = %e, "Failed to save attempt");
        }

        outcome
    }

    async fn run(
        &self,
        attempt: &mut HarvestAttempt,
        source: &HarvestSource,
        force: bool,
    ) -> Result<ImportOutcome, Failure> {
        let content = match attempt.content.clone() {
            Some(c) => c,
            None => {
                return Err(ImportAbort::EmptyContent {
                    attempt_id: attempt.id.clone(),
                }
                .into())
            }
        };
        let document = GeminiDocument::parse(&content)?;

        if let Some(guid) = document
            .root()
            .first_value(&["fileIdentifier/CharacterString"])
        {
            if guid != attempt.guid {
                warn!(
                    gathered = %attempt.guid,
                    document = %guid,
                    "Document GUID differs from the gathered one, adopting the document's"
                );
                attempt.guid = guid;
                // The stored row must carry the adopted GUID before the
                // current pointer can move onto it.
                self.records.save_attempt(attempt).await?;
            }
        }

        let _guard = self.locks.lock(&attempt.guid).await;

        let skip_list = source
            .skip_responsible_party
            .as_ref()
            .unwrap_or(&self.settings.skip_responsible_party);
        if !skip_list.is_empty() {
            let found: Vec<String> = document
                .responsible_organisations()
                .into_iter()
                .map(|o| o.organisation_name)
                .filter(|name| skip_list.contains(name))
                .collect();
            if !found.is_empty() {
                info!(
                    guid = %attempt.guid,
                    reference = %attempt.source_reference,
                    parties = ?found,
                    "Skipping due to responsible parties"
                );
                return Ok(ImportOutcome::Skipped {
                    reason: format!("Skipping due to responsible parties: {}", found.join(", ")),
                });
            }
        }

        let profiles = source
            .validator_profiles
            .as_ref()
            .unwrap_or(&self.settings.validator_profiles);
        let report = Validators::new(profiles.as_slice())?.is_valid(&document);
        if !report.valid {
            info!(guid = %attempt.guid, "Validation errors found");
            if self.settings.reject_invalid {
                return Err(ImportAbort::Invalid(report.diagnostic(true)).into());
            }
            self.records
                .record_attempt_error(&attempt.id, ErrorStage::Import, &report.diagnostic(false))
                .await?;
        }

        let values = document.read_values()?;
        let guid = values.guid.clone();

        let geographic = !values.is_non_geographic();
        if geographic && values.bbox.map_or(true, |b| b.has_zero_area()) {
            return Err(ImportAbort::ZeroAreaExtent { guid }.into());
        }

        let metadata_date = parse_metadata_date(&values.metadata_date).ok_or_else(|| {
            ImportAbort::BadMetadataDate {
                guid: guid.clone(),
                date: values.metadata_date.clone(),
            }
        })?;
        attempt.metadata_modified_date = Some(metadata_date);

        let mut current: Vec<HarvestAttempt> = self
            .records
            .find_current_by_guid(&guid)
            .await?
            .into_iter()
            .filter(|a| a.id != attempt.id)
            .collect();
        if current.len() > 1 {
            let err = ConsistencyError {
                guid: guid.clone(),
                count: current.len(),
            };
            return Err(Failure::System(err.to_string()));
        }
        let prior_attempt = current.pop();

        let prior_entry = match &prior_attempt {
            Some(prior) => match &prior.entry_id {
                Some(entry_id) => self.catalog.get_entry(entry_id).await?,
                None => None,
            },
            None => None,
        };
        if prior_attempt.is_some() && prior_entry.is_none() {
            warn!(guid = %guid, "Current attempt has no catalog entry, creating a new one");
        }
        let prior_source_active = match (&prior_attempt, &prior_entry) {
            (Some(prior), Some(_)) => self
                .records
                .get_source(&prior.source_id)
                .await?
                .map_or(true, |s| s.active),
            _ => true,
        };

        let prior_state = match (&prior_attempt, &prior_entry) {
            (Some(prior), Some(entry)) => Some(PriorState {
                job_id: &prior.job_id,
                metadata_date: prior.metadata_modified_date,
                content: prior.content.as_deref(),
                source_active: prior_source_active,
                entry,
            }),
            _ => None,
        };
        let incoming = Incoming {
            guid: &guid,
            job_id: &attempt.job_id,
            metadata_date,
            content: &content,
            title: &values.title,
            owner: source.owner.as_deref(),
        };

        let (existing, reactivate) = match decide(prior_state.as_ref(), &incoming, force) {
            Decision::Create => {
                debug!(guid = %guid, "No entry for this GUID, creating one");
                (None, false)
            }
            Decision::Update { reactivate } => {
                if force {
                    info!(guid = %guid, attempt_id = %attempt.id, "Import forced");
                } else if reactivate {
                    info!(guid = %guid, "Entry will be re-activated");
                } else {
                    debug!(guid = %guid, "Entry needs to be updated");
                }
                (prior_entry.as_ref(), reactivate)
            }
            Decision::Skip { reason } => {
                info!(guid = %guid, "{}", reason);
                return Ok(ImportOutcome::Skipped { reason });
            }
            Decision::Reject(abort) => return Err(abort.into()),
        };

        let entry = self
            .write_entry(attempt, source, &values, metadata_date, existing, reactivate)
            .await?;

        self.records
            .mark_current(&attempt.id, &entry.id, &guid)
            .await?;
        attempt.current = true;
        attempt.entry_id = Some(entry.id.clone());

        Ok(match existing {
            None => {
                info!(guid = %guid, entry_id = %entry.id, "Created catalog entry");
                ImportOutcome::Created { entry_id: entry.id }
            }
            Some(_) => {
                info!(guid = %guid, entry_id = %entry.id, "Updated catalog entry");
                ImportOutcome::Updated {
                    entry_id: entry.id,
                    reactivated: reactivate,
                }
            }
        })
    }

    async fn write_entry(
        &self,
        attempt: &HarvestAttempt,
        source: &HarvestSource,
        values: &GeminiValues,
        metadata_date: NaiveDateTime,
        existing: Option<&CatalogEntry>,
        reactivate: bool,
    ) -> Result<CatalogEntry, Failure> {
        let input = PayloadInput {
            values,
            attempt,
            owner: source.owner.as_deref(),
            metadata_date,
            existing,
            reactivate,
            extras_not_overwritten: &self.settings.extras_not_overwritten,
        };
        let payload = build_payload(input, self.catalog.as_ref(), self.probe.as_ref())
            .await
            .map_err(|e| match e {
                PayloadError::NoUniqueName => Failure::Reject(ImportAbort::NoUniqueName),
                PayloadError::Storage(err) => Failure::from(err),
            })?;

        let written = match existing {
            None => self.catalog.create_entry(&payload).await,
            Some(entry) => self.catalog.update_entry(&entry.id, &payload).await,
        };
        written.map_err(|e| match e {
            CatalogError::Validation(summary) => {
                Failure::Reject(ImportAbort::CatalogValidation(summary))
            }
            CatalogError::Storage(err) => Failure::from(err),
        })
    }
}
