//! Core data models used throughout the harvester.
//!
//! These types represent the sources, jobs, harvest attempts and catalog
//! entries that flow through the gather → fetch → import pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Format used to persist metadata dates.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The three kinds of remote source a job can harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A CSW catalog service.
    Csw,
    /// A web-accessible folder of documents.
    Waf,
    /// A single static document.
    Doc,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Csw => "csw",
            SourceKind::Waf => "waf",
            SourceKind::Doc => "doc",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "csw" => Ok(SourceKind::Csw),
            "waf" => Ok(SourceKind::Waf),
            "doc" => Ok(SourceKind::Doc),
            other => anyhow::bail!("Unknown source kind: '{}'. Available: csw, waf, doc", other),
        }
    }
}

/// A configured harvest source as recorded in the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestSource {
    /// `"<kind>:<name>"`, e.g. `"waf:rivers"`.
    pub id: String,
    pub kind: SourceKind,
    pub url: String,
    /// Publisher that owns the catalog entries created from this source.
    pub owner: Option<String>,
    pub active: bool,
    /// Overrides the global validator profiles when set.
    pub validator_profiles: Option<Vec<String>>,
    /// Overrides the global responsible-party exclusion list when set.
    pub skip_responsible_party: Option<Vec<String>>,
}

/// Lifecycle of a harvest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Finished,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(JobStatus::Running),
            "FINISHED" => Some(JobStatus::Finished),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// One run of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestJob {
    pub id: String,
    pub source_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl HarvestJob {
    pub fn new(source_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            status: JobStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Pipeline position of a harvest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    Waiting,
    Fetched,
    Complete,
    Error,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Waiting => "WAITING",
            AttemptState::Fetched => "FETCHED",
            AttemptState::Complete => "COMPLETE",
            AttemptState::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(AttemptState::Waiting),
            "FETCHED" => Some(AttemptState::Fetched),
            "COMPLETE" => Some(AttemptState::Complete),
            "ERROR" => Some(AttemptState::Error),
            _ => None,
        }
    }
}

/// What the import did with the attempt, as surfaced in job reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportStatus {
    #[serde(rename = "added")]
    Added,
    #[serde(rename = "updated")]
    Updated,
    #[serde(rename = "not modified")]
    NotModified,
    #[serde(rename = "errored")]
    Errored,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Added => "added",
            ReportStatus::Updated => "updated",
            ReportStatus::NotModified => "not modified",
            ReportStatus::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(ReportStatus::Added),
            "updated" => Some(ReportStatus::Updated),
            "not modified" => Some(ReportStatus::NotModified),
            "errored" => Some(ReportStatus::Errored),
            _ => None,
        }
    }
}

/// One fetch of one document at one point in time.
///
/// At most one attempt per `guid` has `current = true`; that attempt is the
/// one whose payload the live catalog entry reflects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestAttempt {
    pub id: String,
    pub guid: String,
    pub job_id: String,
    pub source_id: String,
    /// Source-specific locator: the CSW identifier, or the document URL for
    /// WAF and single-document sources.
    pub source_reference: String,
    pub content: Option<String>,
    pub metadata_modified_date: Option<NaiveDateTime>,
    pub current: bool,
    pub entry_id: Option<String>,
    pub state: AttemptState,
    pub report_status: Option<ReportStatus>,
    pub created_at: DateTime<Utc>,
}

impl HarvestAttempt {
    pub fn new(job: &HarvestJob, record: DiscoveryRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            guid: record.guid,
            job_id: job.id.clone(),
            source_id: job.source_id.clone(),
            source_reference: record.source_reference,
            content: record.content,
            metadata_modified_date: None,
            current: false,
            entry_id: None,
            state: AttemptState::Waiting,
            report_status: None,
            created_at: Utc::now(),
        }
    }
}

/// Output of a source adapter's gather step: one identity to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub guid: String,
    pub source_reference: String,
    /// Present when the adapter had to download the document to learn its
    /// identity.
    pub content: Option<String>,
}

/// Stage an attempt error was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorStage {
    Fetch,
    Import,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Fetch => "Fetch",
            ErrorStage::Import => "Import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Fetch" => Some(ErrorStage::Fetch),
            "Import" => Some(ErrorStage::Import),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptError {
    pub attempt_id: String,
    pub stage: ErrorStage,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatherErrorRecord {
    pub job_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Organisation named in a document with every role it plays there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsibleParty {
    pub name: String,
    pub roles: Vec<String>,
}

impl fmt::Display for ResponsibleParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.roles.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Active,
    Deleted,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Active => "active",
            EntryState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EntryState::Active),
            "deleted" => Some(EntryState::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub display_name: String,
}

/// A downloadable or viewable resource attached to a catalog entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    /// Persistent id; `None` for a resource the catalog has not seen yet.
    pub id: Option<String>,
    pub url: String,
    pub name: String,
    pub description: String,
    pub format: Option<String>,
    pub resource_locator_protocol: String,
    pub resource_locator_function: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verified_date: Option<String>,
    #[serde(default)]
    pub wms_base_urls: Option<String>,
    #[serde(default)]
    pub recommended_wms_preview: bool,
}

impl Resource {
    pub fn is_wms(&self) -> bool {
        self.format.as_deref() == Some("WMS")
    }
}

/// The projection of one accepted attempt that is written to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntryPayload {
    pub name: String,
    pub title: String,
    pub notes: String,
    pub owner: Option<String>,
    /// `Some(Active)` reactivates a deleted entry; `None` keeps the state.
    pub state: Option<EntryState>,
    pub tags: Vec<Tag>,
    pub extras: BTreeMap<String, String>,
    pub resources: Vec<Resource>,
}

/// A persisted catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub title: String,
    pub notes: String,
    pub owner: Option<String>,
    pub state: EntryState,
    pub tags: Vec<Tag>,
    pub extras: BTreeMap<String, String>,
    pub resources: Vec<Resource>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Build a new entry from a payload. Resources without ids get fresh ones.
    pub fn from_payload(id: String, payload: &CatalogEntryPayload) -> Self {
        let now = Utc::now();
        let mut entry = Self {
            id,
            name: String::new(),
            title: String::new(),
            notes: String::new(),
            owner: None,
            state: EntryState::Active,
            tags: Vec::new(),
            extras: BTreeMap::new(),
            resources: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        entry.apply(payload);
        entry
    }

    /// Overwrite this entry's fields with a payload, keeping its identity.
    pub fn apply(&mut self, payload: &CatalogEntryPayload) {
        self.name = payload.name.clone();
        self.title = payload.title.clone();
        self.notes = payload.notes.clone();
        self.owner = payload.owner.clone();
        if let Some(state) = payload.state {
            self.state = state;
        }
        self.tags = payload.tags.clone();
        self.extras = payload.extras.clone();
        self.resources = payload
            .resources
            .iter()
            .cloned()
            .map(|mut r| {
                if r.id.is_none() {
                    r.id = Some(Uuid::new_v4().to_string());
                }
                r
            })
            .collect();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_round_trips_through_str() {
        for kind in [SourceKind::Csw, SourceKind::Waf, SourceKind::Doc] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("ftp".parse::<SourceKind>().is_err());
    }

    #[test]
    fn apply_assigns_ids_only_to_new_resources() {
        let payload = CatalogEntryPayload {
            name: "rivers".to_string(),
            title: "Rivers".to_string(),
            notes: String::new(),
            owner: None,
            state: None,
            tags: vec![],
            extras: BTreeMap::new(),
            resources: vec![
                Resource {
                    id: Some("kept".to_string()),
                    url: "http://a".to_string(),
                    ..Default::default()
                },
                Resource {
                    url: "http://b".to_string(),
                    ..Default::default()
                },
            ],
        };
        let entry = CatalogEntry::from_payload("e1".to_string(), &payload);
        assert_eq!(entry.resources[0].id.as_deref(), Some("kept"));
        assert!(entry.resources[1].id.is_some());
        assert_eq!(entry.state, EntryState::Active);
    }

    #[test]
    fn responsible_party_display_lists_roles() {
        let party = ResponsibleParty {
            name: "Environment Agency".to_string(),
            roles: vec!["owner".to_string(), "publisher".to_string()],
        };
        assert_eq!(party.to_string(), "Environment Agency (owner, publisher)");
    }
}
