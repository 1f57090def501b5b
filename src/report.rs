//! Job and identity reports.
//!
//! `harvest report <job-id>` lists every attempt a job made with its status
//! and recorded messages, plus the job's gather errors. `harvest history
//! <guid>` lists every attempt ever made for one identity and marks the
//! current one.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::models::{AttemptError, GatherErrorRecord, HarvestAttempt, HarvestJob};
use crate::sqlite_store::SqliteStore;
use crate::store::RecordStore;

#[derive(Debug, Serialize)]
pub struct ItemReport {
    #[serde(flatten)]
    pub attempt: HarvestAttempt,
    pub errors: Vec<AttemptError>,
}

#[derive(Debug, Serialize)]
pub struct JobReport {
    pub job: HarvestJob,
    pub gather_errors: Vec<GatherErrorRecord>,
    pub items: Vec<ItemReport>,
}

impl JobReport {
    /// Number of items per report status, in `added, updated, not modified,
    /// errored` order.
    pub fn status_counts(&self) -> [usize; 4] {
        use crate::models::ReportStatus::*;
        let mut counts = [0; 4];
        for item in &self.items {
            match item.attempt.report_status {
                Some(Added) => counts[0] += 1,
                Some(Updated) => counts[1] += 1,
                Some(NotModified) => counts[2] += 1,
                Some(Errored) => counts[3] += 1,
                None => {}
            }
        }
        counts
    }
}

async fn items(records: &dyn RecordStore, attempts: Vec<HarvestAttempt>) -> Result<Vec<ItemReport>> {
    let mut items = Vec::with_capacity(attempts.len());
    for attempt in attempts {
        let errors = records.attempt_errors(&attempt.id).await?;
        items.push(ItemReport { attempt, errors });
    }
    Ok(items)
}

pub async fn job_report(records: &dyn RecordStore, job_id: &str) -> Result<JobReport> {
    let job = match records.get_job(job_id).await? {
        Some(j) => j,
        None => bail!("Job not found: {}", job_id),
    };
    let gather_errors = records.gather_errors(job_id).await?;
    let attempts = records.attempts_for_job(job_id).await?;
    Ok(JobReport {
        job,
        gather_errors,
        items: items(records, attempts).await?,
    })
}

pub async fn guid_history(records: &dyn RecordStore, guid: &str) -> Result<Vec<ItemReport>> {
    let attempts = records.attempts_for_guid(guid).await?;
    if attempts.is_empty() {
        bail!("No harvest attempts for GUID: {}", guid);
    }
    items(records, attempts).await
}

fn print_item(item: &ItemReport) {
    let a = &item.attempt;
    println!(
        "{:<38} {:<10} {:<14} {}{}",
        a.id,
        a.state.as_str(),
        a.report_status.map_or("-", |s| s.as_str()),
        a.guid,
        if a.current { "  (current)" } else { "" }
    );
    println!("    reference: {}", a.source_reference);
    if let Some(entry_id) = &a.entry_id {
        println!("    entry: {}", entry_id);
    }
    for error in &item.errors {
        println!("    [{}] {}", error.stage.as_str(), indent(&error.message));
    }
}

fn indent(message: &str) -> String {
    message.replace('\n', "\n      ")
}

pub async fn run_report(config: &Config, job_id: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let report = job_report(&store, job_id).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let job = &report.job;
    let [added, updated, not_modified, errored] = report.status_counts();
    println!("job {}", job.id);
    println!("  source: {}", job.source_id);
    println!("  status: {}", job.status.as_str());
    println!("  created: {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(finished) = job.finished_at {
        println!("  finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    println!(
        "  added: {}  updated: {}  not modified: {}  errored: {}",
        added, updated, not_modified, errored
    );

    if !report.gather_errors.is_empty() {
        println!();
        println!("gather errors:");
        for error in &report.gather_errors {
            println!("  {}", indent(&error.message));
        }
    }

    if !report.items.is_empty() {
        println!();
        println!("{:<38} {:<10} {:<14} GUID", "ATTEMPT", "STATE", "STATUS");
        for item in &report.items {
            print_item(item);
        }
    }
    Ok(())
}

pub async fn run_history(config: &Config, guid: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let history = guid_history(&store, guid).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    println!("{:<38} {:<10} {:<14} GUID", "ATTEMPT", "STATE", "STATUS");
    for item in &history {
        print_item(item);
        println!("    job: {}", item.attempt.job_id);
        if let Some(date) = item.attempt.metadata_modified_date {
            println!("    metadata date: {}", date.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptState, DiscoveryRecord, ErrorStage, ReportStatus};
    use crate::store::memory::InMemoryStore;

    fn record(guid: &str) -> DiscoveryRecord {
        DiscoveryRecord {
            guid: guid.to_string(),
            source_reference: format!("http://example.org/waf/{}.xml", guid),
            content: None,
        }
    }

    #[tokio::test]
    async fn job_report_collects_attempts_and_errors() {
        let store = InMemoryStore::new();
        let job = HarvestJob::new("waf:rivers");
        store.create_job(&job).await.unwrap();
        store
            .record_gather_error(&job.id, "Unable to get WAF link: boom")
            .await
            .unwrap();

        let mut ok = HarvestAttempt::new(&job, record("a"));
        ok.state = AttemptState::Complete;
        ok.report_status = Some(ReportStatus::Added);
        store.save_attempt(&ok).await.unwrap();

        let mut bad = HarvestAttempt::new(&job, record("b"));
        bad.state = AttemptState::Error;
        bad.report_status = Some(ReportStatus::Errored);
        store.save_attempt(&bad).await.unwrap();
        store
            .record_attempt_error(&bad.id, ErrorStage::Fetch, "Empty record for GUID b")
            .await
            .unwrap();

        let report = job_report(&store, &job.id).await.unwrap();
        assert_eq!(report.gather_errors.len(), 1);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.status_counts(), [1, 0, 0, 1]);
        assert!(report.items[0].errors.is_empty());
        assert_eq!(report.items[1].errors[0].stage, ErrorStage::Fetch);

        assert!(job_report(&store, "missing").await.is_err());
    }

    #[tokio::test]
    async fn history_requires_known_guid() {
        let store = InMemoryStore::new();
        let job = HarvestJob::new("doc:one");
        store.create_job(&job).await.unwrap();
        store
            .save_attempt(&HarvestAttempt::new(&job, record("g1")))
            .await
            .unwrap();

        assert_eq!(guid_history(&store, "g1").await.unwrap().len(), 1);
        let err = guid_history(&store, "g2").await.unwrap_err();
        assert!(err.to_string().contains("No harvest attempts"));
    }
}
