//! Harvest job orchestration.
//!
//! Coordinates one job per source: adapter gather → per-identity fetch →
//! reconciliation import. Gather failures end the job with a recorded gather
//! error; per-identity failures are recorded on the attempt and the job moves
//! on. Cancellation is checked before every fetch and import, and a
//! cancelled job keeps whatever it already committed.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::db;
use crate::http::HttpFetcher;
use crate::models::{
    AttemptState, DiscoveryRecord, ErrorStage, HarvestAttempt, HarvestJob, HarvestSource,
    JobStatus, ReportStatus,
};
use crate::probe::{NoServiceProbe, ServiceProbe, WmsProbe};
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};
use crate::reconcile::{ImportOutcome, ImportSettings, ReconciliationEngine};
use crate::sqlite_store::SqliteStore;
use crate::store::RecordStore;
use crate::traits::{AdapterRegistry, SourceAdapter};

/// Counts for one finished (or cancelled) job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: String,
    pub source_id: String,
    pub status: JobStatus,
    pub gathered: usize,
    pub added: usize,
    pub updated: usize,
    pub not_modified: usize,
    pub errored: usize,
    pub gather_errors: usize,
}

impl JobSummary {
    fn new(job: &HarvestJob) -> Self {
        Self {
            job_id: job.id.clone(),
            source_id: job.source_id.clone(),
            status: JobStatus::Running,
            gathered: 0,
            added: 0,
            updated: 0,
            not_modified: 0,
            errored: 0,
            gather_errors: 0,
        }
    }

    fn count(&mut self, status: ReportStatus) {
        match status {
            ReportStatus::Added => self.added += 1,
            ReportStatus::Updated => self.updated += 1,
            ReportStatus::NotModified => self.not_modified += 1,
            ReportStatus::Errored => self.errored += 1,
        }
    }

    fn print(&self) {
        println!("harvest {}", self.source_id);
        println!("  job: {}", self.job_id);
        println!("  gathered: {} records", self.gathered);
        println!("  added: {}", self.added);
        println!("  updated: {}", self.updated);
        println!("  not modified: {}", self.not_modified);
        println!("  errored: {}", self.errored);
        println!("  gather errors: {}", self.gather_errors);
        println!("  status: {}", self.status.as_str());
    }
}

/// Runs harvest jobs against one reconciliation engine.
pub struct Harvester {
    engine: Arc<ReconciliationEngine>,
    progress: Arc<dyn HarvestProgressReporter>,
    debug: bool,
}

impl Harvester {
    pub fn new(engine: Arc<ReconciliationEngine>, progress: Arc<dyn HarvestProgressReporter>) -> Self {
        Self {
            engine,
            progress,
            debug: false,
        }
    }

    /// In debug mode a per-identity system error stops the job and is
    /// returned to the caller instead of only being recorded.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn records(&self) -> &Arc<dyn RecordStore> {
        self.engine.records()
    }

    /// Gather, fetch and import everything `adapter` offers under a new job.
    ///
    /// A storage failure ends the job early: it is finished, and the error
    /// is returned.
    pub async fn run_job(
        &self,
        adapter: &dyn SourceAdapter,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<JobSummary> {
        let source = adapter.source();
        let (job, summary) = self.start_job(&source).await?;
        let result = self
            .gather_and_import(adapter, &source, &job, summary, force, cancel)
            .await;
        self.end_on_error(&job, result).await
    }

    /// Re-run the import stage over a source's current attempts, forced,
    /// using the content already stored. Nothing is fetched.
    pub async fn reimport(
        &self,
        source: &HarvestSource,
        cancel: &CancellationToken,
    ) -> Result<JobSummary> {
        let (job, summary) = self.start_job(source).await?;
        let result = self.reimport_current(source, &job, summary, cancel).await;
        self.end_on_error(&job, result).await
    }

    async fn start_job(&self, source: &HarvestSource) -> Result<(HarvestJob, JobSummary)> {
        self.records().upsert_source(source).await?;
        let job = HarvestJob::new(&source.id);
        self.records().create_job(&job).await?;
        info!(job_id = %job.id, source = %source.id, "Harvest job started");
        let summary = JobSummary::new(&job);
        Ok((job, summary))
    }

    /// A job that stopped on an error is still finished, so it never stays
    /// `RUNNING`.
    async fn end_on_error(
        &self,
        job: &HarvestJob,
        result: Result<JobSummary>,
    ) -> Result<JobSummary> {
        if let Err(e) = &result {
            error!(job_id = %job.id, source = %job.source_id, error = %format!("{:#}", e), "Harvest job stopped");
            let finished = self.records().finish_job(&job.id, JobStatus::Finished).await;
            if let Err(finish_err) = finished {
                error!(job_id = %job.id, error = %finish_err, "Failed to finish stopped job");
            }
        }
        result
    }

    async fn gather_and_import(
        &self,
        adapter: &dyn SourceAdapter,
        source: &HarvestSource,
        job: &HarvestJob,
        mut summary: JobSummary,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<JobSummary> {
        self.progress.report(HarvestProgressEvent::Gathering {
            source: source.id.clone(),
        });
        let gathered = tokio::select! {
            _ = cancel.cancelled() => {
                return self.finish(summary, JobStatus::Cancelled).await;
            }
            result = adapter.gather() => result,
        };
        let gathered = match gathered {
            Ok(g) => g,
            Err(e) => {
                info!(job_id = %job.id, source = %source.id, error = %e, "Gather failed");
                self.records().record_gather_error(&job.id, &e.to_string()).await?;
                summary.gather_errors += 1;
                return self.finish(summary, JobStatus::Finished).await;
            }
        };

        for message in &gathered.errors {
            info!(job_id = %job.id, error = %message, "Gather error");
            self.records().record_gather_error(&job.id, message).await?;
        }
        summary.gather_errors += gathered.errors.len();

        let mut attempts = Vec::with_capacity(gathered.records.len());
        for record in gathered.records {
            let attempt = HarvestAttempt::new(job, record);
            self.records().save_attempt(&attempt).await?;
            attempts.push(attempt);
        }
        summary.gathered = attempts.len();
        info!(job_id = %job.id, source = %source.id, count = attempts.len(), "Gathered identities");

        self.import_all(adapter, source, attempts, force, cancel, summary)
            .await
    }

    async fn reimport_current(
        &self,
        source: &HarvestSource,
        job: &HarvestJob,
        mut summary: JobSummary,
        cancel: &CancellationToken,
    ) -> Result<JobSummary> {
        let mut attempts = Vec::new();
        for prior in self.records().current_attempts_for_source(&source.id).await? {
            let attempt = HarvestAttempt::new(
                job,
                DiscoveryRecord {
                    guid: prior.guid,
                    source_reference: prior.source_reference,
                    content: prior.content,
                },
            );
            self.records().save_attempt(&attempt).await?;
            attempts.push(attempt);
        }
        summary.gathered = attempts.len();

        let total = attempts.len() as u64;
        for (i, mut attempt) in attempts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish(summary, JobStatus::Cancelled).await;
            }
            attempt.state = AttemptState::Fetched;
            let outcome = self.engine.import(&mut attempt, source, true).await;
            summary.count(outcome.report_status());
            self.check_debug(&outcome)?;
            self.progress.report(HarvestProgressEvent::Importing {
                source: source.id.clone(),
                n: i as u64 + 1,
                total,
            });
        }

        self.finish(summary, JobStatus::Finished).await
    }

    async fn import_all(
        &self,
        adapter: &dyn SourceAdapter,
        source: &HarvestSource,
        attempts: Vec<HarvestAttempt>,
        force: bool,
        cancel: &CancellationToken,
        mut summary: JobSummary,
    ) -> Result<JobSummary> {
        let total = attempts.len() as u64;
        for (i, mut attempt) in attempts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish(summary, JobStatus::Cancelled).await;
            }

            if attempt.content.is_none() {
                match adapter.fetch(&attempt).await {
                    Ok(content) => attempt.content = Some(content),
                    Err(e) => {
                        info!(guid = %attempt.guid, error = %e, "Fetch failed");
                        self.records()
                            .record_attempt_error(&attempt.id, ErrorStage::Fetch, &e.to_string())
                            .await?;
                        attempt.state = AttemptState::Error;
                        attempt.report_status = Some(ReportStatus::Errored);
                        self.records().save_attempt(&attempt).await?;
                        summary.count(ReportStatus::Errored);
                        continue;
                    }
                }
            }
            attempt.state = AttemptState::Fetched;
            self.records().save_attempt(&attempt).await?;
            debug!(guid = %attempt.guid, "Fetched");

            if cancel.is_cancelled() {
                return self.finish(summary, JobStatus::Cancelled).await;
            }
            let outcome = self.engine.import(&mut attempt, source, force).await;
            debug!(guid = %attempt.guid, status = outcome.report_status().as_str(), "Imported");
            summary.count(outcome.report_status());
            self.check_debug(&outcome)?;

            self.progress.report(HarvestProgressEvent::Importing {
                source: source.id.clone(),
                n: i as u64 + 1,
                total,
            });
        }

        self.finish(summary, JobStatus::Finished).await
    }

    /// In debug mode the first system error stops the job.
    fn check_debug(&self, outcome: &ImportOutcome) -> Result<()> {
        if let (true, ImportOutcome::SystemError(reason)) = (self.debug, outcome) {
            bail!("System error importing Gemini document: {}", reason);
        }
        Ok(())
    }

    async fn finish(&self, mut summary: JobSummary, status: JobStatus) -> Result<JobSummary> {
        self.records().finish_job(&summary.job_id, status).await?;
        summary.status = status;
        info!(
            job_id = %summary.job_id,
            status = status.as_str(),
            added = summary.added,
            updated = summary.updated,
            not_modified = summary.not_modified,
            errored = summary.errored,
            "Harvest job finished"
        );
        Ok(summary)
    }
}

/// Run one job per adapter concurrently. Results come back in adapter order.
pub async fn run_all(
    harvester: Arc<Harvester>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    force: bool,
    cancel: CancellationToken,
) -> Vec<(String, Result<JobSummary>)> {
    let mut set = JoinSet::new();
    for (index, adapter) in adapters.iter().enumerate() {
        let harvester = harvester.clone();
        let adapter = adapter.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let result = harvester.run_job(adapter.as_ref(), force, &cancel).await;
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<JobSummary>>> = adapters.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => error!(error = %e, "Harvest task failed"),
        }
    }

    adapters
        .iter()
        .zip(results)
        .map(|(adapter, result)| {
            let result = result.unwrap_or_else(|| Err(anyhow::anyhow!("harvest task aborted")));
            (adapter.source_id(), result)
        })
        .collect()
}

/// Build the reconciliation engine over a store, with the probe the config asks for.
pub fn build_engine(config: &Config, store: Arc<SqliteStore>) -> Result<ReconciliationEngine> {
    let probe: Arc<dyn ServiceProbe> = if config.harvest.probe_services {
        let http = HttpFetcher::from_config(&config.http)?.with_timeout(
            std::time::Duration::from_secs(config.http.probe_timeout_secs),
        );
        Arc::new(WmsProbe::new(http))
    } else {
        Arc::new(NoServiceProbe)
    };
    Ok(ReconciliationEngine::new(
        store.clone(),
        store,
        probe,
        ImportSettings::from_config(&config.harvest),
    ))
}

/// `harvest run <target>`: run every selected source and print a summary per job.
pub async fn run_harvest(
    config: &Config,
    target: &str,
    force: bool,
    progress: Arc<dyn HarvestProgressReporter>,
    cancel: CancellationToken,
) -> Result<()> {
    let registry = AdapterRegistry::from_config(config)?;
    let mut adapters = registry.select(target)?;
    // Inactive sources only run when named explicitly.
    if !target.contains(':') {
        adapters.retain(|a| {
            let active = a.source().active;
            if !active {
                info!(source = %a.source_id(), "Skipping inactive source");
            }
            active
        });
    }
    if adapters.is_empty() {
        bail!("No sources configured for '{}'", target);
    }

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let engine = Arc::new(build_engine(config, store)?);
    let harvester = Arc::new(
        Harvester::new(engine, progress).with_debug(config.harvest.debug_enabled()),
    );

    let results = run_all(harvester, adapters, force, cancel).await;

    let mut failed = 0;
    for (source_id, result) in results {
        match result {
            Ok(summary) => summary.print(),
            Err(e) => {
                failed += 1;
                eprintln!("harvest {} failed: {:#}", source_id, e);
            }
        }
    }

    pool.close().await;
    if failed > 0 {
        bail!("{} harvest job(s) failed", failed);
    }
    println!("ok");
    Ok(())
}

/// `harvest reimport <kind:name>`.
pub async fn run_reimport(
    config: &Config,
    target: &str,
    progress: Arc<dyn HarvestProgressReporter>,
    cancel: CancellationToken,
) -> Result<()> {
    let registry = AdapterRegistry::from_config(config)?;
    let adapter = match registry.find(target) {
        Some(a) => a,
        None => bail!(
            "Unknown source: '{}'. Run `harvest sources` to list configured sources.",
            target
        ),
    };
    let source = adapter.source();

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let engine = Arc::new(build_engine(config, store)?);
    let harvester = Harvester::new(engine, progress).with_debug(config.harvest.debug_enabled());

    let summary = harvester.reimport(&source, &cancel).await?;
    summary.print();
    println!("ok");

    pool.close().await;
    Ok(())
}
