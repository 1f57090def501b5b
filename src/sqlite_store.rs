//! SQLite-backed [`RecordStore`] and [`CatalogWriter`].
//!
//! Maps each storage operation to queries against the schema created by
//! [`migrate::apply_schema`](crate::migrate::apply_schema). Multi-row writes
//! (moving the current pointer, writing an entry with its resources) run in
//! a transaction.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::models::{
    AttemptError, AttemptState, CatalogEntry, CatalogEntryPayload, EntryState, ErrorStage,
    GatherErrorRecord, HarvestAttempt, HarvestJob, HarvestSource, JobStatus, ReportStatus,
    Resource, Tag, DATETIME_FORMAT,
};
use crate::store::{validate_payload, CatalogWriter, RecordStore};

/// SQLite implementation of both storage traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_resources(&self, entry_id: &str) -> Result<Vec<Resource>> {
        let rows = sqlx::query(
            "SELECT resource_json FROM catalog_resources WHERE entry_id = ? ORDER BY position ASC",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let json: String = row.get("resource_json");
                serde_json::from_str(&json).context("Corrupt resource row")
            })
            .collect()
    }

    async fn name_taken_by_other(&self, name: &str, id: Option<&str>) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM catalog_entries WHERE name = ? AND id IS NOT ?",
        )
        .bind(name)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

fn parse_metadata_date(s: Option<String>) -> Result<Option<NaiveDateTime>> {
    s.map(|s| {
        NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT)
            .with_context(|| format!("Invalid metadata date in database: {}", s))
    })
    .transpose()
}

fn source_from_row(row: &SqliteRow) -> Result<HarvestSource> {
    let kind: String = row.get("kind");
    let profiles: Option<String> = row.get("validator_profiles_json");
    let skip: Option<String> = row.get("skip_responsible_party_json");
    Ok(HarvestSource {
        id: row.get("id"),
        kind: kind.parse()?,
        url: row.get("url"),
        owner: row.get("owner"),
        active: row.get("active"),
        validator_profiles: profiles.map(|p| serde_json::from_str(&p)).transpose()?,
        skip_responsible_party: skip.map(|s| serde_json::from_str(&s)).transpose()?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<HarvestJob> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let finished_at: Option<String> = row.get("finished_at");
    Ok(HarvestJob {
        id: row.get("id"),
        source_id: row.get("source_id"),
        status: JobStatus::parse(&status)
            .with_context(|| format!("Unknown job status in database: {}", status))?,
        created_at: parse_ts(&created_at)?,
        finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn attempt_from_row(row: &SqliteRow) -> Result<HarvestAttempt> {
    let state: String = row.get("state");
    let report_status: Option<String> = row.get("report_status");
    let created_at: String = row.get("created_at");
    Ok(HarvestAttempt {
        id: row.get("id"),
        guid: row.get("guid"),
        job_id: row.get("job_id"),
        source_id: row.get("source_id"),
        source_reference: row.get("source_reference"),
        content: row.get("content"),
        metadata_modified_date: parse_metadata_date(row.get("metadata_modified_date"))?,
        current: row.get("current"),
        entry_id: row.get("entry_id"),
        state: AttemptState::parse(&state)
            .with_context(|| format!("Unknown attempt state in database: {}", state))?,
        report_status: report_status.as_deref().and_then(ReportStatus::parse),
        created_at: parse_ts(&created_at)?,
    })
}

const ATTEMPT_COLUMNS: &str = "id, guid, job_id, source_id, source_reference, content, \
     metadata_modified_date, current, entry_id, state, report_status, created_at";

async fn write_resources(
    tx: &mut Transaction<'_, Sqlite>,
    entry_id: &str,
    resources: &[Resource],
) -> Result<()> {
    sqlx::query("DELETE FROM catalog_resources WHERE entry_id = ?")
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;

    for (position, resource) in resources.iter().enumerate() {
        let id = resource
            .id
            .clone()
            .context("Resource must have an id before it is written")?;
        sqlx::query(
            "INSERT INTO catalog_resources (id, entry_id, position, resource_json) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(entry_id)
        .bind(position as i64)
        .bind(serde_json::to_string(resource)?)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_source(&self, source: &HarvestSource) -> Result<()> {
        let profiles = source
            .validator_profiles
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let skip = source
            .skip_responsible_party
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO harvest_sources (id, kind, url, owner, active,
                                         validator_profiles_json, skip_responsible_party_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                url = excluded.url,
                owner = excluded.owner,
                active = excluded.active,
                validator_profiles_json = excluded.validator_profiles_json,
                skip_responsible_party_json = excluded.skip_responsible_party_json
            "#,
        )
        .bind(&source.id)
        .bind(source.kind.as_str())
        .bind(&source.url)
        .bind(&source.owner)
        .bind(source.active)
        .bind(profiles)
        .bind(skip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<HarvestSource>> {
        let row = sqlx::query("SELECT * FROM harvest_sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn list_sources(&self) -> Result<Vec<HarvestSource>> {
        let rows = sqlx::query("SELECT * FROM harvest_sources ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn create_job(&self, job: &HarvestJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO harvest_jobs (id, source_id, status, created_at, finished_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.source_id)
        .bind(job.status.as_str())
        .bind(format_ts(&job.created_at))
        .bind(job.finished_at.as_ref().map(format_ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_job(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let result = sqlx::query("UPDATE harvest_jobs SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(format_ts(&Utc::now()))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("No such harvest job: {}", job_id);
        }
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<HarvestJob>> {
        let row = sqlx::query("SELECT * FROM harvest_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn jobs_for_source(&self, source_id: &str) -> Result<Vec<HarvestJob>> {
        let rows = sqlx::query(
            "SELECT * FROM harvest_jobs WHERE source_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn save_attempt(&self, attempt: &HarvestAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvest_attempts (id, guid, job_id, source_id, source_reference, content,
                                          metadata_modified_date, current, entry_id, state,
                                          report_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                guid = excluded.guid,
                source_reference = excluded.source_reference,
                content = excluded.content,
                metadata_modified_date = excluded.metadata_modified_date,
                entry_id = excluded.entry_id,
                state = excluded.state,
                report_status = excluded.report_status
            "#,
        )
        .bind(&attempt.id)
        .bind(&attempt.guid)
        .bind(&attempt.job_id)
        .bind(&attempt.source_id)
        .bind(&attempt.source_reference)
        .bind(&attempt.content)
        .bind(
            attempt
                .metadata_modified_date
                .map(|d| d.format(DATETIME_FORMAT).to_string()),
        )
        .bind(&attempt.entry_id)
        .bind(attempt.state.as_str())
        .bind(attempt.report_status.map(|s| s.as_str()))
        .bind(format_ts(&attempt.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_attempt(&self, id: &str) -> Result<Option<HarvestAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM harvest_attempts WHERE id = ?",
            ATTEMPT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn attempts_for_job(&self, job_id: &str) -> Result<Vec<HarvestAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM harvest_attempts WHERE job_id = ? ORDER BY rowid ASC",
            ATTEMPT_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attempt_from_row).collect()
    }

    async fn attempts_for_guid(&self, guid: &str) -> Result<Vec<HarvestAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM harvest_attempts WHERE guid = ? ORDER BY rowid ASC",
            ATTEMPT_COLUMNS
        ))
        .bind(guid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attempt_from_row).collect()
    }

    async fn find_current_by_guid(&self, guid: &str) -> Result<Vec<HarvestAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM harvest_attempts WHERE guid = ? AND current = 1",
            ATTEMPT_COLUMNS
        ))
        .bind(guid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attempt_from_row).collect()
    }

    async fn current_attempts_for_source(&self, source_id: &str) -> Result<Vec<HarvestAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM harvest_attempts WHERE source_id = ? AND current = 1 ORDER BY rowid ASC",
            ATTEMPT_COLUMNS
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attempt_from_row).collect()
    }

    async fn mark_current(&self, attempt_id: &str, entry_id: &str, guid: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE harvest_attempts SET current = 0 WHERE entry_id = ? OR guid = ?")
            .bind(entry_id)
            .bind(guid)
            .execute(&mut *tx)
            .await?;

        let result =
            sqlx::query("UPDATE harvest_attempts SET current = 1, entry_id = ?, guid = ? WHERE id = ?")
                .bind(entry_id)
                .bind(guid)
                .bind(attempt_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("No such harvest attempt: {}", attempt_id);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_gather_error(&self, job_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO harvest_gather_errors (job_id, message, created_at) VALUES (?, ?, ?)",
        )
        .bind(job_id)
        .bind(message)
        .bind(format_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn gather_errors(&self, job_id: &str) -> Result<Vec<GatherErrorRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, message, created_at FROM harvest_gather_errors WHERE job_id = ? ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                Ok(GatherErrorRecord {
                    job_id: row.get("job_id"),
                    message: row.get("message"),
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }

    async fn record_attempt_error(
        &self,
        attempt_id: &str,
        stage: ErrorStage,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO harvest_attempt_errors (attempt_id, stage, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(attempt_id)
        .bind(stage.as_str())
        .bind(message)
        .bind(format_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempt_errors(&self, attempt_id: &str) -> Result<Vec<AttemptError>> {
        let rows = sqlx::query(
            "SELECT attempt_id, stage, message, created_at FROM harvest_attempt_errors WHERE attempt_id = ? ORDER BY id ASC",
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let stage: String = row.get("stage");
                let created_at: String = row.get("created_at");
                Ok(AttemptError {
                    attempt_id: row.get("attempt_id"),
                    stage: ErrorStage::parse(&stage)
                        .with_context(|| format!("Unknown error stage in database: {}", stage))?,
                    message: row.get("message"),
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CatalogWriter for SqliteStore {
    async fn get_entry(&self, id: &str) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query("SELECT * FROM catalog_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let state: String = row.get("state");
        let tags_json: String = row.get("tags_json");
        let extras_json: String = row.get("extras_json");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        let tags: Vec<Tag> = serde_json::from_str(&tags_json)?;
        let extras: BTreeMap<String, String> = serde_json::from_str(&extras_json)?;

        Ok(Some(CatalogEntry {
            id: row.get("id"),
            name: row.get("name"),
            title: row.get("title"),
            notes: row.get("notes"),
            owner: row.get("owner"),
            state: EntryState::parse(&state)
                .with_context(|| format!("Unknown entry state in database: {}", state))?,
            tags,
            extras,
            resources: self.load_resources(id).await?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        }))
    }

    async fn name_exists(&self, name: &str) -> Result<bool> {
        self.name_taken_by_other(name, None).await
    }

    async fn create_entry(
        &self,
        payload: &CatalogEntryPayload,
    ) -> Result<CatalogEntry, CatalogError> {
        validate_payload(payload)?;
        if self.name_taken_by_other(&payload.name, None).await? {
            return Err(CatalogError::Validation(
                "name: That URL is already in use.".to_string(),
            ));
        }

        let entry = CatalogEntry::from_payload(Uuid::new_v4().to_string(), payload);
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        sqlx::query(
            r#"
            INSERT INTO catalog_entries (id, name, title, notes, owner, state,
                                         tags_json, extras_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.name)
        .bind(&entry.title)
        .bind(&entry.notes)
        .bind(&entry.owner)
        .bind(entry.state.as_str())
        .bind(serde_json::to_string(&entry.tags).map_err(anyhow::Error::from)?)
        .bind(serde_json::to_string(&entry.extras).map_err(anyhow::Error::from)?)
        .bind(format_ts(&entry.created_at))
        .bind(format_ts(&entry.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;
        write_resources(&mut tx, &entry.id, &entry.resources).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(entry)
    }

    async fn update_entry(
        &self,
        id: &str,
        payload: &CatalogEntryPayload,
    ) -> Result<CatalogEntry, CatalogError> {
        validate_payload(payload)?;
        if self.name_taken_by_other(&payload.name, Some(id)).await? {
            return Err(CatalogError::Validation(
                "name: That URL is already in use.".to_string(),
            ));
        }

        let mut entry = self
            .get_entry(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No such catalog entry: {}", id))?;
        entry.apply(payload);

        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        sqlx::query(
            r#"
            UPDATE catalog_entries SET name = ?, title = ?, notes = ?, owner = ?, state = ?,
                                       tags_json = ?, extras_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&entry.name)
        .bind(&entry.title)
        .bind(&entry.notes)
        .bind(&entry.owner)
        .bind(entry.state.as_str())
        .bind(serde_json::to_string(&entry.tags).map_err(anyhow::Error::from)?)
        .bind(serde_json::to_string(&entry.extras).map_err(anyhow::Error::from)?)
        .bind(format_ts(&entry.updated_at))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;
        write_resources(&mut tx, id, &entry.resources).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(entry)
    }

    async fn set_entry_state(&self, id: &str, state: EntryState) -> Result<()> {
        let result = sqlx::query("UPDATE catalog_entries SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(format_ts(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("No such catalog entry: {}", id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveryRecord, SourceKind};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::open(&tmp.path().join("data/harvest.sqlite"))
            .await
            .unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn source() -> HarvestSource {
        HarvestSource {
            id: "waf:rivers".to_string(),
            kind: SourceKind::Waf,
            url: "http://example.org/waf/".to_string(),
            owner: Some("ea".to_string()),
            active: true,
            validator_profiles: Some(vec!["iso19139".to_string()]),
            skip_responsible_party: None,
        }
    }

    #[tokio::test]
    async fn attempts_round_trip_and_current_moves() {
        let (_tmp, store) = store().await;
        store.upsert_source(&source()).await.unwrap();
        let job = HarvestJob::new("waf:rivers");
        store.create_job(&job).await.unwrap();

        let mut first = HarvestAttempt::new(
            &job,
            DiscoveryRecord {
                guid: "g-1".to_string(),
                source_reference: "http://example.org/waf/rivers.xml".to_string(),
                content: Some("<doc/>".to_string()),
            },
        );
        first.metadata_modified_date =
            NaiveDateTime::parse_from_str("2011-09-23T10:06:08", DATETIME_FORMAT).ok();
        store.save_attempt(&first).await.unwrap();
        let second = HarvestAttempt::new(
            &job,
            DiscoveryRecord {
                guid: "g-1".to_string(),
                source_reference: "http://example.org/waf/rivers.xml".to_string(),
                content: None,
            },
        );
        store.save_attempt(&second).await.unwrap();

        store.mark_current(&first.id, "entry-1", "g-1").await.unwrap();
        store.mark_current(&second.id, "entry-1", "g-1").await.unwrap();

        let current = store.find_current_by_guid("g-1").await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, second.id);

        let loaded = store.get_attempt(&first.id).await.unwrap().unwrap();
        assert!(!loaded.current);
        assert_eq!(loaded.metadata_modified_date, first.metadata_modified_date);
        assert_eq!(loaded.content.as_deref(), Some("<doc/>"));

        let stored_source = store.get_source("waf:rivers").await.unwrap().unwrap();
        assert_eq!(stored_source, source());
    }

    #[tokio::test]
    async fn mark_current_on_unknown_attempt_rolls_back() {
        let (_tmp, store) = store().await;
        store.upsert_source(&source()).await.unwrap();
        let job = HarvestJob::new("waf:rivers");
        store.create_job(&job).await.unwrap();
        let a = HarvestAttempt::new(
            &job,
            DiscoveryRecord {
                guid: "g-2".to_string(),
                source_reference: "ref".to_string(),
                content: None,
            },
        );
        store.save_attempt(&a).await.unwrap();
        store.mark_current(&a.id, "entry-2", "g-2").await.unwrap();

        assert!(store.mark_current("missing", "entry-2", "g-2").await.is_err());
        assert_eq!(store.find_current_by_guid("g-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn entries_keep_resource_ids_and_order() {
        let (_tmp, store) = store().await;
        let payload = CatalogEntryPayload {
            name: "rivers".to_string(),
            title: "Rivers".to_string(),
            notes: "All the rivers".to_string(),
            owner: Some("ea".to_string()),
            state: None,
            tags: vec![Tag {
                name: "water".to_string(),
                display_name: "water".to_string(),
            }],
            extras: BTreeMap::from([("UKLP".to_string(), "True".to_string())]),
            resources: vec![
                Resource {
                    url: "http://example.org/a".to_string(),
                    name: "a".to_string(),
                    ..Default::default()
                },
                Resource {
                    url: "http://example.org/b".to_string(),
                    name: "b".to_string(),
                    ..Default::default()
                },
            ],
        };
        let created = store.create_entry(&payload).await.unwrap();
        let loaded = store.get_entry(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.resources, created.resources);
        assert_eq!(loaded.extras.get("UKLP").map(String::as_str), Some("True"));

        store
            .set_entry_state(&created.id, EntryState::Deleted)
            .await
            .unwrap();
        let mut reactivate = payload.clone();
        reactivate.state = Some(EntryState::Active);
        reactivate.resources = loaded.resources.clone();
        let updated = store.update_entry(&created.id, &reactivate).await.unwrap();
        assert_eq!(updated.state, EntryState::Active);
        assert_eq!(updated.resources[0].id, created.resources[0].id);
    }
}
