use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the harvest schema in the configured database.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotently create every table and index on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Create sources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_sources (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            url TEXT NOT NULL,
            owner TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            validator_profiles_json TEXT,
            skip_responsible_party_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_jobs (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            finished_at TEXT,
            FOREIGN KEY (source_id) REFERENCES harvest_sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create attempts table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_attempts (
            id TEXT PRIMARY KEY,
            guid TEXT NOT NULL,
            job_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_reference TEXT NOT NULL,
            content TEXT,
            metadata_modified_date TEXT,
            current INTEGER NOT NULL DEFAULT 0,
            entry_id TEXT,
            state TEXT NOT NULL,
            report_status TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (job_id) REFERENCES harvest_jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create error tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_gather_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_attempt_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attempt_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create catalog tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_entries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            owner TEXT,
            state TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            extras_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_resources (
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            resource_json TEXT NOT NULL,
            FOREIGN KEY (entry_id) REFERENCES catalog_entries(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_attempts_guid ON harvest_attempts(guid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_attempts_job_id ON harvest_attempts(job_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_attempts_entry_id ON harvest_attempts(entry_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_resources_entry_id ON catalog_resources(entry_id)",
    )
    .execute(pool)
    .await?;

    // At most one current attempt per GUID.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_one_current ON harvest_attempts(guid) WHERE current = 1",
    )
    .execute(pool)
    .await?;

    Ok(())
}
