// Database migrations for the job store.
// Creates and updates the schema in versioned order.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
const SCHEMA_VERSION: i64 = 2;

/// Run all necessary migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    debug_assert!(get_schema_version(conn)? == SCHEMA_VERSION);
    Ok(())
}

/// Get the current schema version from the database.
fn get_schema_version(conn: &Connection) -> Result<i64> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if !table_exists {
        return Ok(0);
    }

    let version: i64 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Initial schema creation (version 1): jobs and chunks.
fn migrate_v1(conn: &Connection) -> Result<()> {
    log::info!("Running job store migration v1");

    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Jobs table: one row per audio file being transcribed
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY NOT NULL,
            source_path TEXT NOT NULL,
            source_name TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            duration_sec REAL DEFAULT 0,
            chunks_total INTEGER DEFAULT 0,
            chunks_done INTEGER DEFAULT 0,
            transcript_json TEXT,
            error_message TEXT
        );

        -- Chunks table: time slices of a job's source audio
        CREATE TABLE IF NOT EXISTS chunks (
            job_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            start_sec REAL NOT NULL,
            end_sec REAL NOT NULL,
            chunk_path TEXT NOT NULL,
            chunk_hash TEXT,
            status TEXT NOT NULL,
            engine TEXT,
            attempt_count INTEGER DEFAULT 0,
            transcript_json TEXT,
            confidence REAL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (job_id, idx),
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
        );

        -- Index for resume queries ordered by recency
        CREATE INDEX IF NOT EXISTS idx_jobs_status_updated
        ON jobs(status, updated_at);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
    "#,
    )?;

    log::info!("Migration v1 completed successfully");
    Ok(())
}

/// Speaker role counts (version 2). Adds the columns only when absent so
/// databases written by earlier builds migrate cleanly.
fn migrate_v2(conn: &Connection) -> Result<()> {
    log::info!("Running job store migration v2 - speaker role counts");

    ensure_jobs_column(conn, "interviewer_count", "INTEGER DEFAULT 1")?;
    ensure_jobs_column(conn, "participant_count", "INTEGER DEFAULT 1")?;

    conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;

    log::info!("Migration v2 completed successfully");
    Ok(())
}

fn ensure_jobs_column(conn: &Connection, column: &str, ddl: &str) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(jobs)")?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;

    if existing.iter().any(|name| name == column) {
        return Ok(());
    }

    conn.execute(&format!("ALTER TABLE jobs ADD COLUMN {} {}", column, ddl), [])?;
    Ok(())
}
