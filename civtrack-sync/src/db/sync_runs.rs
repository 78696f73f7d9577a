//! Sync run persistence
//!
//! Writes go through `retry_on_lock`: a ballot run and a death-date run may
//! write their run records at the same time.

use civtrack_common::events::SyncKind;
use civtrack_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::{SyncRun, SyncRunState};
use crate::utils::retry_on_lock;

/// Insert or refresh a run record
pub async fn save_sync_run(pool: &SqlitePool, run: &SyncRun, max_lock_wait_ms: u64) -> Result<()> {
    // Prepare all data before touching the database
    let run_id = run.run_id.to_string();
    let kind = run.kind.as_str();
    let state = serde_json::to_string(&run.state)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let stats = serde_json::to_string(&run.stats)
        .map_err(|e| Error::Internal(format!("Failed to serialize stats: {}", e)))?;
    let errors = serde_json::to_string(&run.errors)
        .map_err(|e| Error::Internal(format!("Failed to serialize errors: {}", e)))?;
    let started_at = run.started_at.to_rfc3339();
    let ended_at = run.ended_at.map(|dt| dt.to_rfc3339());
    let progress = i64::from(run.progress_percentage);
    let (run_id, state, stats, errors, started_at, ended_at) =
        (&run_id, &state, &stats, &errors, &started_at, &ended_at);
    let current_operation = run.current_operation.as_str();

    retry_on_lock("save_sync_run", max_lock_wait_ms, || async move {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                run_id, kind, state, progress_percentage, current_operation,
                stats, errors, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                state = excluded.state,
                progress_percentage = excluded.progress_percentage,
                current_operation = excluded.current_operation,
                stats = excluded.stats,
                errors = excluded.errors,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(run_id)
        .bind(kind)
        .bind(state)
        .bind(progress)
        .bind(current_operation)
        .bind(stats)
        .bind(errors)
        .bind(started_at)
        .bind(ended_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

pub async fn load_sync_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<SyncRun>> {
    let row = sqlx::query(
        r#"
        SELECT run_id, kind, state, progress_percentage, current_operation,
               stats, errors, started_at, ended_at
        FROM sync_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Most recent runs first
pub async fn recent_sync_runs(pool: &SqlitePool, limit: u32) -> Result<Vec<SyncRun>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, kind, state, progress_percentage, current_operation,
               stats, errors, started_at, ended_at
        FROM sync_runs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

/// Insert a fresh running run unless one of the same kind is already running
///
/// Check and insert are one statement, so two concurrent callers cannot both
/// start a run. Returns false when the run was not recorded.
pub async fn insert_run_if_idle(pool: &SqlitePool, run: &SyncRun, max_lock_wait_ms: u64) -> Result<bool> {
    let run_id = run.run_id.to_string();
    let kind = run.kind.as_str();
    let state = serde_json::to_string(&run.state)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let running = serde_json::to_string(&SyncRunState::Running)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let stats = serde_json::to_string(&run.stats)
        .map_err(|e| Error::Internal(format!("Failed to serialize stats: {}", e)))?;
    let errors = serde_json::to_string(&run.errors)
        .map_err(|e| Error::Internal(format!("Failed to serialize errors: {}", e)))?;
    let started_at = run.started_at.to_rfc3339();
    let progress = i64::from(run.progress_percentage);
    let (run_id, state, running, stats, errors, started_at) =
        (&run_id, &state, &running, &stats, &errors, &started_at);
    let current_operation = run.current_operation.as_str();

    retry_on_lock("insert_run_if_idle", max_lock_wait_ms, || async move {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_runs (
                run_id, kind, state, progress_percentage, current_operation,
                stats, errors, started_at, ended_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, NULL
            WHERE NOT EXISTS (
                SELECT 1 FROM sync_runs WHERE kind = ? AND state = ?
            )
            "#,
        )
        .bind(run_id)
        .bind(kind)
        .bind(state)
        .bind(progress)
        .bind(current_operation)
        .bind(stats)
        .bind(errors)
        .bind(started_at)
        .bind(kind)
        .bind(running)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Fail every run left running by a previous process
///
/// A run lives in a task of the process that started it; after a restart
/// nothing will ever finish it. Returns the number of runs closed.
pub async fn cleanup_stale_runs(pool: &SqlitePool) -> Result<u64> {
    let running = serde_json::to_string(&SyncRunState::Running)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let failed = serde_json::to_string(&SyncRunState::Failed)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;

    let result = sqlx::query(
        r#"
        UPDATE sync_runs
        SET state = ?,
            ended_at = ?,
            current_operation = 'Interrupted by restart'
        WHERE state = ?
        "#,
    )
    .bind(failed)
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(running)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

fn run_from_row(row: &SqliteRow) -> Result<SyncRun> {
    let run_id: String = row.get("run_id");
    let kind: String = row.get("kind");
    let kind = match kind.as_str() {
        "ballots" => SyncKind::Ballots,
        "death_dates" => SyncKind::DeathDates,
        other => return Err(Error::Internal(format!("Unknown sync kind '{}'", other))),
    };

    let state: String = row.get("state");
    let state: SyncRunState = serde_json::from_str(&state)
        .map_err(|e| Error::Internal(format!("Failed to deserialize state: {}", e)))?;

    let stats: String = row.get("stats");
    let stats = serde_json::from_str(&stats)
        .map_err(|e| Error::Internal(format!("Failed to deserialize stats: {}", e)))?;

    let errors: String = row.get("errors");
    let errors: Vec<String> = serde_json::from_str(&errors)
        .map_err(|e| Error::Internal(format!("Failed to deserialize errors: {}", e)))?;

    let started_at: String = row.get("started_at");
    let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse ended_at: {}", e)))?
        .map(|dt| dt.with_timezone(&chrono::Utc));

    let progress: i64 = row.get("progress_percentage");

    Ok(SyncRun {
        run_id: Uuid::parse_str(&run_id)
            .map_err(|e| Error::Internal(format!("Invalid run id '{}': {}", run_id, e)))?,
        kind,
        state,
        progress_percentage: progress.clamp(0, 100) as u8,
        current_operation: row.get("current_operation"),
        stats,
        errors,
        started_at,
        ended_at,
    })
}
