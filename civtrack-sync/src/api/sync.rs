//! Sync API handlers
//!
//! `POST /sync/ballots` and `POST /sync/death-dates` record the run, spawn it
//! in the background and answer 202 with the run id; the run is then polled
//! through `GET /sync/runs/:run_id` or followed on `GET /sync/events`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use civtrack_common::events::SyncKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{DeathDateOptions, SyncOptions, SyncRun, SyncRunState};
use crate::sync::EngineStats;
use crate::AppState;

/// POST /sync/ballots and /sync/death-dates response
#[derive(Debug, Serialize)]
pub struct StartSyncResponse {
    pub run_id: Uuid,
    pub kind: SyncKind,
    pub state: SyncRunState,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl From<&SyncRun> for StartSyncResponse {
    fn from(run: &SyncRun) -> Self {
        Self {
            run_id: run.run_id,
            kind: run.kind,
            state: run.state,
            started_at: run.started_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentRunsQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: u32,
}

fn default_recent_limit() -> u32 {
    20
}

/// GET /stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<EngineStats>> {
    Ok(Json(state.engine.stats().await?))
}

/// POST /sync/ballots
pub async fn start_ballot_sync(
    State(state): State<AppState>,
    Json(options): Json<SyncOptions>,
) -> ApiResult<(StatusCode, Json<StartSyncResponse>)> {
    if options.session == 0 {
        return Err(ApiError::BadRequest("session must be a positive number".to_string()));
    }

    let run = prepare(&state, SyncKind::Ballots).await?;
    let response = StartSyncResponse::from(&run);

    tracing::info!(
        run_id = %run.run_id,
        session = options.session,
        dry_run = options.dry_run,
        "Ballot sync accepted"
    );

    let state_clone = state.clone();
    tokio::spawn(async move {
        let report = state_clone.engine.sync_ballots_for_run(run, &options).await;
        if !report.success {
            *state_clone.last_error.write().await = report.errors.first().cloned();
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /sync/death-dates
///
/// The body is optional; without one the run writes dates and leaves
/// mandates alone.
pub async fn start_death_date_sync(
    State(state): State<AppState>,
    options: Option<Json<DeathDateOptions>>,
) -> ApiResult<(StatusCode, Json<StartSyncResponse>)> {
    let options = options.map(|Json(options)| options).unwrap_or_default();

    let run = prepare(&state, SyncKind::DeathDates).await?;
    let response = StartSyncResponse::from(&run);

    tracing::info!(
        run_id = %run.run_id,
        dry_run = options.dry_run,
        update_mandates = options.update_mandates,
        "Death-date sync accepted"
    );

    let state_clone = state.clone();
    tokio::spawn(async move {
        let report = state_clone.engine.sync_death_dates_for_run(run, &options).await;
        if !report.success {
            *state_clone.last_error.write().await = report.errors.first().cloned();
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /sync/runs/:run_id
pub async fn get_sync_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<SyncRun>> {
    crate::db::sync_runs::load_sync_run(&state.db, run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Sync run {} not found", run_id)))
}

/// GET /sync/runs
pub async fn list_sync_runs(
    State(state): State<AppState>,
    Query(query): Query<RecentRunsQuery>,
) -> ApiResult<Json<Vec<SyncRun>>> {
    let runs = crate::db::sync_runs::recent_sync_runs(&state.db, query.limit.clamp(1, 200)).await?;
    Ok(Json(runs))
}

/// Record a new run of `kind`, or reject when one is still running
async fn prepare(state: &AppState, kind: SyncKind) -> ApiResult<SyncRun> {
    state
        .engine
        .prepare_run(kind)
        .await?
        .ok_or_else(|| ApiError::Conflict(format!("A {} sync is already running", kind)))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/sync/ballots", post(start_ballot_sync))
        .route("/sync/death-dates", post(start_death_date_sync))
        .route("/sync/runs", get(list_sync_runs))
        .route("/sync/runs/:run_id", get(get_sync_run))
        .route("/sync/events", get(super::sync_event_stream))
}
