//! civtrack-sync library interface
//!
//! Synchronizes a local civic-data store with two external datasets: ballots
//! and individual votes from a parliamentary-votes provider, and death dates
//! from a public knowledge graph. Exposed as a library for the binary and for
//! integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod persister;
pub mod resolver;
pub mod sources;
pub mod sync;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};
pub use crate::sync::{SyncEngine, SyncSettings};

use axum::Router;
use chrono::{DateTime, Utc};
use civtrack_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub engine: SyncEngine,
    /// Same bus the engine publishes on
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background run failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            db: engine.db().clone(),
            event_bus: engine.event_bus().clone(),
            engine,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::sync_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
