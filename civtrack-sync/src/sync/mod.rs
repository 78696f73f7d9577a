//! Sync orchestrator
//!
//! Drives one batch run end to end and always ends with a [`SyncReport`].
//!
//! # Runs
//! Every run gets a [`SyncRun`] record (skipped for dry runs) that is written at
//! start, refreshed on each progress report and finalized with the report.
//! Lifecycle events go out on the [`EventBus`].
//!
//! Run kinds live in their own modules:
//! - `ballots`: list → details → resolution → upsert
//! - `death_dates`: identifiers → graph batches → death dates → mandates

mod ballots;
mod death_dates;

use chrono::Utc;
use civtrack_common::config::TomlConfig;
use civtrack_common::events::{EventBus, SyncEvent, SyncKind};
use civtrack_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{self, stats::DatasetCounts};
use crate::models::{
    BallotSyncStats, DeathDateOptions, DeathDateStats, SyncOptions, SyncPhase, SyncReport, SyncRun,
};
use crate::persister::UpsertPersister;
use crate::sources::{
    BallotSource, BallotsClient, DeathDateSource, GraphClient, HttpSettings, RateLimiter,
};

/// Progress callback: `(percentage, message)`
pub type ProgressFn<'a> = dyn Fn(u8, &str) + Send + Sync + 'a;

/// Pacing and lookup settings of the orchestrator
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Pause inserted after every `delay_every` ballots
    pub item_delay: Duration,
    pub delay_every: usize,
    /// Progress is reported after every `progress_every` ballots
    pub progress_every: usize,
    /// Extra attempts for a detail fetch that failed transiently
    pub max_item_retries: u32,
    /// Identifier source used to resolve voter slugs
    pub ballots_identifier_source: String,
    /// Identifier source whose ids are sent to the knowledge graph
    pub death_date_identifier_source: String,
    pub max_lock_wait_ms: u64,
}

impl SyncSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            item_delay: config.sync.item_delay(),
            delay_every: config.sync.delay_every.max(1),
            progress_every: config.sync.progress_every.max(1),
            max_item_retries: config.sync.max_item_retries,
            ballots_identifier_source: config.providers.ballots_identifier_source.clone(),
            death_date_identifier_source: config.providers.death_date_identifier_source.clone(),
            max_lock_wait_ms: config.database.max_lock_wait_ms,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// Dataset counts plus the most recent run
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub counts: DatasetCounts,
    pub last_run: Option<SyncRun>,
}

/// Entry point for every sync operation
///
/// Cheap to clone: sources are shared behind `Arc` and the pool is a handle.
#[derive(Clone)]
pub struct SyncEngine {
    db: SqlitePool,
    persister: UpsertPersister,
    ballot_source: Arc<dyn BallotSource>,
    death_date_source: Arc<dyn DeathDateSource>,
    settings: SyncSettings,
    event_bus: EventBus,
}

impl SyncEngine {
    pub fn new(
        db: SqlitePool,
        ballot_source: Arc<dyn BallotSource>,
        death_date_source: Arc<dyn DeathDateSource>,
        settings: SyncSettings,
        event_bus: EventBus,
    ) -> Self {
        let persister = UpsertPersister::new(db.clone(), settings.max_lock_wait_ms);
        Self {
            db,
            persister,
            ballot_source,
            death_date_source,
            settings,
            event_bus,
        }
    }

    /// Build the engine with the HTTP adapters described by `config`
    pub fn from_config(db: SqlitePool, config: &TomlConfig, event_bus: EventBus) -> Result<Self> {
        let http = HttpSettings::from_config(config);

        let ballots = BallotsClient::new(&config.providers.ballots_base_url, &http)
            .map_err(|e| Error::Config(format!("Ballots provider: {}", e)))?;

        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.sync.graph_min_interval_ms,
        )));
        let graph = GraphClient::new(
            &config.providers.sparql_url,
            &config.providers.external_id_property,
            config.sync.death_date_batch_size,
            &http,
            rate_limiter,
        )
        .map_err(|e| Error::Config(format!("Knowledge graph: {}", e)))?;

        tracing::info!(
            ballots_url = %config.providers.ballots_base_url,
            sparql_url = %config.providers.sparql_url,
            "Sync engine initialized"
        );

        Ok(Self::new(
            db,
            Arc::new(ballots),
            Arc::new(graph),
            SyncSettings::from_config(config),
            event_bus,
        ))
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Sync one session's ballots and vote sets
    pub async fn sync_ballots(&self, options: &SyncOptions) -> SyncReport<BallotSyncStats> {
        let silent = |_: u8, _: &str| {};
        self.sync_ballots_with_progress(options, &silent).await
    }

    pub async fn sync_ballots_with_progress(
        &self,
        options: &SyncOptions,
        progress: &ProgressFn<'_>,
    ) -> SyncReport<BallotSyncStats> {
        let persist = !options.dry_run;
        match self.begin_tracker(SyncRun::start(SyncKind::Ballots), persist, progress).await {
            Ok(mut tracker) => {
                let report = self.run_ballot_sync(options, &mut tracker).await;
                tracker.finish(&report).await;
                report
            }
            Err(e) => SyncReport::failed(format!("sync run record: {}", e)),
        }
    }

    /// Continue a run already recorded with [`SyncEngine::prepare_run`]
    pub async fn sync_ballots_for_run(
        &self,
        run: SyncRun,
        options: &SyncOptions,
    ) -> SyncReport<BallotSyncStats> {
        let silent = |_: u8, _: &str| {};
        let mut tracker = RunTracker::new(self, run, true, &silent);
        tracker.started();
        let report = self.run_ballot_sync(options, &mut tracker).await;
        tracker.finish(&report).await;
        report
    }

    /// Sync death dates from the knowledge graph
    pub async fn sync_death_dates(&self, options: &DeathDateOptions) -> SyncReport<DeathDateStats> {
        let silent = |_: u8, _: &str| {};
        self.sync_death_dates_with_progress(options, &silent).await
    }

    pub async fn sync_death_dates_with_progress(
        &self,
        options: &DeathDateOptions,
        progress: &ProgressFn<'_>,
    ) -> SyncReport<DeathDateStats> {
        let persist = !options.dry_run;
        match self.begin_tracker(SyncRun::start(SyncKind::DeathDates), persist, progress).await {
            Ok(mut tracker) => {
                let report = self.run_death_date_sync(options, &mut tracker).await;
                tracker.finish(&report).await;
                report
            }
            Err(e) => SyncReport::failed(format!("sync run record: {}", e)),
        }
    }

    /// Continue a run already recorded with [`SyncEngine::prepare_run`]
    pub async fn sync_death_dates_for_run(
        &self,
        run: SyncRun,
        options: &DeathDateOptions,
    ) -> SyncReport<DeathDateStats> {
        let silent = |_: u8, _: &str| {};
        let mut tracker = RunTracker::new(self, run, true, &silent);
        tracker.started();
        let report = self.run_death_date_sync(options, &mut tracker).await;
        tracker.finish(&report).await;
        report
    }

    /// Record a running run of `kind` without starting it
    ///
    /// Lets a caller hand out the run id before the run completes. Returns
    /// `None` when a run of the same kind is already running.
    pub async fn prepare_run(&self, kind: SyncKind) -> Result<Option<SyncRun>> {
        let run = SyncRun::start(kind);
        let recorded =
            db::sync_runs::insert_run_if_idle(&self.db, &run, self.settings.max_lock_wait_ms).await?;
        Ok(recorded.then_some(run))
    }

    /// Fail runs a previous process left running
    ///
    /// Called once at startup, before any run of this process is recorded.
    pub async fn close_interrupted_runs(&self) -> Result<u64> {
        let closed = db::sync_runs::cleanup_stale_runs(&self.db).await?;
        if closed > 0 {
            tracing::warn!(closed, "Marked runs interrupted by a restart as failed");
        }
        Ok(closed)
    }

    /// Close current mandates of every deceased person
    pub async fn close_mandates(&self) -> Result<u64> {
        self.persister.close_mandates_of_deceased().await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let counts = db::stats::load_counts(&self.db).await?;
        let last_run = db::sync_runs::recent_sync_runs(&self.db, 1).await?.into_iter().next();
        Ok(EngineStats { counts, last_run })
    }

    async fn begin_tracker<'a>(
        &'a self,
        run: SyncRun,
        persist: bool,
        progress: &'a ProgressFn<'a>,
    ) -> Result<RunTracker<'a>> {
        if persist {
            db::sync_runs::save_sync_run(&self.db, &run, self.settings.max_lock_wait_ms).await?;
        }
        let tracker = RunTracker::new(self, run, persist, progress);
        tracker.started();
        Ok(tracker)
    }
}

/// Phase, progress and record keeping of one run
pub(crate) struct RunTracker<'a> {
    engine: &'a SyncEngine,
    run: SyncRun,
    persist: bool,
    phase: SyncPhase,
    callback: &'a ProgressFn<'a>,
}

impl<'a> RunTracker<'a> {
    fn new(engine: &'a SyncEngine, run: SyncRun, persist: bool, callback: &'a ProgressFn<'a>) -> Self {
        Self {
            engine,
            run,
            persist,
            phase: SyncPhase::Idle,
            callback,
        }
    }

    fn started(&self) {
        tracing::info!(run_id = %self.run.run_id, kind = %self.run.kind, "Sync run started");
        self.engine.event_bus.emit_lossy(SyncEvent::SyncStarted {
            run_id: self.run.run_id,
            kind: self.run.kind,
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn enter(&mut self, next: SyncPhase) {
        tracing::debug!(
            run_id = %self.run.run_id,
            from = ?self.phase,
            to = ?next,
            "Sync phase transition"
        );
        self.phase = next;
    }

    /// Report progress to the caller, the event bus and the run record
    pub(crate) async fn progress(&mut self, percentage: u8, message: String) {
        let percentage = percentage.min(100);
        (self.callback)(percentage, &message);

        self.engine.event_bus.emit_lossy(SyncEvent::SyncProgress {
            run_id: self.run.run_id,
            kind: self.run.kind,
            percentage,
            message: message.clone(),
            timestamp: Utc::now(),
        });

        self.run.progress_percentage = percentage;
        self.run.current_operation = message;
        self.save().await;
    }

    async fn finish<S: Serialize>(mut self, report: &SyncReport<S>) {
        let stats = serde_json::to_value(&report.stats).unwrap_or(serde_json::Value::Null);
        self.run.finish(report.success, stats, report.errors.clone());
        self.run.current_operation = if report.success {
            "Completed".to_string()
        } else {
            "Failed".to_string()
        };
        self.save().await;

        self.engine.event_bus.emit_lossy(SyncEvent::SyncCompleted {
            run_id: self.run.run_id,
            kind: self.run.kind,
            success: report.success,
            error_count: report.errors.len(),
            timestamp: Utc::now(),
        });
    }

    /// Run bookkeeping never fails the run itself
    async fn save(&self) {
        if !self.persist {
            return;
        }
        if let Err(e) =
            db::sync_runs::save_sync_run(&self.engine.db, &self.run, self.engine.settings.max_lock_wait_ms)
                .await
        {
            tracing::warn!(run_id = %self.run.run_id, error = %e, "Failed to save sync run");
        }
    }
}

/// Integer percentage of `done` over `total`
pub(crate) fn percentage(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(50, 200), 25);
        assert_eq!(percentage(3, 3), 100);
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = TomlConfig::default();
        config.sync.item_delay_ms = 0;
        config.sync.delay_every = 0;
        config.providers.ballots_identifier_source = "custom".to_string();

        let settings = SyncSettings::from_config(&config);
        assert_eq!(settings.item_delay, Duration::ZERO);
        assert_eq!(settings.delay_every, 1);
        assert_eq!(settings.ballots_identifier_source, "custom");
    }
}
