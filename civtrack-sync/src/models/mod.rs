//! Data models for civtrack-sync
//!
//! - Remote records as delivered by the votes provider and the knowledge graph
//! - Run options, phases and reports returned to callers
//! - Persisted sync-run records

pub mod remote;
pub mod report;
pub mod sync_run;

pub use remote::{BallotDetail, BallotListPage, BallotOutcome, BallotSummary, RemoteVote, VotePosition};
pub use report::{
    BallotSyncStats, DeathDateOptions, DeathDateStats, SyncOptions, SyncPhase, SyncReport,
};
pub use sync_run::{SyncRun, SyncRunState};
