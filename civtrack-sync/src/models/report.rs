//! Sync run options, state machine phases and result reports

use serde::{Deserialize, Serialize};

/// Options for a ballot sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Legislative session to fetch
    pub session: u32,
    /// Fetch and resolve without writing anything
    #[serde(default)]
    pub dry_run: bool,
    /// Only process the first N listed ballots
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SyncOptions {
    pub fn for_session(session: u32) -> Self {
        Self {
            session,
            dry_run: false,
            limit: None,
        }
    }
}

/// Options for a death-date sync run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeathDateOptions {
    #[serde(default)]
    pub dry_run: bool,
    /// Run the mandate pass after dates were written
    #[serde(default)]
    pub update_mandates: bool,
}

/// Orchestrator state machine
///
/// `Idle → Listing → Paging(i) → Resolving → Persisting → Reporting → Done`.
/// Per-item failures do not change the phase; they are only appended to the
/// run's error list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "item", rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Listing,
    /// Working on the i-th listed item (0-based)
    Paging(usize),
    Resolving,
    Persisting,
    Reporting,
    Done,
}

/// Counters of a ballot sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSyncStats {
    /// Ballots taken from the list (after `limit`)
    pub checked: usize,
    pub created: usize,
    pub updated: usize,
    pub votes_written: usize,
    /// Distinct voter slugs that could not be resolved
    pub unresolved: usize,
}

/// Counters of a death-date sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathDateStats {
    /// Persons with an identifier for the queried source
    pub checked: usize,
    /// Persons whose death date was set or changed
    pub updated: usize,
    /// Persons whose stored date already matched
    pub unchanged: usize,
    /// Mandates closed by the follow-up pass
    pub mandates_closed: u64,
}

/// Structured result of any sync run
///
/// Expected failures never surface as `Err`: `success` is false only when the
/// run could not start (list fetch failed), item failures live in `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport<S> {
    pub success: bool,
    pub stats: S,
    pub errors: Vec<String>,
    /// Sorted, deduplicated voter slugs without a local person
    #[serde(default)]
    pub unresolved: Vec<String>,
}

impl<S: Default> SyncReport<S> {
    /// Report for a run that failed before any item was processed
    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            stats: S::default(),
            errors: vec![error],
            unresolved: Vec::new(),
        }
    }
}
