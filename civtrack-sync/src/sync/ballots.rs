//! Ballot sync run
//!
//! `Idle → Listing → Paging(i) → Resolving → Persisting → Reporting → Done`
//!
//! The list fetch is the only run-fatal step. After it, each ballot either
//! lands in storage or adds one `"ballot {id}: {error}"` entry to the report,
//! and the loop moves on to the next ballot.

use std::time::Instant;
use thiserror::Error;

use super::{percentage, RunTracker, SyncEngine};
use crate::db::votes::ResolvedVote;
use crate::models::{
    BallotDetail, BallotSummary, BallotSyncStats, SyncOptions, SyncPhase, SyncReport,
};
use crate::persister::{dedup_votes, UpsertOutcome};
use crate::resolver::{EntityResolver, ResolutionCache};
use crate::sources::SourceError;

/// Why a single ballot was skipped
#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("no votes in detail response")]
    NoVotes,

    #[error("persistence failure: {0}")]
    Persistence(#[from] civtrack_common::Error),
}

/// What one ballot contributed to the run
struct ItemOutcome {
    outcome: UpsertOutcome,
    votes_written: usize,
}

impl SyncEngine {
    pub(super) async fn run_ballot_sync(
        &self,
        options: &SyncOptions,
        tracker: &mut RunTracker<'_>,
    ) -> SyncReport<BallotSyncStats> {
        let start_time = Instant::now();
        let session = options.session;

        tracker.enter(SyncPhase::Listing);
        let page = match self.ballot_source.fetch_list(session).await {
            Ok(page) => page,
            Err(e) => {
                let error = match e {
                    SourceError::SessionUnavailable { .. } => e.to_string(),
                    other => format!("ballot list: {}", other),
                };
                tracing::warn!(session, error = %error, "Ballot list unavailable, aborting run");
                tracker.enter(SyncPhase::Done);
                return SyncReport::failed(error);
            }
        };

        let cache = match ResolutionCache::load(&self.db, &self.settings.ballots_identifier_source).await {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(session, error = %e, "Failed to load resolution cache, aborting run");
                tracker.enter(SyncPhase::Done);
                return SyncReport::failed(format!("resolution cache: {}", e));
            }
        };
        let mut resolver = EntityResolver::new(cache);

        let mut ballots = page.ballots;
        if let Some(limit) = options.limit {
            ballots.truncate(limit);
        }
        let total = ballots.len();

        let mut stats = BallotSyncStats {
            checked: total,
            ..Default::default()
        };
        let mut errors = Vec::new();

        for (index, summary) in ballots.iter().enumerate() {
            tracker.enter(SyncPhase::Paging(index));

            if index > 0 && index % self.settings.delay_every == 0 && !self.settings.item_delay.is_zero() {
                tokio::time::sleep(self.settings.item_delay).await;
            }

            match self
                .sync_one_ballot(session, summary, options.dry_run, &mut resolver, tracker)
                .await
            {
                Ok(item) => {
                    match item.outcome {
                        UpsertOutcome::Created => stats.created += 1,
                        UpsertOutcome::Updated => stats.updated += 1,
                    }
                    stats.votes_written += item.votes_written;
                }
                Err(e) => {
                    tracing::warn!(session, ballot_id = %summary.id, error = %e, "Ballot skipped");
                    errors.push(format!("ballot {}: {}", summary.id, e));
                }
            }

            let done = index + 1;
            if done % self.settings.progress_every == 0 && done < total {
                tracker
                    .progress(percentage(done, total), format!("{}/{} ballots", done, total))
                    .await;
            }
        }

        tracker.enter(SyncPhase::Reporting);
        stats.unresolved = resolver.unresolved_count();
        tracker
            .progress(100, format!("{}/{} ballots", total, total))
            .await;

        tracing::info!(
            session,
            dry_run = options.dry_run,
            checked = stats.checked,
            created = stats.created,
            updated = stats.updated,
            votes_written = stats.votes_written,
            unresolved = stats.unresolved,
            errors = errors.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Ballot sync finished"
        );

        tracker.enter(SyncPhase::Done);
        SyncReport {
            success: true,
            stats,
            errors,
            unresolved: resolver.into_unresolved(),
        }
    }

    async fn sync_one_ballot(
        &self,
        session: u32,
        summary: &BallotSummary,
        dry_run: bool,
        resolver: &mut EntityResolver,
        tracker: &mut RunTracker<'_>,
    ) -> Result<ItemOutcome, ItemError> {
        let detail = self.fetch_detail_with_retry(session, &summary.id).await?;
        if detail.votes.is_empty() {
            return Err(ItemError::NoVotes);
        }

        tracker.enter(SyncPhase::Resolving);
        let votes: Vec<ResolvedVote> = detail
            .votes
            .iter()
            .filter_map(|vote| {
                resolver.resolve(&vote.voter_slug).map(|person_id| ResolvedVote {
                    person_id,
                    position: vote.position,
                })
            })
            .collect();

        tracker.enter(SyncPhase::Persisting);
        if dry_run {
            let outcome = self.persister.planned_outcome(session, &summary.id).await?;
            return Ok(ItemOutcome {
                outcome,
                votes_written: dedup_votes(&votes).len(),
            });
        }

        let source_url = summary
            .source_url
            .clone()
            .unwrap_or_else(|| self.ballot_source.canonical_url(&summary.id, session));

        let persisted = self
            .persister
            .persist_ballot(session, summary, &source_url, &votes)
            .await?;

        tracing::debug!(
            session,
            ballot_id = %summary.id,
            outcome = ?persisted.outcome,
            votes = persisted.votes_written,
            "Ballot persisted"
        );

        Ok(ItemOutcome {
            outcome: persisted.outcome,
            votes_written: persisted.votes_written,
        })
    }

    /// Detail fetch with up to `max_item_retries` extra attempts on transient errors
    async fn fetch_detail_with_retry(
        &self,
        session: u32,
        record_id: &str,
    ) -> Result<BallotDetail, SourceError> {
        let mut attempt = 0;
        loop {
            match self.ballot_source.fetch_detail(record_id, session).await {
                Ok(detail) => return Ok(detail),
                Err(e) if e.is_transient() && attempt < self.settings.max_item_retries => {
                    attempt += 1;
                    tracing::debug!(
                        session,
                        ballot_id = %record_id,
                        attempt,
                        error = %e,
                        "Retrying ballot detail"
                    );
                    tokio::time::sleep(self.settings.item_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
