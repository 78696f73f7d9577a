//! Upsert persister: makes local storage reflect one remote record
//!
//! - Ballots: update-if-exists-else-create on `(session, external_id)`; the
//!   provider is authoritative for every descriptive field.
//! - Votes: delete-then-recreate of the whole set, in the same transaction as
//!   the ballot write. Rewriting unchanged rows is accepted; it guarantees the
//!   local set equals the remote one after every run.
//! - Death dates: written per person; closing mandates is a separate pass.

use chrono::NaiveDate;
use civtrack_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::{self, ballots::Ballot, votes::ResolvedVote};
use crate::models::BallotSummary;
use crate::utils::{retry_on_lock, slug::ballot_slug};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedBallot {
    pub ballot_id: Uuid,
    pub outcome: UpsertOutcome,
    pub votes_written: usize,
}

#[derive(Clone)]
pub struct UpsertPersister {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl UpsertPersister {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert the ballot and replace its vote set atomically
    pub async fn persist_ballot(
        &self,
        session: u32,
        summary: &BallotSummary,
        source_url: &str,
        votes: &[ResolvedVote],
    ) -> Result<PersistedBallot> {
        let votes = dedup_votes(votes);
        let votes = votes.as_slice();
        let pool = &self.pool;

        retry_on_lock("persist_ballot", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            let existing = db::ballots::find_ballot_id(&mut *tx, session, &summary.id).await?;
            let (ballot_id, outcome) = match existing {
                Some(guid) => {
                    let ballot = to_ballot(guid, session, summary, source_url, String::new());
                    db::ballots::update_ballot_fields(&mut *tx, guid, &ballot).await?;
                    (guid, UpsertOutcome::Updated)
                }
                None => {
                    let guid = Uuid::new_v4();
                    let slug = free_slug(&mut *tx, ballot_slug(session, &summary.id, &summary.title)).await?;
                    let ballot = to_ballot(guid, session, summary, source_url, slug);
                    db::ballots::insert_ballot(&mut *tx, &ballot).await?;
                    (guid, UpsertOutcome::Created)
                }
            };

            let votes_written = db::votes::replace_votes(&mut *tx, ballot_id, votes).await?;
            tx.commit().await?;

            Ok(PersistedBallot {
                ballot_id,
                outcome,
                votes_written,
            })
        })
        .await
    }

    /// What `persist_ballot` would do, without writing
    pub async fn planned_outcome(&self, session: u32, external_id: &str) -> Result<UpsertOutcome> {
        let existing = db::ballots::find_ballot_id(&self.pool, session, external_id).await?;
        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    pub async fn set_death_date(&self, person_id: Uuid, date: NaiveDate) -> Result<()> {
        let pool = &self.pool;
        retry_on_lock("set_death_date", self.max_lock_wait_ms, || async move {
            let mut conn = pool.acquire().await?;
            db::persons::set_death_date(&mut conn, person_id, date).await
        })
        .await
    }

    /// Close current mandates of every deceased person; returns how many closed
    pub async fn close_mandates_of_deceased(&self) -> Result<u64> {
        retry_on_lock("close_mandates_of_deceased", self.max_lock_wait_ms, || {
            db::mandates::close_mandates_of_deceased(&self.pool)
        })
        .await
    }
}

/// `base`, or `base-2`, `base-3`... when distinct provider ids slugify alike
async fn free_slug(conn: &mut SqliteConnection, base: String) -> Result<String> {
    let mut candidate = base.clone();
    let mut suffix = 2;
    while db::ballots::slug_exists(&mut *conn, &candidate).await? {
        candidate = format!("{}-{}", base, suffix);
        suffix += 1;
    }
    Ok(candidate)
}

/// One vote per person; the first occurrence wins
pub fn dedup_votes(votes: &[ResolvedVote]) -> Vec<ResolvedVote> {
    let mut seen = HashSet::with_capacity(votes.len());
    votes
        .iter()
        .filter(|vote| seen.insert(vote.person_id))
        .copied()
        .collect()
}

fn to_ballot(guid: Uuid, session: u32, summary: &BallotSummary, source_url: &str, slug: String) -> Ballot {
    Ballot {
        guid,
        session,
        external_id: summary.id.clone(),
        slug,
        title: summary.title.clone(),
        ballot_date: summary.date,
        votes_for: summary.votes_for,
        votes_against: summary.votes_against,
        votes_abstain: summary.votes_abstain,
        outcome: summary.outcome,
        source_url: source_url.to_string(),
    }
}
