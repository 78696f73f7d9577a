//! Ballot database operations
//!
//! A ballot is keyed by `(session, external_id)`. Descriptive fields are
//! always overwritten from the provider; `slug` and `guid` are local and stay
//! stable once created.

use chrono::NaiveDate;
use civtrack_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use uuid::Uuid;

use super::persons::parse_guid;
use crate::models::BallotOutcome;

/// Local ballot record
#[derive(Debug, Clone, PartialEq)]
pub struct Ballot {
    pub guid: Uuid,
    pub session: u32,
    pub external_id: String,
    pub slug: String,
    pub title: String,
    pub ballot_date: NaiveDate,
    pub votes_for: u32,
    pub votes_against: u32,
    pub votes_abstain: u32,
    pub outcome: BallotOutcome,
    pub source_url: String,
}

pub async fn find_ballot_id<'e, E: SqliteExecutor<'e>>(
    executor: E,
    session: u32,
    external_id: &str,
) -> Result<Option<Uuid>> {
    let guid: Option<String> =
        sqlx::query_scalar("SELECT guid FROM ballots WHERE session = ? AND external_id = ?")
            .bind(session)
            .bind(external_id)
            .fetch_optional(executor)
            .await?;

    guid.as_deref().map(parse_guid).transpose()
}

pub async fn slug_exists<'e, E: SqliteExecutor<'e>>(executor: E, slug: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM ballots WHERE slug = ?")
        .bind(slug)
        .fetch_optional(executor)
        .await?;
    Ok(found.is_some())
}

pub async fn insert_ballot(conn: &mut SqliteConnection, ballot: &Ballot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ballots (
            guid, session, external_id, slug, title, ballot_date,
            votes_for, votes_against, votes_abstain, outcome, source_url,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(ballot.guid.to_string())
    .bind(ballot.session)
    .bind(&ballot.external_id)
    .bind(&ballot.slug)
    .bind(&ballot.title)
    .bind(ballot.ballot_date)
    .bind(ballot.votes_for)
    .bind(ballot.votes_against)
    .bind(ballot.votes_abstain)
    .bind(ballot.outcome.as_str())
    .bind(&ballot.source_url)
    .execute(conn)
    .await?;

    Ok(())
}

/// Overwrite the provider-owned fields of an existing ballot
pub async fn update_ballot_fields(conn: &mut SqliteConnection, guid: Uuid, ballot: &Ballot) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE ballots SET
            title = ?,
            ballot_date = ?,
            votes_for = ?,
            votes_against = ?,
            votes_abstain = ?,
            outcome = ?,
            source_url = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(&ballot.title)
    .bind(ballot.ballot_date)
    .bind(ballot.votes_for)
    .bind(ballot.votes_against)
    .bind(ballot.votes_abstain)
    .bind(ballot.outcome.as_str())
    .bind(&ballot.source_url)
    .bind(guid.to_string())
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("ballot {}", guid)));
    }
    Ok(())
}

pub async fn load_ballot<'e, E: SqliteExecutor<'e>>(
    executor: E,
    session: u32,
    external_id: &str,
) -> Result<Option<Ballot>> {
    let row = sqlx::query(
        r#"
        SELECT guid, session, external_id, slug, title, ballot_date,
               votes_for, votes_against, votes_abstain, outcome, source_url
        FROM ballots
        WHERE session = ? AND external_id = ?
        "#,
    )
    .bind(session)
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => {
            let guid: String = row.get("guid");
            let outcome: String = row.get("outcome");
            Ok(Some(Ballot {
                guid: parse_guid(&guid)?,
                session: row.get("session"),
                external_id: row.get("external_id"),
                slug: row.get("slug"),
                title: row.get("title"),
                ballot_date: row.get("ballot_date"),
                votes_for: row.get("votes_for"),
                votes_against: row.get("votes_against"),
                votes_abstain: row.get("votes_abstain"),
                outcome: BallotOutcome::parse(&outcome)
                    .ok_or_else(|| Error::Internal(format!("Unknown outcome '{}'", outcome)))?,
                source_url: row.get("source_url"),
            }))
        }
        None => Ok(None),
    }
}
