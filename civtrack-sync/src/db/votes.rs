//! Vote database operations
//!
//! The votes of a ballot form one unit: they are only ever replaced as a whole.

use civtrack_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use uuid::Uuid;

use super::persons::parse_guid;
use crate::models::VotePosition;

/// A vote whose voter already resolved to a local person
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVote {
    pub person_id: Uuid,
    pub position: VotePosition,
}

/// Delete every vote of `ballot_id`, then insert `votes`
///
/// Callers run this inside the ballot's transaction. Returns the number of
/// votes inserted.
pub async fn replace_votes(
    conn: &mut SqliteConnection,
    ballot_id: Uuid,
    votes: &[ResolvedVote],
) -> Result<usize> {
    let ballot = ballot_id.to_string();

    let deleted = sqlx::query("DELETE FROM votes WHERE ballot_id = ?")
        .bind(&ballot)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    for vote in votes {
        sqlx::query(
            r#"
            INSERT INTO votes (guid, ballot_id, person_id, position, created_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&ballot)
        .bind(vote.person_id.to_string())
        .bind(vote.position.as_str())
        .execute(&mut *conn)
        .await?;
    }

    tracing::debug!(ballot_id = %ballot_id, deleted, inserted = votes.len(), "Replaced vote set");
    Ok(votes.len())
}

/// Votes of one ballot ordered by person guid
pub async fn load_votes_for_ballot<'e, E: SqliteExecutor<'e>>(
    executor: E,
    ballot_id: Uuid,
) -> Result<Vec<ResolvedVote>> {
    let rows = sqlx::query(
        "SELECT person_id, position FROM votes WHERE ballot_id = ? ORDER BY person_id",
    )
    .bind(ballot_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            let person: String = row.get("person_id");
            let position: String = row.get("position");
            Ok(ResolvedVote {
                person_id: parse_guid(&person)?,
                position: VotePosition::parse(&position)
                    .ok_or_else(|| Error::Internal(format!("Unknown vote position '{}'", position)))?,
            })
        })
        .collect()
}
