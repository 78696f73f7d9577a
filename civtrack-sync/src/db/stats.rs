//! Dataset counters for observability

use civtrack_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCounts {
    pub ballots: i64,
    pub votes: i64,
    pub persons: i64,
    pub deceased_persons: i64,
    pub current_mandates: i64,
    pub external_identifiers: i64,
    pub sync_runs: i64,
}

pub async fn load_counts(pool: &SqlitePool) -> Result<DatasetCounts> {
    let (ballots, votes, persons, deceased_persons, current_mandates, external_identifiers, sync_runs) =
        sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM ballots),
                (SELECT COUNT(*) FROM votes),
                (SELECT COUNT(*) FROM persons),
                (SELECT COUNT(*) FROM persons WHERE death_date IS NOT NULL),
                (SELECT COUNT(*) FROM mandates WHERE is_current = 1),
                (SELECT COUNT(*) FROM external_identifiers),
                (SELECT COUNT(*) FROM sync_runs)
            "#,
        )
        .fetch_one(pool)
        .await?;

    Ok(DatasetCounts {
        ballots,
        votes,
        persons,
        deceased_persons,
        current_mandates,
        external_identifiers,
        sync_runs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_pool, persons};

    #[tokio::test]
    async fn test_counts_on_fresh_database() {
        let pool = init_memory_pool().await.unwrap();
        assert_eq!(load_counts(&pool).await.unwrap(), DatasetCounts::default());

        persons::upsert_person(&pool, "p", "P").await.unwrap();
        assert_eq!(load_counts(&pool).await.unwrap().persons, 1);
    }
}
