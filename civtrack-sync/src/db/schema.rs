//! Table definitions
//!
//! `CREATE TABLE IF NOT EXISTS` on every start; the schema is small enough that
//! no migration tooling is needed yet.

use civtrack_common::Result;
use sqlx::SqlitePool;

const TABLES: &[(&str, &str)] = &[
    (
        "persons",
        r#"
        CREATE TABLE IF NOT EXISTS persons (
            guid TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            death_date TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "external_identifiers",
        r#"
        CREATE TABLE IF NOT EXISTS external_identifiers (
            source TEXT NOT NULL,
            external_id TEXT NOT NULL COLLATE NOCASE,
            person_id TEXT NOT NULL REFERENCES persons(guid) ON DELETE CASCADE,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (source, external_id)
        )
        "#,
    ),
    (
        "mandates",
        r#"
        CREATE TABLE IF NOT EXISTS mandates (
            guid TEXT PRIMARY KEY,
            person_id TEXT NOT NULL REFERENCES persons(guid) ON DELETE CASCADE,
            label TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 1,
            started_on TEXT,
            ended_on TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "ballots",
        r#"
        CREATE TABLE IF NOT EXISTS ballots (
            guid TEXT PRIMARY KEY,
            session INTEGER NOT NULL,
            external_id TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            ballot_date TEXT NOT NULL,
            votes_for INTEGER NOT NULL DEFAULT 0,
            votes_against INTEGER NOT NULL DEFAULT 0,
            votes_abstain INTEGER NOT NULL DEFAULT 0,
            outcome TEXT NOT NULL CHECK (outcome IN ('adopted', 'rejected')),
            source_url TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (session, external_id)
        )
        "#,
    ),
    (
        "votes",
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            guid TEXT PRIMARY KEY,
            ballot_id TEXT NOT NULL REFERENCES ballots(guid) ON DELETE CASCADE,
            person_id TEXT NOT NULL REFERENCES persons(guid),
            position TEXT NOT NULL CHECK (position IN ('for', 'against', 'abstain', 'absent')),
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (ballot_id, person_id)
        )
        "#,
    ),
    (
        "sync_runs",
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            run_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            state TEXT NOT NULL,
            progress_percentage INTEGER NOT NULL DEFAULT 0,
            current_operation TEXT NOT NULL DEFAULT '',
            stats TEXT NOT NULL DEFAULT 'null',
            errors TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_votes_ballot ON votes(ballot_id)",
    "CREATE INDEX IF NOT EXISTS idx_votes_person ON votes(person_id)",
    "CREATE INDEX IF NOT EXISTS idx_mandates_person_current ON mandates(person_id, is_current)",
    "CREATE INDEX IF NOT EXISTS idx_external_identifiers_person ON external_identifiers(person_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at)",
];

/// Create every table and index that does not exist yet
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    for (_, ddl) in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!(
        tables = TABLES.len(),
        "Database tables initialized ({})",
        TABLES.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ")
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for (name, _) in TABLES {
            assert!(tables.iter().any(|t| t == name), "missing table {}", name);
        }
    }

    #[tokio::test]
    async fn test_vote_requires_existing_person() {
        let pool = crate::db::init_memory_pool().await.unwrap();

        sqlx::query(
            "INSERT INTO ballots (guid, session, external_id, slug, title, ballot_date, outcome, source_url)
             VALUES ('b1', 16, '1', 's', 't', '2024-01-01', 'adopted', 'u')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query(
            "INSERT INTO votes (guid, ballot_id, person_id, position) VALUES ('v1', 'b1', 'ghost', 'for')",
        )
        .execute(&pool)
        .await;

        assert!(result.is_err(), "dangling voter reference must be refused");
    }
}
