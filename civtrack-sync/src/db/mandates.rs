//! Mandate operations
//!
//! Only the death-date pass writes here during sync; mandates themselves are
//! seeded by other collaborators.

use chrono::NaiveDate;
use civtrack_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::persons::parse_guid;

#[derive(Debug, Clone, PartialEq)]
pub struct Mandate {
    pub guid: Uuid,
    pub person_id: Uuid,
    pub label: String,
    pub is_current: bool,
    pub started_on: Option<NaiveDate>,
    pub ended_on: Option<NaiveDate>,
}

impl Mandate {
    /// New current mandate
    pub fn current(person_id: Uuid, label: impl Into<String>, started_on: Option<NaiveDate>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            person_id,
            label: label.into(),
            is_current: true,
            started_on,
            ended_on: None,
        }
    }
}

pub async fn insert_mandate(pool: &SqlitePool, mandate: &Mandate) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mandates (guid, person_id, label, is_current, started_on, ended_on, created_at)
        VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(mandate.guid.to_string())
    .bind(mandate.person_id.to_string())
    .bind(&mandate.label)
    .bind(mandate.is_current)
    .bind(mandate.started_on)
    .bind(mandate.ended_on)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_mandates_for_person(pool: &SqlitePool, person_id: Uuid) -> Result<Vec<Mandate>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, person_id, label, is_current, started_on, ended_on
        FROM mandates
        WHERE person_id = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(person_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.get("guid");
            let person: String = row.get("person_id");
            Ok(Mandate {
                guid: parse_guid(&guid)?,
                person_id: parse_guid(&person)?,
                label: row.get("label"),
                is_current: row.get("is_current"),
                started_on: row.get("started_on"),
                ended_on: row.get("ended_on"),
            })
        })
        .collect()
}

/// Mark every current mandate of every deceased person as ended
///
/// Separate from the death-date sync so it can be re-run and audited on its
/// own. `ended_on` falls back to the death date when it was not set. Returns
/// the number of mandates closed; a second run closes nothing.
pub async fn close_mandates_of_deceased(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE mandates
        SET is_current = 0,
            ended_on = COALESCE(
                ended_on,
                (SELECT p.death_date FROM persons p WHERE p.guid = mandates.person_id)
            )
        WHERE is_current = 1
          AND person_id IN (SELECT guid FROM persons WHERE death_date IS NOT NULL)
        "#,
    )
    .execute(pool)
    .await?;

    let closed = result.rows_affected();
    tracing::info!(closed, "Closed current mandates of deceased persons");
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_pool, persons};

    #[tokio::test]
    async fn test_cascade_only_touches_deceased() {
        let pool = init_memory_pool().await.unwrap();
        let deceased = persons::upsert_person(&pool, "deceased", "Deceased").await.unwrap();
        let alive = persons::upsert_person(&pool, "alive", "Alive").await.unwrap();

        let started = NaiveDate::from_ymd_opt(2017, 6, 21);
        insert_mandate(&pool, &Mandate::current(deceased, "Député", started)).await.unwrap();
        insert_mandate(&pool, &Mandate::current(deceased, "Conseiller", started)).await.unwrap();
        insert_mandate(&pool, &Mandate::current(alive, "Député", started)).await.unwrap();

        let death = NaiveDate::from_ymd_opt(2022, 1, 9).unwrap();
        let mut conn = pool.acquire().await.unwrap();
        persons::set_death_date(&mut conn, deceased, death).await.unwrap();
        drop(conn);

        assert_eq!(close_mandates_of_deceased(&pool).await.unwrap(), 2);

        let closed = load_mandates_for_person(&pool, deceased).await.unwrap();
        assert!(closed.iter().all(|m| !m.is_current));
        assert!(closed.iter().all(|m| m.ended_on == Some(death)));

        let untouched = load_mandates_for_person(&pool, alive).await.unwrap();
        assert!(untouched[0].is_current);
        assert!(untouched[0].ended_on.is_none());

        // Re-runnable
        assert_eq!(close_mandates_of_deceased(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_existing_end_date_preserved() {
        let pool = init_memory_pool().await.unwrap();
        let person = persons::upsert_person(&pool, "p", "P").await.unwrap();
        let ended = NaiveDate::from_ymd_opt(2021, 12, 31);
        let mut mandate = Mandate::current(person, "Maire", None);
        mandate.ended_on = ended;
        insert_mandate(&pool, &mandate).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        persons::set_death_date(&mut conn, person, NaiveDate::from_ymd_opt(2022, 3, 1).unwrap())
            .await
            .unwrap();
        drop(conn);

        close_mandates_of_deceased(&pool).await.unwrap();
        let mandates = load_mandates_for_person(&pool, person).await.unwrap();
        assert_eq!(mandates[0].ended_on, ended);
    }
}
