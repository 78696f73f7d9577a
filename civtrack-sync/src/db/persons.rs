//! Person and external identifier operations

use chrono::NaiveDate;
use civtrack_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};
use uuid::Uuid;

/// Local person record
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub guid: Uuid,
    pub slug: String,
    pub full_name: String,
    pub death_date: Option<NaiveDate>,
}

/// External id of one person for one source, with the stored death date
#[derive(Debug, Clone)]
pub struct PersonIdentifier {
    pub external_id: String,
    pub person_id: Uuid,
    pub death_date: Option<NaiveDate>,
}

/// Create a person or rename the existing one with the same slug
///
/// Returns the person's guid (stable across calls).
pub async fn upsert_person(pool: &SqlitePool, slug: &str, full_name: &str) -> Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO persons (guid, slug, full_name, created_at, updated_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(slug) DO UPDATE SET
            full_name = excluded.full_name,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(slug)
    .bind(full_name)
    .execute(pool)
    .await?;

    let guid: String = sqlx::query_scalar("SELECT guid FROM persons WHERE slug = ?")
        .bind(slug)
        .fetch_one(pool)
        .await?;

    parse_guid(&guid)
}

pub async fn load_person<'e, E: SqliteExecutor<'e>>(executor: E, guid: Uuid) -> Result<Option<Person>> {
    let row = sqlx::query("SELECT guid, slug, full_name, death_date FROM persons WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(executor)
        .await?;

    match row {
        Some(row) => {
            let guid_str: String = row.get("guid");
            Ok(Some(Person {
                guid: parse_guid(&guid_str)?,
                slug: row.get("slug"),
                full_name: row.get("full_name"),
                death_date: row.get("death_date"),
            }))
        }
        None => Ok(None),
    }
}

/// Map `(source, external_id)` to a person, replacing any previous mapping
pub async fn register_external_identifier<'e, E: SqliteExecutor<'e>>(
    executor: E,
    source: &str,
    external_id: &str,
    person_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO external_identifiers (source, external_id, person_id, created_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(source, external_id) DO UPDATE SET
            person_id = excluded.person_id
        "#,
    )
    .bind(source)
    .bind(external_id)
    .bind(person_id.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Every `(external_id, person)` pair of one source, oldest person first
pub async fn load_identifier_pairs(pool: &SqlitePool, source: &str) -> Result<Vec<(String, Uuid)>> {
    let rows = sqlx::query(
        r#"
        SELECT ei.external_id, ei.person_id
        FROM external_identifiers ei
        JOIN persons p ON p.guid = ei.person_id
        WHERE ei.source = ?
        ORDER BY p.created_at ASC, p.rowid ASC
        "#,
    )
    .bind(source)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let person_id: String = row.get("person_id");
            Ok((row.get("external_id"), parse_guid(&person_id)?))
        })
        .collect()
}

/// Every `(slug, person)` pair, oldest person first
pub async fn load_slug_pairs(pool: &SqlitePool) -> Result<Vec<(String, Uuid)>> {
    let rows = sqlx::query("SELECT slug, guid FROM persons ORDER BY created_at ASC, rowid ASC")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.get("guid");
            Ok((row.get("slug"), parse_guid(&guid)?))
        })
        .collect()
}

/// Identifiers of one source joined with the person's current death date
pub async fn load_identifiers_with_death_dates(
    pool: &SqlitePool,
    source: &str,
) -> Result<Vec<PersonIdentifier>> {
    let rows = sqlx::query(
        r#"
        SELECT ei.external_id, ei.person_id, p.death_date
        FROM external_identifiers ei
        JOIN persons p ON p.guid = ei.person_id
        WHERE ei.source = ?
        ORDER BY ei.external_id
        "#,
    )
    .bind(source)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let person_id: String = row.get("person_id");
            Ok(PersonIdentifier {
                external_id: row.get("external_id"),
                person_id: parse_guid(&person_id)?,
                death_date: row.get("death_date"),
            })
        })
        .collect()
}

pub async fn set_death_date(conn: &mut SqliteConnection, person_id: Uuid, date: NaiveDate) -> Result<()> {
    sqlx::query("UPDATE persons SET death_date = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?")
        .bind(date)
        .bind(person_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

pub(crate) fn parse_guid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid guid '{}': {}", value, e)))
}
