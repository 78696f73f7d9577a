//! Test helper utilities
//!
//! Shared setup for civtrack-sync integration tests: on-disk databases, an
//! engine wired to a wiremock provider, and canned provider payloads.

#![allow(dead_code)]

use civtrack_common::config::TomlConfig;
use civtrack_common::events::EventBus;
use civtrack_sync::db;
use civtrack_sync::SyncEngine;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Create a temporary on-disk database with the schema applied
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("temp dir");
    let pool = db::init_database_pool(&temp_dir.path().join("civtrack.db"), 4)
        .await
        .expect("database pool");
    (temp_dir, pool)
}

/// Config pointing both providers at `server_uri`, without pacing delays
pub fn test_config(server_uri: &str) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.providers.ballots_base_url = server_uri.to_string();
    config.providers.sparql_url = format!("{}/sparql", server_uri);
    config.sync.request_timeout_secs = 1;
    config.sync.item_delay_ms = 0;
    config.sync.graph_min_interval_ms = 0;
    config
}

pub fn create_engine(pool: SqlitePool, config: &TomlConfig) -> SyncEngine {
    SyncEngine::from_config(pool, config, EventBus::new(64)).expect("engine")
}

pub async fn seed_person(pool: &SqlitePool, slug: &str, full_name: &str) -> Uuid {
    db::persons::upsert_person(pool, slug, full_name)
        .await
        .expect("seed person")
}

pub fn ballot_json(id: u32, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "date": "2024-01-15",
        "votesFor": 2,
        "votesAgainst": 1,
        "votesAbstain": 0,
        "outcome": "adopté",
    })
}

pub fn votes_json(votes: &[(&str, &str)]) -> Value {
    let votes: Vec<Value> = votes
        .iter()
        .map(|(slug, position)| json!({ "voterSlug": slug, "position": position }))
        .collect();
    json!({ "votes": votes })
}

pub async fn mount_list(server: &MockServer, session: u32, ballots: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/ballots/json", session)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ballots": ballots })))
        .mount(server)
        .await;
}

pub async fn mount_detail(server: &MockServer, session: u32, id: u32, votes: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/ballot/{}/json", session, id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(votes_json(votes)))
        .mount(server)
        .await;
}

/// SPARQL JSON response for `(external_id, death timestamp)` pairs
pub fn sparql_json(rows: &[(&str, &str)]) -> Value {
    let bindings: Vec<Value> = rows
        .iter()
        .map(|(id, death)| {
            json!({
                "person": { "type": "uri", "value": format!("http://www.wikidata.org/entity/Q{}", id.len()) },
                "externalId": { "type": "literal", "value": id },
                "deathDate": { "type": "literal", "value": death },
            })
        })
        .collect();
    json!({ "head": { "vars": ["person", "externalId", "deathDate"] }, "results": { "bindings": bindings } })
}

/// Matches a SPARQL request whose decoded `query` parameter contains the text
pub struct QueryContains(pub String);

impl Match for QueryContains {
    fn matches(&self, request: &Request) -> bool {
        request
            .url
            .query_pairs()
            .any(|(key, value)| key == "query" && value.contains(self.0.as_str()))
    }
}
