//! HTTP surface tests through the router, without a listening socket

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use civtrack_common::events::SyncKind;
use civtrack_sync::models::{SyncRun, SyncRunState};
use civtrack_sync::{build_router, AppState};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::util::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn create_test_app(server: &MockServer) -> (Router, sqlx::SqlitePool, tempfile::TempDir) {
    let (dir, pool) = create_test_db().await;
    let engine = create_engine(pool.clone(), &test_config(&server.uri()));
    (build_router(AppState::new(engine)), pool, dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = MockServer::start().await;
    let (app, _pool, _dir) = create_test_app(&server).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "civtrack-sync");
}

#[tokio::test]
async fn test_stats_endpoint_counts_seeded_rows() {
    let server = MockServer::start().await;
    let (app, pool, _dir) = create_test_app(&server).await;
    seed_person(&pool, "jean-dupont", "Jean Dupont").await;

    let response = app.oneshot(get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["persons"], 1);
    assert_eq!(body["ballots"], 0);
    assert!(body["last_run"].is_null());
}

#[tokio::test]
async fn test_ballot_sync_accepted_and_pollable() {
    let server = MockServer::start().await;
    let (app, pool, _dir) = create_test_app(&server).await;
    seed_person(&pool, "jean-dupont", "Jean Dupont").await;
    mount_list(&server, 16, vec![ballot_json(1, "Un")]).await;
    mount_detail(&server, 16, 1, &[("jean-dupont", "for")]).await;

    let response = app
        .clone()
        .oneshot(post_json("/sync/ballots", json!({ "session": 16 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert_eq!(body["kind"], "ballots");
    assert_eq!(body["state"], "RUNNING");
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let mut finished = None;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(get(&format!("/sync/runs/{}", run_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let run: SyncRun = serde_json::from_value(body_json(response).await).unwrap();
        if !run.is_running() {
            finished = Some(run);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let run = finished.expect("run finished");
    assert_eq!(run.state, SyncRunState::Completed);
    assert_eq!(run.stats["created"], 1);
    assert_eq!(run.progress_percentage, 100);
}

#[tokio::test]
async fn test_second_start_while_running_conflicts() {
    let server = MockServer::start().await;
    let (app, pool, _dir) = create_test_app(&server).await;

    // A run left in RUNNING state blocks another run of the same kind only
    let stuck = SyncRun::start(SyncKind::Ballots);
    civtrack_sync::db::sync_runs::save_sync_run(&pool, &stuck, 1000).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/sync/ballots", json!({ "session": 16 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "CONFLICT");

    let response = app
        .oneshot(post_json("/sync/death-dates", json!({ "dry_run": true })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_accept_exactly_one() {
    let server = MockServer::start().await;
    // Slow listing keeps the accepted run running while the other request lands
    Mock::given(method("GET"))
        .and(path("/16/ballots/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "ballots": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    for _ in 0..10 {
        let (app, _pool, _dir) = create_test_app(&server).await;

        let (first, second) = tokio::join!(
            app.clone().oneshot(post_json("/sync/ballots", json!({ "session": 16 }))),
            app.clone().oneshot(post_json("/sync/ballots", json!({ "session": 16 }))),
        );
        let mut statuses = vec![first.unwrap().status().as_u16(), second.unwrap().status().as_u16()];
        statuses.sort_unstable();

        assert_eq!(statuses, vec![202, 409]);
    }
}

#[tokio::test]
async fn test_run_left_running_by_previous_process_does_not_block() {
    let server = MockServer::start().await;
    mount_list(&server, 16, Vec::new()).await;
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("civtrack.db");

    let pool = civtrack_sync::db::init_database_pool(&db_path, 4).await.unwrap();
    let stale = SyncRun::start(SyncKind::Ballots);
    civtrack_sync::db::sync_runs::save_sync_run(&pool, &stale, 1000).await.unwrap();
    pool.close().await;

    // Same startup sequence as `serve`
    let pool = civtrack_sync::db::init_database_pool(&db_path, 4).await.unwrap();
    let engine = create_engine(pool.clone(), &test_config(&server.uri()));
    assert_eq!(engine.close_interrupted_runs().await.unwrap(), 1);
    let app = build_router(AppState::new(engine));

    let response = app
        .clone()
        .oneshot(post_json("/sync/ballots", json!({ "session": 16 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .oneshot(get(&format!("/sync/runs/{}", stale.run_id)))
        .await
        .unwrap();
    let run: SyncRun = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(run.state, SyncRunState::Failed);
    assert!(run.ended_at.is_some());
}

#[tokio::test]
async fn test_invalid_session_rejected() {
    let server = MockServer::start().await;
    let (app, _pool, _dir) = create_test_app(&server).await;

    let response = app
        .oneshot(post_json("/sync/ballots", json!({ "session": 0 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let server = MockServer::start().await;
    let (app, _pool, _dir) = create_test_app(&server).await;

    let response = app
        .oneshot(get(&format!("/sync/runs/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
