use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;

use game_recommender::{
    create_router,
    db::InMemoryStore,
    models::{Interaction, ItemFeatures},
    services::{
        collaborative::SvdParams,
        recommendations::{EngineConfig, RecommendationEngine},
    },
    AppState,
};

fn catalog() -> ItemFeatures {
    [
        ("10", vec!["rating:90", "Action", "Online Co-op"]),
        ("20", vec!["rating:70", "RPG", "Single-player"]),
        ("30", vec!["rating:80", "Action", "Online PvP"]),
        ("40", vec!["rating:60", "Puzzle", "Co-op"]),
    ]
    .into_iter()
    .map(|(id, tokens)| {
        (
            id.to_string(),
            tokens.into_iter().map(String::from).collect::<Vec<_>>(),
        )
    })
    .collect()
}

fn create_test_server() -> TestServer {
    let interactions = vec![
        Interaction::new(1, "10", 10.0),
        Interaction::new(1, "20", 5.0),
        Interaction::new(2, "10", 8.0),
        Interaction::new(3, "30", 12.0),
        Interaction::new(3, "40", 3.0),
    ];
    let store = Arc::new(InMemoryStore::new(catalog(), interactions).with_excluded(2, ["40"]));
    let config = EngineConfig {
        svd: SvdParams {
            factors: 4,
            epochs: 10,
            ..SvdParams::default()
        },
        ..EngineConfig::default()
    };
    let engine = Arc::new(RecommendationEngine::new(store.clone(), store, config));

    let app = create_router(AppState::new(engine, 3));
    TestServer::new(app).unwrap()
}

fn item_ids(body: &Value) -> Vec<String> {
    body["recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["item_id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let server = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_request_id_echoed() {
    let server = create_test_server();
    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("trace-123"),
        )
        .await;

    let echoed = response.headers().get("x-request-id").unwrap();
    assert_eq!(echoed.to_str().unwrap(), "trace-123");
}

#[tokio::test]
async fn test_recommendations_exclude_owned_and_hidden() {
    let server = create_test_server();

    let response = server
        .post("/api/v1/recommendations")
        .json(&json!({ "user_id": 2 }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let ids = item_ids(&body);

    assert!(!ids.is_empty());
    assert!(ids.len() <= 3);
    assert!(!ids.contains(&"10".to_string()));
    assert!(!ids.contains(&"40".to_string()));

    for rec in body["recommendations"].as_array().unwrap() {
        let score = rec["score"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&score));
    }
}

#[tokio::test]
async fn test_recommendations_respect_filters() {
    let server = create_test_server();

    let response = server
        .post("/api/v1/recommendations")
        .json(&json!({ "user_id": 2, "n": 5, "genres": ["rpg"] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let ids = item_ids(&body);
    assert!(ids.iter().all(|id| id == "20"));
}

#[tokio::test]
async fn test_paired_recommendations_are_multiplayer() {
    let server = create_test_server();

    let response = server
        .post("/api/v1/recommendations")
        .json(&json!({ "user_id": 1, "peer_user_id": 2 }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let ids = item_ids(&body);

    // "20" is single-player and "10" is owned by both.
    assert!(ids.iter().all(|id| id == "30" || id == "40"));
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let server = create_test_server();

    let response = server
        .post("/api/v1/recommendations")
        .json(&json!({ "user_id": 2, "n": 0 }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);

    let response = server
        .post("/api/v1/recommendations")
        .json(&json!({ "user_id": 2, "peer_user_id": 2 }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("peer_user_id"));
}

#[tokio::test]
async fn test_unknown_user_gets_empty_list() {
    let server = create_test_server();

    let response = server
        .post("/api/v1/recommendations")
        .json(&json!({ "user_id": 999 }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body, json!({ "recommendations": [] }));
}

#[tokio::test]
async fn test_refresh_reports_versions() {
    let server = create_test_server();

    let first: Value = server.post("/api/v1/refresh").await.json();
    let second: Value = server.post("/api/v1/refresh").await.json();

    assert_eq!(first["item_count"], 4);
    assert_eq!(first["interaction_count"], 5);
    assert!(
        second["collaborative_version"].as_u64().unwrap()
            > first["collaborative_version"].as_u64().unwrap()
    );
}
