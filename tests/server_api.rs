//! HTTP API tests driven through the router without a listener

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{fake_registry, ScriptedProvider};
use spatialmind::server::router;

fn app() -> Router {
    let (registry, _, _) = fake_registry(ScriptedProvider::new([
        "Which cities are in the table?",
        "```sql\nSELECT name, population, geom FROM cities;\n```",
    ]));
    router(registry)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn initialize_body(session_id: &str) -> Value {
    json!({
        "session_id": session_id,
        "database_config": {
            "db_type": "postgresql",
            "db_name": "gis",
            "db_user": "analyst",
            "db_password": "secret",
            "db_host": "localhost",
            "db_port": "5432"
        },
        "chatbot_type": "ollama_text"
    })
}

#[tokio::test]
async fn test_health_reports_active_sessions() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn test_full_session_flow() {
    let app = app();

    let (status, body) = send(&app, "POST", "/initialize", Some(initialize_body("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({"session_id": "s1", "message": "show me the cities"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rephrased_question"], "Which cities are in the table?");
    assert_eq!(body["sql"], "SELECT name, population, geom FROM cities;");

    let (status, body) = send(
        &app,
        "POST",
        "/execute",
        Some(json!({"session_id": "s1", "query": "SELECT name, population, geom FROM cities;"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["row_count"], 1);
    assert_eq!(body["column_names"], json!(["name", "population", "geom"]));
    assert_eq!(body["rows"][0][0], "Metropolis");

    let (status, body) = send(
        &app,
        "POST",
        "/layer",
        Some(json!({"session_id": "s1", "query": "SELECT name, population, geom FROM cities;"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "features");
    assert_eq!(body["geometry_type"], "Point");
    assert_eq!(body["crs"], "EPSG:4326");
    assert_eq!(body["geojson"]["features"][0]["geometry"]["coordinates"], json!([10.0, 20.0]));
    assert_eq!(body["geojson"]["features"][0]["properties"]["name"], "Metropolis");

    let (status, body) = send(&app, "GET", "/session/s1/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["turns"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", "/session/s1", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/execute",
        Some(json!({"session_id": "s1", "query": "SELECT 1;"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_duplicate_initialize_conflicts() {
    let app = app();
    let (status, _) = send(&app, "POST", "/initialize", Some(initialize_body("dup"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/initialize", Some(initialize_body("dup"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("dup"));
}

#[tokio::test]
async fn test_unknown_chatbot_type_is_bad_request() {
    let app = app();
    let mut body = initialize_body("s1");
    body["chatbot_type"] = json!("openai_text");

    let (status, _) = send(&app, "POST", "/initialize", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, sessions) = send(&app, "GET", "/sessions", None).await;
    assert_eq!(sessions["session_ids"], json!([]));
}

#[tokio::test]
async fn test_unreachable_database_is_service_unavailable() {
    let app = app();
    let mut body = initialize_body("s1");
    body["database_config"]["db_host"] = json!("unreachable");

    let (status, body) = send(&app, "POST", "/initialize", Some(body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!body["detail"].as_str().unwrap().contains("secret"));
}

#[tokio::test]
async fn test_failed_query_is_reported_not_raised() {
    let app = app();
    send(&app, "POST", "/initialize", Some(initialize_body("s1"))).await;

    let (status, body) = send(
        &app,
        "POST",
        "/layer",
        Some(json!({"session_id": "s1", "query": "SELECT * FROM missing_table;"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "failed");
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("missing_table"));
}

#[tokio::test]
async fn test_image_on_text_pipeline_is_bad_request() {
    let app = app();
    send(&app, "POST", "/initialize", Some(initialize_body("s1"))).await;

    // 1x1 transparent PNG
    let png = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
    let (status, _) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({"session_id": "s1", "message": "what is this?", "image": png})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_history_of_unknown_session_is_not_found() {
    let app = app();
    let (status, _) = send(&app, "GET", "/session/ghost/history", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", "/session/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
