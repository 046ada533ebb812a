use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use funnelflow_core::config::Config;
use funnelflow_duckdb::DuckDbBackend;
use funnelflow_server::app::build_app;
use funnelflow_server::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/funnelflow-test".to_string(),
        cors_origins: vec![],
        duckdb_memory_limit: "1GB".to_string(),
        rate_limit_disable: false,
        public_url: "http://localhost:3000".to_string(),
    }
}

async fn setup() -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config()));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn put_json(app: &axum::Router, uri: &str, body: Value) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn get(app: &axum::Router, uri: &str) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn delete(app: &axum::Router, uri: &str) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

#[tokio::test]
async fn test_websites_crud_lifecycle() {
    let (_state, app) = setup().await;

    let create_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "Shop", "domain": "Shop.Example.COM", "timezone": "Europe/Berlin" }),
    )
    .await;
    assert_eq!(create_res.status(), StatusCode::CREATED);
    let created = json_body(create_res).await;
    let website_id = created["data"]["id"].as_str().expect("id").to_string();
    assert!(website_id.starts_with("site_"));
    // Domains are stored lowercased.
    assert_eq!(created["data"]["domain"], "shop.example.com");
    assert_eq!(created["data"]["timezone"], "Europe/Berlin");
    let snippet = created["data"]["tracking_snippet"]
        .as_str()
        .expect("snippet");
    assert!(snippet.contains(&website_id));
    assert!(snippet.contains("http://localhost:3000"));

    let get_res = get(&app, &format!("/api/websites/{website_id}")).await;
    assert_eq!(get_res.status(), StatusCode::OK);
    let fetched = json_body(get_res).await;
    assert_eq!(fetched["data"]["name"], "Shop");

    let list_res = get(&app, "/api/websites").await;
    assert_eq!(list_res.status(), StatusCode::OK);
    let listed = json_body(list_res).await;
    assert_eq!(listed["data"].as_array().expect("array").len(), 1);
    assert_eq!(listed["pagination"]["total"], 1);

    let update_res = put_json(
        &app,
        &format!("/api/websites/{website_id}"),
        json!({ "name": "Shop Renamed", "timezone": "UTC" }),
    )
    .await;
    assert_eq!(update_res.status(), StatusCode::OK);
    let updated = json_body(update_res).await;
    assert_eq!(updated["data"]["name"], "Shop Renamed");
    assert_eq!(updated["data"]["timezone"], "UTC");

    let delete_res = delete(&app, &format!("/api/websites/{website_id}")).await;
    assert_eq!(delete_res.status(), StatusCode::NO_CONTENT);

    let gone_res = get(&app, &format!("/api/websites/{website_id}")).await;
    assert_eq!(gone_res.status(), StatusCode::NOT_FOUND);

    let delete_again_res = delete(&app, &format!("/api/websites/{website_id}")).await;
    assert_eq!(delete_again_res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_website_create_validations() {
    let (_state, app) = setup().await;

    let empty_name_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "", "domain": "a.example.com" }),
    )
    .await;
    assert_eq!(empty_name_res.status(), StatusCode::BAD_REQUEST);

    let empty_domain_res =
        post_json(&app, "/api/websites", json!({ "name": "A", "domain": " " })).await;
    assert_eq!(empty_domain_res.status(), StatusCode::BAD_REQUEST);

    let bad_tz_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "A", "domain": "a.example.com", "timezone": "Not/AZone" }),
    )
    .await;
    assert_eq!(bad_tz_res.status(), StatusCode::BAD_REQUEST);

    let first_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "A", "domain": "a.example.com" }),
    )
    .await;
    assert_eq!(first_res.status(), StatusCode::CREATED);

    // Duplicate detection is case-insensitive because domains are lowercased.
    let dup_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "B", "domain": "A.Example.Com" }),
    )
    .await;
    assert_eq!(dup_res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let dup_json = json_body(dup_res).await;
    assert_eq!(dup_json["error"]["code"], "duplicate_domain");
    assert_eq!(dup_json["error"]["field"], "domain");
}

#[tokio::test]
async fn test_website_update_validations() {
    let (_state, app) = setup().await;

    let missing_res = put_json(
        &app,
        "/api/websites/site_missing",
        json!({ "name": "Nope" }),
    )
    .await;
    assert_eq!(missing_res.status(), StatusCode::NOT_FOUND);

    let a_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "A", "domain": "a.example.com" }),
    )
    .await;
    assert_eq!(a_res.status(), StatusCode::CREATED);
    let b_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "B", "domain": "b.example.com" }),
    )
    .await;
    assert_eq!(b_res.status(), StatusCode::CREATED);
    let b_json = json_body(b_res).await;
    let b_id = b_json["data"]["id"].as_str().expect("id").to_string();

    let no_fields_res = put_json(&app, &format!("/api/websites/{b_id}"), json!({})).await;
    assert_eq!(no_fields_res.status(), StatusCode::BAD_REQUEST);

    let empty_name_res =
        put_json(&app, &format!("/api/websites/{b_id}"), json!({ "name": "" })).await;
    assert_eq!(empty_name_res.status(), StatusCode::BAD_REQUEST);

    let bad_tz_res = put_json(
        &app,
        &format!("/api/websites/{b_id}"),
        json!({ "timezone": "Mars/OlympusMons" }),
    )
    .await;
    assert_eq!(bad_tz_res.status(), StatusCode::BAD_REQUEST);

    let dup_res = put_json(
        &app,
        &format!("/api/websites/{b_id}"),
        json!({ "domain": "a.example.com" }),
    )
    .await;
    assert_eq!(dup_res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let dup_json = json_body(dup_res).await;
    assert_eq!(dup_json["error"]["code"], "duplicate_domain");
}

#[tokio::test]
async fn test_websites_pagination_follows_cursor() {
    let (_state, app) = setup().await;

    for idx in 0..3 {
        let res = post_json(
            &app,
            "/api/websites",
            json!({ "name": format!("Site {idx}"), "domain": format!("site{idx}.example.com") }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let first_page_res = get(&app, "/api/websites?limit=2").await;
    assert_eq!(first_page_res.status(), StatusCode::OK);
    let first_page = json_body(first_page_res).await;
    assert_eq!(first_page["data"].as_array().expect("array").len(), 2);
    assert_eq!(first_page["pagination"]["total"], 3);
    assert_eq!(first_page["pagination"]["has_more"], true);
    let cursor = first_page["pagination"]["cursor"]
        .as_str()
        .expect("cursor")
        .to_string();
    assert_eq!(first_page["data"][1]["id"], cursor.as_str());

    let second_page_res = get(&app, &format!("/api/websites?limit=2&cursor={cursor}")).await;
    assert_eq!(second_page_res.status(), StatusCode::OK);
    let second_page = json_body(second_page_res).await;
    assert_eq!(second_page["data"].as_array().expect("array").len(), 1);
    assert_eq!(second_page["pagination"]["has_more"], false);
    assert!(second_page["pagination"]["cursor"].is_null());
}

#[tokio::test]
async fn test_deleting_website_cascades_to_funnel_data() {
    let (state, app) = setup().await;

    let create_res = post_json(
        &app,
        "/api/websites",
        json!({ "name": "Shop", "domain": "shop.example.com" }),
    )
    .await;
    assert_eq!(create_res.status(), StatusCode::CREATED);
    let created = json_body(create_res).await;
    let website_id = created["data"]["id"].as_str().expect("id").to_string();

    let funnel_res = post_json(
        &app,
        &format!("/api/websites/{website_id}/funnels"),
        json!({
            "name": "Checkout",
            "steps": [
                { "step_type": "page_view", "url_pattern": "/", "match_type": "exact" },
                { "step_type": "page_view", "url_pattern": "/checkout", "match_type": "exact" }
            ]
        }),
    )
    .await;
    assert_eq!(funnel_res.status(), StatusCode::CREATED);

    let track_res = post_json(
        &app,
        "/api/track",
        json!({
            "site_id": "shop.example.com",
            "session_id": "sess_cascade",
            "current_url": "https://shop.example.com/",
            "event_type": "page_view"
        }),
    )
    .await;
    assert_eq!(track_res.status(), StatusCode::OK);
    let tracked = json_body(track_res).await;
    assert_eq!(tracked["tracked"], true);

    let delete_res = delete(&app, &format!("/api/websites/{website_id}")).await;
    assert_eq!(delete_res.status(), StatusCode::NO_CONTENT);

    let conn = state.db.conn_for_test().await;
    for table in ["funnels", "funnel_steps", "sessions", "step_completions"] {
        let count: i64 = conn
            .prepare(&format!("SELECT COUNT(*) FROM {table}"))
            .expect("prepare")
            .query_row([], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "{table} should be empty after cascade");
    }
}
