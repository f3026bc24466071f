//! Router-level tests
//!
//! Drive the assembled router through `tower::ServiceExt::oneshot`
//! against a throwaway database.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::server::config::{AppConfig, AuthTokenEntry};
use crate::server::{build_app, AppState};

async fn test_app() -> (axum::Router, std::sync::Arc<AppState>, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.database.path = dir.path().join("api-test.db");
    config.auth.enabled = true;
    config.auth.tokens = vec![AuthTokenEntry {
        token: "test-token".to_string(),
        user_id: "user-1".to_string(),
    }];

    let (router, state, shutdown) = build_app(config).await.unwrap();
    // The loops are not under test; stop them before their startup delay.
    shutdown.cancel();
    (router, state, dir)
}

fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
    request.header("authorization", "Bearer test-token")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let (router, _state, _dir) = test_app().await;
    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "feedmill");
}

#[tokio::test]
async fn test_feeds_require_auth() {
    let (router, _state, _dir) = test_app().await;
    let response = router
        .oneshot(Request::get("/api/v1/feeds").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_feeds_pagination_flow() {
    let (router, state, _dir) = test_app().await;
    for i in 0..3 {
        state
            .store
            .save_article(&format!("http://example.com/{i}"), &format!("T{i}"), "")
            .await
            .unwrap();
    }

    let response = router
        .clone()
        .oneshot(
            authed(Request::get("/api/v1/feeds?limit=2"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let page = &json["data"];
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["has_more"], true);
    let cursor = page["next_cursor"].as_str().unwrap().to_string();

    let response = router
        .oneshot(
            authed(Request::get(format!(
                "/api/v1/feeds?limit=2&cursor={}",
                urlencode(&cursor)
            )))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let page = &json["data"];
    // One article remains past the cursor.
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
    assert_eq!(page["has_more"], false);
    assert!(page["next_cursor"].is_null());
}

#[tokio::test]
async fn test_feeds_bad_cursor_is_400() {
    let (router, _state, _dir) = test_app().await;
    let response = router
        .oneshot(
            authed(Request::get("/api/v1/feeds?cursor=yesterday"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_mark_as_read_unknown_url_is_404() {
    let (router, _state, _dir) = test_app().await;
    let response = router
        .oneshot(
            authed(Request::post("/api/v1/feeds/read"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"feed_url":"http://nowhere.example/x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mark_as_read_then_unread_count_drops() {
    let (router, state, _dir) = test_app().await;
    state
        .store
        .save_article("http://example.com/a", "A", "")
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(
            authed(Request::get("/api/v1/feeds/unread/count"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["count"], 1);

    let response = router
        .clone()
        .oneshot(
            authed(Request::post("/api/v1/feeds/read"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"feed_url":"http://example.com/a"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            authed(Request::get("/api/v1/feeds/unread/count"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["count"], 0);
}

#[tokio::test]
async fn test_quota_endpoint_reports_limits() {
    let (router, _state, _dir) = test_app().await;
    let response = router
        .oneshot(
            authed(Request::get("/api/v1/quota"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["zone1"]["limit"], 100);
    assert_eq!(json["data"]["zone1"]["effective_limit"], 90);
    assert_eq!(json["data"]["blocked"], false);
}

#[tokio::test]
async fn test_scheduler_status_and_trigger() {
    let (router, _state, _dir) = test_app().await;
    let response = router
        .clone()
        .oneshot(
            authed(Request::get("/api/v1/scheduler/status"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["subscription_sync"]["running"], false);
    assert_eq!(json["data"]["quota_blocked"], false);

    let response = router
        .oneshot(
            authed(Request::post("/api/v1/scheduler/sync/trigger"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["triggered"], true);
}

#[tokio::test]
async fn test_search_requires_query() {
    let (router, _state, _dir) = test_app().await;
    let response = router
        .oneshot(
            authed(Request::get("/api/v1/feeds/search"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    out
}
