//! End-to-end tests for the HTTP surface.
//!
//! Each test builds the full router over a throwaway model directory and
//! drives it with `oneshot`; no listener or network access is needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`

use anomaly_detector::config::Config;
use anomaly_detector::{api, AppState};

const TOKEN: &str = "test-token-0123456789";

async fn app(dir: &tempfile::TempDir) -> Router {
    let config = Config {
        api_token: TOKEN.to_string(),
        model_dir: dir.path().to_path_buf(),
        n_estimators: 25,
        max_samples: 64,
        ..Config::default()
    };
    let state = AppState::new(config).await.unwrap();
    api::router(Arc::new(state))
}

fn log(i: usize) -> Value {
    json!({
        "timestamp": format!("2024-03-04T{:02}:{:02}:00Z", 8 + i / 60, i % 60),
        "user_id": format!("user_{}", i % 10),
        "endpoint": format!("/api/items/{}", i % 5),
        "method": if i % 2 == 0 { "GET" } else { "POST" },
        "status_code": if i % 10 == 0 { 404 } else { 200 },
        "response_time": 0.1 + (i % 7) as f64 * 0.01,
        "ip_address": format!("10.0.0.{}", i % 10),
        "request_size": 100 + (i % 13) * 20,
        "response_size": 1000 + (i % 11) * 90,
    })
}

fn logs(n: usize) -> Vec<Value> {
    (0..n).map(log).collect()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    builder.body(body.into()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    post(uri, Some(TOKEN), body.to_string())
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn train(router: &Router, n: usize) -> Value {
    let resp = router
        .clone()
        .oneshot(post_json("/train", json!({ "logs": logs(n), "test_size": 0.2 })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await
}

async fn status(router: &Router) -> Value {
    let resp = router.clone().oneshot(get("/status", Some(TOKEN))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await
}

#[tokio::test]
async fn test_health_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let resp = app(&dir).await.oneshot(get("/health", None)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    let body = body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_metrics_is_open_and_prometheus_formatted() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;

    // generate at least one labelled request sample first
    router.clone().oneshot(get("/health", None)).await.unwrap();
    let resp = router.oneshot(get("/metrics", None)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("api_requests_total"));
    assert!(text.contains("model_trained 0"));
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;
    train(&router, 60).await;
    let before = status(&router).await;

    let cases = vec![
        get("/status", None),
        get("/status", Some("wrong-token")),
        post("/detect", None, json!({ "logs": logs(3) }).to_string()),
        post("/train", Some("wrong-token"), json!({ "logs": logs(20) }).to_string()),
        // auth runs before the body is parsed
        post("/train", None, "not json"),
        post("/load-model", None, Body::empty()),
    ];

    for req in cases {
        let uri = req.uri().to_string();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "invalid_token");
    }

    // rejected calls leave the model untouched
    let after = status(&router).await;
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_status_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let resp = app(&dir)
        .await
        .oneshot(get("/status", Some(TOKEN)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["is_trained"], false);
    assert!(body["training_date"].is_null());
    assert!(body["model_accuracy"].is_null());
}

#[tokio::test]
async fn test_detect_before_training_is_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let resp = app(&dir)
        .await
        .oneshot(post_json("/detect", json!({ "logs": logs(3) })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "model_not_trained");
}

#[tokio::test]
async fn test_train_rejects_small_batches() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;

    for n in [0, 1, 9] {
        let resp = router
            .clone()
            .oneshot(post_json("/train", json!({ "logs": logs(n) })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "n = {}", n);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "insufficient_data");
    }

    // a failed run leaves no model behind
    let resp = router.oneshot(get("/status", Some(TOKEN))).await.unwrap();
    assert_eq!(body_json(resp).await["is_trained"], false);
}

#[tokio::test]
async fn test_train_then_status_reports_model() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;

    let body = train(&router, 100).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["training_samples"], 100);
    let accuracy = body["accuracy"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&accuracy));
    assert!(body["train_anomalies"].as_u64().unwrap() <= 80);
    assert!(body["test_anomalies"].as_u64().unwrap() <= 20);

    let resp = router.clone().oneshot(get("/status", Some(TOKEN))).await.unwrap();
    let status = body_json(resp).await;
    assert_eq!(status["is_trained"], true);
    assert_eq!(status["feature_count"], 14);
    assert_eq!(status["model_accuracy"].as_f64().unwrap(), accuracy);
    assert!(status["training_date"].is_string());

    let resp = router.oneshot(get("/metrics", None)).await.unwrap();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("model_trained 1"));
    assert!(text.contains(r#"training_runs_total{outcome="success"} 1"#));
}

#[tokio::test]
async fn test_train_rejects_bad_test_size() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;

    for test_size in [0.0, 1.0, -0.3] {
        let resp = router
            .clone()
            .oneshot(post_json(
                "/train",
                json!({ "logs": logs(50), "test_size": test_size }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

#[tokio::test]
async fn test_detect_scores_every_log_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;
    train(&router, 100).await;

    let mut batch = logs(30);
    batch.push(json!({
        "timestamp": "2024-03-04T08:30:30Z",
        "user_id": "intruder",
        "endpoint": "/api/admin/export",
        "method": "DELETE",
        "status_code": 500,
        "response_time": 30.0,
        "ip_address": "203.0.113.7",
        "request_size": 5_000_000,
        "response_size": 9_000_000,
    }));

    let resp = router
        .oneshot(post_json("/detect", json!({ "logs": batch, "threshold": -0.5 })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;

    assert_eq!(body["total_logs"], 31);
    let results = body["anomalies"].as_array().unwrap();
    assert_eq!(results.len(), 31);
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r["log_index"], i);
        let score = r["anomaly_score"].as_f64().unwrap();
        assert_eq!(r["is_anomaly"], score <= -0.5);
        assert_eq!(r.get("severity").is_some(), score <= -0.5);
    }

    let flagged = results.iter().filter(|r| r["is_anomaly"] == true).count();
    assert_eq!(body["anomaly_count"], flagged);
    let rate = body["anomaly_rate"].as_f64().unwrap();
    assert!((rate - flagged as f64 / 31.0).abs() < 1e-12);

    let mean = body["model_confidence"].as_f64().unwrap();
    let intruder = results[30]["anomaly_score"].as_f64().unwrap();
    assert!(intruder < mean);
}

#[tokio::test]
async fn test_detect_empty_batch() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;
    train(&router, 60).await;

    let resp = router
        .oneshot(post_json("/detect", json!({ "logs": [] })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["total_logs"], 0);
    assert_eq!(body["anomaly_count"], 0);
    assert_eq!(body["anomaly_rate"], 0.0);
}

#[tokio::test]
async fn test_malformed_payloads_are_unprocessable() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;
    train(&router, 60).await;

    let mut bad_timestamp = log(0);
    bad_timestamp["timestamp"] = json!("yesterday afternoon");
    let mut bad_method = log(1);
    bad_method["method"] = json!("FETCH");
    let mut missing_field = log(2);
    missing_field.as_object_mut().unwrap().remove("user_id");
    let mut empty_user = log(3);
    empty_user["user_id"] = json!("  ");

    let bodies = vec![
        "{\"logs\": [".to_string(),
        json!({ "records": [] }).to_string(),
        json!({ "logs": [bad_timestamp] }).to_string(),
        json!({ "logs": [bad_method] }).to_string(),
        json!({ "logs": [missing_field] }).to_string(),
        json!({ "logs": [log(4), empty_user] }).to_string(),
    ];

    for body in bodies {
        let resp = router
            .clone()
            .oneshot(post("/detect", Some(TOKEN), body.clone()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
        let err = body_json(resp).await;
        assert_eq!(err["error"]["code"], "validation_failed");
    }
}

#[tokio::test]
async fn test_load_model_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;

    let resp = router
        .clone()
        .oneshot(post("/load-model", Some(TOKEN), Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "model_not_found");

    train(&router, 60).await;

    let resp = router
        .oneshot(post("/load-model", Some(TOKEN), Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "success");
    assert!(body["training_date"].is_string());
}

#[tokio::test]
async fn test_trained_model_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first = app(&dir).await;
    let trained = train(&first, 60).await;
    drop(first);

    let second = app(&dir).await;
    let resp = second.oneshot(get("/status", Some(TOKEN))).await.unwrap();
    let status = body_json(resp).await;
    assert_eq!(status["is_trained"], true);
    assert_eq!(status["model_accuracy"], trained["accuracy"]);
}

#[tokio::test]
async fn test_concurrent_training_is_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;

    let a = router
        .clone()
        .oneshot(post_json("/train", json!({ "logs": logs(400) })));
    let b = router
        .clone()
        .oneshot(post_json("/train", json!({ "logs": logs(400) })));
    let mid = status(&router);
    let (a, b, mid) = tokio::join!(a, b, mid);

    // never a half-published model: trained iff accuracy and date are set
    let trained = mid["is_trained"] == true;
    assert_eq!(mid["model_accuracy"].is_number(), trained);
    assert_eq!(mid["training_date"].is_string(), trained);

    let codes = [a.unwrap().status(), b.unwrap().status()];
    assert!(codes.contains(&StatusCode::OK));
    for code in codes {
        assert!(code == StatusCode::OK || code == StatusCode::CONFLICT);
    }
}

#[tokio::test]
async fn test_status_during_training_is_old_or_new() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&dir).await;
    train(&router, 60).await;
    let before = status(&router).await;

    let retrain = router
        .clone()
        .oneshot(post_json("/train", json!({ "logs": logs(400), "test_size": 0.25 })));
    let reads = async {
        let mut seen = Vec::new();
        for _ in 0..20 {
            let resp = router.clone().oneshot(get("/status", Some(TOKEN))).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            seen.push(body_json(resp).await);
            tokio::task::yield_now().await;
        }
        seen
    };
    let (retrain, seen) = tokio::join!(retrain, reads);
    assert_eq!(retrain.unwrap().status(), StatusCode::OK);

    let after = status(&router).await;
    assert_ne!(after, before);
    for observed in seen {
        assert!(observed == before || observed == after, "mixed status: {}", observed);
    }
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let resp = app(&dir)
        .await
        .oneshot(get("/predict", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
