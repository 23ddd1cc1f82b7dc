use activity_audit::middleware::audit_request;
use axum::{
    body::{Body, Bytes},
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    middleware as axum_middleware,
    response::Response,
    routing::get,
    Router,
};
use http_body::{Body as HttpBody, Frame};
use http_body_util::BodyExt;
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;

#[path = "support/mod.rs"]
mod support;

use support::{request, test_app, test_app_with, ADA};

#[tokio::test]
async fn excluded_urls_produce_no_record() {
    let app = test_app();

    let response = app.get("/admin/login/", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&response.raw).contains("Administration"));

    assert!(app.api_records().await.is_empty());
}

#[tokio::test]
async fn audited_request_captures_request_response_and_user() {
    let app = test_app();

    let response = app
        .post_json(
            "/api/authors/?source=test",
            Some(ADA),
            json!({ "name": "Ursula", "experience": 7 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let records = app.api_records().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["name"], "audit.request");
    assert_eq!(record["level"], "API");
    assert_eq!(record["message"], "Audit Internal Request");
    assert_eq!(record["service_name"], "publications");
    assert_eq!(record["request_type"], "internal");
    assert_eq!(record["protocol"], "http");
    assert_eq!(record["user_id"], ADA);
    assert_eq!(record["user_info"]["email"], "ada@example.com");
    assert_eq!(record["user_info"]["middle_name"], "");
    assert_eq!(record["error_message"], "");
    assert!(record["execution_time"].as_f64().expect("seconds") >= 0.0);

    let request_repr = &record["request_repr"];
    assert_eq!(request_repr["method"], "POST");
    assert_eq!(request_repr["path"], "/api/authors/");
    assert_eq!(request_repr["query_params"]["source"], "test");
    assert_eq!(request_repr["headers"]["x-user-id"], ADA);
    assert_eq!(request_repr["body"], json!({ "name": "Ursula", "experience": 7 }));

    let response_repr = &record["response_repr"];
    assert_eq!(response_repr["status_code"], 201);
    assert_eq!(response_repr["body"]["name"], "Ursula");
    assert_eq!(response_repr["body"]["id"], response.body["id"]);
    assert_eq!(response_repr["headers"]["content-type"], "application/json");
}

#[tokio::test]
async fn invalid_json_body_is_marked_without_changing_the_response() {
    let app = test_app();

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/authors/")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .expect("build request"),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let records = app.api_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["request_repr"]["body"], "Invalid JSON");
    assert_eq!(records[0]["error_message"], "400 Bad Request");
    assert_eq!(records[0]["response_repr"]["status_code"], 400);
}

#[tokio::test]
async fn non_json_body_is_not_read() {
    let app = test_app();

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/authors/")
                .header(CONTENT_TYPE, "text/plain")
                .body(Body::from("hello"))
                .expect("build request"),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let records = app.api_records().await;
    assert_eq!(records[0]["request_repr"]["body"], "Raw content");
}

#[tokio::test]
async fn oversized_body_is_marked_but_still_reaches_the_handler() {
    let app = test_app_with(|config| config.max_body_bytes = 16);

    let response = app
        .post_json(
            "/api/authors/",
            None,
            json!({ "name": "A rather long author name", "experience": 1 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["name"], "A rather long author name");

    let records = app.api_records().await;
    assert_eq!(records[0]["request_repr"]["body"], "Body too large");
    assert_eq!(records[0]["response_repr"]["body"], "Body too large");
}

#[tokio::test]
async fn repeated_query_keys_keep_the_last_value() {
    let app = test_app();

    app.get("/api/books/?page=1&page=2", None).await;

    let records = app.api_records().await;
    assert_eq!(records[0]["request_repr"]["query_params"], json!({ "page": "2" }));
    assert_eq!(records[0]["response_repr"]["body"], json!([]));
}

#[tokio::test]
async fn include_patterns_restrict_auditing() {
    let app = test_app_with(|config| config.registered_urls = vec!["^/api/books/".to_string()]);

    app.get("/api/authors/", None).await;
    app.get("/api/books/", None).await;
    app.get("/health", None).await;

    let records = app.api_records().await;
    let paths: Vec<&str> = records
        .iter()
        .filter_map(|record| record["request_repr"]["path"].as_str())
        .collect();
    assert_eq!(paths, vec!["/api/books/"]);
}

#[tokio::test]
async fn forwarded_proto_is_trusted_only_when_configured() {
    let forwarded = || {
        let mut request = request(Method::GET, "/health", None, None);
        request
            .headers_mut()
            .insert("x-forwarded-proto", "https".parse().expect("header"));
        request
    };

    let untrusting = test_app();
    untrusting.send(forwarded()).await;
    assert_eq!(untrusting.api_records().await[0]["protocol"], "http");

    let trusting = test_app_with(|config| config.trust_forwarded_proto = true);
    trusting.send(forwarded()).await;
    assert_eq!(trusting.api_records().await[0]["protocol"], "https");
}

#[tokio::test]
async fn error_responses_carry_the_status_line() {
    let app = test_app();

    let unknown_user = app.get("/api/authors/", Some("99")).await;
    assert_eq!(unknown_user.status, StatusCode::UNAUTHORIZED);

    let missing = app.get("/api/authors/no-such-author/", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let records = app.api_records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["error_message"], "401 Unauthorized");
    assert_eq!(records[0]["user_id"], "");
    assert!(records[0]["response_repr"].get("body").is_none());
    assert_eq!(records[1]["error_message"], "404 Not Found");
    assert_eq!(records[1]["response_repr"]["body"]["code"], "NOT_FOUND");
}

/// Emits one chunk, then never finishes.
struct EndlessStream {
    sent: bool,
}

impl HttpBody for EndlessStream {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.sent {
            return Poll::Pending;
        }
        self.sent = true;
        Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"data: tick\n\n")))))
    }
}

async fn event_stream() -> Response {
    Response::new(Body::new(EndlessStream { sent: false }))
}

#[tokio::test]
async fn streamed_responses_are_delivered_without_waiting_for_the_end() {
    let app = test_app();
    let router = Router::new()
        .route("/api/events/", get(event_stream))
        .layer(axum_middleware::from_fn_with_state(
            app.state.audit.clone(),
            audit_request,
        ));

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        router.oneshot(request(Method::GET, "/api/events/", Some(ADA), None)),
    )
    .await
    .expect("response head arrives while the stream is open")
    .expect("call router");
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("first chunk arrives")
        .expect("frame")
        .expect("data frame");
    assert_eq!(
        frame.into_data().expect("data").as_ref(),
        b"data: tick\n\n"
    );

    let records = app.api_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["request_repr"]["path"], "/api/events/");
    assert_eq!(records[0]["response_repr"]["body"], "Streaming content");
}
