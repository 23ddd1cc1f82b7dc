#![allow(dead_code)]
use activity_audit::{
    build_router,
    config::{AuditConfig, ChannelConfig, Config},
    models::user::UserContext,
    services::{router::RouterHandle, user_directory::StaticUserResolver},
    AppState, AuditState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::{fs, path::Path, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADA: &str = "1";
pub const ALAN: &str = "2";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub config: AuditConfig,
    handle: Option<RouterHandle>,
    _dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub raw: Vec<u8>,
}

pub fn test_users() -> StaticUserResolver {
    StaticUserResolver::new()
        .with_user(UserContext {
            id: Some(ADA.into()),
            email: Some("ada@example.com".into()),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            ..UserContext::default()
        })
        .with_user(UserContext {
            id: Some(ALAN.into()),
            email: Some("alan@example.com".into()),
            first_name: Some("Alan".into()),
            last_name: Some("Turing".into()),
            ..UserContext::default()
        })
}

pub fn test_app() -> TestApp {
    test_app_with(|_| {})
}

/// Builds the app with its log directory in a fresh temp dir; `customize`
/// can adjust the audit configuration first.
pub fn test_app_with(customize: impl FnOnce(&mut AuditConfig)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AuditConfig {
        service_name: "publications".to_string(),
        log_dir: dir.path().to_path_buf(),
        ..AuditConfig::default()
    };
    customize(&mut config);

    let (audit, handle) = AuditState::start(&config).expect("start audit");
    let service_config = Config {
        bind_addr: "127.0.0.1:0".to_string(),
        audit: config.clone(),
    };
    let state = AppState::new(service_config, audit, Arc::new(test_users()));
    TestApp {
        router: build_router(state.clone()),
        state,
        config,
        handle: Some(handle),
        _dir: dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("call app");
        let status = response.status();
        let raw = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body")
            .to_vec();
        let body = serde_json::from_slice(&raw).unwrap_or(Value::Null);
        TestResponse { status, body, raw }
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> TestResponse {
        self.send(request(Method::GET, uri, user, None)).await
    }

    pub async fn post_json(&self, uri: &str, user: Option<&str>, body: Value) -> TestResponse {
        self.send(request(Method::POST, uri, user, Some(body))).await
    }

    pub async fn create_author(&self, user: Option<&str>, name: &str) -> Value {
        let response = self
            .post_json(
                "/api/authors/",
                user,
                serde_json::json!({ "name": name, "experience": 3 }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        response.body
    }

    pub async fn flush(&self) {
        self.state.audit.logger.flush().await.expect("flush audit log");
    }

    /// Every record written so far to the file of `channel`, oldest first.
    pub async fn records(&self, channel: &ChannelConfig) -> Vec<Value> {
        self.flush().await;
        read_records(&self.config.path_for(channel))
    }

    pub async fn api_records(&self) -> Vec<Value> {
        self.records(&self.config.api_log).await
    }

    pub async fn model_records(&self) -> Vec<Value> {
        self.records(&self.config.model_log).await
    }

    pub async fn login_records(&self) -> Vec<Value> {
        self.records(&self.config.login_log).await
    }

    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

pub fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request"),
        None => builder.body(Body::empty()).expect("build request"),
    }
}

pub fn read_records(path: &Path) -> Vec<Value> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("record is JSON"))
            .collect(),
        Err(_) => Vec::new(),
    }
}
