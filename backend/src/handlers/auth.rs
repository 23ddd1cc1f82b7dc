use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{
    context,
    error::AppError,
    models::user::UserContext,
    services::{push_usage_log, AuditLogger},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
}

/// Demo login: any id the directory knows is accepted. Every attempt is
/// recorded on the login channel.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let user_id = payload.user_id.trim();
    let Some(user) = state.users.resolve(user_id).await else {
        let mut extra = Map::new();
        extra.insert("attempted_user_id".to_string(), json!(user_id));
        record_usage(
            &state.audit.logger,
            "Login failed",
            "login",
            false,
            "Unknown user",
            extra,
        );
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    context::set_current_user(user.clone());
    record_usage(
        &state.audit.logger,
        "User logged in",
        "login",
        true,
        "",
        Map::new(),
    );

    let mut response = Json(user.clone()).into_response();
    response.extensions_mut().insert(user);
    Ok(response)
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(_user): Extension<UserContext>,
) -> StatusCode {
    record_usage(
        &state.audit.logger,
        "User logged out",
        "logout",
        true,
        "",
        Map::new(),
    );
    StatusCode::NO_CONTENT
}

pub async fn me(Extension(user): Extension<UserContext>) -> Json<UserContext> {
    Json(user)
}

/// Placeholder admin page; its path is excluded from request auditing.
pub async fn admin_login() -> Html<&'static str> {
    Html("<h1>Administration</h1>")
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn record_usage(
    logger: &AuditLogger,
    message: &str,
    event: &str,
    success: bool,
    error: &str,
    extra: Map<String, Value>,
) {
    if let Err(err) = push_usage_log(logger, message, event, success, error, extra) {
        tracing::warn!(error = %err, event, "Failed to record usage event");
    }
}
