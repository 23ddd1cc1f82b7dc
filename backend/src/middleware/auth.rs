use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::{context, models::user::UserContext, services::user_directory::UserResolver};

pub const USER_ID_HEADER: &str = "x-user-id";

/// Requires a known caller. The resolved user becomes the current user and
/// is attached to both the request and the response.
pub async fn auth(
    State(users): State<Arc<dyn UserResolver>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user_id = extract_user_id(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    let user = authenticate_request(&user_id, users.as_ref()).await?;

    context::set_current_user(user.clone());
    request.extensions_mut().insert(user.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(user);
    Ok(response)
}

/// Same as [`auth`] but lets anonymous callers through.
pub async fn optional_auth(
    State(users): State<Arc<dyn UserResolver>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(user_id) = extract_user_id(request.headers()) else {
        return Ok(next.run(request).await);
    };
    let user = authenticate_request(&user_id, users.as_ref()).await?;

    context::set_current_user(user.clone());
    request.extensions_mut().insert(user.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(user);
    Ok(response)
}

fn extract_user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

async fn authenticate_request(
    user_id: &str,
    users: &dyn UserResolver,
) -> Result<UserContext, StatusCode> {
    match users.resolve(user_id).await {
        Some(user) => Ok(user),
        None => {
            tracing::debug!(user_id, "Rejected unknown user");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
