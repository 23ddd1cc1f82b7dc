use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::author::{Author, BulkExperiencePayload, CreateAuthorPayload, UpdateAuthorPayload},
    repositories::Repository,
    state::AppState,
};

pub async fn list_authors(State(state): State<AppState>) -> Result<Json<Vec<Author>>, AppError> {
    let authors = state.authors.find_all().await?;
    Ok(Json(authors))
}

pub async fn create_author(
    State(state): State<AppState>,
    Json(payload): Json<CreateAuthorPayload>,
) -> Result<(StatusCode, Json<Author>), AppError> {
    payload.validate()?;

    let author = state
        .authors
        .create(Author::new(payload.name, payload.experience))
        .await?;
    tracing::info!(author_id = %author.id, "Author created");
    Ok((StatusCode::CREATED, Json(author)))
}

pub async fn get_author(
    State(state): State<AppState>,
    Path(author_id): Path<String>,
) -> Result<Json<Author>, AppError> {
    let author = state.authors.find_by_id(&author_id).await?;
    Ok(Json(author))
}

pub async fn update_author(
    State(state): State<AppState>,
    Path(author_id): Path<String>,
    Json(payload): Json<UpdateAuthorPayload>,
) -> Result<Json<Author>, AppError> {
    payload.validate()?;

    let mut author = state.authors.find_by_id(&author_id).await?;
    payload.apply(&mut author);
    let author = state.authors.save(author).await?;
    Ok(Json(author))
}

pub async fn delete_author(
    State(state): State<AppState>,
    Path(author_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let author = state.authors.delete(&author_id).await?;
    tracing::info!(author_id = %author.id, "Author deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Sets the same experience on several authors in one batch.
pub async fn bulk_update_experience(
    State(state): State<AppState>,
    Json(payload): Json<BulkExperiencePayload>,
) -> Result<Json<Vec<Author>>, AppError> {
    payload.validate()?;

    let mut authors = Vec::with_capacity(payload.author_ids.len());
    for author_id in &payload.author_ids {
        let mut author = state.authors.find_by_id(&author_id.to_string()).await?;
        author.experience = payload.experience;
        author.updated_at = chrono::Utc::now();
        authors.push(author);
    }

    let authors = state.authors.bulk_update(authors, &["experience"]).await?;
    Ok(Json(authors))
}
