use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use validator::Validate;

use crate::{
    error::AppError,
    models::book::{Book, BulkCreateBooksPayload, CoAuthorsPayload, CreateBookPayload},
    repositories::Repository,
    state::AppState,
    types::AuthorId,
};

pub const CO_AUTHORS_FIELD: &str = "co_authors";

#[derive(Debug, Serialize)]
pub struct CoAuthorsResponse {
    pub book_id: String,
    pub author_ids: Vec<String>,
}

pub async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>, AppError> {
    let books = state.books.find_all().await?;
    Ok(Json(books))
}

pub async fn create_book(
    State(state): State<AppState>,
    Json(payload): Json<CreateBookPayload>,
) -> Result<(StatusCode, Json<Book>), AppError> {
    payload.validate()?;
    ensure_authors_exist(&state, std::slice::from_ref(&payload.author_id)).await?;

    let book = state.books.create(Book::from(payload)).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn bulk_create_books(
    State(state): State<AppState>,
    Json(payload): Json<BulkCreateBooksPayload>,
) -> Result<(StatusCode, Json<Vec<Book>>), AppError> {
    payload.validate()?;
    let author_ids: Vec<AuthorId> = payload.books.iter().map(|book| book.author_id).collect();
    ensure_authors_exist(&state, &author_ids).await?;

    let books = state
        .books
        .bulk_create(payload.books.into_iter().map(Book::from).collect())
        .await?;
    Ok((StatusCode::CREATED, Json(books)))
}

pub async fn list_co_authors(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<CoAuthorsResponse>, AppError> {
    state.books.find_by_id(&book_id).await?;
    co_authors_response(&state, book_id).await
}

pub async fn add_co_authors(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Json(payload): Json<CoAuthorsPayload>,
) -> Result<Json<CoAuthorsResponse>, AppError> {
    ensure_authors_exist(&state, &payload.author_ids).await?;
    state
        .books
        .add_related(&book_id, CO_AUTHORS_FIELD, id_strings(&payload.author_ids))
        .await?;
    co_authors_response(&state, book_id).await
}

pub async fn remove_co_authors(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Json(payload): Json<CoAuthorsPayload>,
) -> Result<Json<CoAuthorsResponse>, AppError> {
    state
        .books
        .remove_related(&book_id, CO_AUTHORS_FIELD, id_strings(&payload.author_ids))
        .await?;
    co_authors_response(&state, book_id).await
}

pub async fn clear_co_authors(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<CoAuthorsResponse>, AppError> {
    state.books.clear_related(&book_id, CO_AUTHORS_FIELD).await?;
    co_authors_response(&state, book_id).await
}

async fn ensure_authors_exist(state: &AppState, author_ids: &[AuthorId]) -> Result<(), AppError> {
    for author_id in author_ids {
        state
            .authors
            .find_by_id(&author_id.to_string())
            .await
            .map_err(|_| AppError::BadRequest(format!("Unknown author {}", author_id)))?;
    }
    Ok(())
}

async fn co_authors_response(
    state: &AppState,
    book_id: String,
) -> Result<Json<CoAuthorsResponse>, AppError> {
    let author_ids = state.books.related(&book_id, CO_AUTHORS_FIELD).await;
    Ok(Json(CoAuthorsResponse {
        book_id,
        author_ids,
    }))
}

fn id_strings(ids: &[AuthorId]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}
