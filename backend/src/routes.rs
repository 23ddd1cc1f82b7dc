use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware, state::AppState};

/// Builds the publications API with request auditing around every route.
///
/// The audit layer sits outside authentication so the request context scope
/// is already in place when the caller is resolved.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::auth::health))
        .route("/admin/login/", get(handlers::auth::admin_login))
        .route("/api/auth/login/", post(handlers::auth::login));

    let api_routes = Router::new()
        .route(
            "/api/authors/",
            get(handlers::authors::list_authors).post(handlers::authors::create_author),
        )
        .route(
            "/api/authors/bulk-experience/",
            post(handlers::authors::bulk_update_experience),
        )
        .route(
            "/api/authors/{id}/",
            get(handlers::authors::get_author)
                .put(handlers::authors::update_author)
                .patch(handlers::authors::update_author)
                .delete(handlers::authors::delete_author),
        )
        .route(
            "/api/books/",
            get(handlers::books::list_books).post(handlers::books::create_book),
        )
        .route("/api/books/bulk/", post(handlers::books::bulk_create_books))
        .route(
            "/api/books/{id}/co-authors/",
            get(handlers::books::list_co_authors)
                .post(handlers::books::add_co_authors)
                .delete(handlers::books::remove_co_authors),
        )
        .route(
            "/api/books/{id}/co-authors/clear/",
            post(handlers::books::clear_co_authors),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::optional_auth,
        ));

    let user_routes = Router::new()
        .route("/api/auth/logout/", post(handlers::auth::logout))
        .route("/api/auth/me/", get(handlers::auth::me))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(user_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn_with_state(
                    state.clone(),
                    middleware::audit_request,
                )),
        )
        .with_state(state)
}
