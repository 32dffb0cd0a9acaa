//! Router for the `/1.0` API.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::{aliases, images, info, operations};

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/1.0", get(info::get))
        .route(
            "/1.0/images",
            get(images::list)
                .post(images::create)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/1.0/images/aliases",
            get(aliases::list).post(aliases::create),
        )
        .route(
            "/1.0/images/aliases/*name",
            get(aliases::get).delete(aliases::delete),
        )
        .route(
            "/1.0/images/:fingerprint",
            get(images::get).put(images::update).delete(images::delete),
        )
        .route("/1.0/images/:fingerprint/export", get(images::export))
        .route("/1.0/images/:fingerprint/secret", post(images::secret))
        .route("/1.0/operations", get(operations::list))
        .route(
            "/1.0/operations/:id",
            get(operations::get).delete(operations::cancel),
        )
        .route("/1.0/operations/:id/wait", get(operations::wait))
        .with_state(state)
}
