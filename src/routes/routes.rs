//! Defines routes for the image API.
//!
//! ## Structure
//! - `GET    /health`                      — liveness
//! - `GET    /readyz`                      — readiness (database + object store)
//! - `POST   /images`                      — upload (JSON base64 or multipart form)
//! - `GET    /images`                      — list an owner's images (filters, pagination)
//! - `GET    /images/{image_id}`           — image metadata
//! - `GET    /images/{image_id}/download`  — image payload (base64)
//! - `DELETE /images/{image_id}`           — delete payload and metadata
//!
//! Every response carries `Access-Control-Allow-Origin: *`.

use crate::{
    handlers::{
        health_handlers::{health, readyz},
        image_handlers::{delete_image, download_image, get_image, list_images, upload_image},
    },
    services::image_service::ImageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    routing::get,
};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

/// Route table, still waiting for its `ImageService` state.
pub fn routes() -> Router<ImageService> {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/images", get(list_images).post(upload_image))
        .route("/images/{image_id}", get(get_image).delete(delete_image))
        .route("/images/{image_id}/download", get(download_image))
}

/// Fully layered application router.
pub fn app(service: ImageService, max_upload_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
