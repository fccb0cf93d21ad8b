//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for the upload, download and stream endpoints
//! - **[`models`]**: Response bodies for API communication
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`. The document is served
//! at `/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
