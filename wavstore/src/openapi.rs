//! OpenAPI documentation for the audio endpoints, served at `/openapi.json` and rendered at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::errors::ErrorResponse;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "wavstore",
        description = "Upload, download and stream WAV audio files. Files are addressed by the exact filename they were uploaded under."
    ),
    paths(
        api::handlers::audio::upload_file,
        api::handlers::audio::download_file,
        api::handlers::audio::stream_file,
    ),
    components(schemas(api::models::audio::UploadResponse, ErrorResponse)),
    tags(
        (name = "audio", description = "Audio file storage and retrieval"),
    )
)]
pub struct ApiDoc;
