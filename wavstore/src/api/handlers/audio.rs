use crate::AppState;
use crate::api::models::audio::UploadResponse;
use crate::config::StorageConfig;
use crate::errors::{Error, ErrorResponse, Result};
use crate::range::{self, RangeRequest};
use crate::storage::{StorageKey, StoredFile};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::BytesMut;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};

/// Media type of every stored file
pub const AUDIO_CONTENT_TYPE: &str = "audio/wav";

/// Characters left unescaped in an RFC 5987 `filename*` value
const FILENAME_ATTR_CHARS: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Check an uploaded filename against the storage rules and turn it into a storage key.
///
/// Order matters: a missing name is reported before a bad extension, which is reported before
/// the name is checked for path components.
pub fn validate_upload_filename(filename: &str, config: &StorageConfig) -> Result<StorageKey> {
    if filename.is_empty() {
        return Err(Error::InvalidInput {
            message: "No filename provided".to_string(),
        });
    }

    let extension = std::path::Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()));
    let allowed = extension
        .as_deref()
        .is_some_and(|ext| config.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)));
    if !allowed {
        return Err(Error::InvalidInput {
            message: format!("File type not allowed. Allowed types: {}", config.allowed_extensions_display()),
        });
    }

    StorageKey::parse(filename).ok_or_else(|| Error::InvalidInput {
        message: "Invalid filename: must be a plain file name without path components".to_string(),
    })
}

fn payload_too_large(max_file_size: u64) -> Error {
    const MIB: u64 = 1024 * 1024;
    let limit = if max_file_size >= MIB {
        format!("{}MB", max_file_size / MIB)
    } else {
        format!("{max_file_size} bytes")
    };
    Error::PayloadTooLarge {
        message: format!("File too large. Maximum size: {limit}"),
    }
}

fn multipart_error(e: MultipartError, max_file_size: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return payload_too_large(max_file_size);
    }
    Error::InvalidInput {
        message: format!("Failed to parse multipart data: {}", e),
    }
}

#[utoipa::path(
    post,
    path = "/upload/",
    tag = "audio",
    summary = "Upload audio file",
    description = "Upload a WAV file as the multipart field `file`. The file is stored under its original filename, replacing any existing file with the same name.",
    request_body(
        content_type = "multipart/form-data",
        description = "Multipart form with a single `file` field"
    ),
    responses(
        (status = 200, description = "File uploaded successfully", body = UploadResponse),
        (status = 400, description = "Missing filename or file type not allowed", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 500, description = "File could not be saved", body = ErrorResponse)
    )
)]
#[instrument(skip_all)]
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let storage_config = &state.config.storage;
    let max_file_size = storage_config.max_file_size;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| multipart_error(e, max_file_size))? {
        if field.name() != Some("file") {
            // Ignore unknown fields
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let key = validate_upload_filename(&filename, storage_config)?;

        debug!(filename = %key, "Receiving upload");

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max_file_size))? {
            // Check size limit incrementally to fail fast
            if (data.len() + chunk.len()) as u64 > max_file_size {
                tracing::warn!(
                    filename = %key,
                    received = data.len() + chunk.len(),
                    max_file_size = max_file_size,
                    "File size limit exceeded, aborting upload"
                );
                return Err(payload_too_large(max_file_size));
            }
            data.extend_from_slice(&chunk);
        }

        let file_size = state.storage.store(&key, &data).await?;

        info!(filename = %key, file_size = file_size, "File uploaded");

        return Ok(Json(UploadResponse::new(filename, file_size)));
    }

    Err(Error::InvalidInput {
        message: "Missing required field: 'file'".to_string(),
    })
}

/// Look up a stored file by the exact name from the request path.
async fn open_stored(state: &AppState, filename: &str) -> Result<StoredFile> {
    // A name that could never have been stored cannot exist
    let key = StorageKey::parse(filename).ok_or_else(|| Error::NotFound {
        filename: filename.to_string(),
    })?;
    state.storage.open(&key).await
}

/// Quoted `filename` when the name needs no escaping, RFC 5987 `filename*` otherwise.
fn content_disposition(filename: &str) -> HeaderValue {
    let encoded = utf8_percent_encode(filename, FILENAME_ATTR_CHARS).to_string();
    let value = if encoded == filename {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!("attachment; filename*=utf-8''{encoded}")
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Response carrying stored file content with the headers shared by download and stream.
fn file_response(filename: &str, status: StatusCode, content_length: u64, body: Body) -> Result<Response> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::CONTENT_DISPOSITION, content_disposition(filename))
        .body(body)
        .map_err(|e| Error::Other(e.into()))
}

#[utoipa::path(
    get,
    path = "/download/{filename}",
    tag = "audio",
    summary = "Download audio file",
    description = "Returns the full content of a stored file as an attachment.",
    responses(
        (status = 200, description = "File content", content_type = "audio/wav", body = Vec<u8>),
        (status = 404, description = "File not found", body = ErrorResponse)
    ),
    params(
        ("filename" = String, Path, description = "Exact name the file was uploaded under")
    )
)]
#[instrument(skip(state))]
pub async fn download_file(State(state): State<AppState>, Path(filename): Path<String>) -> Result<Response> {
    let stored = open_stored(&state, &filename).await?;

    debug!(size = stored.size, "Serving download");

    let body = Body::from_stream(ReaderStream::new(stored.content));
    file_response(&filename, StatusCode::OK, stored.size, body)
}

#[utoipa::path(
    get,
    path = "/stream/{filename}",
    tag = "audio",
    summary = "Stream audio file",
    description = "Returns a stored file for playback. A single `Range: bytes=...` request header is honored with a 206 partial response.",
    responses(
        (status = 200, description = "Full file content", content_type = "audio/wav", body = Vec<u8>),
        (status = 206, description = "Requested byte range", content_type = "audio/wav", body = Vec<u8>),
        (status = 404, description = "File not found", body = ErrorResponse),
        (status = 416, description = "Requested range not satisfiable", body = ErrorResponse)
    ),
    params(
        ("filename" = String, Path, description = "Exact name the file was uploaded under"),
        ("Range" = Option<String>, Header, description = "Single byte range, e.g. `bytes=0-1023`")
    )
)]
#[instrument(skip(state, headers))]
pub async fn stream_file(State(state): State<AppState>, Path(filename): Path<String>, headers: HeaderMap) -> Result<Response> {
    let mut stored = open_stored(&state, &filename).await?;

    let mut response = match range::resolve(headers.get(header::RANGE), stored.size) {
        RangeRequest::Full => {
            debug!(size = stored.size, "Streaming full file");
            let body = Body::from_stream(ReaderStream::new(stored.content));
            file_response(&filename, StatusCode::OK, stored.size, body)?
        }
        RangeRequest::Partial(byte_range) => {
            debug!(start = byte_range.start, end = byte_range.end, size = stored.size, "Streaming byte range");
            stored.content.seek(SeekFrom::Start(byte_range.start)).await.map_err(|source| Error::Storage {
                operation: "read file".to_string(),
                source,
            })?;
            let body = Body::from_stream(ReaderStream::new(stored.content.take(byte_range.len())));
            let mut response = file_response(&filename, StatusCode::PARTIAL_CONTENT, byte_range.len(), body)?;
            if let Ok(value) = HeaderValue::from_str(&byte_range.content_range(stored.size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        RangeRequest::Unsatisfiable => return Err(Error::RangeNotSatisfiable { size: stored.size }),
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_app, create_test_config, create_test_state, upload_form};
    use axum_test::TestServer;
    use serde_json::Value;

    fn wav_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn upload(server: &TestServer, filename: &str, content: Vec<u8>) -> axum_test::TestResponse {
        server.post("/upload/").multipart(upload_form(filename, content)).await
    }

    #[test]
    fn test_validate_upload_filename() {
        let config = StorageConfig::default();

        assert_eq!(validate_upload_filename("test.wav", &config).unwrap().as_str(), "test.wav");
        assert_eq!(validate_upload_filename("LOUD.WAV", &config).unwrap().as_str(), "LOUD.WAV");

        let cases = [
            ("", "No filename provided"),
            ("song.mp3", "File type not allowed. Allowed types: .wav"),
            ("wav", "File type not allowed"),
            (".wav", "File type not allowed"),
            ("song.wav.mp3", "File type not allowed"),
            ("../evil.wav", "Invalid filename"),
            ("nested/dir.wav", "Invalid filename"),
        ];
        for (filename, expected) in cases {
            let err = validate_upload_filename(filename, &config).unwrap_err();
            assert!(matches!(err, Error::InvalidInput { .. }), "{filename:?}: {err:?}");
            assert!(err.user_message().contains(expected), "{filename:?}: {}", err.user_message());
        }
    }

    #[test]
    fn test_payload_too_large_message() {
        assert_eq!(payload_too_large(15 * 1024 * 1024).user_message(), "File too large. Maximum size: 15MB");
        assert_eq!(payload_too_large(512).user_message(), "File too large. Maximum size: 512 bytes");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(content_disposition("test.wav"), "attachment; filename=\"test.wav\"");
        assert_eq!(content_disposition("take_2-final~v1.wav"), "attachment; filename=\"take_2-final~v1.wav\"");
        assert_eq!(content_disposition("my song.wav"), "attachment; filename*=utf-8''my%20song.wav");
        assert_eq!(content_disposition("café.wav"), "attachment; filename*=utf-8''caf%C3%A9.wav");
        assert_eq!(content_disposition("say \"hi\".wav"), "attachment; filename*=utf-8''say%20%22hi%22.wav");
    }

    #[test_log::test(tokio::test)]
    async fn test_upload_success() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        let response = upload(&server, "test.wav", wav_bytes(1024)).await;

        response.assert_status_ok();
        response.assert_json(&serde_json::json!({
            "message": "File uploaded successfully",
            "filename": "test.wav",
            "file_size": 1024
        }));
        assert_eq!(std::fs::read(dir.path().join("test.wav")).unwrap(), wav_bytes(1024));
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        upload(&server, "test.wav", wav_bytes(1024)).await.assert_status_ok();

        let response = server.get("/download/test.wav").await;

        response.assert_status_ok();
        assert_eq!(response.header("content-type"), "audio/wav");
        assert_eq!(response.header("content-length"), "1024");
        assert_eq!(response.header("content-disposition"), "attachment; filename=\"test.wav\"");
        assert_eq!(response.as_bytes().to_vec(), wav_bytes(1024));
    }

    #[tokio::test]
    async fn test_upload_uppercase_extension_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        let response = upload(&server, "SHOUT.WAV", wav_bytes(16)).await;

        response.assert_status_ok();
        server.get("/download/SHOUT.WAV").await.assert_status_ok();
        // lookup is by exact name
        server.get("/download/shout.wav").await.assert_status_not_found();
    }

    #[tokio::test]
    async fn test_upload_disallowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        let response = upload(&server, "song.mp3", wav_bytes(1024)).await;

        response.assert_status_bad_request();
        let body: Value = response.json();
        assert!(body["detail"].as_str().unwrap().contains("File type not allowed"));
        assert!(!dir.path().join("song.mp3").exists());
    }

    #[tokio::test]
    async fn test_upload_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let server = create_test_app(&uploads).await;

        let response = upload(&server, "../evil.wav", wav_bytes(8)).await;

        response.assert_status_bad_request();
        assert!(!dir.path().join("evil.wav").exists());
    }

    #[tokio::test]
    async fn test_upload_without_filename() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        let part = axum_test::multipart::Part::bytes(wav_bytes(32));
        let response = server
            .post("/upload/")
            .multipart(axum_test::multipart::MultipartForm::new().add_part("file", part))
            .await;

        response.assert_status_bad_request();
        response.assert_json(&serde_json::json!({ "detail": "No filename provided" }));
    }

    #[tokio::test]
    async fn test_upload_missing_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        let response = server
            .post("/upload/")
            .multipart(axum_test::multipart::MultipartForm::new().add_text("purpose", "audio"))
            .await;

        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["detail"], "Missing required field: 'file'");
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        let response = upload(&server, "big.wav", vec![0u8; 15 * 1024 * 1024 + 1]).await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        let body: Value = response.json();
        assert_eq!(body["detail"], "File too large. Maximum size: 15MB");
        assert!(!dir.path().join("big.wav").exists());
    }

    #[tokio::test]
    async fn test_upload_exactly_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config(dir.path());
        config.storage.max_file_size = 4096;
        let state = create_test_state(config).await;
        let server = TestServer::new(crate::build_router(&state).unwrap()).unwrap();

        upload(&server, "edge.wav", wav_bytes(4096)).await.assert_status_ok();
        upload(&server, "over.wav", wav_bytes(4097))
            .await
            .assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_upload_oversized_disallowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        // The filename is checked before any content is read
        let response = upload(&server, "big.mp3", vec![0u8; 15 * 1024 * 1024 + 1]).await;

        response.assert_status_bad_request();
        let body: Value = response.json();
        assert!(body["detail"].as_str().unwrap().contains("File type not allowed"));
    }

    #[tokio::test]
    async fn test_body_over_limit_before_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config(dir.path());
        config.storage.max_file_size = 4096;
        let state = create_test_state(config).await;
        let server = TestServer::new(crate::build_router(&state).unwrap()).unwrap();

        // Body limit is max_file_size plus multipart headroom; the leading field alone exceeds it
        let form = axum_test::multipart::MultipartForm::new()
            .add_text("padding", "x".repeat(256 * 1024))
            .add_part(
                "file",
                axum_test::multipart::Part::bytes(wav_bytes(16)).file_name("song.mp3"),
            );
        let response = server.post("/upload/").multipart(form).await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        response.assert_json(&serde_json::json!({ "detail": "File too large. Maximum size: 4096 bytes" }));
    }

    #[tokio::test]
    async fn test_upload_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let server = create_test_app(&uploads).await;
        std::fs::remove_dir(&uploads).unwrap();

        let response = upload(&server, "test.wav", wav_bytes(64)).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert!(body["detail"].as_str().unwrap().starts_with("Failed to save file: "));
    }

    #[tokio::test]
    async fn test_upload_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        upload(&server, "take.wav", b"first take".to_vec()).await.assert_status_ok();
        upload(&server, "take.wav", b"second".to_vec()).await.assert_status_ok();

        let response = server.get("/download/take.wav").await;
        assert_eq!(response.as_bytes().to_vec(), b"second".to_vec());
    }

    #[tokio::test]
    async fn test_download_missing() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        let response = server.get("/download/missing.wav").await;

        response.assert_status_not_found();
        response.assert_json(&serde_json::json!({ "detail": "File not found" }));
    }

    #[tokio::test]
    async fn test_stream_missing() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;

        server.get("/stream/missing.wav").await.assert_status_not_found();
    }

    #[tokio::test]
    async fn test_stream_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;
        upload(&server, "track.wav", wav_bytes(1024)).await.assert_status_ok();

        let response = server.get("/stream/track.wav").await;

        response.assert_status_ok();
        assert_eq!(response.header("content-type"), "audio/wav");
        assert_eq!(response.header("accept-ranges"), "bytes");
        assert_eq!(response.header("cache-control"), "no-cache");
        assert_eq!(response.header("content-disposition"), "attachment; filename=\"track.wav\"");
        assert_eq!(response.as_bytes().to_vec(), wav_bytes(1024));
    }

    #[test_log::test(tokio::test)]
    async fn test_stream_byte_range() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;
        upload(&server, "track.wav", wav_bytes(1024)).await.assert_status_ok();

        let response = server.get("/stream/track.wav").add_header("range", "bytes=100-199").await;

        response.assert_status(StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.header("content-range"), "bytes 100-199/1024");
        assert_eq!(response.header("content-length"), "100");
        assert_eq!(response.header("accept-ranges"), "bytes");
        assert_eq!(response.as_bytes().to_vec(), wav_bytes(1024)[100..200].to_vec());
    }

    #[tokio::test]
    async fn test_stream_suffix_range() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;
        upload(&server, "track.wav", wav_bytes(1024)).await.assert_status_ok();

        let response = server.get("/stream/track.wav").add_header("range", "bytes=-24").await;

        response.assert_status(StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.header("content-range"), "bytes 1000-1023/1024");
        assert_eq!(response.as_bytes().to_vec(), wav_bytes(1024)[1000..].to_vec());
    }

    #[tokio::test]
    async fn test_stream_unsatisfiable_range() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;
        upload(&server, "track.wav", wav_bytes(1024)).await.assert_status_ok();

        let response = server.get("/stream/track.wav").add_header("range", "bytes=4096-").await;

        response.assert_status(StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.header("content-range"), "bytes */1024");
    }

    #[tokio::test]
    async fn test_download_ignores_range() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;
        upload(&server, "track.wav", wav_bytes(64)).await.assert_status_ok();

        let response = server.get("/download/track.wav").add_header("range", "bytes=0-9").await;

        response.assert_status_ok();
        assert_eq!(response.as_bytes().len(), 64);
    }

    #[tokio::test]
    async fn test_file_placed_out_of_band_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let server = create_test_app(dir.path()).await;
        std::fs::write(dir.path().join("notes.txt"), b"not audio").unwrap();

        let response = server.get("/download/notes.txt").await;

        response.assert_status_ok();
        assert_eq!(response.header("content-type"), "audio/wav");
        assert_eq!(response.as_bytes().to_vec(), b"not audio".to_vec());
    }
}
