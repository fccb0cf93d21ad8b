use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Message returned for every successful upload
pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded successfully";

/// Result of a successful upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    #[schema(example = "File uploaded successfully")]
    pub message: String,
    /// Name the file is stored and retrieved under
    #[schema(example = "test.wav")]
    pub filename: String,
    /// Number of bytes written
    #[schema(example = 1024)]
    pub file_size: u64,
}

impl UploadResponse {
    pub fn new(filename: String, file_size: u64) -> Self {
        Self {
            message: UPLOAD_SUCCESS_MESSAGE.to_string(),
            filename,
            file_size,
        }
    }
}
