use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Missing or unusable filename, disallowed extension, or malformed upload body
    #[error("{message}")]
    InvalidInput { message: String },

    /// Upload exceeds the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// No stored file under the requested name
    #[error("File {filename} not found")]
    NotFound { filename: String },

    /// Requested byte range lies outside the stored file
    #[error("Requested range not satisfiable for file of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    /// Filesystem failure while reading or writing a stored file
    #[error("Failed to {operation}: {source}")]
    Storage {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body returned for every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub detail: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::Storage { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message sent to the client.
    ///
    /// Storage failures surface their underlying cause, matching what clients of the upload
    /// endpoint have always received. Anything else internal stays generic.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidInput { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::NotFound { .. } => "File not found".to_string(),
            Error::RangeNotSatisfiable { .. } => "Requested range not satisfiable".to_string(),
            Error::Storage { operation, source } => format!("Failed to {operation}: {source}"),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Storage { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::InvalidInput { .. } | Error::PayloadTooLarge { .. } | Error::NotFound { .. } | Error::RangeNotSatisfiable { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = Json(ErrorResponse {
            detail: self.user_message(),
        });

        let mut response = (status, body).into_response();
        if let Error::RangeNotSatisfiable { size } = &self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}

/// Type alias for gateway operation results
pub type Result<T> = std::result::Result<T, Error>;
