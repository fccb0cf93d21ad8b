//! Test utilities for handler and router tests.

use crate::AppState;
use crate::config::{Config, StorageConfig};
use crate::storage::LocalFileStorage;
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use std::path::Path;

/// Default config pointed at `directory`, with metrics off so tests don't fight over the global
/// Prometheus recorder.
pub fn create_test_config(directory: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        storage: StorageConfig {
            directory: directory.to_path_buf(),
            ..Default::default()
        },
        enable_metrics: false,
        enable_otel_export: false,
    }
}

pub async fn create_test_state(config: Config) -> AppState {
    let storage = LocalFileStorage::open(&config.storage.directory)
        .await
        .expect("Failed to open test storage");

    AppState::builder().config(config).storage(storage).build()
}

pub async fn create_test_app(directory: &Path) -> TestServer {
    let state = create_test_state(create_test_config(directory)).await;
    let router = crate::build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// Multipart body with `content` in the `file` field under `filename`
pub fn upload_form(filename: &str, content: Vec<u8>) -> MultipartForm {
    let part = Part::bytes(content).file_name(filename.to_string()).mime_type("audio/wav");
    MultipartForm::new().add_part("file", part)
}
