//! HTTP handlers for all API endpoints.
//!
//! - [`audio`]: Audio file upload, download and streaming
//!
//! Handlers return [`crate::errors::Error`] which converts to the matching HTTP status code and a
//! `{"detail": ...}` JSON body.

pub mod audio;
