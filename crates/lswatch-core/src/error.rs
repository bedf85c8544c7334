//! Errors surfaced by backend managers and the watcher.

use lswatch_config::BackendType;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while driving a language server backend.
#[derive(Debug, Error)]
pub enum LanguageServerError {
    /// `start_language_server` was called twice on the same manager.
    #[error("Language server already started")]
    AlreadyStarted,

    /// The backend session could not be started.
    #[error("Failed to start {backend} language server: {message}")]
    StartFailed {
        backend: BackendType,
        message: String,
    },

    /// The manager was disposed before its start completed.
    #[error("Language server start was cancelled")]
    Cancelled,
}

impl LanguageServerError {
    /// Wrap a backend startup failure.
    pub fn start_failed(backend: BackendType, error: impl fmt::Display) -> Self {
        LanguageServerError::StartFailed {
            backend,
            message: error.to_string(),
        }
    }
}
