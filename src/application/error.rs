use std::error::Error as StdError;

use thiserror::Error;

use crate::application::repos::{RenderError, StorageError};
use crate::config::LoadError;
use crate::domain::error::DomainError;
use crate::domain::paste::PasteId;
use crate::infra::error::InfraError;

/// Failure surfaced by [`PasteHandler`](crate::application::paste::PasteHandler) operations.
#[derive(Debug, Error)]
pub enum PasteHandlerError {
    #[error("paste storage failed")]
    Storage(#[source] StorageError),
    #[error("paste rendering failed")]
    Render(#[source] RenderError),
    #[error("render task aborted: {0}")]
    RenderAborted(String),
}

/// A durable-store failure raised inside a background task.
#[derive(Debug, Error)]
#[error("background `{operation}` for paste `{paste_id}` failed in storage")]
pub struct HandlerStorageFailure {
    pub operation: &'static str,
    pub paste_id: PasteId,
    #[source]
    pub source: StorageError,
}

/// Flattened chain of error messages for log output.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn joined(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Handler(#[from] PasteHandlerError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("paste `{0}` not found")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Message safe to show to the end user; never includes internal detail.
    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "Paste does not exist",
            AppError::Domain(_) | AppError::Validation(_) => "Request could not be processed",
            AppError::Handler(PasteHandlerError::Storage(_)) => "Paste storage is unavailable",
            AppError::Handler(_) => "Paste could not be rendered",
            AppError::Config(_) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::NotFound(_) => 2,
            AppError::Domain(_) | AppError::Validation(_) => 64,
            AppError::Config(_) => 78,
            _ => 1,
        }
    }
}
