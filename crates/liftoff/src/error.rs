use std::path::PathBuf;

use liftoff_core::{FetchError, SyncError, TransportError};
use thiserror::Error;

use crate::instance_lock::LockError;
use crate::phase::{IllegalTransition, Phase};
use crate::settings::ErrorMessages;

pub const DEFAULT_ERROR_TITLE: &str = "Error";
pub const DEFAULT_ERROR_HEADER: &str = "Unable to connect to application server.";
pub const DEFAULT_ERROR_BODY: &str = "Check your network connection and try again.";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("unknown launch class '{0}'")]
    UnknownLaunchClass(String),
    #[error("failed to construct '{launch_class}': {message}")]
    Construction {
        launch_class: String,
        message: String,
    },
    #[error("application {stage} failed: {message}")]
    Lifecycle {
        stage: &'static str,
        message: String,
    },
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    pub fn lifecycle(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Lifecycle {
            stage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("no manifest URI is configured and no release is cached")]
    NoManifestSource,
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl BootstrapError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// A bootstrap error together with the phase it surfaced in.
#[derive(Debug, Error)]
#[error("Error during {phase} phase: {error}")]
pub struct PhaseFailure {
    pub phase: Phase,
    #[source]
    pub error: BootstrapError,
}

impl PhaseFailure {
    pub fn new(phase: Phase, error: impl Into<BootstrapError>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }
}

/// What the user is shown when the bootstrap reports a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub title: String,
    pub header: String,
    pub body: String,
    pub detail: String,
}

impl ErrorReport {
    #[must_use]
    pub fn new(messages: &ErrorMessages, phase: Phase, error: &BootstrapError) -> Self {
        Self {
            title: text_or(messages.title.as_deref(), DEFAULT_ERROR_TITLE),
            header: text_or(messages.header.as_deref(), DEFAULT_ERROR_HEADER),
            body: text_or(messages.body.as_deref(), DEFAULT_ERROR_BODY),
            detail: format!("Error during {phase} phase: {error}"),
        }
    }

    #[must_use]
    pub fn from_failure(messages: &ErrorMessages, failure: &PhaseFailure) -> Self {
        Self::new(messages, failure.phase, &failure.error)
    }
}

fn text_or(custom: Option<&str>, fallback: &str) -> String {
    custom
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
