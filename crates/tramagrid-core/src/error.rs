use thiserror::Error;

use crate::types::ImportStep;

#[derive(Debug, Error)]
pub enum TramaGridError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No active session")]
    NoSession,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server returned HTTP {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Server {
        status: u16,
        detail: Option<String>,
    },

    /// The server refused the operation with a human-readable reason.
    #[error("{0}")]
    Rejected(String),

    #[error("Invalid project: {0}")]
    InvalidDescriptor(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Import failed while trying to {step}: {source}")]
    Import {
        step: ImportStep,
        #[source]
        source: Box<TramaGridError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TramaGridError {
    /// True when the server definitively says the session no longer exists.
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::Server { status: 404 | 410, .. })
    }

    /// Server-supplied detail message, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Server { detail, .. } => detail.as_deref(),
            Self::Rejected(msg) => Some(msg),
            Self::Import { source, .. } => source.detail(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TramaGridError>;
