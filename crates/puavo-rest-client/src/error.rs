//! Client error types for the puavo-rest client

use std::path::PathBuf;

/// Errors from the API server DNS service lookup
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Empty DNS response")]
    EmptyResponse,

    #[error(
        "Invalid value. {target} does not match with requested puavo domain {domain}. \
         Using master puavo-rest as fallback"
    )]
    DomainMismatch { target: String, domain: String },

    #[error("DNS lookup for {name} failed: {reason}")]
    Lookup { name: String, reason: String },
}

/// Failure of a single physical request attempt
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to read CA file {}: {source}", path.display())]
    CaFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid CA certificate in {}: {reason}", path.display())]
    InvalidCa { path: PathBuf, reason: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Connection(String),
}

/// Error type for puavo-rest client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("required configuration file {} is missing", path.display())]
    ConfigMissing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("invalid server address {value}: {source}")]
    InvalidUrl {
        value: String,
        source: url::ParseError,
    },

    #[error("no API server candidates available")]
    NoCandidates,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("auth failed: {0}")]
    AuthFailed(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub(crate) fn invalid_option(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from the network layer of a request attempt
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
