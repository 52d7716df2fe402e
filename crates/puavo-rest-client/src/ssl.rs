//! TLS trust selection for API server candidates
//!
//! Public servers are verified against the system CA bundle. Bootservers
//! found through DNS carry certificates issued by the organisation's own
//! root CA, so they are verified against that single CA file only.

use std::fs;
use std::path::{Path, PathBuf};

use reqwest::Certificate;
use reqwest::blocking::ClientBuilder;
use tracing::debug;

use crate::error::TransportError;

/// Default location of the organisation root CA
pub const DEFAULT_CA_FILE: &str = "/etc/puavo/certs/rootca.pem";

/// Which certificates a candidate's TLS peer is verified against
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustPolicy {
    /// System CA bundle
    Public,
    /// A single CA certificate file
    Custom(PathBuf),
}

impl TrustPolicy {
    pub fn public() -> Self {
        Self::Public
    }

    /// Custom policy pointed at [`DEFAULT_CA_FILE`]
    pub fn custom_default() -> Self {
        Self::Custom(PathBuf::from(DEFAULT_CA_FILE))
    }

    pub fn custom(ca_file: impl Into<PathBuf>) -> Self {
        Self::Custom(ca_file.into())
    }

    pub fn ca_file(&self) -> Option<&Path> {
        match self {
            Self::Public => None,
            Self::Custom(path) => Some(path),
        }
    }

    /// Load the material for this policy into a reusable context
    pub fn context(&self) -> Result<TrustContext, TransportError> {
        match self {
            Self::Public => Ok(TrustContext { root: None }),
            Self::Custom(path) => {
                let pem = fs::read(path).map_err(|source| TransportError::CaFile {
                    path: path.clone(),
                    source,
                })?;
                let root = Certificate::from_pem(&pem).map_err(|e| TransportError::InvalidCa {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                debug!("Loaded custom CA from {}", path.display());
                Ok(TrustContext { root: Some(root) })
            }
        }
    }
}

/// Loaded trust material, applied to each per-attempt HTTP client
#[derive(Clone, Debug)]
pub struct TrustContext {
    root: Option<Certificate>,
}

impl TrustContext {
    pub fn is_custom(&self) -> bool {
        self.root.is_some()
    }

    pub fn configure(&self, builder: ClientBuilder) -> ClientBuilder {
        match &self.root {
            None => builder,
            Some(root) => builder.tls_certs_only([root.clone()]),
        }
    }
}
