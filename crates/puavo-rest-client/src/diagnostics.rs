//! Opt-in request diagnostics
//!
//! Each client owns a [`Diagnostics`] value instead of consulting a
//! process-wide flag. Events go to the `puavo_rest_client::verbose` target
//! of whatever `tracing` subscriber the application installed.

use tracing::info;

use crate::transport::{PreparedRequest, Response};

/// Tracing target for diagnostic events
pub const VERBOSE_TARGET: &str = "puavo_rest_client::verbose";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    enabled: bool,
}

impl Diagnostics {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn request(&self, request: &PreparedRequest) {
        if !self.enabled {
            return;
        }
        info!(target: VERBOSE_TARGET, "{} {}", request.method, request.url);
        // sensitive values print as "Sensitive"
        info!(target: VERBOSE_TARGET, "REQUEST HEADERS: {:?}", request.headers);
    }

    pub fn response(&self, response: &Response) {
        if self.enabled {
            info!(target: VERBOSE_TARGET, "HTTP STATUS {}", response.status.as_u16());
        }
    }

    pub fn candidates(&self, uris: &[String]) {
        if self.enabled {
            info!(target: VERBOSE_TARGET, "API server candidates: {}", uris.join(", "));
        }
    }
}
