//! Authorization header computation
//!
//! The header is computed for every physical request attempt and never
//! stored on the client. Negotiated tokens are single-use, so each attempt
//! runs a fresh security-context negotiation.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::HeaderValue;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::options::AuthMode;

/// Header value used for requests from a trusted network segment
pub const BOOTSERVER_TOKEN: &str = "Bootserver";

/// Kerberos service name of the API servers
pub const NEGOTIATION_SERVICE: &str = "HTTP";

/// Principal and secret for HTTP basic auth
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    user: String,
    password: String,
}

impl BasicCredentials {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn header_value(&self) -> Result<HeaderValue> {
        let encoded = STANDARD.encode(format!("{}:{}", self.user, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| ClientError::AuthFailed(format!("invalid basic credentials: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Produces the initial output token of a new security context
///
/// Implementations must start a new context on every call.
pub trait Negotiator: Send + Sync {
    fn init_context(&self, service_host: &str) -> Result<Vec<u8>>;
}

/// Negotiator used when the crate is built without GSSAPI support
#[derive(Debug, Default)]
pub struct UnsupportedNegotiator;

impl Negotiator for UnsupportedNegotiator {
    fn init_context(&self, _service_host: &str) -> Result<Vec<u8>> {
        Err(ClientError::AuthFailed(
            "negotiated auth requires the gssapi feature".to_string(),
        ))
    }
}

#[cfg(feature = "gssapi")]
pub use gss::GssapiNegotiator;

#[cfg(feature = "gssapi")]
mod gss {
    use libgssapi::context::{ClientCtx, CtxFlags};
    use libgssapi::name::Name;
    use libgssapi::oid::{GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE};

    use super::{NEGOTIATION_SERVICE, Negotiator};
    use crate::error::{ClientError, Result};

    /// Kerberos negotiation through the system GSSAPI library
    ///
    /// Uses the default credential cache and requests delegation.
    #[derive(Debug, Default)]
    pub struct GssapiNegotiator;

    impl Negotiator for GssapiNegotiator {
        fn init_context(&self, service_host: &str) -> Result<Vec<u8>> {
            let principal = format!("{NEGOTIATION_SERVICE}@{service_host}");
            let name = Name::new(principal.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
                .and_then(|name| name.canonicalize(Some(&GSS_MECH_KRB5)))
                .map_err(|e| ClientError::AuthFailed(format!("bad principal {principal}: {e}")))?;

            let mut ctx = ClientCtx::new(
                None,
                name,
                CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_DELEG_FLAG,
                Some(&GSS_MECH_KRB5),
            );
            let token = ctx
                .step(None, None)
                .map_err(|e| ClientError::AuthFailed(format!("negotiation failed: {e}")))?
                .ok_or_else(|| {
                    ClientError::AuthFailed("negotiation produced no token".to_string())
                })?;

            Ok(token.to_vec())
        }
    }
}

/// Default negotiator for this build
pub fn default_negotiator() -> Arc<dyn Negotiator> {
    #[cfg(feature = "gssapi")]
    {
        Arc::new(GssapiNegotiator)
    }
    #[cfg(not(feature = "gssapi"))]
    {
        Arc::new(UnsupportedNegotiator)
    }
}

/// Authorization scheme with whatever it needs to produce a header
#[derive(Clone)]
pub enum AuthStrategy {
    None,
    Bootserver,
    Basic(BasicCredentials),
    Negotiated {
        negotiator: Arc<dyn Negotiator>,
        /// Service host; the attempted candidate's host when unset
        target_host: Option<String>,
    },
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bootserver => f.write_str("Bootserver"),
            Self::Basic(credentials) => f.debug_tuple("Basic").field(credentials).finish(),
            Self::Negotiated { target_host, .. } => f
                .debug_struct("Negotiated")
                .field("target_host", target_host)
                .finish_non_exhaustive(),
        }
    }
}

impl AuthStrategy {
    pub fn new(
        mode: AuthMode,
        basic: Option<BasicCredentials>,
        negotiator: Arc<dyn Negotiator>,
        target_host: Option<String>,
    ) -> Result<Self> {
        Ok(match mode {
            AuthMode::None => Self::None,
            AuthMode::Bootserver => Self::Bootserver,
            AuthMode::Basic => Self::Basic(basic.ok_or_else(|| {
                ClientError::invalid_option("auth", "basic auth without credentials")
            })?),
            AuthMode::Negotiated => Self::Negotiated {
                negotiator,
                target_host,
            },
        })
    }

    pub fn mode(&self) -> AuthMode {
        match self {
            Self::None => AuthMode::None,
            Self::Bootserver => AuthMode::Bootserver,
            Self::Basic(_) => AuthMode::Basic,
            Self::Negotiated { .. } => AuthMode::Negotiated,
        }
    }

    /// Authorization header value for one attempt against `candidate_host`
    pub fn authorization(&self, candidate_host: &str) -> Result<Option<HeaderValue>> {
        match self {
            Self::None => Ok(None),
            Self::Bootserver => Ok(Some(HeaderValue::from_static(BOOTSERVER_TOKEN))),
            Self::Basic(credentials) => credentials.header_value().map(Some),
            Self::Negotiated {
                negotiator,
                target_host,
            } => {
                let host = target_host.as_deref().unwrap_or(candidate_host);
                debug!("Negotiating security context for {NEGOTIATION_SERVICE}@{host}");

                let encoded = STANDARD.encode(negotiator.init_context(host)?);
                let mut value = HeaderValue::from_str(&format!("Negotiate {encoded}"))
                    .map_err(|e| ClientError::AuthFailed(format!("invalid negotiate token: {e}")))?;
                value.set_sensitive(true);
                Ok(Some(value))
            }
        }
    }
}
