//! puavo-rest client
//!
//! This crate provides:
//! - API server discovery from an explicit address, DNS service records and
//!   the cached address file, with per-candidate TLS trust
//! - Authorization for none, bootserver, basic and negotiated modes
//! - Blocking GET and POST with optional fallback across candidates
//! - A reader for the `/etc/puavo` configuration directory

pub mod auth;
pub mod client;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod etc;
pub mod options;
pub mod ssl;
pub mod transport;

pub use auth::{AuthStrategy, BasicCredentials, Negotiator};
pub use client::{ClientBuilder, PuavoRestClient, RequestOptions};
pub use discovery::{Candidate, CandidateList, SrvResolver, SrvTarget};
pub use error::{ClientError, ResolveError, Result, TransportError};
pub use etc::PuavoEtc;
pub use options::{AuthMode, ClientConfig, ClientOptions, DnsMode};
pub use ssl::TrustPolicy;
pub use transport::{HttpTransport, PreparedRequest, Response, Transport};
