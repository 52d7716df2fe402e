//! API server discovery
//!
//! Candidates are collected in priority order:
//! 1. An explicit server replaces discovery entirely
//! 2. The `_puavo-api._tcp.<domain>` service record, usually a bootserver
//!    on the local network, verified against the organisation root CA
//! 3. The address in `/etc/puavo/apiserver`, or `https://<domain>` when
//!    that file is absent
//!
//! The DNS mode decides whether steps 2 and 3 run and whether a failed
//! lookup is fatal. After the list is built the CA file, port and scheme
//! overrides are applied to every candidate.

use std::fmt;

use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ResolveError, Result};
use crate::etc::{APISERVER_KEY, PuavoEtc};
use crate::options::{ClientConfig, DnsMode};
use crate::ssl::TrustPolicy;

/// Service record name prefix for API servers
pub const SERVICE_PREFIX: &str = "_puavo-api._tcp";

/// Port of API servers found through DNS
pub const DNS_CANDIDATE_PORT: u16 = 443;

/// Service record name for a puavo domain
pub fn service_name(domain: &str) -> String {
    format!("{SERVICE_PREFIX}.{domain}")
}

/// One record of a service lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

impl SrvTarget {
    pub fn new(target: &str, port: u16) -> Self {
        Self {
            target: target.to_string(),
            port,
            priority: 0,
            weight: 0,
        }
    }
}

/// Looks up service records
///
/// An empty result is `Ok(vec![])`; interpreting it is up to discovery.
pub trait SrvResolver: Send + Sync {
    fn lookup_srv(&self, name: &str) -> std::result::Result<Vec<SrvTarget>, ResolveError>;
}

/// System resolver backed by `hickory-resolver`
pub struct HickoryResolver {
    resolver: hickory_resolver::Resolver,
}

impl HickoryResolver {
    /// Resolver configured from `/etc/resolv.conf`
    pub fn from_system_conf() -> std::result::Result<Self, ResolveError> {
        let resolver =
            hickory_resolver::Resolver::from_system_conf().map_err(|e| ResolveError::Lookup {
                name: "system configuration".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { resolver })
    }
}

impl fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryResolver").finish_non_exhaustive()
    }
}

impl SrvResolver for HickoryResolver {
    fn lookup_srv(&self, name: &str) -> std::result::Result<Vec<SrvTarget>, ResolveError> {
        use hickory_resolver::error::ResolveErrorKind;

        match self.resolver.srv_lookup(name) {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|srv| SrvTarget {
                    target: srv.target().to_utf8(),
                    port: srv.port(),
                    priority: srv.priority(),
                    weight: srv.weight(),
                })
                .collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(ResolveError::Lookup {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// A base URI and the trust policy used to reach it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub uri: Url,
    pub trust: TrustPolicy,
    /// Port given explicitly at discovery, kept across a scheme change even
    /// when it is the default port of the old scheme
    port: Option<u16>,
}

impl Candidate {
    pub fn new(uri: Url, trust: TrustPolicy) -> Self {
        let port = uri.port();
        Self { uri, trust, port }
    }

    fn with_port(uri: Url, trust: TrustPolicy, port: u16) -> Self {
        Self {
            uri,
            trust,
            port: Some(port),
        }
    }

    pub fn host(&self) -> &str {
        self.uri.host_str().unwrap_or_default()
    }

    /// Absolute URL for a request path below this candidate
    pub fn join(&self, path: &str) -> Result<Url> {
        let base = self.uri.as_str().trim_end_matches('/');
        let full = if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&full).map_err(|source| ClientError::InvalidUrl {
            value: full,
            source,
        })
    }
}

/// Ordered, non-empty list of candidates fixed at construction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateList {
    candidates: Vec<Candidate>,
}

impl CandidateList {
    fn new(candidates: Vec<Candidate>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(ClientError::NoCandidates);
        }
        Ok(Self { candidates })
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn first(&self) -> &Candidate {
        &self.candidates[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    /// Candidate URIs in attempt order
    ///
    /// A bare root path is left out, so `http://host` stays `http://host`.
    pub fn uris(&self) -> Vec<String> {
        self.candidates.iter().map(|c| display_uri(&c.uri)).collect()
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

fn display_uri(uri: &Url) -> String {
    let s = uri.as_str();
    if uri.path() == "/" && uri.query().is_none() && uri.fragment().is_none() {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

/// Parse a server address, assuming `https` when no scheme is given
pub fn parse_api_uri(value: &str) -> Result<Url> {
    let value = value.trim();
    let full = if value.starts_with("http://") || value.starts_with("https://") {
        value.to_string()
    } else {
        format!("https://{value}")
    };
    Url::parse(&full).map_err(|source| ClientError::InvalidUrl {
        value: value.to_string(),
        source,
    })
}

/// Resolve the bootserver API candidate from DNS
pub fn resolve_api_server(
    resolver: &dyn SrvResolver,
    domain: &str,
) -> std::result::Result<Candidate, ResolveError> {
    let name = service_name(domain);
    let records = resolver.lookup_srv(&name)?;
    let first = records.first().ok_or(ResolveError::EmptyResponse)?;

    let target = first.target.trim_end_matches('.');
    if !target.ends_with(domain) {
        return Err(ResolveError::DomainMismatch {
            target: target.to_string(),
            domain: domain.to_string(),
        });
    }

    debug!("Resolved to bootserver puavo-rest {}", target);
    let uri = format!("https://{target}:{DNS_CANDIDATE_PORT}");
    let uri = Url::parse(&uri).map_err(|e| ResolveError::Lookup {
        name,
        reason: format!("unusable target {target}: {e}"),
    })?;

    Ok(Candidate::with_port(uri, TrustPolicy::custom_default(), DNS_CANDIDATE_PORT))
}

/// Candidate from the cached address file, or `https://<domain>`
pub fn address_file_candidate(etc: &PuavoEtc, domain: &str) -> Result<Candidate> {
    let uri = match etc.read(APISERVER_KEY)? {
        Some(server) => parse_api_uri(&server)?,
        None => {
            debug!("{} is missing", etc.path_of(APISERVER_KEY).display());
            parse_api_uri(domain)?
        }
    };
    Ok(Candidate::new(uri, TrustPolicy::public()))
}

/// Build the candidate list for `config`
///
/// `resolver` is only invoked when the DNS mode allows a lookup.
pub fn discover<F>(config: &ClientConfig, etc: &PuavoEtc, resolver: F) -> Result<CandidateList>
where
    F: FnOnce() -> std::result::Result<Box<dyn SrvResolver>, ResolveError>,
{
    let mut candidates = Vec::new();

    if let Some(server) = &config.server {
        candidates.push(Candidate::new(server.clone(), TrustPolicy::public()));
    } else {
        if config.dns != DnsMode::No {
            match resolver().and_then(|r| resolve_api_server(r.as_ref(), &config.domain)) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) if config.dns == DnsMode::Only => return Err(e.into()),
                Err(e) => warn!("API server DNS lookup failed: {}", e),
            }
        }

        if config.dns != DnsMode::Only {
            candidates.push(address_file_candidate(etc, &config.domain)?);
        }
    }

    for candidate in &mut candidates {
        apply_overrides(candidate, config)?;
    }

    CandidateList::new(candidates)
}

fn apply_overrides(candidate: &mut Candidate, config: &ClientConfig) -> Result<()> {
    if let Some(ca_file) = &config.ca_file {
        candidate.trust = TrustPolicy::custom(ca_file);
    }

    if let Some(scheme) = &config.scheme {
        candidate.uri.set_scheme(scheme).map_err(|_| {
            ClientError::invalid_option(
                "scheme",
                format!("cannot apply {scheme} to {}", candidate.uri),
            )
        })?;
    }

    if let Some(port) = config.port.or(candidate.port) {
        candidate.uri.set_port(Some(port)).map_err(|_| {
            ClientError::invalid_option("port", format!("cannot apply {port} to {}", candidate.uri))
        })?;
        candidate.port = Some(port);
    }

    Ok(())
}
