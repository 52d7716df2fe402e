//! puavo-rest client with server discovery, authentication and failover

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use http::header::{
    AUTHORIZATION, CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue, USER_AGENT,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{AuthStrategy, Negotiator, default_negotiator};
use crate::diagnostics::Diagnostics;
use crate::discovery::{Candidate, CandidateList, HickoryResolver, SrvResolver, discover};
use crate::error::{ClientError, Result};
use crate::etc::PuavoEtc;
use crate::options::{ClientConfig, ClientOptions};
use crate::transport::{HttpTransport, PreparedRequest, Response, Transport};

/// User agent sent with every request
pub const USER_AGENT_VALUE: &str = "puavo-rest-client";

/// Per-call request options
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Headers applied after the client's own overrides
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Assembles a [`PuavoRestClient`], with replaceable collaborators
pub struct ClientBuilder {
    options: ClientOptions,
    etc: Option<PuavoEtc>,
    resolver: Option<Box<dyn SrvResolver>>,
    transport: Option<Box<dyn Transport>>,
    negotiator: Option<Arc<dyn Negotiator>>,
}

impl ClientBuilder {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            etc: None,
            resolver: None,
            transport: None,
            negotiator: None,
        }
    }

    /// Configuration directory, overriding the options' `etc_root`
    pub fn etc(mut self, etc: PuavoEtc) -> Self {
        self.etc = Some(etc);
        self
    }

    pub fn resolver(mut self, resolver: impl SrvResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn negotiator(mut self, negotiator: Arc<dyn Negotiator>) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    /// Normalize options and discover candidates; fails rather than
    /// returning a client that cannot reach any server
    pub fn build(self) -> Result<PuavoRestClient> {
        let etc = self.etc.unwrap_or_else(|| self.options.etc());
        let config = ClientConfig::from_options(&self.options, &etc)?;

        let resolver = self.resolver;
        let candidates = discover(&config, &etc, move || match resolver {
            Some(resolver) => Ok(resolver),
            None => Ok(Box::new(HickoryResolver::from_system_conf()?) as Box<dyn SrvResolver>),
        })?;

        let auth = AuthStrategy::new(
            config.auth,
            config.basic_credentials.clone(),
            self.negotiator.unwrap_or_else(default_negotiator),
            config.negotiation_host.clone(),
        )?;

        let transport = self.transport.unwrap_or_else(|| {
            Box::new(HttpTransport::new(config.connect_timeout, config.read_timeout))
        });

        let mut base_headers = HeaderMap::new();
        base_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        // Lets a shared API server pick the organisation from the request
        base_headers.insert(
            HOST,
            HeaderValue::from_str(&config.domain)
                .map_err(|e| ClientError::invalid_option("domain", e.to_string()))?,
        );

        let diagnostics = Diagnostics::new(config.verbose);
        diagnostics.candidates(&candidates.uris());
        debug!(
            "puavo-rest client for {} with {} candidate(s), auth {}",
            config.domain,
            candidates.len(),
            config.auth
        );

        Ok(PuavoRestClient {
            config,
            candidates,
            auth,
            base_headers,
            transport,
            diagnostics,
        })
    }
}

/// Client for the puavo-rest API
///
/// Configuration and candidates are fixed at construction. Headers and
/// authorization are assembled from scratch for every attempt.
pub struct PuavoRestClient {
    config: ClientConfig,
    candidates: CandidateList,
    auth: AuthStrategy,
    base_headers: HeaderMap,
    transport: Box<dyn Transport>,
    diagnostics: Diagnostics,
}

impl fmt::Debug for PuavoRestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PuavoRestClient")
            .field("config", &self.config)
            .field("candidates", &self.candidates)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl PuavoRestClient {
    /// Create a client with the system resolver and HTTP transport
    pub fn new(options: ClientOptions) -> Result<Self> {
        Self::builder(options).build()
    }

    pub fn builder(options: ClientOptions) -> ClientBuilder {
        ClientBuilder::new(options)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    /// Candidate server URIs in attempt order
    pub fn servers(&self) -> Vec<String> {
        self.candidates.uris()
    }

    pub fn get(&self, path: &str, options: &RequestOptions) -> Result<Response> {
        self.execute(Method::GET, path, None, options)
    }

    pub fn post(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        options: &RequestOptions,
    ) -> Result<Response> {
        self.execute(Method::POST, path, Some(body.into()), options)
    }

    /// POST a JSON document
    pub fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> Result<Response> {
        let body = serde_json::to_vec(body).map_err(|e| ClientError::Other(e.into()))?;
        let mut options = options.clone();
        if !options.headers.contains_key(CONTENT_TYPE) {
            options
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        self.execute(Method::POST, path, Some(Bytes::from(body)), &options)
    }

    /// Run a request against the candidates in order
    ///
    /// Only network failures advance to the next candidate, and only when
    /// `retry_fallback` is set. Auth failures end the call.
    fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        options: &RequestOptions,
    ) -> Result<Response> {
        let attempts = if self.config.retry_fallback {
            self.candidates.len()
        } else {
            1
        };
        let mut last_error = None;

        for candidate in self.candidates.iter().take(attempts) {
            let request = self.prepare(method.clone(), candidate, path, body.clone(), options)?;
            self.diagnostics.request(&request);

            match self.transport.execute(request, &candidate.trust) {
                Ok(response) => {
                    self.diagnostics.response(&response);
                    return Ok(response);
                }
                Err(e) => {
                    if self.config.retry_fallback {
                        warn!("{} failed: {e}, trying next server", candidate.uri);
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(ClientError::NoCandidates),
        }
    }

    /// Build the request for one candidate: computed headers, then
    /// authorization, then client overrides, then per-call headers
    fn prepare(
        &self,
        method: Method,
        candidate: &Candidate,
        path: &str,
        body: Option<Bytes>,
        options: &RequestOptions,
    ) -> Result<PreparedRequest> {
        let mut url = candidate.join(path)?;
        if !options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&options.query);
        }

        let mut headers = self.base_headers.clone();
        if let Some(value) = self.auth.authorization(candidate.host())? {
            headers.insert(AUTHORIZATION, value);
        }
        merge_headers(&mut headers, &self.config.header_overrides);
        merge_headers(&mut headers, &options.headers);

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

/// Copy `overrides` into `headers`, replacing existing values per name
pub(crate) fn merge_headers(headers: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        headers.remove(name);
        for value in overrides.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
}
