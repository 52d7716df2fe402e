//! Client options and their normalization into an immutable configuration

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::auth::BasicCredentials;
use crate::discovery::parse_api_uri;
use crate::error::{ClientError, Result};
use crate::etc::{DOMAIN_KEY, LDAP_DN_KEY, LDAP_PASSWORD_KEY, PuavoEtc};

/// Environment variable enabling request diagnostics
pub const VERBOSE_ENV: &str = "PUAVO_REST_CLIENT_VERBOSE";

/// Prefix for environment variables read by [`ClientOptions::load`]
pub const ENV_PREFIX: &str = "PUAVO_REST";

const DEFAULT_CONNECT_MS: u64 = 5000;
const DEFAULT_READ_MS: u64 = 30000;

/// How DNS service discovery takes part in building the candidate list
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DnsMode {
    /// Try DNS first, fall back to the address file
    #[default]
    Default,
    /// Never query DNS
    No,
    /// Only DNS; lookup failures are fatal
    Only,
}

impl FromStr for DnsMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(Self::Default),
            "no" | "off" | "false" => Ok(Self::No),
            "only" => Ok(Self::Only),
            other => Err(ClientError::invalid_option(
                "dns",
                format!("unknown mode {other:?}, expected default, no or only"),
            )),
        }
    }
}

impl fmt::Display for DnsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::No => "no",
            Self::Only => "only",
        })
    }
}

/// Authorization scheme attached to every request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    None,
    /// Static `Bootserver` token for requests from a trusted network
    Bootserver,
    /// HTTP basic credentials
    Basic,
    /// Kerberos security-context negotiation
    Negotiated,
}

impl FromStr for AuthMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "bootserver" => Ok(Self::Bootserver),
            "basic" | "etc" => Ok(Self::Basic),
            "negotiated" | "negotiate" | "kerberos" => Ok(Self::Negotiated),
            other => Err(ClientError::invalid_option(
                "auth",
                format!("unknown mode {other:?}, expected none, bootserver, basic or negotiated"),
            )),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Bootserver => "bootserver",
            Self::Basic => "basic",
            Self::Negotiated => "negotiated",
        })
    }
}

/// Explicit basic auth credentials
#[derive(Clone, Deserialize)]
pub struct BasicAuthOptions {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for BasicAuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthOptions")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Loosely-typed client options
///
/// Every field is optional; [`ClientConfig::from_options`] fills in the
/// defaults and reads whatever the options leave out from the
/// configuration directory.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub domain: Option<String>,
    pub server: Option<String>,
    pub dns: Option<String>,
    pub auth: Option<String>,
    pub headers: HashMap<String, String>,
    pub ca_file: Option<PathBuf>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
    pub negotiation_host: Option<String>,
    pub retry_fallback: Option<bool>,
    pub basic_auth: Option<BasicAuthOptions>,
    pub verbose: Option<bool>,
    pub etc_root: Option<PathBuf>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from an optional file layered under `PUAVO_REST_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let env = Environment::with_prefix(ENV_PREFIX).try_parsing(true);
        builder = builder.add_source(env);

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ClientError::invalid_option("config", e.to_string()))
    }

    /// Build options from an in-memory JSON bag
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ClientError::invalid_option("options", e.to_string()))
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_server(mut self, server: &str) -> Self {
        self.server = Some(server.to_string());
        self
    }

    pub fn with_dns(mut self, dns: DnsMode) -> Self {
        self.dns = Some(dns.to_string());
        self
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = Some(auth.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(ca_file.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = Some(scheme.to_string());
        self
    }

    pub fn with_negotiation_host(mut self, host: &str) -> Self {
        self.negotiation_host = Some(host.to_string());
        self
    }

    pub fn with_retry_fallback(mut self, retry_fallback: bool) -> Self {
        self.retry_fallback = Some(retry_fallback);
        self
    }

    pub fn with_basic_auth(mut self, user: &str, password: &str) -> Self {
        self.basic_auth = Some(BasicAuthOptions {
            user: user.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn with_etc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.etc_root = Some(root.into());
        self
    }

    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = Some(connect_ms);
        self.read_timeout_ms = Some(read_ms);
        self
    }

    /// Configuration directory these options point at
    pub fn etc(&self) -> PuavoEtc {
        match &self.etc_root {
            Some(root) => PuavoEtc::new(root),
            None => PuavoEtc::default(),
        }
    }
}

/// Immutable client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub domain: String,
    pub server: Option<Url>,
    pub dns: DnsMode,
    pub auth: AuthMode,
    pub basic_credentials: Option<BasicCredentials>,
    /// Caller supplied headers, applied last on every request
    pub header_overrides: HeaderMap,
    pub ca_file: Option<PathBuf>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
    pub negotiation_host: Option<String>,
    pub retry_fallback: bool,
    pub verbose: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ClientConfig {
    /// Normalize options, reading missing values from `etc`
    pub fn from_options(options: &ClientOptions, etc: &PuavoEtc) -> Result<Self> {
        let domain = match &options.domain {
            Some(domain) => domain.trim().to_string(),
            None => etc.require(DOMAIN_KEY)?,
        };
        if domain.is_empty() {
            return Err(ClientError::invalid_option("domain", "must not be empty"));
        }

        let server = options.server.as_deref().map(parse_api_uri).transpose()?;

        let dns: DnsMode = options
            .dns
            .as_deref()
            .map(str::parse::<DnsMode>)
            .transpose()?
            .unwrap_or_default();

        let auth = match (options.auth.as_deref(), &options.basic_auth) {
            (Some(auth), _) => auth.parse::<AuthMode>()?,
            (None, Some(_)) => AuthMode::Basic,
            (None, None) => AuthMode::None,
        };

        let basic_credentials = match (auth, &options.basic_auth) {
            (AuthMode::Basic, Some(basic)) => {
                Some(BasicCredentials::new(&basic.user, &basic.password))
            }
            (AuthMode::Basic, None) => Some(BasicCredentials::new(
                &etc.require(LDAP_DN_KEY)?,
                &etc.require(LDAP_PASSWORD_KEY)?,
            )),
            (_, Some(_)) => {
                return Err(ClientError::invalid_option(
                    "basic_auth",
                    format!("credentials given but auth mode is {auth}"),
                ));
            }
            (_, None) => None,
        };

        let scheme = options
            .scheme
            .as_deref()
            .map(|scheme| match scheme.to_ascii_lowercase().as_str() {
                s @ ("http" | "https") => Ok(s.to_string()),
                other => Err(ClientError::invalid_option(
                    "scheme",
                    format!("{other:?} is not http or https"),
                )),
            })
            .transpose()?;

        Ok(Self {
            domain,
            server,
            dns,
            auth,
            basic_credentials,
            header_overrides: header_map(&options.headers)?,
            ca_file: options.ca_file.clone(),
            port: options.port,
            scheme,
            negotiation_host: options.negotiation_host.clone(),
            retry_fallback: options.retry_fallback.unwrap_or(false),
            verbose: options
                .verbose
                .unwrap_or_else(|| std::env::var_os(VERBOSE_ENV).is_some()),
            connect_timeout: Duration::from_millis(
                options.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_MS),
            ),
            read_timeout: Duration::from_millis(options.read_timeout_ms.unwrap_or(DEFAULT_READ_MS)),
        })
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::invalid_option("headers", format!("{name:?}: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::invalid_option("headers", format!("{name}: {e}")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
