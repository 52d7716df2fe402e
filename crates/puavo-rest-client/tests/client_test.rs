//! puavo-rest client tests
//!
//! Discovery, auth and dispatch against in-memory resolver, transport and
//! negotiator implementations. No network access is needed.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{AUTHORIZATION, HOST, HeaderMap, HeaderValue, USER_AGENT};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use puavo_rest_client::{
    AuthMode, ClientError, ClientOptions, DnsMode, Negotiator, PreparedRequest, PuavoEtc,
    PuavoRestClient, RequestOptions, ResolveError, Response, SrvResolver, SrvTarget, Transport,
    TransportError, TrustPolicy,
};
use tempfile::TempDir;
use url::Url;

// ============== Test doubles ==============

struct BrokenResolver;

impl SrvResolver for BrokenResolver {
    fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, ResolveError> {
        Err(ResolveError::Lookup {
            name: name.to_string(),
            reason: "no nameservers reachable".to_string(),
        })
    }
}

#[derive(Clone)]
struct StaticResolver {
    records: Vec<SrvTarget>,
    lookups: Arc<AtomicUsize>,
}

impl StaticResolver {
    fn new(targets: &[&str]) -> Self {
        Self {
            records: targets.iter().map(|t| SrvTarget::new(t, 443)).collect(),
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl SrvResolver for StaticResolver {
    fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, ResolveError> {
        assert!(name.starts_with("_puavo-api._tcp."));
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

#[derive(Default)]
struct MockState {
    unreachable: HashSet<String>,
    statuses: HashMap<String, StatusCode>,
    sent: Vec<(PreparedRequest, TrustPolicy)>,
}

#[derive(Clone, Default)]
struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn unreachable(self, host: &str) -> Self {
        self.state.lock().unreachable.insert(host.to_string());
        self
    }

    fn status(self, host: &str, status: StatusCode) -> Self {
        self.state.lock().statuses.insert(host.to_string(), status);
        self
    }

    fn sent(&self) -> Vec<(PreparedRequest, TrustPolicy)> {
        self.state.lock().sent.clone()
    }
}

impl Transport for MockTransport {
    fn execute(
        &self,
        request: PreparedRequest,
        trust: &TrustPolicy,
    ) -> Result<Response, TransportError> {
        let mut state = self.state.lock();
        state.sent.push((request.clone(), trust.clone()));

        let host = request.url.host_str().unwrap_or_default().to_string();
        if state.unreachable.contains(&host) {
            return Err(TransportError::Connection(format!(
                "{host}: Network is unreachable"
            )));
        }

        Ok(Response {
            status: state.statuses.get(&host).copied().unwrap_or(StatusCode::OK),
            headers: HeaderMap::new(),
            body: Bytes::from(format!("response from {host}")),
            url: request.url,
        })
    }
}

#[derive(Default)]
struct CountingNegotiator {
    calls: AtomicUsize,
}

impl Negotiator for CountingNegotiator {
    fn init_context(&self, service_host: &str) -> puavo_rest_client::Result<Vec<u8>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ticket-{service_host}-{n}").into_bytes())
    }
}

struct FailingNegotiator;

impl Negotiator for FailingNegotiator {
    fn init_context(&self, _service_host: &str) -> puavo_rest_client::Result<Vec<u8>> {
        Err(ClientError::AuthFailed("no kerberos ticket".to_string()))
    }
}

// ============== Fixtures ==============

const DOMAIN: &str = "hogwarts.example.net";
const BOOTSERVER: &str = "boot2.hogwarts.example.net";

/// Configuration directory with a domain and optionally an apiserver file
fn etc_dir(apiserver: Option<&str>) -> (TempDir, PuavoEtc) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("domain"), format!("{DOMAIN}\n")).unwrap();
    if let Some(apiserver) = apiserver {
        fs::write(dir.path().join("apiserver"), format!("{apiserver}\n")).unwrap();
    }
    let etc = PuavoEtc::new(dir.path());
    (dir, etc)
}

fn build(
    options: ClientOptions,
    etc: PuavoEtc,
    resolver: &StaticResolver,
    transport: &MockTransport,
) -> puavo_rest_client::Result<PuavoRestClient> {
    PuavoRestClient::builder(options)
        .etc(etc)
        .resolver(resolver.clone())
        .transport(transport.clone())
        .build()
}

fn url(value: &str) -> Url {
    Url::parse(value).unwrap()
}

// ============== Discovery ==============

#[test]
fn test_default_resolves_to_bootserver() {
    let (_dir, etc) = etc_dir(None);
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new().with_domain(DOMAIN),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    let res = client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(res.text(), "response from boot2.hogwarts.example.net");
    assert_eq!(res.url, url("https://boot2.hogwarts.example.net:443/foo"));

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let (request, trust) = &sent[0];
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.headers[HOST], DOMAIN);
    assert_eq!(request.headers[USER_AGENT], "puavo-rest-client");
    assert_eq!(*trust, TrustPolicy::custom_default());
}

#[test]
fn test_candidate_order_dns_then_address_file() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);

    let client = build(
        ClientOptions::new().with_domain(DOMAIN),
        etc,
        &resolver,
        &MockTransport::default(),
    )
    .unwrap();

    assert_eq!(
        client.servers(),
        vec![
            "https://boot2.hogwarts.example.net",
            "https://api.example.net"
        ]
    );
    let trusts: Vec<_> = client.candidates().iter().map(|c| c.trust.clone()).collect();
    assert_eq!(trusts, vec![TrustPolicy::custom_default(), TrustPolicy::public()]);
}

#[test]
fn test_ignores_dns_responses_outside_domain() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new().with_domain("foo.example.net"),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    assert_eq!(client.servers(), vec!["http://api.example.net"]);

    let res = client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(res.text(), "response from api.example.net");
    assert_eq!(transport.sent()[0].0.headers[HOST], "foo.example.net");
}

#[test]
fn test_domain_mismatch_is_fatal_in_dns_only_mode() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);

    let err = build(
        ClientOptions::new()
            .with_domain("foo.example.net")
            .with_dns(DnsMode::Only),
        etc,
        &resolver,
        &MockTransport::default(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Resolution(ResolveError::DomainMismatch { .. })
    ));
}

#[test]
fn test_explicit_server_skips_discovery() {
    for dns in [DnsMode::Default, DnsMode::No, DnsMode::Only] {
        let (_dir, etc) = etc_dir(Some("api.example.net"));
        let resolver = StaticResolver::new(&[]);
        let transport = MockTransport::default().unreachable("forced.example.com");

        let client = build(
            ClientOptions::new()
                .with_domain(DOMAIN)
                .with_server("http://forced.example.com")
                .with_dns(dns),
            etc,
            &resolver,
            &transport,
        )
        .unwrap();

        assert_eq!(client.servers(), vec!["http://forced.example.com"]);
        assert_eq!(client.candidates().first().trust, TrustPolicy::public());
        assert_eq!(resolver.lookups(), 0);
    }
}

#[test]
fn test_dns_only_empty_response() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));
    let resolver = StaticResolver::new(&[]);

    let err = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::Only),
        etc,
        &resolver,
        &MockTransport::default(),
    )
    .unwrap_err();

    assert!(matches!(err, ClientError::Resolution(ResolveError::EmptyResponse)));
    assert_eq!(err.to_string(), "Empty DNS response");
}

#[test]
fn test_dns_no_never_queries() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::No),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    assert_eq!(resolver.lookups(), 0);
    assert_eq!(client.servers(), vec!["http://api.example.net"]);

    let res = client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(transport.sent()[0].0.headers[HOST], DOMAIN);
}

#[test]
fn test_missing_address_file_uses_domain() {
    let (_dir, etc) = etc_dir(None);
    let resolver = StaticResolver::new(&[]);

    let client = build(
        ClientOptions::new().with_domain(DOMAIN),
        etc,
        &resolver,
        &MockTransport::default(),
    )
    .unwrap();

    assert_eq!(resolver.lookups(), 1);
    assert_eq!(client.servers(), vec!["https://hogwarts.example.net"]);
}

#[test]
fn test_lookup_error_falls_through_in_default_mode() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));

    let client = PuavoRestClient::builder(ClientOptions::new().with_domain(DOMAIN))
        .etc(etc)
        .resolver(BrokenResolver)
        .transport(MockTransport::default())
        .build()
        .unwrap();

    assert_eq!(client.servers(), vec!["https://api.example.net"]);
}

#[test]
fn test_lookup_error_is_fatal_in_dns_only_mode() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));

    let err = PuavoRestClient::builder(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::Only),
    )
    .etc(etc)
    .resolver(BrokenResolver)
    .transport(MockTransport::default())
    .build()
    .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Resolution(ResolveError::Lookup { .. })
    ));
}

#[test]
fn test_unreadable_address_file_is_fatal() {
    let (dir, etc) = etc_dir(None);
    fs::create_dir(dir.path().join("apiserver")).unwrap();

    let err = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::No),
        etc,
        &StaticResolver::new(&[]),
        &MockTransport::default(),
    )
    .unwrap_err();

    assert!(matches!(err, ClientError::Io { .. }));
}

#[test]
fn test_scheme_override_keeps_bootserver_port() {
    let (_dir, etc) = etc_dir(None);
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::Only)
            .with_scheme("http"),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    assert_eq!(
        client.servers(),
        vec!["http://boot2.hogwarts.example.net:443"]
    );

    let res = client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(
        res.url.as_str(),
        "http://boot2.hogwarts.example.net:443/foo"
    );
}

#[test]
fn test_domain_read_from_etc() {
    let (_dir, etc) = etc_dir(None);

    let client = build(
        ClientOptions::new().with_dns(DnsMode::No),
        etc,
        &StaticResolver::new(&[]),
        &MockTransport::default(),
    )
    .unwrap();

    assert_eq!(client.config().domain, DOMAIN);
}

#[test]
fn test_ca_file_and_port_overrides() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_ca_file("/srv/ca.pem")
            .with_port(8443),
        etc,
        &resolver,
        &MockTransport::default(),
    )
    .unwrap();

    assert_eq!(
        client.servers(),
        vec![
            "https://boot2.hogwarts.example.net:8443",
            "https://api.example.net:8443"
        ]
    );
    assert!(
        client
            .candidates()
            .iter()
            .all(|c| c.trust == TrustPolicy::custom("/srv/ca.pem"))
    );
}

// ============== Headers ==============

#[test]
fn test_custom_headers_override_computed() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new()
            .with_domain("foo.example.net")
            .with_auth(AuthMode::Bootserver)
            .with_header("host", "custom.host.header.example.com")
            .with_header("Authorization", "Bearer abc"),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    let res = client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(res.status, StatusCode::OK);

    let headers = &transport.sent()[0].0.headers;
    assert_eq!(headers[HOST], "custom.host.header.example.com");
    assert_eq!(headers[AUTHORIZATION], "Bearer abc");
    assert_eq!(headers.get_all(HOST).iter().count(), 1);
}

#[test]
fn test_per_call_headers_and_query() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::No)
            .with_header("x-puavo-test", "client"),
        etc,
        &StaticResolver::new(&[]),
        &transport,
    )
    .unwrap();

    let options = RequestOptions::new()
        .with_header(
            "x-puavo-test".parse().unwrap(),
            HeaderValue::from_static("call"),
        )
        .with_query("attributes", "puavo_id,name");
    let res = client.get("/v3/devices", &options).unwrap();

    assert_eq!(
        res.url.as_str(),
        "http://api.example.net/v3/devices?attributes=puavo_id%2Cname"
    );
    assert_eq!(transport.sent()[0].0.headers["x-puavo-test"], "call");
}

// ============== Auth ==============

#[test]
fn test_bootserver_auth_header() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::No)
            .with_auth(AuthMode::Bootserver),
        etc,
        &StaticResolver::new(&[]),
        &transport,
    )
    .unwrap();

    client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(transport.sent()[0].0.headers[AUTHORIZATION], "Bootserver");
}

#[test]
fn test_basic_auth_from_etc_files() {
    let (dir, etc) = etc_dir(Some("api.example.net"));
    fs::create_dir_all(dir.path().join("ldap")).unwrap();
    fs::write(dir.path().join("ldap/dn"), "uid=laptop,o=puavo\n").unwrap();
    fs::write(dir.path().join("ldap/password"), "secret\n").unwrap();
    let transport = MockTransport::default();

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::No)
            .with_auth(AuthMode::Basic),
        etc,
        &StaticResolver::new(&[]),
        &transport,
    )
    .unwrap();

    client.get("/foo", &RequestOptions::new()).unwrap();
    let expected = format!("Basic {}", STANDARD.encode("uid=laptop,o=puavo:secret"));
    assert_eq!(transport.sent()[0].0.headers[AUTHORIZATION], expected.as_str());
}

#[test]
fn test_negotiated_token_is_never_reused() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));
    let transport = MockTransport::default();
    let negotiator = Arc::new(CountingNegotiator::default());

    let client = PuavoRestClient::builder(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_dns(DnsMode::No)
            .with_auth(AuthMode::Negotiated)
            .with_negotiation_host("api.example.net"),
    )
    .etc(etc)
    .transport(transport.clone())
    .negotiator(negotiator.clone())
    .build()
    .unwrap();

    client.get("/foo", &RequestOptions::new()).unwrap();
    client.get("/foo", &RequestOptions::new()).unwrap();

    let sent = transport.sent();
    let first = &sent[0].0.headers[AUTHORIZATION];
    let second = &sent[1].0.headers[AUTHORIZATION];
    assert_ne!(first, second);
    assert!(first.to_str().unwrap().starts_with("Negotiate "));
    assert_eq!(negotiator.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_negotiation_failure_is_not_retried() {
    let (_dir, etc) = etc_dir(Some("api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default();

    let client = PuavoRestClient::builder(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_auth(AuthMode::Negotiated)
            .with_retry_fallback(true),
    )
    .etc(etc)
    .resolver(resolver)
    .transport(transport.clone())
    .negotiator(Arc::new(FailingNegotiator))
    .build()
    .unwrap();

    let err = client.get("/foo", &RequestOptions::new()).unwrap_err();
    assert!(matches!(err, ClientError::AuthFailed(_)));
    assert!(transport.sent().is_empty());
}

// ============== Fallback ==============

#[test]
fn test_retry_on_fallbacks() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default().unreachable(BOOTSERVER);

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_retry_fallback(true),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    let res = client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.url.as_str(), "http://api.example.net/foo");

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].0.headers[HOST], DOMAIN);
    assert_eq!(sent[1].1, TrustPolicy::public());
}

#[test]
fn test_no_fallback_by_default() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default().unreachable(BOOTSERVER);

    let client = build(
        ClientOptions::new().with_domain(DOMAIN),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    let err = client.get("/foo", &RequestOptions::new()).unwrap_err();
    assert!(err.is_transport());
    assert_eq!(transport.sent().len(), 1);
}

#[test]
fn test_errors_when_all_servers_fail() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default()
        .unreachable(BOOTSERVER)
        .unreachable("api.example.net");

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_retry_fallback(true),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    let err = client.get("/foo", &RequestOptions::new()).unwrap_err();
    assert!(err.to_string().contains("api.example.net: Network is unreachable"));
    assert_eq!(transport.sent().len(), 2);
}

#[test]
fn test_http_errors_do_not_fall_back() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default().status(BOOTSERVER, StatusCode::SERVICE_UNAVAILABLE);

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_retry_fallback(true),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    let res = client.get("/foo", &RequestOptions::new()).unwrap();
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(transport.sent().len(), 1);
}

#[test]
fn test_post_body_is_resent_on_fallback() {
    let (_dir, etc) = etc_dir(Some("http://api.example.net"));
    let resolver = StaticResolver::new(&[BOOTSERVER]);
    let transport = MockTransport::default().unreachable(BOOTSERVER);

    let client = build(
        ClientOptions::new()
            .with_domain(DOMAIN)
            .with_retry_fallback(true),
        etc,
        &resolver,
        &transport,
    )
    .unwrap();

    client
        .post_json(
            "/v3/devices/laptop1/sync",
            &serde_json::json!({ "state": "ok" }),
            &RequestOptions::new(),
        )
        .unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    for (request, _) in &sent {
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.as_deref(), Some(&b"{\"state\":\"ok\"}"[..]));
        assert_eq!(request.headers["content-type"], "application/json");
    }
}
