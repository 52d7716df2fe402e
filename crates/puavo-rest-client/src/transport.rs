//! Physical request execution

use std::time::Duration;

use bytes::Bytes;
use http::header::HeaderMap;
use http::{Method, StatusCode};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ClientError, Result, TransportError};
use crate::ssl::TrustPolicy;

/// A fully prepared request for one candidate
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Response of a completed attempt, whatever its status
#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL the request was actually sent to
    pub url: Url,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ClientError::Other(anyhow::anyhow!("invalid JSON from {}: {}", self.url, e))
        })
    }
}

/// Sends one prepared request using a candidate's trust policy
///
/// Any `Err` is a network level failure; HTTP error statuses are
/// returned as `Ok` responses.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: PreparedRequest,
        trust: &TrustPolicy,
    ) -> std::result::Result<Response, TransportError>;
}

/// Blocking `reqwest` transport
///
/// Builds a new client for every attempt so that each candidate gets its
/// own trust roots.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000), Duration::from_millis(30000))
    }
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    fn client(&self, trust: &TrustPolicy) -> std::result::Result<Client, TransportError> {
        let builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout);
        Ok(trust.context()?.configure(builder).build()?)
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        request: PreparedRequest,
        trust: &TrustPolicy,
    ) -> std::result::Result<Response, TransportError> {
        let client = self.client(trust)?;

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes()?;

        Ok(Response {
            status,
            headers,
            body,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static str) -> Response {
        Response {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            url: Url::parse("https://api.example.net/foo").unwrap(),
        }
    }

    #[test]
    fn test_response_text_and_json() {
        let res = response("{\"name\":\"hogwarts\"}");
        assert!(!res.is_success());
        assert_eq!(res.text(), "{\"name\":\"hogwarts\"}");

        let value: serde_json::Value = res.json().unwrap();
        assert_eq!(value["name"], "hogwarts");
    }

    #[test]
    fn test_response_invalid_json() {
        let res = response("<html>");
        assert!(res.json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_missing_ca_is_transport_error() {
        let transport = HttpTransport::default();
        let request = PreparedRequest {
            method: Method::GET,
            url: Url::parse("https://boot.example.net/foo").unwrap(),
            headers: HeaderMap::new(),
            body: None,
        };

        let result = transport.execute(request, &TrustPolicy::custom("/nonexistent/rootca.pem"));
        assert!(matches!(result, Err(TransportError::CaFile { .. })));
    }
}
