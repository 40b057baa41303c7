//! OAI-PMH backend access.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::{Error, Result};

/// Inbound headers never forwarded to the backend
const DROPPED_HEADERS: [HeaderName; 6] = [
    header::COOKIE,
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::ACCEPT_ENCODING,
];

/// One call to the backend
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// HTTP method of the inbound request
    pub method: Method,
    /// Inbound headers; filtered by the backend implementation
    pub headers: HeaderMap,
    /// Allow-listed OAI-PMH arguments
    pub args: Vec<(String, String)>,
}

impl BackendRequest {
    /// Plain GET with no forwarded headers
    #[must_use]
    pub fn get(args: Vec<(String, String)>) -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            args,
        }
    }
}

/// Backend answer, body decoded as UTF-8
#[derive(Debug, Clone)]
pub struct BackendResponse {
    /// Status returned by the backend, passed through to the client
    pub status: StatusCode,
    /// Response body
    pub body: String,
}

/// Source of OAI-PMH responses
#[async_trait]
pub trait OaiBackend: Send + Sync {
    /// Issue one request
    async fn fetch(&self, request: BackendRequest) -> Result<BackendResponse>;
}

/// reqwest-based backend
pub struct HttpBackend {
    client: Client,
    url: String,
    headers: HeaderMap,
}

impl HttpBackend {
    /// Create a backend client from configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            headers: configured_headers(&config.headers),
        })
    }

    /// Backend endpoint
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OaiBackend for HttpBackend {
    async fn fetch(&self, request: BackendRequest) -> Result<BackendResponse> {
        let mut headers = forwarded_headers(&request.headers);
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }

        let builder = self
            .client
            .request(request.method.clone(), &self.url)
            .headers(headers);
        let builder = if request.method == Method::POST {
            builder.form(&request.args)
        } else {
            builder.query(&request.args)
        };

        debug!(url = %self.url, method = %request.method, args = ?request.args, "Calling backend");

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| classify(&e))?;
        let body = String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::BackendProtocol(format!("Backend response is not UTF-8: {e}")))?;

        debug!(status = %status, bytes = body.len(), "Backend responded");
        Ok(BackendResponse { status, body })
    }
}

/// Inbound headers minus the ones the backend must not see
#[must_use]
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    for name in &DROPPED_HEADERS {
        headers.remove(name);
    }
    headers
}

fn configured_headers(configured: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in configured {
        match (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %key, "Ignoring invalid backend header"),
        }
    }
    headers
}

fn classify(error: &reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::BackendTimeout(error.to_string())
    } else {
        Error::BackendUnavailable(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_headers_drop_cookie_and_host() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::COOKIE, HeaderValue::from_static("session=1"));
        inbound.insert(header::HOST, HeaderValue::from_static("proxy.example"));
        inbound.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        inbound.insert(header::USER_AGENT, HeaderValue::from_static("harvester/1.0"));
        inbound.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("de"));

        let forwarded = forwarded_headers(&inbound);
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[header::USER_AGENT], "harvester/1.0");
        assert_eq!(forwarded[header::ACCEPT_LANGUAGE], "de");
    }

    #[test]
    fn test_invalid_configured_headers_are_skipped() {
        let configured = HashMap::from([
            ("X-Api-Key".to_string(), "secret".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        let headers = configured_headers(&configured);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-api-key"], "secret");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let config = BackendConfig {
            url: "http://127.0.0.1:1/oai".to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        let err = backend
            .fetch(BackendRequest::get(vec![("verb".to_string(), "Identify".to_string())]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)), "{err}");
    }
}
