use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use reqwest::{Client, ClientBuilder, Proxy, StatusCode, Version};
use std::time::Duration;
use url::Url;

use super::{raw, HttpRequest};
use crate::error::{Result, ScanError};

/// Error chain of a failed send; folded into the result, never propagated.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// A fully-read response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

/// Single-shot HTTP client: one call per request, no retries, no redirects.
pub struct HttpClient {
    inner: Client,
    default_timeout: Duration,
    default_headers: HeaderMap,
    proxy: Option<Url>,
}

impl HttpClient {
    pub fn new(timeout_seconds: u64, proxy_url: Option<&str>, custom_headers: &[(String, String)]) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_seconds);

        let mut builder = ClientBuilder::new()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true);

        // Environment proxies are ignored; only an explicit proxy is used.
        let mut proxy = None;
        builder = match proxy_url {
            Some(raw_proxy) => {
                let p = Proxy::all(raw_proxy)
                    .map_err(|e| ScanError::Config(format!("invalid proxy '{}': {}", raw_proxy, e)))?;
                proxy = Some(parse_proxy_url(raw_proxy)?);
                builder.proxy(p)
            }
            None => builder.no_proxy(),
        };

        let inner = builder.build()?;

        let mut default_headers = HeaderMap::new();
        for (key, val) in custom_headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ScanError::Config(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(val)
                .map_err(|e| ScanError::Config(format!("invalid value for header '{}': {}", key, e)))?;
            default_headers.insert(name, value);
        }

        Ok(Self {
            inner,
            default_timeout: timeout,
            default_headers,
            proxy,
        })
    }

    /// Sends `req` once and reads the whole body.
    ///
    /// `Host` and `Content-Length` are left to the transport; request headers
    /// win over the client's default headers. A path the URL parser would
    /// rewrite goes out over [`raw::send`] instead of the pooled client.
    pub async fn execute(&self, req: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        if req.has_verbatim_path() {
            let headers = self.merged_headers(req);
            return match tokio::time::timeout(self.default_timeout, raw::send(req, &headers, self.proxy.as_ref())).await {
                Ok(response) => Ok(response?),
                Err(_) => Err(format!("request timed out after {}s", self.default_timeout.as_secs()).into()),
            };
        }

        let mut builder = self.inner.request(req.method.clone(), req.url.as_str());

        for (name, value) in self.default_headers.iter() {
            if !req.headers.contains_key(name) {
                builder = builder.header(name, value);
            }
        }

        for (name, value) in req.headers.iter() {
            if name == HOST || name == CONTENT_LENGTH {
                continue;
            }
            builder = builder.header(name, value);
        }

        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        let response = builder.timeout(self.default_timeout).send().await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            version,
            headers,
            content_length,
            body,
        })
    }

    fn merged_headers(&self, req: &HttpRequest) -> HeaderMap {
        let mut headers = req.headers.clone();
        for (name, value) in self.default_headers.iter() {
            if !req.headers.contains_key(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        headers
    }
}

/// Proxy address as a URL; a bare `host:port` means an HTTP proxy.
fn parse_proxy_url(proxy: &str) -> Result<Url> {
    let with_scheme = if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{}", proxy)
    };
    Url::parse(&with_scheme).map_err(|e| ScanError::Config(format!("invalid proxy '{}': {}", proxy, e)))
}

/// Protocol label as it appears on a status line.
pub fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}
