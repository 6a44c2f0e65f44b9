//! Verbatim HTTP/1.1 transport over a plain or TLS socket.
//!
//! Used for requests whose path the URL parser would rewrite. The request
//! line goes out exactly as [`HttpRequest::target`] renders it, one
//! connection per request.

use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONNECTION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{self, Certificate, ClientConfig, ServerName};
use tokio_rustls::TlsConnector;
use url::{Host, Position, Url};

use super::{wire, HttpRequest, HttpResponse};
use crate::error::{Result, ScanError};

/// Sends `req` with `headers` and reads the response until the peer closes.
///
/// HTTP proxies receive absolute-form targets, or a `CONNECT` tunnel for
/// `https`. SOCKS proxies are not supported here.
pub async fn send(req: &HttpRequest, headers: &HeaderMap, proxy: Option<&Url>) -> Result<HttpResponse> {
    let mut headers = headers.clone();
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    if !headers.contains_key(AUTHORIZATION) && !req.url.username().is_empty() {
        headers.insert(AUTHORIZATION, basic_auth(&req.url)?);
    }

    let tls = req.url.scheme() == "https";
    let (host, port) = endpoint(&req.url)?;
    let mut target = req.target();

    let mut stream = match proxy {
        None => TcpStream::connect((host.as_str(), port)).await?,
        Some(proxy) if proxy.scheme().starts_with("socks") => {
            return Err(ScanError::Config(format!(
                "verbatim path '{}' cannot be sent through SOCKS proxy '{}'",
                req.path(),
                proxy
            )));
        }
        Some(proxy) => {
            let (proxy_host, proxy_port) = endpoint(proxy)?;
            let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port)).await?;
            if tls {
                open_tunnel(&mut stream, &host, port).await?;
            } else {
                target = format!("http://{}{}", &req.url[Position::BeforeHost..Position::AfterPort], target);
            }
            stream
        }
    };

    debug!("Sending verbatim request line: {} {}", req.method, target);
    let raw = wire::encode(req, &target, &headers);

    let response = if tls {
        let name = ServerName::try_from(host.as_str())
            .map_err(|e| ScanError::Config(format!("invalid TLS server name '{}': {}", host, e)))?;
        let mut stream = TlsConnector::from(tls_config()).connect(name, stream).await?;
        exchange(&mut stream, &raw).await?
    } else {
        exchange(&mut stream, &raw).await?
    };

    wire::parse_response(&response, &req.method)
}

async fn exchange<S>(stream: &mut S, request: &[u8]) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    match stream.read_to_end(&mut response).await {
        Ok(_) => Ok(response),
        // TLS peers may close without close_notify.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !response.is_empty() => Ok(response),
        Err(e) => Err(e),
    }
}

async fn open_tunnel(stream: &mut TcpStream, host: &str, port: u16) -> io::Result<()> {
    let authority = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    stream
        .write_all(format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", authority).as_bytes())
        .await?;

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "proxy closed the tunnel"));
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    if status_line.split_whitespace().nth(1) != Some("200") {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("proxy refused tunnel to {}: {}", authority, status_line),
        ));
    }
    Ok(())
}

fn endpoint(url: &Url) -> Result<(String, u16)> {
    let host = match url.host() {
        Some(Host::Domain(name)) => name.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        None => return Err(ScanError::Config(format!("URL '{}' has no host", url))),
    };
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ScanError::Config(format!("URL '{}' has no port", url)))?;
    Ok((host, port))
}

/// `Authorization` value built from URL credentials.
fn basic_auth(url: &Url) -> Result<HeaderValue> {
    let username = percent_decode_str(url.username()).decode_utf8_lossy();
    let password = percent_decode_str(url.password().unwrap_or("")).decode_utf8_lossy();
    let encoded = STANDARD.encode(format!("{}:{}", username, password));
    HeaderValue::from_str(&format!("Basic {}", encoded))
        .map_err(|e| ScanError::Config(format!("invalid URL credentials: {}", e)))
}

/// Certificates are not verified, same as the pooled client.
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn tls_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    Arc::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use tokio::net::TcpListener;

    /// Accepts one connection, records the request head and replies with `response`.
    async fn one_shot(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&chunk[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_request_line_is_sent_verbatim() {
        let (server, handle) = one_shot("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        let mut req = HttpRequest::get(&format!("{}/a/b?x=1", server)).unwrap();
        req.set_path("/a/../../etc/passwd");

        let response = send(&req, &req.headers, None).await.unwrap();
        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(response.body, b"ok");

        let head = handle.await.unwrap();
        assert!(head.starts_with("GET /a/../../etc/passwd?x=1 HTTP/1.1\r\n"));
        assert!(head.contains("connection: close\r\n"));
    }

    #[tokio::test]
    async fn test_url_credentials_become_basic_auth() {
        let (server, handle) = one_shot("HTTP/1.1 204 No Content\r\n\r\n").await;
        let url = server.replace("http://", "http://admin:secret@");
        let mut req = HttpRequest::new(Method::GET, Url::parse(&url).unwrap(), HeaderMap::new(), Vec::new());
        req.set_path("/./x");

        let response = send(&req, &req.headers, None).await.unwrap();
        assert_eq!(response.status.as_u16(), 204);

        let head = handle.await.unwrap();
        assert!(head.contains("authorization: Basic YWRtaW46c2VjcmV0\r\n"));
    }

    #[tokio::test]
    async fn test_socks_proxy_rejected() {
        let mut req = HttpRequest::get("http://example.test/a").unwrap();
        req.set_path("/a/../b");
        let proxy = Url::parse("socks5://127.0.0.1:1080").unwrap();
        let err = send(&req, &req.headers, Some(&proxy)).await.unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
