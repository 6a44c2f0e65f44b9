//! HTTP/1.1 request wire form: serialization, parsing, and raw request files.

use std::fs;
use std::path::Path;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use reqwest::{Method, StatusCode, Version};
use url::{Position, Url};

use super::{HttpRequest, HttpResponse};
use crate::error::{Result, ScanError};

/// Serializes `req` as an origin-form HTTP/1.1 request.
///
/// `Host` is written from the URL authority and `Content-Length` from the
/// body; stale copies of either in the header map are skipped.
pub fn to_wire(req: &HttpRequest) -> Vec<u8> {
    encode(req, &req.target(), &req.headers)
}

/// Serializes `req` with an explicit request target and header set.
pub fn encode(req: &HttpRequest, target: &str, headers: &HeaderMap) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + req.body.len());

    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", req.method, target).as_bytes());
    out.extend_from_slice(format!("Host: {}\r\n", &req.url[Position::BeforeHost..Position::AfterPort]).as_bytes());

    for (name, value) in headers.iter() {
        if name == HOST || name == CONTENT_LENGTH {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if !req.body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", req.body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out
}

/// Parses a raw HTTP/1.x request.
///
/// Accepts CRLF or bare LF line endings. Origin-form targets are resolved
/// against the `Host` header with an `http` scheme. Without `Content-Length`
/// the remaining bytes are the body, unless they are only whitespace. `Host` and `Content-Length` are consumed and
/// not kept in the header map.
pub fn parse_request(raw: &[u8]) -> Result<HttpRequest> {
    let (head, rest) = split_head(raw);
    let head = std::str::from_utf8(head)
        .map_err(|_| ScanError::Parse("request head is not valid UTF-8".to_string()))?;

    let mut lines = head.lines().skip_while(|l| l.trim().is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| ScanError::Parse("empty request".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => return Err(ScanError::Parse(format!("malformed request line '{}'", request_line))),
    };
    if !version.starts_with("HTTP/") {
        return Err(ScanError::Parse(format!("unsupported protocol '{}'", version)));
    }
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ScanError::Parse(format!("invalid method '{}'", method)))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ScanError::Parse(format!("malformed header line '{}'", line)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ScanError::Parse(format!("invalid header name '{}'", name.trim())))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| ScanError::Parse(format!("invalid value for header '{}'", name)))?;
        headers.append(name, value);
    }

    if headers.contains_key(TRANSFER_ENCODING) {
        return Err(ScanError::Parse("chunked request bodies are not supported".to_string()));
    }

    let body = match headers.get(CONTENT_LENGTH) {
        Some(len) => {
            let len: usize = len
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| ScanError::Parse("invalid Content-Length".to_string()))?;
            if rest.len() < len {
                return Err(ScanError::Parse(format!(
                    "body truncated: expected {} bytes, found {}",
                    len,
                    rest.len()
                )));
            }
            rest[..len].to_vec()
        }
        None if rest.iter().all(u8::is_ascii_whitespace) => Vec::new(),
        None => rest.to_vec(),
    };

    let url = resolve_target(target, &headers)?;
    // Both are regenerated from the URL and body on the way out.
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    let mut request = HttpRequest::new(method, url, headers, body);
    request.set_path(&target_path(target));
    Ok(request)
}

/// Parses a complete HTTP/1.x response read off a closed connection.
///
/// The body is framed by chunked encoding, then `Content-Length`, then the
/// end of the stream. Responses to `HEAD` carry no body.
pub fn parse_response(raw: &[u8], method: &Method) -> Result<HttpResponse> {
    let (head, rest) = split_head(raw);
    let head = std::str::from_utf8(head)
        .map_err(|_| ScanError::Parse("response head is not valid UTF-8".to_string()))?;

    let mut lines = head.lines();
    let status_line = lines
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| ScanError::Parse("empty response".to_string()))?;

    let mut parts = status_line.splitn(3, ' ');
    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        Some("HTTP/0.9") => Version::HTTP_09,
        _ => return Err(ScanError::Parse(format!("malformed status line '{}'", status_line))),
    };
    let status = parts
        .next()
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .ok_or_else(|| ScanError::Parse(format!("malformed status line '{}'", status_line)))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            headers.append(name, value);
        }
    }

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let chunked = headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

    let bodiless = *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;

    let body = if bodiless {
        Vec::new()
    } else if chunked {
        decode_chunked(rest)?
    } else if let Some(len) = content_length {
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        if rest.len() < len {
            return Err(ScanError::Parse(format!(
                "response body truncated: expected {} bytes, found {}",
                len,
                rest.len()
            )));
        }
        rest[..len].to_vec()
    } else {
        rest.to_vec()
    };

    Ok(HttpResponse {
        status,
        version,
        headers,
        content_length: if chunked { None } else { content_length },
        body,
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = find(data, b"\r\n").ok_or_else(|| ScanError::Parse("unterminated chunk size".to_string()))?;
        let size_line = std::str::from_utf8(&data[..line_end])
            .map_err(|_| ScanError::Parse("chunk size is not valid UTF-8".to_string()))?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ScanError::Parse(format!("invalid chunk size '{}'", size_hex)))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(body);
        }
        if data.len() < size {
            return Err(ScanError::Parse("chunk truncated".to_string()));
        }
        body.extend_from_slice(&data[..size]);
        data = data[size..].strip_prefix(b"\r\n").unwrap_or(&data[size..]);
    }
}

/// Reads and parses a saved raw request, as captured by an intercepting proxy.
pub fn load_request_file(path: impl AsRef<Path>) -> Result<HttpRequest> {
    let path = path.as_ref();
    let raw = fs::read(path).map_err(|e| ScanError::io(path, e))?;
    parse_request(&raw)
}

fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = find(raw, b"\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, &raw[raw.len()..])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Path part of a request-line target, untouched by URL parsing.
fn target_path(target: &str) -> String {
    let lower = target.to_ascii_lowercase();
    let rest = if lower.starts_with("http://") || lower.starts_with("https://") {
        let after_scheme = &target[target.find("://").map_or(0, |i| i + 3)..];
        after_scheme.find('/').map_or("", |i| &after_scheme[i..])
    } else {
        target
    };
    let path = &rest[..rest.find(['?', '#']).unwrap_or(rest.len())];
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn resolve_target(target: &str, headers: &HeaderMap) -> Result<Url> {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Url::parse(target).map_err(|e| ScanError::Parse(format!("invalid target '{}': {}", target, e)));
    }

    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ScanError::Parse("origin-form target without a Host header".to_string()))?;

    let target = if target.starts_with('/') { target.to_string() } else { format!("/{}", target) };
    Url::parse(&format!("http://{}{}", host, target))
        .map_err(|e| ScanError::Parse(format!("invalid target '{}': {}", target, e)))
}
