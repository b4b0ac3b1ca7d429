use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use std::collections::HashMap;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    UnsupportedTransferEncoding,
    TooLarge,
    Incomplete,
}

impl ParseError {
    /// The response sent to the client before the connection is closed
    pub fn to_response(&self) -> Response {
        match self {
            ParseError::TooLarge => {
                Response::json_error(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
            }
            ParseError::UnsupportedTransferEncoding => {
                Response::json_error(StatusCode::NOT_IMPLEMENTED, "Not Implemented")
            }
            _ => Response::bad_request(),
        }
    }
}

/// Parse one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// `ParseError::Incomplete` if more data is needed. Bodies must be framed by
/// `Content-Length`; chunked request bodies are rejected.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let path = origin_form(target)?;

    // Headers
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.insert(key.to_string(), value.trim().to_string());
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };

    if header("Transfer-Encoding").is_some_and(|v| !v.eq_ignore_ascii_case("identity")) {
        return Err(ParseError::UnsupportedTransferEncoding);
    }

    // Body
    let content_length = header("Content-Length")
        .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
        .transpose()?
        .unwrap_or(0);

    if body_bytes.len() < content_length {
        return Err(ParseError::Incomplete);
    }

    let body = body_bytes[..content_length].to_vec();

    let request = Request {
        method,
        path,
        version: version.to_string(),
        headers,
        body,
    };

    let total_consumed = headers_end + 4 + content_length;
    Ok((request, total_consumed))
}

/// Declared body length of a request whose head is already buffered.
///
/// Lets the connection reject oversized requests before reading the body.
pub fn declared_content_length(buf: &[u8]) -> Option<usize> {
    let headers_end = find_headers_end(buf)?;
    let head = std::str::from_utf8(&buf[..headers_end]).ok()?;

    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("Content-Length")
            .then(|| value.trim().parse().ok())
            .flatten()
    })
}

/// Reduce an absolute-form target (`http://host/path?q`) to origin-form.
fn origin_form(target: &str) -> Result<String, ParseError> {
    if target.starts_with("http://") || target.starts_with("https://") {
        let url = url::Url::parse(target).map_err(|_| ParseError::InvalidRequest)?;
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        return Ok(path);
    }

    if target.starts_with('/') || target == "*" {
        Ok(target.to_string())
    } else {
        Err(ParseError::InvalidRequest)
    }
}

pub(crate) fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}
