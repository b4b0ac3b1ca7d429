//! Upstream request forwarding
//!
//! This module builds the outbound request for a matched route and performs
//! a single HTTP/1.1 exchange with the upstream. Every exchange opens its own
//! connection and sends `Connection: close`; the socket is dropped on every
//! exit path, including timeouts and cancellation.

use crate::config::UpstreamConfig;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::proxy::error::GatewayError;
use crate::proxy::form::{FORM_CONTENT_TYPE, FormFields};
use crate::routing::{Route, RouteMatch};
use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default buffer size for reading upstream responses
const BUFFER_SIZE: usize = 8192;

/// Upper bound on an upstream response head
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on a buffered upstream response body
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "TE",
    "Trailer",
    "Upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// The request sent to an upstream on behalf of a client
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Origin-form target on the upstream (prefix already stripped)
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    /// Derive the upstream request from an inbound request and its route.
    ///
    /// The method is mirrored, the body is the re-encoded form fields, and
    /// end-to-end headers are copied except those the gateway owns
    /// (`Host`, framing and content headers).
    pub async fn from_inbound(request: &Request, matched: &RouteMatch<'_>) -> Self {
        let body = FormFields::from_request(request).await.encode().into_bytes();

        let mut headers = vec![("Host".to_string(), matched.route.authority())];

        let mut forwarded: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(name, _)| {
                !is_hop_by_hop(name)
                    && !name.eq_ignore_ascii_case("Host")
                    && !name.eq_ignore_ascii_case("Content-Length")
                    && !name.eq_ignore_ascii_case("Content-Type")
                    && !name.eq_ignore_ascii_case("Expect")
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        forwarded.sort();
        headers.extend(forwarded);

        if !body.is_empty() {
            headers.push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
        }
        headers.push(("Content-Length".to_string(), body.len().to_string()));
        headers.push(("Connection".to_string(), "close".to_string()));

        Self {
            method: request.method.clone(),
            target: matched.upstream_target(),
            headers,
            body,
        }
    }

    /// Retrieves a header value by name, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to HTTP/1.1 wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(256 + self.body.len());

        buffer.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", self.method, self.target).as_bytes(),
        );

        for (key, value) in &self.headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&self.body);
        buffer
    }
}

/// Performs outbound exchanges with upstream services
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    /// Bound on establishing the TCP connection
    connect_timeout: Duration,

    /// Bound on the whole exchange, connection included
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(config.connect_timeout(), config.request_timeout())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Send `outbound` to the route's upstream and read its response.
    ///
    /// Completes within the request timeout. The upstream's status is
    /// returned as-is; only transport failures become errors.
    pub async fn send(
        &self,
        route: &Route,
        outbound: &OutboundRequest,
    ) -> Result<Response, GatewayError> {
        let upstream = route.display_name().to_string();

        tracing::debug!(
            upstream = %upstream,
            method = %outbound.method,
            target = %outbound.target,
            "Forwarding request to upstream"
        );

        match timeout(self.request_timeout, self.exchange(route, outbound)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(reason)) => Err(GatewayError::UpstreamUnreachable { upstream, reason }),
            Err(_) => Err(GatewayError::UpstreamTimeout {
                upstream,
                after: self.request_timeout,
            }),
        }
    }

    async fn exchange(&self, route: &Route, outbound: &OutboundRequest) -> Result<Response> {
        let addr = route.socket_addr();

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .context("Connection timeout")?
            .with_context(|| format!("Failed to connect to {}", addr))?;

        tracing::trace!(upstream = route.display_name(), "Connected to upstream");

        stream.write_all(&outbound.to_bytes()).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to upstream");

        read_http_response(&mut stream, outbound.method == Method::HEAD).await
    }
}

/// Read one HTTP/1.x response from `stream`.
///
/// The body is framed by `Transfer-Encoding: chunked`, `Content-Length`, or
/// connection close, in that order of precedence. Hop-by-hop headers and
/// `Content-Length` are dropped; the returned response carries a fresh
/// `Content-Length` for the decoded body, except that a response to `HEAD`
/// keeps the length the upstream declared.
pub async fn read_http_response<R>(stream: &mut R, head_request: bool) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    // Read response head
    let head_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }

        if buffer.len() > MAX_HEAD_BYTES {
            anyhow::bail!("Response headers too large");
        }

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }
    };

    let head = buffer.split_to(head_end + 4);
    let (status, headers) = parse_response_head(&head[..head_end])?;

    let chunked = header_value(&headers, "Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

    let body = if head_request || status.is_bodiless() {
        Vec::new()
    } else if chunked {
        read_chunked_body(stream, &mut buffer).await?
    } else if let Some(len) = header_value(&headers, "Content-Length") {
        let len: usize = len.trim().parse().context("Invalid Content-Length")?;
        if len > MAX_BODY_BYTES {
            anyhow::bail!("Response body too large");
        }
        fill(stream, &mut buffer, len).await?;
        buffer.split_to(len).to_vec()
    } else {
        read_to_close(stream, &mut buffer).await?
    };

    let head_length = head_request
        .then(|| header_value(&headers, "Content-Length"))
        .flatten()
        .map(str::to_string);

    let relayed = headers
        .into_iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("Content-Length"))
        .collect();

    let mut response = Response::new(status).with_headers(relayed).body(body).build();
    if let Some(length) = head_length {
        response.set_header("Content-Length", length);
    }

    Ok(response)
}

/// Parse the status line and header fields of a response head
fn parse_response_head(head: &[u8]) -> Result<(StatusCode, Vec<(String, String)>)> {
    let head = std::str::from_utf8(head).context("Invalid UTF-8 in response headers")?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().context("Empty response")?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        anyhow::bail!("Invalid status line: {}", status_line);
    }

    let code: u16 = parts
        .next()
        .context("Missing status code")?
        .parse()
        .context("Invalid status code")?;
    let status = StatusCode::from_u16(code)
        .with_context(|| format!("Status code out of range: {}", code))?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            anyhow::bail!("Malformed response header: {}", line);
        };

        // Repeated fields stay separate; Set-Cookie cannot be folded
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    Ok((status, headers))
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Read until `buffer` holds at least `len` bytes
async fn fill<R>(stream: &mut R, buffer: &mut BytesMut, len: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while buffer.len() < len {
        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed before complete body received");
        }
    }
    Ok(())
}

/// Read one CRLF-terminated line, without the terminator
async fn read_line<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = buffer.windows(2).position(|w| w == b"\r\n") {
            let line = buffer.split_to(pos);
            buffer.advance(2);
            return String::from_utf8(line.to_vec()).context("Invalid UTF-8 in chunk framing");
        }

        if buffer.len() > MAX_HEAD_BYTES {
            anyhow::bail!("Chunk framing line too long");
        }

        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed inside chunked body");
        }
    }
}

async fn read_chunked_body<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();

    loop {
        let line = read_line(stream, buffer).await?;
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .with_context(|| format!("Invalid chunk size: {:?}", size_str))?;

        if size == 0 {
            // Skip trailers
            while !read_line(stream, buffer).await?.is_empty() {}
            return Ok(body);
        }

        // body.len() never exceeds the cap, so this cannot underflow
        if size > MAX_BODY_BYTES - body.len() {
            anyhow::bail!("Response body too large");
        }

        fill(stream, buffer, size + 2).await?;
        body.extend_from_slice(&buffer[..size]);
        if &buffer[size..size + 2] != b"\r\n" {
            anyhow::bail!("Chunk not terminated by CRLF");
        }
        buffer.advance(size + 2);
    }
}

async fn read_to_close<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if buffer.len() > MAX_BODY_BYTES {
            anyhow::bail!("Response body too large");
        }

        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            return Ok(buffer.to_vec());
        }
    }
}
