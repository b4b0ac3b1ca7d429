//! Shared utilities for integration tests.
//!
//! Mock upstreams are plain TCP listeners speaking just enough HTTP/1.1 to
//! record what the gateway sent and answer with a canned response.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use waypoint::config::RouteConfig;
use waypoint::http::parser::parse_http_request;
use waypoint::http::request::Request;
use waypoint::http::response::Response;
use waypoint::proxy::upstream::read_http_response;
use waypoint::proxy::{Dispatcher, UpstreamClient};
use waypoint::routing::RouteTable;
use waypoint::server::listener::serve;

/// A canned upstream reply
#[derive(Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: &'static str,
}

impl Reply {
    pub fn json(status: u16, body: &'static str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }
}

/// Start an upstream that answers every request with `reply` and forwards
/// the parsed request to the returned channel.
pub async fn start_recording_upstream(reply: Reply) -> (SocketAddr, mpsc::UnboundedReceiver<Request>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let reply = Arc::new(reply);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let reply = Arc::clone(&reply);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let _ = tx.send(request);

                let response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.status,
                    reply.content_type,
                    reply.body.len(),
                    reply.body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start an upstream that accepts connections and never answers.
///
/// The returned channel receives a message when the gateway closes the
/// upstream connection.
pub async fn start_silent_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut sink = [0u8; 1024];
                loop {
                    match socket.read(&mut sink).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                let _ = tx.send(());
            });
        }
    });

    (addr, rx)
}

/// Start an upstream that reads one request and answers with `raw`
/// exactly as given, then closes.
pub async fn start_raw_upstream(raw: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let raw = Arc::new(raw);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let raw = Arc::clone(&raw);
            tokio::spawn(async move {
                if read_request(&mut socket).await.is_none() {
                    return;
                }
                let _ = socket.write_all(&raw).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// An address with nothing listening on it
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut buffer = Vec::new();
    let mut temp = [0u8; 4096];

    loop {
        if let Ok((request, _)) = parse_http_request(&buffer) {
            return Some(request);
        }

        let n = socket.read(&mut temp).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&temp[..n]);
    }
}

pub fn route(prefix: &str, addr: SocketAddr) -> RouteConfig {
    RouteConfig {
        prefix: prefix.to_string(),
        upstream: format!("http://{}", addr),
        name: None,
    }
}

pub fn dispatcher(routes: &[RouteConfig], request_timeout: Duration) -> Dispatcher {
    Dispatcher::new(
        RouteTable::from_config(routes).unwrap(),
        UpstreamClient::new(Duration::from_millis(500), request_timeout),
    )
}

/// Serve a gateway for `routes` on an ephemeral port
pub async fn start_gateway(routes: &[RouteConfig], request_timeout: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Arc::new(dispatcher(routes, request_timeout));

    tokio::spawn(async move {
        let _ = serve(listener, dispatcher, 64 * 1024).await;
    });

    addr
}

/// Send raw bytes to the gateway and read one response
pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> Response {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    read_http_response(&mut stream, false).await.unwrap()
}
