//! End-to-end tests through the TCP listener

mod common;

use std::time::Duration;

use common::{Reply, route, send_raw, start_gateway, start_recording_upstream, start_silent_upstream};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use waypoint::http::request::Method;
use waypoint::http::response::StatusCode;
use waypoint::proxy::upstream::read_http_response;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_gateway_relays_over_tcp() {
    let (post_addr, mut seen) =
        start_recording_upstream(Reply::json(200, r#"[{"id":1}]"#)).await;
    let gateway = start_gateway(&[route("/post", post_addr)], TIMEOUT).await;

    let response = send_raw(
        gateway,
        b"GET /post/posts HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, br#"[{"id":1}]"#.to_vec());
    assert_eq!(response.header("Content-Type"), Some("application/json"));

    let received = seen.recv().await.unwrap();
    assert_eq!(received.path, "/posts");
    assert_eq!(received.header("Host"), Some(post_addr.to_string().as_str()));
}

#[tokio::test]
async fn test_gateway_form_post_over_tcp() {
    let (user_addr, mut seen) =
        start_recording_upstream(Reply::json(200, r#"{"status":"success"}"#)).await;
    let gateway = start_gateway(&[route("/user", user_addr)], TIMEOUT).await;

    let body = "email=a%40b.com&password=x";
    let raw = format!(
        "POST /user/login HTTP/1.1\r\nHost: gateway\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_raw(gateway, raw.as_bytes()).await;

    assert_eq!(response.status, StatusCode::OK);

    let received = seen.recv().await.unwrap();
    assert_eq!(received.path, "/login");
    assert_eq!(received.body, body.as_bytes().to_vec());
}

#[tokio::test]
async fn test_gateway_forwards_extension_method() {
    let (addr, mut seen) = start_recording_upstream(Reply::json(200, "{}")).await;
    let gateway = start_gateway(&[route("/post", addr)], TIMEOUT).await;

    let response = send_raw(gateway, b"PURGE /post/x HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert_eq!(response.status, StatusCode::OK);

    let received = seen.recv().await.unwrap();
    assert_eq!(received.method, Method::Extension("PURGE".to_string()));
    assert_eq!(received.path, "/x");
}

#[tokio::test]
async fn test_gateway_not_found_over_tcp() {
    let gateway = start_gateway(&[], TIMEOUT).await;

    let response = send_raw(gateway, b"GET /comments HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body, br#"{"error":"Not Found"}"#.to_vec());
}

#[tokio::test]
async fn test_gateway_keep_alive_serves_sequential_requests() {
    let (addr, _seen) = start_recording_upstream(Reply::json(200, "ok")).await;
    let gateway = start_gateway(&[route("/post", addr)], TIMEOUT).await;

    let mut stream = TcpStream::connect(gateway).await.unwrap();

    stream.write_all(b"GET /post/posts HTTP/1.1\r\n\r\n").await.unwrap();
    let first = read_http_response(&mut stream, false).await.unwrap();
    assert_eq!(first.body, b"ok".to_vec());

    stream.write_all(b"GET /nowhere HTTP/1.1\r\n\r\n").await.unwrap();
    let second = read_http_response(&mut stream, false).await.unwrap();
    assert_eq!(second.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gateway_rejects_malformed_request_with_json() {
    let gateway = start_gateway(&[], TIMEOUT).await;

    let response = send_raw(gateway, b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, br#"{"error":"Bad Request"}"#.to_vec());
    assert_eq!(response.header("Content-Type"), Some("application/json"));
}

#[tokio::test]
async fn test_gateway_rejects_oversized_body() {
    let gateway = start_gateway(&[], TIMEOUT).await;

    let response = send_raw(
        gateway,
        b"POST /post/posts HTTP/1.1\r\nContent-Length: 10000000\r\n\r\n",
    )
    .await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_gateway_unreachable_upstream_over_tcp() {
    let addr = common::unreachable_addr().await;
    let gateway = start_gateway(&[route("/post", addr)], TIMEOUT).await;

    let response = send_raw(gateway, b"GET /post/posts HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body, br#"{"error":"Upstream Unavailable"}"#.to_vec());
}

#[tokio::test]
async fn test_client_disconnect_cancels_upstream_call() {
    let (addr, mut upstream_closed) = start_silent_upstream().await;
    let gateway = start_gateway(&[route("/post", addr)], Duration::from_secs(30)).await;

    let mut stream = TcpStream::connect(gateway).await.unwrap();
    stream.write_all(b"GET /post/posts HTTP/1.1\r\n\r\n").await.unwrap();

    // Give the gateway time to reach the upstream, then hang up
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(stream);

    // Well before the 30s request timeout, the upstream sees its socket close
    tokio::time::timeout(Duration::from_secs(5), upstream_closed.recv())
        .await
        .expect("upstream connection was not released")
        .unwrap();
}
