//! Pass-through to the local container daemon.
//!
//! Requests are relayed as HTTP/1.0 over the daemon's unix socket so the
//! daemon closes the connection after the response; the body is read to EOF.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{HiveError, Result};

#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: String,
    /// Path plus query string, e.g. `/v1.24/containers/json?all=1`.
    pub path_and_query: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse>;
}

#[derive(Debug, Clone)]
pub struct DockerForwarder {
    socket_path: PathBuf,
}

impl DockerForwarder {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

fn encode_request(request: &ForwardRequest) -> Vec<u8> {
    let mut head = format!(
        "{} {} HTTP/1.0\r\nHost: docker\r\nContent-Length: {}\r\n",
        request.method,
        request.path_and_query,
        request.body.len()
    );
    if let Some(content_type) = &request.content_type {
        head.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(&request.body);
    out
}

fn parse_response(raw: &[u8]) -> Result<ForwardResponse> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| HiveError::Forward("malformed daemon response".to_string()))?;
    let head = std::str::from_utf8(&raw[..split])
        .map_err(|_| HiveError::Forward("non-utf8 response headers".to_string()))?;
    let mut lines = head.split("\r\n");

    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| HiveError::Forward("missing status line".to_string()))?;

    let content_type = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_string())
    });

    Ok(ForwardResponse {
        status,
        content_type,
        body: Bytes::copy_from_slice(&raw[split + 4..]),
    })
}

#[cfg(unix)]
#[async_trait]
impl Forwarder for DockerForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        tracing::debug!(
            method = %request.method,
            path = %request.path_and_query,
            "Proxying daemon request"
        );

        let mut stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| {
                HiveError::Forward(format!(
                    "error connecting to daemon at {}: {e}",
                    self.socket_path.display()
                ))
            })?;

        stream
            .write_all(&encode_request(&request))
            .await
            .map_err(|e| HiveError::Forward(format!("error writing to daemon: {e}")))?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| HiveError::Forward(format!("error reading from daemon: {e}")))?;

        parse_response(&raw)
    }
}

#[cfg(not(unix))]
#[async_trait]
impl Forwarder for DockerForwarder {
    async fn forward(&self, _request: ForwardRequest) -> Result<ForwardResponse> {
        Err(HiveError::Forward(
            "daemon forwarding requires a unix socket".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_encoding() {
        let request = ForwardRequest {
            method: "POST".to_string(),
            path_and_query: "/v1.24/containers/create?name=web".to_string(),
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(b"{}"),
        };
        let encoded = String::from_utf8(encode_request(&request)).unwrap();
        assert!(encoded.starts_with("POST /v1.24/containers/create?name=web HTTP/1.0\r\n"));
        assert!(encoded.contains("Content-Length: 2\r\n"));
        assert!(encoded.contains("Content-Type: application/json\r\n"));
        assert!(encoded.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn response_parsing() {
        let raw = b"HTTP/1.0 404 Not Found\r\n\
                    Content-Type: application/json\r\n\
                    Server: Docker\r\n\r\n\
                    {\"message\":\"no such container\"}";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(&response.body[..], b"{\"message\":\"no such container\"}");
    }

    #[test]
    fn truncated_response_is_an_error() {
        assert!(parse_response(b"HTTP/1.0 200 OK\r\n").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_socket_is_forward_error() {
        let forwarder = DockerForwarder::new("/nonexistent/hive-test.sock");
        let err = forwarder
            .forward(ForwardRequest {
                method: "GET".to_string(),
                path_and_query: "/v1.24/version".to_string(),
                content_type: None,
                body: Bytes::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::Forward(_)));
    }
}
