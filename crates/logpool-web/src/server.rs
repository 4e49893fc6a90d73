// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use logpool::accept::accept_until_cancelled;
use logpool::constants::{DEFAULT_HOST, POLL_TIMEOUT};
use logpool::{ChannelKey, ChannelRegistry, ReadError};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::http_utils::{create_json_response, log_and_create_http_response, HttpResponse};

const INDEX_ENDPOINT_PATH: &str = "/";
const LOST_ENDPOINT_PATH: &str = "/lost";
const BUFFER_ENDPOINT_PREFIX: &str = "/buffer/";
const POLL_ENDPOINT_PREFIX: &str = "/poll/";

pub const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// How long `/poll/<channel>` waits for the next batch.
    pub poll_timeout: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            poll_timeout: POLL_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct BufferResponse<'a> {
    buffer: &'a [String],
}

#[derive(Serialize)]
struct IndexResponse {
    channels: Vec<String>,
    lost: Vec<String>,
    /// Buffer endpoint of every listed channel.
    links: BTreeMap<String, String>,
}

/// Viewer-facing HTTP server.
pub struct WebServer {
    cancel_token: CancellationToken,
    registry: Arc<ChannelRegistry>,
    listener: TcpListener,
    poll_timeout: Duration,
}

impl WebServer {
    pub async fn bind(
        config: &WebConfig,
        registry: Arc<ChannelRegistry>,
        cancel_token: CancellationToken,
    ) -> io::Result<WebServer> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        debug!("Web server bound to {}", listener.local_addr()?);

        Ok(WebServer {
            cancel_token,
            registry,
            listener,
            poll_timeout: config.poll_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves viewer requests until cancelled. In-flight requests are aborted on
    /// shutdown.
    pub async fn serve(self) -> io::Result<()> {
        info!("Serving channel views on {}", self.local_addr()?);

        let registry = Arc::clone(&self.registry);
        let poll_timeout = self.poll_timeout;
        let service = service_fn(move |req| {
            // called for each http request
            endpoint_handler(Arc::clone(&registry), poll_timeout, req)
        });

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = JoinSet::new();

        let result = accept_until_cancelled(
            &self.listener,
            &self.cancel_token,
            &mut joinset,
            "Web server",
            |conn, _peer| {
                let conn = TokioIo::new(conn);
                let server = server.clone();
                let service = service.clone();
                async move {
                    if let Err(e) = server.serve_connection(conn, service).await {
                        debug!("Connection error: {e}");
                    }
                }
            },
        )
        .await;

        info!("Web server shutting down");
        joinset.shutdown().await;
        result
    }
}

/// Routes a viewer request. The request body is never read.
pub async fn endpoint_handler<B>(
    registry: Arc<ChannelRegistry>,
    poll_timeout: Duration,
    req: Request<B>,
) -> http::Result<HttpResponse> {
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        return log_and_create_http_response(
            &format!("Method {} not allowed", req.method()),
            StatusCode::METHOD_NOT_ALLOWED,
        );
    }

    let path = req.uri().path();
    match path {
        INDEX_ENDPOINT_PATH => index_handler(&registry),
        LOST_ENDPOINT_PATH => lost_handler(&registry),
        _ => {
            if let Some(segment) = channel_segment(path, BUFFER_ENDPOINT_PREFIX) {
                buffer_handler(&registry, segment)
            } else if let Some(segment) = channel_segment(path, POLL_ENDPOINT_PREFIX) {
                poll_handler(&registry, segment, poll_timeout).await
            } else {
                log_and_create_http_response(
                    &format!("No endpoint at {path}"),
                    StatusCode::NOT_FOUND,
                )
            }
        }
    }
}

/// Extracts the single path segment following `prefix`.
fn channel_segment<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)
        .filter(|segment| !segment.is_empty() && !segment.contains('/'))
}

/// Maps a URL segment back to a channel key. The `-` to `/` substitution is tried
/// first; keys that really contain `-` fall back to the raw segment.
fn resolve_key(registry: &ChannelRegistry, segment: &str) -> String {
    let decoded = ChannelKey::decode_url_segment(segment);
    if registry.contains(&decoded) {
        decoded
    } else {
        segment.to_string()
    }
}

fn read_error_response(err: &ReadError) -> http::Result<HttpResponse> {
    let status = match err {
        ReadError::ChannelNotFound(_) | ReadError::ChannelLost { .. } => StatusCode::NOT_FOUND,
        ReadError::WaitTimedOut(_) => StatusCode::REQUEST_TIMEOUT,
    };
    log_and_create_http_response(&err.to_string(), status)
}

fn index_handler(registry: &ChannelRegistry) -> http::Result<HttpResponse> {
    let channels: Vec<String> = registry.list_active_channels().into_iter().collect();
    let lost: Vec<String> = registry.list_lost_channels().into_keys().collect();
    let links = channels
        .iter()
        .chain(&lost)
        .map(|key| {
            let link = format!(
                "{BUFFER_ENDPOINT_PREFIX}{}",
                ChannelKey::encode_url_segment(key)
            );
            (key.clone(), link)
        })
        .collect();
    let body = IndexResponse {
        channels,
        lost,
        links,
    };
    create_json_response(&body, StatusCode::OK)
}

fn lost_handler(registry: &ChannelRegistry) -> http::Result<HttpResponse> {
    let lost: BTreeMap<String, String> = registry
        .list_lost_channels()
        .into_iter()
        .map(|(key, since)| (key, since.to_rfc3339()))
        .collect();
    create_json_response(&lost, StatusCode::OK)
}

fn buffer_handler(registry: &ChannelRegistry, segment: &str) -> http::Result<HttpResponse> {
    let key = resolve_key(registry, segment);
    match registry.get_buffer(&key) {
        Ok(lines) => create_json_response(&BufferResponse { buffer: &lines }, StatusCode::OK),
        Err(e) => read_error_response(&e),
    }
}

async fn poll_handler(
    registry: &ChannelRegistry,
    segment: &str,
    poll_timeout: Duration,
) -> http::Result<HttpResponse> {
    let key = resolve_key(registry, segment);
    match registry.await_next(&key, poll_timeout).await {
        Ok(batch) => create_json_response(&BufferResponse { buffer: &batch }, StatusCode::OK),
        Err(e) => read_error_response(&e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};

    async fn get(registry: &Arc<ChannelRegistry>, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(()).unwrap();
        let response = endpoint_handler(Arc::clone(registry), Duration::from_secs(30), req)
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn register(registry: &ChannelRegistry, name: &str) -> Arc<logpool::Channel> {
        registry.register(
            ChannelKey::parse(name).unwrap(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_buffer_endpoint() {
        let registry = Arc::new(ChannelRegistry::new());
        let channel = register(&registry, "web/frontend");
        channel.publish(vec!["line1".to_string(), "line2".to_string()]);

        let (status, body) = get(&registry, "/buffer/web-frontend").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "buffer": ["line1", "line2"] }));
    }

    #[tokio::test]
    async fn test_buffer_endpoint_keeps_dashes_when_needed() {
        let registry = Arc::new(ChannelRegistry::new());
        let channel = register(&registry, "app-1");
        channel.publish(vec!["hello".to_string()]);

        let (status, body) = get(&registry, "/buffer/app-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "buffer": ["hello"] }));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let registry = Arc::new(ChannelRegistry::new());

        let (status, _) = get(&registry, "/buffer/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get(&registry, "/poll/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "message": "channel not found: ghost" }));
    }

    #[tokio::test]
    async fn test_poll_returns_next_batch() {
        let registry = Arc::new(ChannelRegistry::new());
        let channel = register(&registry, "svc");

        let poll = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { get(&registry, "/poll/svc").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.publish(vec!["fresh".to_string()]);

        let (status, body) = poll.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "buffer": ["fresh"] }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out() {
        let registry = Arc::new(ChannelRegistry::new());
        register(&registry, "quiet");

        let (status, _) = get(&registry, "/poll/quiet").await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_index_and_lost_endpoints() {
        let registry = Arc::new(ChannelRegistry::new());
        register(&registry, "alive");
        let gone = register(&registry, "jobs/gone");
        registry.mark_lost(&gone);

        let (status, body) = get(&registry, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "channels": ["alive"],
                "lost": ["jobs/gone"],
                "links": { "alive": "/buffer/alive", "jobs/gone": "/buffer/jobs-gone" }
            })
        );

        // Every advertised link resolves back to its channel.
        let (status, _) = get(&registry, "/buffer/jobs-gone").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(&registry, "/lost").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("jobs/gone").and_then(Value::as_str).is_some());
        assert!(body.get("alive").is_none());
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let registry = Arc::new(ChannelRegistry::new());

        let (status, _) = get(&registry, "/buffer/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&registry, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/buffer/x")
            .body(())
            .unwrap();
        let response = endpoint_handler(Arc::clone(&registry), Duration::from_secs(1), req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_serve_over_tcp_and_shutdown() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let registry = Arc::new(ChannelRegistry::new());
        register(&registry, "svc").publish(vec!["over tcp".to_string()]);

        let cancel_token = CancellationToken::new();
        let config = WebConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..WebConfig::default()
        };
        let server = WebServer::bind(&config, Arc::clone(&registry), cancel_token.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.serve());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /buffer/svc HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(r#"{"buffer":["over tcp"]}"#));

        cancel_token.cancel();
        task.await.unwrap().unwrap();
    }
}
