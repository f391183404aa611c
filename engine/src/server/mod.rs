//! Protocol servers
//!
//! Three façades (memory, context, tools) expose engine state to external
//! clients over localhost TCP. Framing is shared and lives in the sdk:
//! one JSON request per line in, one JSON response per line out. Every
//! handler error is caught at the method boundary and becomes a
//! structured `{error}` response; a bad client can never take the engine
//! down with it.

pub mod context;
pub mod memory;
pub mod tools;

use async_trait::async_trait;
use sdk::errors::{AgentError, AgentErrorExt};
use sdk::protocol::{Request, Response};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A protocol façade: dispatches one method call to engine state.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Server name, used in logs.
    fn name(&self) -> &'static str;

    /// Handles one request, returning the `result` value.
    async fn handle(&self, request: &Request) -> Result<serde_json::Value, AgentError>;
}

/// Binds a listener and serves connections until shutdown.
///
/// Each connection gets its own task; within a connection, requests are
/// answered in order.
pub async fn serve(
    bind_addr: &str,
    port: u16,
    handler: Arc<dyn RequestHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, AgentError> {
    let listener = TcpListener::bind((bind_addr, port)).await?;
    let local = listener.local_addr()?;
    info!(server = handler.name(), addr = %local, "protocol server listening");

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender means shutdown too.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(server = handler.name(), %peer, "connection accepted");
                            let handler = Arc::clone(&handler);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, handler, shutdown).await {
                                    debug!(error = %e, "connection closed with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
        info!("protocol server stopped");
    });

    Ok(handle)
}

async fn serve_connection(
    stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AgentError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(()); // client hung up
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let id = request.id.clone();
                let response = match handler.handle(&request).await {
                    Ok(result) => Response::ok(result),
                    Err(e) => {
                        debug!(
                            server = handler.name(),
                            method = %request.method,
                            kind = e.kind(),
                            "method returned error"
                        );
                        Response::from_error(&e)
                    }
                };
                response.with_id(id)
            }
            Err(e) => Response::error("bad_request", e.to_string()),
        };

        let mut payload = serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"error":{"kind":"internal","message":"serialization"}}"#.into());
        payload.push('\n');
        write_half.write_all(payload.as_bytes()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, request: &Request) -> Result<serde_json::Value, AgentError> {
            match request.method.as_str() {
                "echo" => Ok(request.param_value("value")?),
                "boom" => Err(AgentError::Generation("synthetic".to_string())),
                other => Err(AgentError::UnknownMethod(other.to_string())),
            }
        }
    }

    async fn start_echo() -> (u16, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        // Port 0: the OS picks a free port; rebind to discover it.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        serve("127.0.0.1", port, Arc::new(EchoHandler), rx)
            .await
            .unwrap();
        (port, tx)
    }

    async fn roundtrip(port: u16, line: &str) -> Response {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let (read_half, _write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let reply = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_success() {
        let (port, _tx) = start_echo().await;
        let response = roundtrip(
            port,
            r#"{"method":"echo","params":{"value":{"n":7}},"id":1}"#,
        )
        .await;

        assert!(response.is_ok());
        assert_eq!(response.result.unwrap(), json!({"n": 7}));
        assert_eq!(response.id, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_structured_response() {
        let (port, _tx) = start_echo().await;
        let response = roundtrip(port, r#"{"method":"boom","params":{}}"#).await;

        let error = response.error.unwrap();
        assert_eq!(error.kind, "generation");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (port, _tx) = start_echo().await;
        let response = roundtrip(port, r#"{"method":"nope","params":{}}"#).await;
        assert_eq!(response.error.unwrap().kind, "unknown_method");
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_server() {
        let (port, tx) = start_echo().await;
        drop(tx);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (port, _tx) = start_echo().await;
        let response = roundtrip(port, "this is not json").await;
        assert_eq!(response.error.unwrap().kind, "bad_request");
    }
}
