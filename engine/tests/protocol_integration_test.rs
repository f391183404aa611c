use globset::{Glob, GlobSetBuilder};
use sdk::protocol::Response;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use vigil_engine::context::ContextIndex;
use vigil_engine::executor::CommandExecutor;
use vigil_engine::fs_guard::ProjectGuard;
use vigil_engine::memory::MemoryStore;
use vigil_engine::server::context::ContextHandler;
use vigil_engine::server::memory::MemoryHandler;
use vigil_engine::server::tools::ToolsHandler;
use vigil_engine::server::{serve, RequestHandler};

async fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn start(handler: Arc<dyn RequestHandler>) -> (u16, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let port = free_port().await;
    serve("127.0.0.1", port, handler, rx).await.unwrap();
    (port, tx)
}

fn index_for(dir: &TempDir) -> ContextIndex {
    let guard = ProjectGuard::new(dir.path()).unwrap();
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(".git/**").unwrap());
    ContextIndex::new(guard, builder.build().unwrap())
}

async fn request(port: u16, body: &str) -> Response {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(body.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    let (read_half, _write) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let reply = lines.next_line().await.unwrap().unwrap();
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test]
async fn test_memory_server_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::open(&dir.path().join("memory.json")).unwrap());
    let (port, _tx) = start(Arc::new(MemoryHandler::new(store))).await;

    let stored = request(
        port,
        r#"{"method":"store_fact","params":{"key":"ci","value":"github"},"id":"a"}"#,
    )
    .await;
    assert!(stored.is_ok());
    assert_eq!(stored.id, Some(json!("a")));

    let fetched = request(
        port,
        r#"{"method":"retrieve_fact","params":{"key":"ci"},"id":"b"}"#,
    )
    .await;
    assert_eq!(fetched.result.unwrap()["value"], json!("github"));
}

#[tokio::test]
async fn test_sequential_requests_share_a_connection() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::open(&dir.path().join("memory.json")).unwrap());
    let (port, _tx) = start(Arc::new(MemoryHandler::new(store))).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(
            b"{\"method\":\"store_fact\",\"params\":{\"key\":\"a\",\"value\":1},\"id\":1}\n\
              {\"method\":\"store_fact\",\"params\":{\"key\":\"b\",\"value\":2},\"id\":2}\n",
        )
        .await
        .unwrap();

    let (read_half, _write) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let first: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let second: Response =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

    // Answered in order, ids preserved.
    assert_eq!(first.id, Some(json!(1)));
    assert_eq!(second.id, Some(json!(2)));
}

#[tokio::test]
async fn test_context_server_reads_project_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "def run():\n    pass\n").unwrap();
    let (port, _tx) = start(Arc::new(ContextHandler::new(Arc::new(index_for(&dir))))).await;

    let reply = request(
        port,
        r#"{"method":"read_file","params":{"path":"app.py","start_line":1,"end_line":1}}"#,
    )
    .await;
    assert_eq!(reply.result.unwrap()["content"], json!("def run():\n"));

    let escape = request(port, r#"{"method":"read_file","params":{"path":"../../etc/passwd"}}"#).await;
    assert!(escape.error.is_some());
}

#[tokio::test]
async fn test_tools_server_blocks_denied_commands() {
    let dir = TempDir::new().unwrap();
    let guard = ProjectGuard::new(dir.path()).unwrap();
    let executor = Arc::new(CommandExecutor::new(guard, Duration::from_secs(5)).unwrap());
    let handler = ToolsHandler::new(executor, Arc::new(index_for(&dir)));
    let (port, _tx) = start(Arc::new(handler)).await;

    let reply = request(
        port,
        r#"{"method":"execute_command","params":{"command":"rm -rf /"},"id":9}"#,
    )
    .await;
    let error = reply.error.unwrap();
    assert_eq!(error.kind, "blocked_command");
    assert_eq!(reply.id, Some(json!(9)));

    let ok = request(
        port,
        r#"{"method":"execute_command","params":{"command":"echo vigil"}}"#,
    )
    .await;
    assert_eq!(ok.result.unwrap()["success"], json!(true));
}

#[tokio::test]
async fn test_malformed_request_keeps_server_alive() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::open(&dir.path().join("memory.json")).unwrap());
    let (port, _tx) = start(Arc::new(MemoryHandler::new(store))).await;

    let bad = request(port, "{{{{").await;
    assert_eq!(bad.error.unwrap().kind, "bad_request");

    // The same server still answers well-formed requests.
    let good = request(port, r#"{"method":"get_context","params":{}}"#).await;
    assert!(good.is_ok());
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::open(&dir.path().join("memory.json")).unwrap());
    let (port, tx) = start(Arc::new(MemoryHandler::new(store))).await;

    tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}
