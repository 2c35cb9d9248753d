//! Testing utilities for the Orchestra workspace
//!
//! Scripted backends on real sockets, reply fixtures and config builders.

#![allow(missing_docs)]

use orchestra_core::{BackendKind, OrchestraConfig};
use orchestra_link::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What a scripted backend does with one request
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer immediately
    Reply(Value),
    /// Answer after a delay
    Delay(Duration, Value),
    /// Answer with a line that is not JSON
    Malformed,
    /// Drop the connection without answering
    Close,
    /// Answer with `{"error": message}`
    Error(String),
}

/// Backend on `127.0.0.1:0` that follows a script
///
/// Request `i` gets behaviour `i`; the last behaviour repeats.
pub struct ScriptedBackend {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl ScriptedBackend {
    pub async fn start(behavior: Behavior) -> Self {
        Self::with_script(vec![behavior]).await
    }

    pub async fn with_script(script: Vec<Behavior>) -> Self {
        assert!(!script.is_empty(), "script must not be empty");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(script);
        let counter = Arc::new(AtomicUsize::new(0));

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&script),
                    Arc::clone(&counter),
                    Arc::clone(&recorded),
                ));
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    script: Arc<Vec<Behavior>>,
    counter: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    while let Ok(request) = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES).await {
        requests.lock().push(request);
        let index = counter.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);

        let outcome = match &script[index] {
            Behavior::Reply(reply) => write_frame(&mut write, reply).await,
            Behavior::Delay(delay, reply) => {
                tokio::time::sleep(*delay).await;
                write_frame(&mut write, reply).await
            }
            Behavior::Malformed => write
                .write_all(b"this is not json\n")
                .await
                .map_err(Into::into),
            Behavior::Close => return,
            Behavior::Error(message) => write_frame(&mut write, &json!({"error": message})).await,
        };
        if outcome.is_err() {
            return;
        }
    }
}

/// Address with nothing listening on it
pub fn unreachable_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

fn findings(n: usize, kind: &str) -> Vec<Value> {
    (0..n).map(|i| json!({"kind": kind, "index": i})).collect()
}

/// Pattern reply with `n` findings and a medium threat level
pub fn pattern_reply(n: usize) -> Value {
    json!({
        "pattern_type": "username",
        "threat_level": "medium",
        "confidence": 0.8,
        "findings": findings(n, "indicator"),
    })
}

/// Crawl reply with `n` pages
pub fn crawl_reply(n: usize) -> Value {
    let pages: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "url_hash": format!("{i:032x}"),
                "status": 200,
                "content_type": "text/html",
                "timestamp": "2024-01-01T00:00:00Z",
            })
        })
        .collect();
    json!({ "pages": pages })
}

/// Completed scan reply with `n` findings
pub fn scan_reply(n: usize) -> Value {
    json!({
        "scan_id": "scan-0001",
        "status": "completed",
        "modules_run": ["sfp_dns", "sfp_whois", "sfp_social"],
        "findings_count": n,
        "findings": findings(n, "scan"),
    })
}

/// Config pointing at the given backends, with short deadlines
pub fn test_config(pattern: &str, crawl: &str, scan: &str) -> OrchestraConfig {
    let mut config = OrchestraConfig::default();
    for (kind, addr) in [
        (BackendKind::Pattern, pattern),
        (BackendKind::Crawl, crawl),
        (BackendKind::ExternalScan, scan),
    ] {
        let backend = config.backends.get_mut(kind);
        backend.address = Some(addr.to_string());
        backend.timeout_ms = Some(500);
    }
    config
}

/// Override one backend's deadline
pub fn with_timeout(mut config: OrchestraConfig, kind: BackendKind, millis: u64) -> OrchestraConfig {
    config.backends.get_mut(kind).timeout_ms = Some(millis);
    config
}
