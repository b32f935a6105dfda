//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use upstream_sync::registry::MemoryStore;
use upstream_sync::sync::{ConfigWriter, Reloader, SyncEngine, TokenCache};
use upstream_sync::upstream::{Application, Renderer};

pub const BUCKET: &str = "lb-registry";

/// Reloader that records calls and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingReloader {
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl RecordingReloader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Reloader for RecordingReloader {
    async fn reload(&self) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err("nginx.service is not active".to_string())
        } else {
            Ok(())
        }
    }
}

/// A scratch directory holding the config file and cache tokens.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("upstream.conf")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn config(&self) -> String {
        std::fs::read_to_string(self.config_path()).unwrap()
    }

    /// Build an engine for `apps` over `store`.
    pub fn engine<S: upstream_sync::RegistryStore>(
        &self,
        store: S,
        reloader: RecordingReloader,
        apps: &[&str],
    ) -> SyncEngine<S, RecordingReloader> {
        SyncEngine::new(
            store,
            reloader,
            BUCKET,
            apps.iter().map(|a| Application::new(*a, *a)).collect(),
            Renderer::default(),
            ConfigWriter::new(self.config_path()),
            TokenCache::new(self.cache_dir()),
        )
    }
}

/// A memory store seeded with `(key, blob)` pairs.
pub fn seeded_store(objects: &[(&str, &str)]) -> MemoryStore {
    let store = MemoryStore::new();
    for (key, blob) in objects {
        store.insert(BUCKET, key, *blob);
    }
    store
}

/// An object served by the mock registry server.
#[derive(Clone)]
pub struct MockObject {
    pub path: &'static str,
    pub body: &'static str,
    pub etag: &'static str,
}

fn header(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|l| {
        let (n, value) = l.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
    })
}

/// Start a minimal S3-like HTTP server.
///
/// Honors `If-None-Match`, answers 403 for `/forbidden` paths and 404 for
/// unknown ones. PUTs are checked against `If-Match` / `If-None-Match: *`
/// (412 on failure) and otherwise acknowledged with ETag `"put-1"`; the
/// served objects never change. Returns the bound address and the raw
/// request heads seen.
pub async fn start_registry_server(objects: Vec<MockObject>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();
    let objects = Arc::new(objects);

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let objects = objects.clone();
            let seen = seen.clone();

            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let split = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(0) + 4;
                let head = String::from_utf8_lossy(&buf[..split]).to_string();
                seen.lock().unwrap().push(head.clone());

                // Drain the body so the client sees a clean response.
                let length: usize = header(&head, "content-length")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let mut received = buf.len() - split;
                while received < length {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => received += n,
                    }
                }

                let mut request_line = head.lines().next().unwrap_or("").split(' ');
                let method = request_line.next().unwrap_or("GET").to_string();
                let path = request_line.next().unwrap_or("/").to_string();
                let if_none_match = header(&head, "if-none-match");
                let if_match = header(&head, "if-match");

                let existing = objects.iter().find(|o| o.path == path);
                let response = if path.ends_with("/forbidden") {
                    "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                } else if method == "PUT" {
                    let create_only_lost = if_none_match.as_deref() == Some("*") && existing.is_some();
                    let match_lost = if_match
                        .as_deref()
                        .is_some_and(|t| existing.map(|o| o.etag) != Some(t));
                    if create_only_lost || match_lost {
                        "HTTP/1.1 412 Precondition Failed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    } else {
                        "HTTP/1.1 200 OK\r\nETag: \"put-1\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    }
                } else {
                    match existing {
                        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
                        Some(o) if if_none_match.as_deref() == Some(o.etag) => format!(
                            "HTTP/1.1 304 Not Modified\r\nETag: {}\r\nConnection: close\r\n\r\n",
                            o.etag
                        ),
                        Some(o) => format!(
                            "HTTP/1.1 200 OK\r\nETag: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            o.etag,
                            o.body.len(),
                            o.body
                        ),
                    }
                };

                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, requests)
}
