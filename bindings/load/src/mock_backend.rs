use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use testbed_runner::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// The backend's own log, one timestamped line per event.
#[derive(Clone)]
struct BackendLog {
    file: Arc<Mutex<File>>,
}

impl BackendLog {
    fn create(path: &Path) -> TestbedResult<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create backend log {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn line(&self, message: impl std::fmt::Display) {
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        if let Err(e) = writeln!(self.file.lock(), "{now} {message}") {
            log::debug!("Failed to write backend log: {e}");
        }
    }
}

/// Counts what arrives from the agent: any number of TCP connections carrying
/// newline-terminated items.
#[derive(Clone, Default)]
struct Counters {
    received: Arc<AtomicU64>,
    recording: Arc<AtomicBool>,
    recorded: Arc<Mutex<Vec<String>>>,
}

struct Running {
    stop: ShutdownHandle,
    accept_loop: JoinHandle<()>,
}

/// A mock backend that listens on a TCP address and counts every complete line it receives.
pub struct TcpMockBackend {
    addr: SocketAddr,
    counters: Counters,
    started_at: Mutex<Option<Instant>>,
    stopped_at: Mutex<Option<Instant>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl TcpMockBackend {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            counters: Counters::default(),
            started_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Items received while recording was enabled, in arrival order per connection.
    pub fn recorded_items(&self) -> Vec<String> {
        self.counters.recorded.lock().clone()
    }
}

#[async_trait]
impl MockBackend for TcpMockBackend {
    async fn start(&self, log_file_path: PathBuf) -> TestbedResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            bail!("Mock backend is already running");
        }

        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind mock backend to {}", self.addr))?;
        let log = BackendLog::create(&log_file_path)?;
        log.line(format_args!("Listening on {}", self.addr));

        let stop = ShutdownHandle::new();
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            self.counters.clone(),
            log,
            stop.new_listener(),
        ));

        *running = Some(Running { stop, accept_loop });
        *self.started_at.lock() = Some(Instant::now());
        *self.stopped_at.lock() = None;

        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.stop.shutdown();
        if let Err(e) = running.accept_loop.await {
            log::warn!("Mock backend did not shut down cleanly: {e}");
        }
        *self.stopped_at.lock() = Some(Instant::now());
    }

    fn stats(&self) -> BackendStats {
        let started_at = *self.started_at.lock();
        let stopped_at = *self.stopped_at.lock();

        BackendStats {
            received: self.data_items_received(),
            elapsed: started_at
                .map(|started| stopped_at.unwrap_or_else(Instant::now) - started)
                .unwrap_or(Duration::ZERO),
        }
    }

    fn data_items_received(&self) -> u64 {
        self.counters.received.load(Ordering::Acquire)
    }

    fn enable_recording(&self) {
        self.counters.recording.store(true, Ordering::Release);
    }
}

async fn accept_loop(
    listener: TcpListener,
    counters: Counters,
    log: BackendLog,
    mut stop: DelegatedShutdownListener,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log.line(format_args!("Accepted connection from {peer}"));
                    connections.spawn(receive(stream, peer, counters.clone(), log.clone()));
                }
                Err(e) => log.line(format_args!("Failed to accept connection: {e}")),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = stop.wait_for_shutdown() => break,
        }
    }

    connections.shutdown().await;
    log.line(format_args!(
        "Stopped after receiving {} items",
        counters.received.load(Ordering::Acquire)
    ));
}

async fn receive(stream: TcpStream, peer: SocketAddr, counters: Counters, log: BackendLog) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                log.line(format_args!("Connection from {peer} closed"));
                break;
            }
            Ok(_) if buf.ends_with(b"\n") => {
                counters.received.fetch_add(1, Ordering::AcqRel);
                if counters.recording.load(Ordering::Acquire) {
                    let item = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
                    let item = item.strip_suffix(b"\r").unwrap_or(item);
                    counters
                        .recorded
                        .lock()
                        .push(String::from_utf8_lossy(item).into_owned());
                }
            }
            // EOF in the middle of an item.
            Ok(n) => {
                log.line(format_args!(
                    "Connection from {peer} closed with {n} bytes of an incomplete item"
                ));
                break;
            }
            Err(e) => {
                log.line(format_args!("Connection from {peer} failed: {e}"));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use crate::port::{available_port, localhost};

    use super::*;

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn lines_are_counted_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let addr = localhost(available_port().unwrap());
        let backend = TcpMockBackend::new(addr);
        backend.enable_recording();
        backend.start(dir.path().join("backend.log")).await.unwrap();

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"item-0-0\nitem-0-1\n").await.unwrap();
        second.write_all(b"item-1-0\n").await.unwrap();

        wait_until(|| backend.data_items_received() == 3).await;
        let mut recorded = backend.recorded_items();
        recorded.sort();
        assert_eq!(vec!["item-0-0", "item-0-1", "item-1-0"], recorded);

        backend.stop().await;
        assert_eq!(3, backend.stats().received);
        assert!(TcpStream::connect(addr).await.is_err());

        let log = std::fs::read_to_string(dir.path().join("backend.log")).unwrap();
        assert!(log.contains(&format!("Listening on {addr}")));
        assert!(log.contains("Accepted connection from"));
        assert!(log.contains("Stopped after receiving 3 items"));
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_drop_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let addr = localhost(available_port().unwrap());
        let backend = TcpMockBackend::new(addr);
        backend.enable_recording();
        backend.start(dir.path().join("backend.log")).await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"item-0-0\nitem-\xff-1\nitem-0-2\r\nitem-0-3\n")
            .await
            .unwrap();

        wait_until(|| backend.data_items_received() == 4).await;
        assert_eq!(
            vec!["item-0-0", "item-\u{FFFD}-1", "item-0-2", "item-0-3"],
            backend.recorded_items()
        );

        backend.stop().await;
    }

    #[tokio::test]
    async fn trailing_fragment_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let addr = localhost(available_port().unwrap());
        let backend = TcpMockBackend::new(addr);
        backend.start(dir.path().join("backend.log")).await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"item-0-0\nitem-0-").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        wait_until(|| {
            std::fs::read_to_string(dir.path().join("backend.log"))
                .unwrap()
                .contains("incomplete item")
        })
        .await;
        assert_eq!(1, backend.data_items_received());

        backend.stop().await;
    }

    #[tokio::test]
    async fn items_are_not_recorded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let addr = localhost(available_port().unwrap());
        let backend = TcpMockBackend::new(addr);
        backend.start(dir.path().join("backend.log")).await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"item-0-0\n").await.unwrap();

        wait_until(|| backend.data_items_received() == 1).await;
        assert!(backend.recorded_items().is_empty());

        backend.stop().await;
    }

    #[tokio::test]
    async fn address_in_use_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let backend = TcpMockBackend::new(taken.local_addr().unwrap());

        let err = backend
            .start(dir.path().join("backend.log"))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Failed to bind mock backend"));
        assert!(!dir.path().join("backend.log").exists());
    }
}
