use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use testbed_runner::prelude::*;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Sends `item-<worker>-<sequence>` lines over TCP at a fixed rate.
///
/// Each worker owns one connection and writes one batch per tick. An item only counts as sent
/// once its batch has been written and flushed.
pub struct TcpLoadGenerator {
    endpoint: SocketAddr,
    sent: Arc<AtomicU64>,
    started_at: Mutex<Option<Instant>>,
    stopped_at: Mutex<Option<Instant>>,
    stop: Mutex<Option<ShutdownHandle>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TcpLoadGenerator {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            sent: Arc::new(AtomicU64::new(0)),
            started_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
            stop: Mutex::new(None),
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LoadGenerator for TcpLoadGenerator {
    fn endpoint(&self) -> Option<SocketAddr> {
        Some(self.endpoint)
    }

    async fn start(&self, options: LoadOptions) -> TestbedResult<()> {
        options.validate()?;
        let period = options.batch_period()?;

        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            bail!("Load generator is already running");
        }

        let mut streams = Vec::with_capacity(options.parallel);
        for _ in 0..options.parallel {
            let stream = TcpStream::connect(self.endpoint)
                .await
                .with_context(|| format!("Failed to connect to {}", self.endpoint))?;
            stream.set_nodelay(true)?;
            streams.push(stream);
        }

        let stop = ShutdownHandle::new();
        for (worker, stream) in streams.into_iter().enumerate() {
            workers.push(tokio::spawn(run_worker(
                worker,
                stream,
                options.items_per_batch,
                period,
                self.sent.clone(),
                stop.new_listener(),
            )));
        }

        *self.stop.lock() = Some(stop);
        *self.started_at.lock() = Some(Instant::now());
        *self.stopped_at.lock() = None;
        log::debug!(
            "Sending to {} from {} workers, one batch every {period:?} each",
            self.endpoint,
            options.parallel
        );

        Ok(())
    }

    async fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            stop.shutdown();
        }

        let workers = std::mem::take(&mut *self.workers.lock().await);
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if let Err(e) = worker.await {
                log::warn!("Load worker did not finish cleanly: {e}");
            }
        }

        *self.stopped_at.lock() = Some(Instant::now());
    }

    fn stats(&self) -> LoadStats {
        let started_at = *self.started_at.lock();
        let stopped_at = *self.stopped_at.lock();
        let elapsed = match started_at {
            Some(started) => stopped_at
                .unwrap_or_else(Instant::now)
                .duration_since(started),
            None => Duration::ZERO,
        };

        LoadStats {
            sent: self.data_items_sent(),
            elapsed,
        }
    }

    fn data_items_sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }
}

async fn run_worker(
    worker: usize,
    mut stream: TcpStream,
    batch_size: u64,
    period: Duration,
    sent: Arc<AtomicU64>,
    mut stop: DelegatedShutdownListener,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sequence = 0u64;
    let mut batch = String::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.wait_for_shutdown() => break,
        }

        batch.clear();
        for _ in 0..batch_size {
            let _ = writeln!(batch, "item-{worker}-{sequence}");
            sequence += 1;
        }

        if let Err(e) = send_batch(&mut stream, batch.as_bytes()).await {
            log::warn!("Load worker {worker} stopped sending: {e}");
            break;
        }
        sent.fetch_add(batch_size, Ordering::AcqRel);
    }

    if let Err(e) = stream.shutdown().await {
        log::debug!("Load worker {worker} failed to close its connection: {e}");
    }
}

async fn send_batch(stream: &mut TcpStream, batch: &[u8]) -> std::io::Result<()> {
    stream.write_all(batch).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    async fn count_lines(listener: TcpListener, connections: usize) -> Vec<String> {
        let mut readers = Vec::new();
        for _ in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stream).lines();
                let mut received = Vec::new();
                while let Some(line) = lines.next_line().await.unwrap() {
                    received.push(line);
                }
                received
            }));
        }

        let mut all = Vec::new();
        for reader in readers {
            all.extend(reader.await.unwrap());
        }
        all
    }

    #[tokio::test]
    async fn every_sent_item_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let generator = TcpLoadGenerator::new(listener.local_addr().unwrap());
        let receiver = tokio::spawn(count_lines(listener, 2));

        generator
            .start(LoadOptions {
                data_items_per_second: 1_000,
                items_per_batch: 10,
                parallel: 2,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        generator.stop().await;

        let received = receiver.await.unwrap();
        assert!(generator.data_items_sent() > 0);
        assert_eq!(generator.data_items_sent(), received.len() as u64);
        assert!(received.contains(&"item-0-0".to_string()));
        assert!(received.contains(&"item-1-0".to_string()));

        let stats = generator.stats();
        assert_eq!(generator.data_items_sent(), stats.sent);
        assert!(stats.elapsed >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_start() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        drop(listener);

        let generator = TcpLoadGenerator::new(endpoint);
        let err = generator.start(LoadOptions::default()).await.unwrap_err();

        assert!(err.to_string().starts_with("Failed to connect to"));
        assert_eq!(0, generator.stats().sent);
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let generator = TcpLoadGenerator::new("127.0.0.1:9".parse().unwrap());

        generator.stop().await;

        assert_eq!(LoadStats::default(), generator.stats());
    }
}
