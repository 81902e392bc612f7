//! Background ingestion of binary tag reports.
//!
//! The ingestion loop owns its subscription and runs on a dedicated thread
//! with a current-thread tokio runtime. Every iteration races the stop
//! signal against a receive bounded by `recv_timeout`, so a pending receive
//! never holds up shutdown. The subscription is opened lazily: while the
//! publisher is not reachable yet the loop keeps retrying with backoff,
//! still honouring the stop signal.

use crate::telemetry::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::telemetry::report::ReportSummary;
use log::{debug, info, warn};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use zeromq::{Socket, SocketRecv, SubSocket};

/// Endpoint the demodulator publishes on.
pub const DEFAULT_ENDPOINT: &str = "ipc:///tmp/AnyScatterIPC";

const ERROR_BACKOFF: Duration = Duration::from_millis(20);
const CONNECT_BACKOFF_MIN: Duration = Duration::from_millis(20);
const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(1);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("subscription closed")]
    Closed,
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("ingestion thread panicked")]
    Panicked,
    #[error("ingestion did not stop within {0:?}")]
    StopTimeout(Duration),
}

impl From<zeromq::ZmqError> for TelemetryError {
    fn from(err: zeromq::ZmqError) -> Self {
        TelemetryError::Transport(err.to_string())
    }
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Receiving side of the report channel.
#[allow(async_fn_in_trait)]
pub trait ReportSubscriber: Send + 'static {
    /// Establish the subscription. Called on the ingestion thread until it
    /// succeeds.
    async fn open(&mut self) -> TelemetryResult<()>;

    /// Wait for the next whole message. `Closed` ends the loop.
    async fn recv(&mut self) -> TelemetryResult<Vec<u8>>;
}

/// ZeroMQ SUB socket subscribed to every topic.
pub struct ZmqSubscriber {
    endpoint: String,
    socket: Option<SubSocket>,
}

impl ZmqSubscriber {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            socket: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReportSubscriber for ZmqSubscriber {
    async fn open(&mut self) -> TelemetryResult<()> {
        let mut socket = SubSocket::new();
        socket.connect(&self.endpoint).await?;
        socket.subscribe("").await?;
        info!("subscribed to all topics on {}", self.endpoint);
        self.socket = Some(socket);
        Ok(())
    }

    async fn recv(&mut self) -> TelemetryResult<Vec<u8>> {
        let socket = self.socket.as_mut().ok_or(TelemetryError::Closed)?;
        let message = socket.recv().await?;
        let mut bytes = Vec::new();
        for frame in message.into_vec() {
            bytes.extend_from_slice(&frame);
        }
        Ok(bytes)
    }
}

/// In-process subscriber fed through an unbounded channel.
pub struct ChannelSubscriber {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelSubscriber {
    pub fn pair() -> (mpsc::UnboundedSender<Vec<u8>>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

impl ReportSubscriber for ChannelSubscriber {
    async fn open(&mut self) -> TelemetryResult<()> {
        Ok(())
    }

    async fn recv(&mut self) -> TelemetryResult<Vec<u8>> {
        self.receiver.recv().await.ok_or(TelemetryError::Closed)
    }
}

/// Destination for decoded summaries.
pub trait ReportSink: Send + 'static {
    fn publish(&mut self, summary: &ReportSummary);
}

impl<F> ReportSink for F
where
    F: FnMut(&ReportSummary) + Send + 'static,
{
    fn publish(&mut self, summary: &ReportSummary) {
        self(summary)
    }
}

/// Prints one line per report for the operator.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn publish(&mut self, summary: &ReportSummary) {
        println!("{}", summary.line);
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub endpoint: String,
    pub recv_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            recv_timeout: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

pub struct TelemetryIngestor;

impl TelemetryIngestor {
    /// Starts the ingestion thread and returns once its runtime is up. The
    /// subscription itself may still be connecting.
    pub fn spawn<S, K>(subscriber: S, config: &IngestConfig, sink: K) -> TelemetryResult<IngestHandle>
    where
        S: ReportSubscriber,
        K: ReportSink,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let metrics = Arc::new(MetricsRecorder::new());
        let loop_metrics = Arc::clone(&metrics);
        let recv_timeout = config.recv_timeout;

        let thread = thread::Builder::new()
            .name("telemetry-ingest".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(TelemetryError::Runtime(err.to_string())));
                        return;
                    }
                };
                runtime.block_on(ingest_loop(
                    subscriber,
                    sink,
                    recv_timeout,
                    stop_rx,
                    ready_tx,
                    loop_metrics,
                ));
            })
            .map_err(|err| TelemetryError::Runtime(err.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(IngestHandle {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
                metrics,
                stop_timeout: config.stop_timeout,
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => match thread.join() {
                Ok(()) => Err(TelemetryError::Runtime(
                    "ingestion thread exited before opening".into(),
                )),
                Err(_) => Err(TelemetryError::Panicked),
            },
        }
    }
}

async fn ingest_loop<S, K>(
    mut subscriber: S,
    mut sink: K,
    recv_timeout: Duration,
    mut stop_rx: oneshot::Receiver<()>,
    ready_tx: std_mpsc::Sender<TelemetryResult<()>>,
    metrics: Arc<MetricsRecorder>,
) where
    S: ReportSubscriber,
    K: ReportSink,
{
    let _ = ready_tx.send(Ok(()));

    if !connect(&mut subscriber, &mut stop_rx).await {
        debug!("telemetry stop requested before the subscription opened");
        return;
    }

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!("telemetry stop requested");
                break;
            }
            received = tokio::time::timeout(recv_timeout, subscriber.recv()) => match received {
                Err(_elapsed) => continue,
                Ok(Ok(bytes)) => {
                    let summary = ReportSummary::from_bytes(&bytes);
                    if summary.malformed {
                        metrics.record_error();
                        warn!("malformed report ({} bytes)", summary.length);
                    } else {
                        metrics.record_processed();
                    }
                    sink.publish(&summary);
                }
                Ok(Err(TelemetryError::Closed)) => {
                    info!("telemetry channel closed by peer");
                    break;
                }
                Ok(Err(err)) => {
                    metrics.record_error();
                    warn!("telemetry receive failed: {}", err);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    drop(subscriber);
    info!("telemetry subscription closed");
}

/// Opens the subscription, retrying with backoff. Returns `false` when the
/// stop signal arrives first.
async fn connect<S>(subscriber: &mut S, stop_rx: &mut oneshot::Receiver<()>) -> bool
where
    S: ReportSubscriber,
{
    let mut backoff = CONNECT_BACKOFF_MIN;
    let mut attempts = 0u32;
    loop {
        let attempt = tokio::select! {
            _ = &mut *stop_rx => return false,
            result = subscriber.open() => result,
        };
        match attempt {
            Ok(()) => {
                if attempts > 0 {
                    info!("telemetry subscription opened after {} retries", attempts);
                }
                return true;
            }
            Err(err) => {
                if attempts == 0 {
                    warn!("telemetry endpoint not reachable yet, retrying: {}", err);
                } else {
                    debug!("telemetry connect attempt {} failed: {}", attempts + 1, err);
                }
                attempts += 1;
            }
        }
        tokio::select! {
            _ = &mut *stop_rx => return false,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(CONNECT_BACKOFF_MAX);
    }
}

/// Owned handle to the running ingestion thread.
pub struct IngestHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    metrics: Arc<MetricsRecorder>,
    stop_timeout: Duration,
}

impl IngestHandle {
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Signals the loop without waiting for it.
    pub fn request_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Signals the loop and joins it, giving up after `stop_timeout`.
    pub fn stop(mut self) -> TelemetryResult<MetricsSnapshot> {
        self.request_stop();

        if let Some(thread) = self.thread.take() {
            let deadline = Instant::now() + self.stop_timeout;
            while !thread.is_finished() {
                if Instant::now() >= deadline {
                    return Err(TelemetryError::StopTimeout(self.stop_timeout));
                }
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            thread.join().map_err(|_| TelemetryError::Panicked)?;
        }

        Ok(self.metrics.snapshot())
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.request_stop();
    }
}
