use crate::telemetry::ingest::{TelemetryError, TelemetryResult};
use crate::telemetry::report::DecodedReport;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

/// Boundary where decoded reports leave the pipeline.
pub trait ReportPublisher: Send {
    fn publish(&mut self, report: &DecodedReport) -> TelemetryResult<()>;

    /// Flush and release the transport.
    fn close(&mut self) {}
}

/// ZeroMQ PUB socket bound on its own runtime thread.
///
/// `publish` only queues the encoded frame, so the demodulation worker never
/// waits on the transport. For `ipc://` endpoints a leftover socket file is
/// replaced on bind and removed again on close.
pub struct ZmqPublisher {
    endpoint: String,
    socket_path: Option<PathBuf>,
    queue: Option<mpsc::UnboundedSender<Vec<u8>>>,
    thread: Option<JoinHandle<()>>,
}

impl ZmqPublisher {
    pub fn bind(endpoint: impl Into<String>) -> TelemetryResult<Self> {
        let endpoint = endpoint.into();
        let socket_path = ipc_path(&endpoint);
        if let Some(path) = socket_path.as_deref() {
            remove_socket_file(path);
        }
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<TelemetryResult<()>>();
        let bind_endpoint = endpoint.clone();

        let thread = thread::Builder::new()
            .name("report-publisher".into())
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

                runtime.block_on(async move {
                    let mut socket = PubSocket::new();
                    if let Err(err) = socket.bind(&bind_endpoint).await {
                        let _ = ready_tx.send(Err(err.into()));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    while let Some(frame) = queue_rx.recv().await {
                        if let Err(err) = socket.send(ZmqMessage::from(frame)).await {
                            warn!("report publish failed: {}", err);
                        }
                    }
                    info!("report publisher on {} closed", bind_endpoint);
                });
            })
            .map_err(|err| TelemetryError::Runtime(err.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                endpoint,
                socket_path,
                queue: Some(queue_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(TelemetryError::Runtime(
                    "publisher thread exited before binding".into(),
                ))
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReportPublisher for ZmqPublisher {
    fn publish(&mut self, report: &DecodedReport) -> TelemetryResult<()> {
        let queue = self.queue.as_ref().ok_or(TelemetryError::Closed)?;
        queue
            .send(report.encode().to_vec())
            .map_err(|_| TelemetryError::Closed)
    }

    fn close(&mut self) {
        self.queue.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("report publisher thread panicked");
            }
        }
        if let Some(path) = self.socket_path.take() {
            remove_socket_file(&path);
        }
    }
}

impl Drop for ZmqPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

fn ipc_path(endpoint: &str) -> Option<PathBuf> {
    endpoint
        .strip_prefix("ipc://")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

fn remove_socket_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed socket file {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("could not remove socket file {}: {}", path.display(), err),
    }
}

/// In-process publisher used when reports stay inside the process.
pub struct ChannelPublisher {
    sender: Sender<DecodedReport>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, Receiver<DecodedReport>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl ReportPublisher for ChannelPublisher {
    fn publish(&mut self, report: &DecodedReport) -> TelemetryResult<()> {
        self.sender
            .send(*report)
            .map_err(|_| TelemetryError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_publisher_forwards_reports_unmodified() {
        let (mut publisher, receiver) = ChannelPublisher::new();
        let report = DecodedReport::new([0xA5, 0x01, 0x02, 0x33], 3, 4);
        publisher.publish(&report).unwrap();
        assert_eq!(receiver.try_recv().unwrap(), report);
    }

    fn scratch_endpoint(name: &str) -> (String, PathBuf) {
        let path = std::env::temp_dir().join(format!("{}-{}", name, std::process::id()));
        (format!("ipc://{}", path.display()), path)
    }

    #[test]
    fn ipc_endpoint_can_be_rebound_after_close() {
        let (endpoint, path) = scratch_endpoint("scattercore-rebind");

        let mut first = ZmqPublisher::bind(endpoint.as_str()).unwrap();
        first.close();
        assert!(!path.exists());

        let mut second = ZmqPublisher::bind(endpoint.as_str()).unwrap();
        assert_eq!(second.endpoint(), endpoint);
        second.close();
    }

    #[test]
    fn stale_socket_file_is_replaced_on_bind() {
        let (endpoint, path) = scratch_endpoint("scattercore-stale");
        fs::write(&path, b"left over").unwrap();

        let mut publisher = ZmqPublisher::bind(endpoint.as_str()).unwrap();
        publisher.close();
        assert!(!path.exists());
    }

    #[test]
    fn only_ipc_endpoints_map_to_socket_files() {
        assert_eq!(
            ipc_path("ipc:///tmp/AnyScatterIPC"),
            Some(PathBuf::from("/tmp/AnyScatterIPC"))
        );
        assert_eq!(ipc_path("tcp://127.0.0.1:5555"), None);
        assert_eq!(ipc_path("ipc://"), None);
    }

    #[test]
    fn channel_publisher_reports_closed_receiver() {
        let (mut publisher, receiver) = ChannelPublisher::new();
        drop(receiver);
        let report = DecodedReport::new([0; 4], 0, 4);
        assert!(matches!(
            publisher.publish(&report),
            Err(TelemetryError::Closed)
        ));
    }
}
