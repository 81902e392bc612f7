use crate::generator::radio::SimulatedRadio;
use crate::status_bridge::bridge::StatusBridge;
use crate::workflow::config::ReceiverConfig;
use anyhow::Context;
use log::{info, warn};
use scattercore::pipeline::{PipelineController, ShutdownReport};
use scattercore::telemetry::{ZmqPublisher, ZmqSubscriber};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::runtime::Builder as TokioBuilder;

const STATUS_REFRESH: Duration = Duration::from_millis(500);
const RUNTIME_SHUTDOWN: Duration = Duration::from_millis(100);

/// Why the receiver was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupt,
    Terminate,
    Operator,
    InputClosed,
    Elapsed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::Interrupt => "interrupt signal",
            StopReason::Terminate => "termination signal",
            StopReason::Operator => "operator input",
            StopReason::InputClosed => "standard input closed",
            StopReason::Elapsed => "run duration elapsed",
        };
        f.write_str(label)
    }
}

/// Which stop triggers the runner listens to besides signals.
#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    pub watch_stdin: bool,
    pub run_for: Option<Duration>,
}

pub struct Runner {
    config: ReceiverConfig,
    bridge: StatusBridge,
}

impl Runner {
    pub fn new(config: ReceiverConfig, bridge: StatusBridge) -> Self {
        Self { config, bridge }
    }

    /// Brings the pipeline up, blocks until a stop trigger fires and shuts it
    /// down again.
    pub fn run(&self, options: &StopOptions) -> anyhow::Result<ShutdownReport> {
        self.run_until(wait_for_stop(options.clone()))
    }

    /// Like `run`, with the stop trigger supplied by the caller. The pipeline
    /// is shut down even when the trigger itself fails.
    pub fn run_until<F>(&self, stop: F) -> anyhow::Result<ShutdownReport>
    where
        F: Future<Output = anyhow::Result<StopReason>>,
    {
        let config = &self.config;
        let radio = SimulatedRadio::new(config.num_antennas, config.simulation());
        if let Some(payload) = radio.tag_payload() {
            info!("simulated tag sends frame {:02X?}", payload);
        }
        let publisher = ZmqPublisher::bind(config.endpoint.as_str())
            .with_context(|| format!("binding report publisher on {}", config.endpoint))?;
        let subscriber = ZmqSubscriber::new(config.endpoint.as_str());

        let mut controller = PipelineController::new(config.to_controller_config());
        controller
            .configure(
                Box::new(radio),
                Box::new(publisher),
                subscriber,
                self.bridge.sink(),
            )
            .context("configuring pipeline")?;
        controller.start().context("starting pipeline")?;
        self.bridge.update(&controller);
        self.bridge.publish_status(&format!(
            "receiving on {} antennas, decimation {}, reports on {}",
            config.num_antennas,
            controller.decimation_ratio().unwrap_or_default(),
            config.endpoint
        ));

        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for stop triggers")?;
        let bridge = &self.bridge;
        let status = &controller;
        let reason = runtime.block_on(async move {
            tokio::pin!(stop);
            let mut refresh = tokio::time::interval(STATUS_REFRESH);
            loop {
                tokio::select! {
                    reason = &mut stop => break reason,
                    _ = refresh.tick() => bridge.update(status),
                }
            }
        });
        // A pending stdin read cannot be cancelled; do not wait for it.
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN);

        let trigger = reason.context("waiting for stop trigger");
        match &trigger {
            Ok(reason) => info!("stopping: {}", reason),
            Err(err) => warn!("stop trigger failed, shutting down: {:#}", err),
        }
        let report = controller.shutdown().context("shutting down pipeline")?;
        self.bridge.update(&controller);
        trigger?;
        Ok(report)
    }
}

/// Resolves on the first of: SIGINT, SIGTERM, a line or EOF on stdin, or
/// the optional run duration.
pub async fn wait_for_stop(options: StopOptions) -> anyhow::Result<StopReason> {
    let stdin = async {
        if !options.watch_stdin {
            return std::future::pending().await;
        }
        read_operator_input(BufReader::new(tokio::io::stdin())).await
    };
    let elapsed = async {
        match options.run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl+C")?;
            Ok(StopReason::Interrupt)
        }
        result = terminate_signal() => {
            result?;
            Ok(StopReason::Terminate)
        }
        reason = stdin => Ok(reason),
        _ = elapsed => Ok(StopReason::Elapsed),
    }
}

async fn read_operator_input<R>(mut reader: R) -> StopReason
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => StopReason::InputClosed,
        Ok(_) => StopReason::Operator,
        Err(err) => {
            warn!("standard input unreadable: {}", err);
            StopReason::InputClosed
        }
    }
}

#[cfg(unix)]
fn terminate_signal() -> impl Future<Output = anyhow::Result<()>> {
    async {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("listening for SIGTERM")?;
        term.recv().await;
        Ok(())
    }
}

#[cfg(not(unix))]
fn terminate_signal() -> impl Future<Output = anyhow::Result<()>> {
    std::future::pending()
}
