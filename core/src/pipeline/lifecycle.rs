//! Pipeline lifecycle: Constructed → Configured → Running → Stopping → Stopped.
//!
//! Each transition has exactly one entry point and every other call is
//! rejected with `LifecycleError::InvalidTransition`. A failure while
//! configuring leaves the controller in `Constructed` with nothing running.

use crate::acquisition::{AcquisitionConfig, AcquisitionError, MultiChannelSource, RadioDevice};
use crate::pipeline::graph::{
    GraphConfig, GraphError, GraphMetrics, GraphSnapshot, PipelineGraph, RunningGraph,
};
use crate::prelude::StageConfig;
use crate::telemetry::{
    IngestConfig, IngestHandle, LogManager, MetricsSnapshot, ReportPublisher, ReportSink,
    ReportSubscriber, TelemetryError, TelemetryIngestor,
};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Constructed,
    Configured,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Constructed => "constructed",
            PipelineState::Configured => "configured",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: PipelineState,
        action: &'static str,
    },
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub acquisition: AcquisitionConfig,
    pub stages: StageConfig,
    pub graph: GraphConfig,
    pub ingest: IngestConfig,
}

/// Counters collected while shutting down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub graph: GraphSnapshot,
    pub telemetry: MetricsSnapshot,
    pub device_released: bool,
}

pub struct PipelineController {
    state: PipelineState,
    config: ControllerConfig,
    graph: Option<PipelineGraph>,
    running: Option<RunningGraph>,
    ingest: Option<IngestHandle>,
    decimation_ratio: Option<usize>,
    logger: LogManager,
}

impl PipelineController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            state: PipelineState::Constructed,
            config,
            graph: None,
            running: None,
            ingest: None,
            decimation_ratio: None,
            logger: LogManager::for_stage("controller"),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Ratio of the wired decimator, known from `Configured` on.
    pub fn decimation_ratio(&self) -> Option<usize> {
        self.decimation_ratio
    }

    /// Live graph counters while running.
    pub fn graph_metrics(&self) -> Option<GraphMetrics> {
        self.running.as_ref().map(RunningGraph::metrics)
    }

    pub fn telemetry_metrics(&self) -> Option<MetricsSnapshot> {
        self.ingest.as_ref().map(IngestHandle::metrics)
    }

    fn expect_state(
        &self,
        expected: PipelineState,
        action: &'static str,
    ) -> Result<(), LifecycleError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn enter(&mut self, next: PipelineState) {
        self.logger.record(&format!("{} -> {}", self.state, next));
        self.state = next;
    }

    /// Constructed → Configured. Applies the channel settings, waits for the
    /// shared references to lock, wires the graph and starts telemetry
    /// ingestion.
    pub fn configure<S, K>(
        &mut self,
        device: Box<dyn RadioDevice>,
        publisher: Box<dyn ReportPublisher>,
        subscriber: S,
        sink: K,
    ) -> Result<(), LifecycleError>
    where
        S: ReportSubscriber,
        K: ReportSink,
    {
        self.expect_state(PipelineState::Constructed, "configure")?;

        let source = MultiChannelSource::configure(device, &self.config.acquisition)?;
        let graph = PipelineGraph::build(
            source,
            &self.config.stages,
            publisher,
            self.config.graph.clone(),
        )?;
        let ingest = TelemetryIngestor::spawn(subscriber, &self.config.ingest, sink)?;

        self.decimation_ratio = Some(graph.decimation_ratio());
        self.graph = Some(graph);
        self.ingest = Some(ingest);
        self.enter(PipelineState::Configured);
        Ok(())
    }

    /// Configured → Running. Returns as soon as the workers are up.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(PipelineState::Configured, "start")?;
        let graph = self.graph.take().ok_or(LifecycleError::InvalidTransition {
            state: self.state,
            action: "start",
        })?;

        match graph.start() {
            Ok(running) => {
                self.running = Some(running);
                self.enter(PipelineState::Running);
                Ok(())
            }
            Err(err) => {
                // The graph is consumed; nothing is left to run.
                self.logger.warn(&format!("start failed: {}", err));
                if let Some(ingest) = self.ingest.take() {
                    let _ = ingest.stop();
                }
                self.enter(PipelineState::Stopped);
                Err(err.into())
            }
        }
    }

    /// Running → Stopping. Signals the graph and the ingestion loop without
    /// waiting for either.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(PipelineState::Running, "stop")?;
        if let Some(running) = self.running.as_ref() {
            running.stop();
        }
        if let Some(ingest) = self.ingest.as_mut() {
            ingest.request_stop();
        }
        self.enter(PipelineState::Stopping);
        Ok(())
    }

    /// Stopping → Stopped. Waits for the graph to quiesce, closes the
    /// subscription and releases the acquisition device.
    pub fn wait(&mut self) -> Result<ShutdownReport, LifecycleError> {
        self.expect_state(PipelineState::Stopping, "wait")?;
        let mut report = ShutdownReport::default();

        if let Some(running) = self.running.take() {
            let metrics = running.metrics();
            if let Some(source) = running.wait() {
                release_device(source.release());
                report.device_released = true;
            }
            report.graph = metrics.snapshot();
        }

        let telemetry = self.ingest.take().map(IngestHandle::stop);
        self.enter(PipelineState::Stopped);

        if let Some(result) = telemetry {
            report.telemetry = result?;
        }
        self.logger.record(&format!(
            "stopped: {} blocks acquired, {} reports published, {} reports ingested",
            report.graph.source.processed,
            report.graph.reports.processed,
            report.telemetry.processed
        ));
        Ok(report)
    }

    /// `stop` followed by `wait`. Also finishes a shutdown that was already
    /// signalled.
    pub fn shutdown(&mut self) -> Result<ShutdownReport, LifecycleError> {
        if self.state == PipelineState::Running {
            self.stop()?;
        }
        self.wait()
    }
}

fn release_device(device: Box<dyn RadioDevice>) {
    log::info!("[controller] released {}-channel device", device.channel_count());
    drop(device);
}
