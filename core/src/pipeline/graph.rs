//! Fixed dataflow graph: source → decimator → demodulator → publisher.
//!
//! Every node runs on its own thread and edges are bounded crossbeam
//! channels. Only the source watches the stop flag; once it exits its sender
//! is dropped and each downstream worker drains what is queued before it
//! exits too, which closes the next edge in turn.

use crate::acquisition::{AcquisitionError, MultiChannelSource};
use crate::pipeline::scheduling::request_realtime;
use crate::prelude::{DecimatedBlock, ProcessingStage, SampleBlock, StageConfig, StageError};
use crate::processing::{Decimator, Demodulator};
use crate::telemetry::{
    DecodedReport, LogManager, MetricsRecorder, MetricsSnapshot, ReportPublisher,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const IDLE_BACKOFF: Duration = Duration::from_millis(1);

#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error("failed to spawn {name} worker: {reason}")]
    Spawn { name: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Samples per channel requested from the source per read.
    pub block_len: usize,
    /// Capacity of every edge, in blocks.
    pub queue_depth: usize,
    /// SCHED_FIFO priority requested by each worker, if any.
    pub realtime_priority: Option<i32>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            block_len: 50_000,
            queue_depth: 16,
            realtime_priority: None,
        }
    }
}

/// Per-node counters shared with whoever reports on the graph.
#[derive(Clone, Default)]
pub struct GraphMetrics {
    pub source: Arc<MetricsRecorder>,
    pub decimator: Arc<MetricsRecorder>,
    pub demodulator: Arc<MetricsRecorder>,
    pub reports: Arc<MetricsRecorder>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub source: MetricsSnapshot,
    pub decimator: MetricsSnapshot,
    pub demodulator: MetricsSnapshot,
    pub reports: MetricsSnapshot,
}

impl GraphMetrics {
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            source: self.source.snapshot(),
            decimator: self.decimator.snapshot(),
            demodulator: self.demodulator.snapshot(),
            reports: self.reports.snapshot(),
        }
    }
}

/// Where a worker hands its stage output.
trait Downstream<T>: Send + 'static {
    /// Returns false once nothing downstream is listening.
    fn forward(&mut self, item: T) -> bool;

    fn finish(&mut self) {}
}

impl Downstream<DecimatedBlock> for Sender<DecimatedBlock> {
    fn forward(&mut self, block: DecimatedBlock) -> bool {
        block.is_empty() || self.send(block).is_ok()
    }
}

/// Reporting boundary: demodulator output leaves the graph unmodified.
struct ReportOutlet {
    publisher: Box<dyn ReportPublisher>,
    metrics: Arc<MetricsRecorder>,
}

impl Downstream<Vec<DecodedReport>> for ReportOutlet {
    fn forward(&mut self, reports: Vec<DecodedReport>) -> bool {
        for report in reports {
            match self.publisher.publish(&report) {
                Ok(()) => self.metrics.record_processed(),
                Err(err) => {
                    self.metrics.record_error();
                    warn!("report from lane {} not published: {}", report.index, err);
                }
            }
        }
        true
    }

    fn finish(&mut self) {
        self.publisher.close();
    }
}

/// Wired but idle graph. Stages are initialized and the source is
/// synchronized; nothing runs until `start`.
pub struct PipelineGraph {
    source: MultiChannelSource,
    decimator: Decimator,
    demodulator: Demodulator,
    publisher: Box<dyn ReportPublisher>,
    config: GraphConfig,
    logger: LogManager,
}

impl PipelineGraph {
    pub fn build(
        source: MultiChannelSource,
        stages: &StageConfig,
        publisher: Box<dyn ReportPublisher>,
        config: GraphConfig,
    ) -> Result<Self, GraphError> {
        if stages.num_antennas != source.channel_count() {
            return Err(StageError::ChannelMismatch {
                expected: source.channel_count(),
                actual: stages.num_antennas,
            }
            .into());
        }
        if stages.sample_rate != source.config().sample_rate {
            return Err(StageError::InvalidInput(format!(
                "stage sample rate {} differs from acquisition rate {}",
                stages.sample_rate,
                source.config().sample_rate
            ))
            .into());
        }
        if config.block_len == 0 || config.queue_depth == 0 {
            return Err(StageError::InvalidInput(
                "block length and queue depth must be positive".into(),
            )
            .into());
        }

        let mut decimator = Decimator::new();
        decimator.initialize(stages)?;
        let mut demodulator = Demodulator::default();
        demodulator.initialize(stages)?;

        let logger = LogManager::for_stage("graph");
        logger.record(&format!(
            "wired {} channels, decimation {}, {} lanes",
            stages.num_antennas,
            decimator.ratio(),
            stages.vector_len()
        ));

        Ok(Self {
            source,
            decimator,
            demodulator,
            publisher,
            config,
            logger,
        })
    }

    pub fn decimation_ratio(&self) -> usize {
        self.decimator.ratio()
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.demodulator.samples_per_symbol()
    }

    /// Starts streaming and spawns one worker per node. Downstream workers
    /// are spawned first so the source never feeds an unattended edge.
    pub fn start(self) -> Result<RunningGraph, GraphError> {
        let PipelineGraph {
            mut source,
            decimator,
            demodulator,
            publisher,
            config,
            logger,
        } = self;

        let stop = Arc::new(AtomicBool::new(false));
        let metrics = GraphMetrics::default();
        let priority = config.realtime_priority;
        let ratio = decimator.ratio();
        let (sample_tx, sample_rx) = bounded::<SampleBlock>(config.queue_depth);
        let (decimated_tx, decimated_rx) = bounded::<DecimatedBlock>(config.queue_depth);

        let outlet = ReportOutlet {
            publisher,
            metrics: Arc::clone(&metrics.reports),
        };
        let mut workers = vec![
            spawn_stage(
                demodulator,
                decimated_rx,
                outlet,
                Arc::clone(&metrics.demodulator),
                priority,
            )?,
            spawn_stage(
                decimator,
                sample_rx,
                decimated_tx,
                Arc::clone(&metrics.decimator),
                priority,
            )?,
        ];

        if let Err(err) = source.start() {
            // Dropping the only sender lets the spawned workers exit.
            drop(sample_tx);
            join_workers(&mut workers);
            return Err(err.into());
        }

        let source_stop = Arc::clone(&stop);
        let source_metrics = Arc::clone(&metrics.source);
        let block_len = config.block_len;
        let source_handle = thread::Builder::new()
            .name("source".into())
            .spawn(move || {
                run_source(
                    source,
                    sample_tx,
                    block_len,
                    source_stop,
                    source_metrics,
                    priority,
                )
            })
            .map_err(|err| GraphError::Spawn {
                name: "source".into(),
                reason: err.to_string(),
            })?;

        logger.record(&format!("running with {} workers", workers.len() + 1));
        Ok(RunningGraph {
            stop,
            source: Some(source_handle),
            workers,
            metrics,
            ratio,
            logger,
        })
    }
}

fn run_source(
    mut source: MultiChannelSource,
    output: Sender<SampleBlock>,
    block_len: usize,
    stop: Arc<AtomicBool>,
    metrics: Arc<MetricsRecorder>,
    priority: Option<i32>,
) -> MultiChannelSource {
    if let Some(priority) = priority {
        request_realtime(priority);
    }

    while !stop.load(Ordering::Relaxed) {
        match source.next_block(block_len) {
            Ok(block) if block.is_empty() => thread::sleep(IDLE_BACKOFF),
            Ok(block) => {
                metrics.record_processed();
                if output.send(block).is_err() {
                    warn!("[source] downstream closed, stopping acquisition");
                    break;
                }
            }
            Err(err) => {
                metrics.record_error();
                error!("[source] read failed: {}", err);
                break;
            }
        }
    }

    if let Err(err) = source.stop() {
        warn!("[source] failed to stop streaming: {}", err);
    }
    info!(
        "[source] shutdown after {} blocks",
        metrics.snapshot().processed
    );
    source
}

fn spawn_stage<S, D>(
    mut stage: S,
    input: Receiver<S::Input>,
    mut downstream: D,
    metrics: Arc<MetricsRecorder>,
    priority: Option<i32>,
) -> Result<(String, JoinHandle<()>), GraphError>
where
    S: ProcessingStage + 'static,
    S::Input: Send + 'static,
    D: Downstream<S::Output>,
{
    let name = stage.name().to_string();
    let thread_name = name.clone();
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            if let Some(priority) = priority {
                request_realtime(priority);
            }

            for item in input.iter() {
                match stage.execute(item) {
                    Ok(output) => {
                        metrics.record_processed();
                        if !downstream.forward(output) {
                            warn!("[{}] downstream closed", thread_name);
                            break;
                        }
                    }
                    Err(err) => {
                        metrics.record_error();
                        error!("[{}] execute failed: {}", thread_name, err);
                        break;
                    }
                }
            }

            downstream.finish();
            stage.cleanup();
            info!(
                "[{}] shutdown after {} blocks",
                thread_name,
                metrics.snapshot().processed
            );
        })
        .map_err(|err| GraphError::Spawn {
            name: name.clone(),
            reason: err.to_string(),
        })?;
    Ok((name, handle))
}

fn join_workers(workers: &mut Vec<(String, JoinHandle<()>)>) {
    let total = workers.len();
    for (done, (name, handle)) in workers.drain(..).enumerate() {
        match handle.join() {
            Ok(()) => debug!("[{}] joined ({}/{})", name, done + 1, total),
            Err(_) => error!("[{}] worker panicked", name),
        }
    }
}

/// Handle to the running graph's workers.
pub struct RunningGraph {
    stop: Arc<AtomicBool>,
    source: Option<JoinHandle<MultiChannelSource>>,
    workers: Vec<(String, JoinHandle<()>)>,
    metrics: GraphMetrics,
    ratio: usize,
    logger: LogManager,
}

impl RunningGraph {
    /// Asks the source to stop reading. Returns immediately.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> GraphMetrics {
        self.metrics.clone()
    }

    pub fn decimation_ratio(&self) -> usize {
        self.ratio
    }

    /// True once every worker has exited on its own.
    pub fn is_quiescent(&self) -> bool {
        self.source
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
            && self.workers.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Joins the source, then every downstream worker in flow order, and
    /// returns the source for release. `None` means the source thread
    /// panicked and the device went down with it.
    pub fn wait(mut self) -> Option<MultiChannelSource> {
        let source = match self.source.take().map(JoinHandle::join) {
            Some(Ok(source)) => Some(source),
            Some(Err(_)) => {
                error!("[source] worker panicked");
                None
            }
            None => None,
        };

        self.workers.reverse();
        join_workers(&mut self.workers);
        self.logger.record("all workers quiescent");
        source
    }
}

impl Drop for RunningGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::testing::ScriptedRadio;
    use crate::acquisition::{AcquisitionConfig, AntennaPort};
    use crate::telemetry::ChannelPublisher;
    use std::time::Instant;

    fn acquisition(channels: usize, sample_rate: f64) -> AcquisitionConfig {
        AcquisitionConfig::uniform(
            channels,
            sample_rate,
            2450e6,
            25.0,
            AntennaPort::Rx2,
            sample_rate,
        )
    }

    fn stages(channels: usize, sample_rate: f64) -> StageConfig {
        StageConfig {
            num_antennas: channels,
            sample_rate,
            symbol_rate: 1e6,
            tag_rate: 62.5e3,
        }
    }

    fn small_blocks() -> GraphConfig {
        GraphConfig {
            block_len: 1_000,
            queue_depth: 4,
            realtime_priority: None,
        }
    }

    #[test]
    fn stage_channel_count_must_match_source() {
        let source =
            MultiChannelSource::configure(Box::new(ScriptedRadio::new(4)), &acquisition(4, 8e6))
                .unwrap();
        let (publisher, _reports) = ChannelPublisher::new();
        let result =
            PipelineGraph::build(source, &stages(2, 8e6), Box::new(publisher), small_blocks());
        assert!(matches!(
            result,
            Err(GraphError::Stage(StageError::ChannelMismatch { .. }))
        ));
    }

    #[test]
    fn stop_drains_every_worker_and_stops_streaming() {
        let radio = ScriptedRadio::new(2);
        let streaming = radio.streaming_flag();
        let source =
            MultiChannelSource::configure(Box::new(radio), &acquisition(2, 8e6)).unwrap();
        let (publisher, _reports) = ChannelPublisher::new();
        let graph =
            PipelineGraph::build(source, &stages(2, 8e6), Box::new(publisher), small_blocks())
                .unwrap();
        assert_eq!(graph.decimation_ratio(), 8);
        assert_eq!(graph.samples_per_symbol(), 16);

        let running = graph.start().unwrap();
        let metrics = running.metrics();
        let deadline = Instant::now() + Duration::from_secs(2);
        while metrics.decimator.snapshot().processed < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(streaming.load(Ordering::SeqCst));

        running.stop();
        let source = running.wait().expect("source returned");
        assert!(!source.is_streaming());
        assert!(!streaming.load(Ordering::SeqCst));

        let snapshot = metrics.snapshot();
        assert!(snapshot.source.processed >= 3);
        assert_eq!(snapshot.source.processed, snapshot.decimator.processed);
        assert_eq!(snapshot.decimator.errors, 0);
    }

    #[test]
    fn exhausted_device_idles_until_stopped() {
        let radio = ScriptedRadio::new(1).sample_limit(2_500);
        let source =
            MultiChannelSource::configure(Box::new(radio), &acquisition(1, 8e6)).unwrap();
        let (publisher, _reports) = ChannelPublisher::new();
        let running =
            PipelineGraph::build(source, &stages(1, 8e6), Box::new(publisher), small_blocks())
                .unwrap()
                .start()
                .unwrap();

        thread::sleep(Duration::from_millis(50));
        running.stop();
        let metrics = running.metrics();
        let source = running.wait().unwrap();

        assert_eq!(metrics.source.snapshot().processed, 3);
        assert_eq!(source.channel_count(), 1);
    }
}
