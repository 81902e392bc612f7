//! Core of the multi-antenna backscatter receiver.
//!
//! Synchronized acquisition feeds a fixed dataflow graph (decimation, then
//! tag demodulation) whose reports leave over a pub/sub channel. A separate
//! ingestion loop subscribes to that channel and turns the binary reports
//! into operator summaries. `pipeline::PipelineController` owns both.

pub mod acquisition;
pub mod pipeline;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use pipeline::{ControllerConfig, PipelineController, PipelineState};
pub use prelude::{DecimatedBlock, ProcessingStage, SampleBlock, StageConfig, StageError};
