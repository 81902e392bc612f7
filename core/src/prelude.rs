use ndarray::Array2;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Shared configuration handed to every processing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub num_antennas: usize,
    pub sample_rate: f64,
    pub symbol_rate: f64,
    pub tag_rate: f64,
}

impl StageConfig {
    /// Number of lanes in a decimated vector: one per antenna pair plus one
    /// power lane per antenna.
    pub fn vector_len(&self) -> usize {
        self.num_antennas * (self.num_antennas + 1) / 2
    }

    pub fn pair_count(&self) -> usize {
        self.num_antennas * self.num_antennas.saturating_sub(1) / 2
    }
}

/// Lockstep block of raw samples, one row per channel.
///
/// Column `k` of every row was captured at the same instant, which is sample
/// `first_sample + k` relative to the shared time origin.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub first_sample: u64,
    pub samples: Array2<Complex32>,
}

impl SampleBlock {
    pub fn new(first_sample: u64, samples: Array2<Complex32>) -> Self {
        Self {
            first_sample,
            samples,
        }
    }

    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn len(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.ncols() == 0
    }
}

/// Symbol-rate output of the decimator, one row per output instant.
#[derive(Debug, Clone)]
pub struct DecimatedBlock {
    pub first_index: u64,
    pub values: Array2<Complex32>,
}

impl DecimatedBlock {
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn lanes(&self) -> usize {
        self.values.ncols()
    }
}

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("buffer exhaustion: {0}")]
    BufferExhaustion(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Streaming stage capability shared by every node in the pipeline graph.
///
/// `initialize` runs once before the graph starts, `execute` once per block,
/// and `cleanup` after the worker has drained.
pub trait ProcessingStage: Send {
    type Input;
    type Output;

    fn name(&self) -> &str;
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()>;
    fn execute(&mut self, input: Self::Input) -> StageResult<Self::Output>;
    fn cleanup(&mut self);
}
