use crate::prelude::{DecimatedBlock, ProcessingStage, StageConfig, StageError, StageResult};
use crate::processing::frame::FrameDecoder;
use crate::telemetry::log::LogManager;
use crate::telemetry::report::DecodedReport;
use ndarray::Array2;
use num_complex::Complex32;

/// What a decimated lane carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneKind {
    /// Cross-antenna conjugate product; information is in the phase.
    Pair,
    /// Single-antenna power; information is in the magnitude.
    Power,
}

/// Symbol decision rule applied to the rate-matched lane samples.
pub trait SymbolSlicer: Send {
    /// Prepare per-lane state for `lanes` lanes at `samples_per_symbol`.
    fn reset(&mut self, lanes: usize, samples_per_symbol: usize);

    /// Feed one integrated sample; returns a bit when a symbol completes.
    fn slice(&mut self, lane: usize, kind: LaneKind, sample: Complex32) -> Option<bool>;
}

/// Baseline slicer: one decision per symbol period, choosing whichever of
/// two tracked reference states is closer. Decision instants are fixed at
/// the symbol grid; there is no early/late timing recovery and no reset of
/// the reference states after long runs of identical bits.
#[derive(Debug, Default)]
pub struct NearestStateSlicer {
    samples_per_symbol: usize,
    counters: Vec<usize>,
    zero_state: Vec<Complex32>,
    one_state: Vec<Complex32>,
}

impl NearestStateSlicer {
    pub fn new() -> Self {
        Self::default()
    }

    fn distance(kind: LaneKind, reference: Complex32, sample: Complex32) -> f32 {
        match kind {
            LaneKind::Pair => (reference * sample.conj()).arg().abs(),
            LaneKind::Power => (reference - sample).norm(),
        }
    }
}

impl SymbolSlicer for NearestStateSlicer {
    fn reset(&mut self, lanes: usize, samples_per_symbol: usize) {
        self.samples_per_symbol = samples_per_symbol.max(1);
        self.counters = vec![0; lanes];
        self.zero_state = vec![Complex32::new(0.0, 0.0); lanes];
        self.one_state = vec![Complex32::new(0.0, 0.0); lanes];
    }

    fn slice(&mut self, lane: usize, kind: LaneKind, sample: Complex32) -> Option<bool> {
        let counter = self.counters.get_mut(lane)?;
        *counter += 1;
        if *counter < self.samples_per_symbol {
            return None;
        }
        *counter = 0;

        let to_zero = Self::distance(kind, self.zero_state[lane], sample);
        let to_one = Self::distance(kind, self.one_state[lane], sample);
        if to_zero < to_one {
            self.zero_state[lane] = sample;
            Some(false)
        } else {
            self.one_state[lane] = sample;
            Some(true)
        }
    }
}

/// Samples per tag symbol at the decimated rate.
pub fn samples_per_symbol(symbol_rate: f64, tag_rate: f64) -> StageResult<usize> {
    if !(tag_rate.is_finite() && tag_rate > 0.0) {
        return Err(StageError::InvalidInput(format!(
            "invalid tag rate {}",
            tag_rate
        )));
    }
    let sps = (symbol_rate / tag_rate).round();
    if !(sps.is_finite() && sps >= 1.0) {
        return Err(StageError::InvalidInput(format!(
            "tag rate {} exceeds symbol rate {}",
            tag_rate, symbol_rate
        )));
    }
    Ok(sps as usize)
}

/// Turns decimated lanes into tag reports.
///
/// Each lane is integrated over a sliding window of one tag symbol, handed to
/// the slicer, and the resulting bits are framed per lane. Reports carry the
/// lane index and the configured antenna count.
pub struct Demodulator {
    config: Option<StageConfig>,
    slicer: Box<dyn SymbolSlicer>,
    sps: usize,
    history: Array2<Complex32>,
    position: usize,
    sums: Vec<Complex32>,
    since_refresh: usize,
    refresh_interval: usize,
    decoders: Vec<FrameDecoder>,
    logger: LogManager,
}

impl Demodulator {
    pub fn new(slicer: Box<dyn SymbolSlicer>) -> Self {
        Self {
            config: None,
            slicer,
            sps: 0,
            history: Array2::zeros((0, 0)),
            position: 0,
            sums: Vec::new(),
            since_refresh: 0,
            refresh_interval: 0,
            decoders: Vec::new(),
            logger: LogManager::for_stage("demodulator"),
        }
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.sps
    }

    // Recompute window sums from history so rounding error cannot accumulate.
    fn refresh_sums(&mut self) {
        for (lane, sum) in self.sums.iter_mut().enumerate() {
            *sum = self.history.column(lane).iter().sum();
        }
    }
}

impl Default for Demodulator {
    fn default() -> Self {
        Self::new(Box::new(NearestStateSlicer::new()))
    }
}

impl ProcessingStage for Demodulator {
    type Input = DecimatedBlock;
    type Output = Vec<DecodedReport>;

    fn name(&self) -> &str {
        "demodulator"
    }

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        if config.num_antennas == 0 || config.num_antennas > u16::MAX as usize {
            return Err(StageError::InvalidInput(format!(
                "unsupported antenna count {}",
                config.num_antennas
            )));
        }
        let lanes = config.vector_len();
        self.sps = samples_per_symbol(config.symbol_rate, config.tag_rate)?;
        self.history = Array2::zeros((self.sps, lanes));
        self.position = 0;
        self.sums = vec![Complex32::new(0.0, 0.0); lanes];
        self.since_refresh = 0;
        self.refresh_interval = (config.symbol_rate.round() as usize).max(self.sps);
        self.decoders = vec![FrameDecoder::new(); lanes];
        self.slicer.reset(lanes, self.sps);
        self.config = Some(config.clone());
        self.logger.record(&format!(
            "{} samples per tag symbol across {} lanes",
            self.sps, lanes
        ));
        Ok(())
    }

    fn execute(&mut self, input: DecimatedBlock) -> StageResult<Vec<DecodedReport>> {
        let (antennas, lanes, pairs) = {
            let config = self
                .config
                .as_ref()
                .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
            (config.num_antennas, config.vector_len(), config.pair_count())
        };
        if input.lanes() != lanes {
            return Err(StageError::ChannelMismatch {
                expected: lanes,
                actual: input.lanes(),
            });
        }

        let mut reports = Vec::new();
        for row in input.values.rows() {
            for (lane, &sample) in row.iter().enumerate() {
                let oldest = self.history[[self.position, lane]];
                self.sums[lane] += sample - oldest;
                self.history[[self.position, lane]] = sample;

                let kind = if lane < pairs {
                    LaneKind::Pair
                } else {
                    LaneKind::Power
                };
                let Some(bit) = self.slicer.slice(lane, kind, self.sums[lane]) else {
                    continue;
                };
                if let Some(payload) = self.decoders[lane].push(bit) {
                    reports.push(DecodedReport::new(payload, lane as u16, antennas as u16));
                }
            }

            self.position = (self.position + 1) % self.sps;
            self.since_refresh += 1;
            if self.since_refresh >= self.refresh_interval {
                self.refresh_sums();
                self.since_refresh = 0;
            }
        }

        if !reports.is_empty() {
            self.logger
                .record(&format!("{} frames decoded", reports.len()));
        }
        Ok(reports)
    }

    fn cleanup(&mut self) {
        self.config = None;
        self.decoders.clear();
        self.sums.clear();
        self.history = Array2::zeros((0, 0));
    }
}
