use crate::prelude::{
    DecimatedBlock, ProcessingStage, SampleBlock, StageConfig, StageError, StageResult,
};
use crate::processing::buffer_pool::BufferPool;
use crate::telemetry::log::LogManager;
use ndarray::{concatenate, s, Array2, ArrayView1, Axis};
use num_complex::Complex32;

const RATIO_TOLERANCE: f64 = 1e-6;

/// Integer decimation ratio between the capture and symbol rates.
pub fn decimation_ratio(sample_rate: f64, symbol_rate: f64) -> StageResult<usize> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(StageError::InvalidInput(format!(
            "invalid sample rate {}",
            sample_rate
        )));
    }
    if !(symbol_rate.is_finite() && symbol_rate > 0.0) {
        return Err(StageError::InvalidInput(format!(
            "invalid symbol rate {}",
            symbol_rate
        )));
    }

    let exact = sample_rate / symbol_rate;
    let ratio = exact.round();
    if ratio < 1.0 || (exact - ratio).abs() > RATIO_TOLERANCE {
        return Err(StageError::InvalidInput(format!(
            "sample rate {} is not an integer multiple of symbol rate {}",
            sample_rate, symbol_rate
        )));
    }
    Ok(ratio as usize)
}

/// Rate reduction from capture rate to symbol rate.
///
/// Each output row sums one window of `ratio` input samples: the first
/// `N(N-1)/2` lanes hold `x_i * conj(x_j)` for every antenna pair `i < j`,
/// the last `N` lanes hold `|x_i|^2`. Samples that do not fill a window are
/// carried into the next block, so output `k` always covers input samples
/// `[k * ratio, (k + 1) * ratio)` on every channel.
pub struct Decimator {
    config: Option<StageConfig>,
    ratio: usize,
    carry: Array2<Complex32>,
    next_index: u64,
    pool: BufferPool<Complex32>,
    logger: LogManager,
}

impl Decimator {
    pub fn new() -> Self {
        Self {
            config: None,
            ratio: 0,
            carry: Array2::zeros((0, 0)),
            next_index: 0,
            pool: BufferPool::with_capacity(2),
            logger: LogManager::for_stage("decimator"),
        }
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    pub fn vector_len(&self) -> usize {
        self.config.as_ref().map(StageConfig::vector_len).unwrap_or(0)
    }

    pub fn pair_count(&self) -> usize {
        self.config.as_ref().map(StageConfig::pair_count).unwrap_or(0)
    }

    /// Rows the next `execute` will emit for a block of `input_len` samples.
    pub fn output_len(&self, input_len: usize) -> usize {
        if self.ratio == 0 {
            return 0;
        }
        (self.carry.ncols() + input_len) / self.ratio
    }

    fn window_sums(
        &mut self,
        lhs: ArrayView1<Complex32>,
        rhs: ArrayView1<Complex32>,
        windows: usize,
        conjugate_product: bool,
    ) -> StageResult<Vec<Complex32>> {
        let consumed = windows * self.ratio;
        let mut products = self.pool.checkout(consumed)?;
        for (slot, (a, b)) in products.iter_mut().zip(lhs.iter().zip(rhs.iter())) {
            *slot = if conjugate_product {
                a * b.conj()
            } else {
                Complex32::new(a.norm_sqr(), 0.0)
            };
        }

        let sums = products
            .chunks_exact(self.ratio)
            .map(|window| window.iter().sum::<Complex32>())
            .collect();
        self.pool.release(products);
        Ok(sums)
    }
}

impl Default for Decimator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for Decimator {
    type Input = SampleBlock;
    type Output = DecimatedBlock;

    fn name(&self) -> &str {
        "decimator"
    }

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        if config.num_antennas == 0 {
            return Err(StageError::InvalidInput("no antennas configured".into()));
        }
        self.ratio = decimation_ratio(config.sample_rate, config.symbol_rate)?;
        self.carry = Array2::zeros((config.num_antennas, 0));
        self.next_index = 0;
        self.config = Some(config.clone());
        self.logger.record(&format!(
            "ratio {} ({} antennas, {} lanes)",
            self.ratio,
            config.num_antennas,
            config.vector_len()
        ));
        Ok(())
    }

    fn execute(&mut self, input: SampleBlock) -> StageResult<DecimatedBlock> {
        let (antennas, lanes, pairs) = {
            let config = self
                .config
                .as_ref()
                .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
            (config.num_antennas, config.vector_len(), config.pair_count())
        };
        if input.channels() != antennas {
            return Err(StageError::ChannelMismatch {
                expected: antennas,
                actual: input.channels(),
            });
        }

        let joined = concatenate(Axis(1), &[self.carry.view(), input.samples.view()])
            .map_err(|e| StageError::Internal(e.to_string()))?;
        let windows = joined.ncols() / self.ratio;
        let consumed = windows * self.ratio;
        let mut values = Array2::<Complex32>::zeros((windows, lanes));

        if windows > 0 {
            let mut pair = 0;
            for i in 0..antennas {
                for j in (i + 1)..antennas {
                    let sums =
                        self.window_sums(joined.row(i), joined.row(j), windows, true)?;
                    values.column_mut(pair).assign(&ArrayView1::from(&sums[..]));
                    pair += 1;
                }
            }
            for i in 0..antennas {
                let sums = self.window_sums(joined.row(i), joined.row(i), windows, false)?;
                values
                    .column_mut(pairs + i)
                    .assign(&ArrayView1::from(&sums[..]));
            }
        }

        self.carry = joined.slice(s![.., consumed..]).to_owned();
        let block = DecimatedBlock {
            first_index: self.next_index,
            values,
        };
        self.next_index += windows as u64;
        Ok(block)
    }

    fn cleanup(&mut self) {
        self.pool.reset();
        self.carry = Array2::zeros((0, 0));
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_antennas: usize, sample_rate: f64, symbol_rate: f64) -> StageConfig {
        StageConfig {
            num_antennas,
            sample_rate,
            symbol_rate,
            tag_rate: symbol_rate / 16.0,
        }
    }

    fn ramp(channels: usize, start: usize, len: usize) -> SampleBlock {
        let samples = Array2::from_shape_fn((channels, len), |(c, k)| {
            Complex32::new((start + k) as f32, (c + 1) as f32)
        });
        SampleBlock::new(start as u64, samples)
    }

    #[test]
    fn ratio_matches_rate_configuration() {
        let mut stage = Decimator::new();
        stage.initialize(&config(4, 50e6, 1e6)).unwrap();
        assert_eq!(stage.ratio(), 50);
        assert_eq!(stage.vector_len(), 10);
        assert_eq!(stage.pair_count(), 6);
    }

    #[test]
    fn non_integer_ratio_is_rejected() {
        assert!(decimation_ratio(50e6, 3e6).is_err());
        assert!(decimation_ratio(50e6, 0.0).is_err());
        assert!(decimation_ratio(1e6, 2e6).is_err());
    }

    #[test]
    fn every_lane_has_equal_length_for_any_input() {
        let mut stage = Decimator::new();
        stage.initialize(&config(4, 8e6, 1e6)).unwrap();
        for len in [0usize, 1, 7, 8, 9, 63, 64, 100] {
            let expected = stage.output_len(len);
            let output = stage.execute(ramp(4, 0, len)).unwrap();
            assert_eq!(output.len(), expected);
            for lane in output.values.columns() {
                assert_eq!(lane.len(), expected);
            }
        }
    }

    #[test]
    fn block_boundaries_do_not_shift_windows() {
        let mut whole = Decimator::new();
        whole.initialize(&config(3, 4e6, 1e6)).unwrap();
        let reference = whole.execute(ramp(3, 0, 25)).unwrap();

        let mut split = Decimator::new();
        split.initialize(&config(3, 4e6, 1e6)).unwrap();
        let mut rows = Vec::new();
        let mut offset = 0;
        for len in [7usize, 5, 13] {
            let output = split.execute(ramp(3, offset, len)).unwrap();
            assert_eq!(output.first_index as usize, rows.len());
            rows.extend(output.values.rows().into_iter().map(|r| r.to_vec()));
            offset += len;
        }

        assert_eq!(rows.len(), reference.len());
        for (row, expected) in rows.iter().zip(reference.values.rows()) {
            assert_eq!(row.as_slice(), expected.to_vec().as_slice());
        }
    }

    #[test]
    fn lanes_hold_pair_products_then_powers() {
        let mut stage = Decimator::new();
        stage.initialize(&config(2, 2e6, 1e6)).unwrap();
        let samples = ndarray::array![
            [Complex32::new(1.0, 0.0), Complex32::new(0.0, 1.0)],
            [Complex32::new(2.0, 0.0), Complex32::new(0.0, 2.0)],
        ];
        let output = stage.execute(SampleBlock::new(0, samples)).unwrap();
        assert_eq!(output.values.shape(), &[1, 3]);
        // x0 * conj(x1) summed: 1*2 + i*(-2i) = 4
        assert_eq!(output.values[[0, 0]], Complex32::new(4.0, 0.0));
        assert_eq!(output.values[[0, 1]], Complex32::new(2.0, 0.0));
        assert_eq!(output.values[[0, 2]], Complex32::new(8.0, 0.0));
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let mut stage = Decimator::new();
        stage.initialize(&config(4, 8e6, 1e6)).unwrap();
        let err = stage.execute(ramp(3, 0, 16)).unwrap_err();
        assert!(matches!(
            err,
            StageError::ChannelMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }
}
