use crate::generator::tag::{TagConfig, TagSchedule};
use log::{debug, info};
use ndarray::Array2;
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use scattercore::acquisition::{
    AntennaPort, DeviceError, DeviceResult, RadioDevice, ReferenceSource,
};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

const MIN_FREQ_HZ: f64 = 10e6;
const MAX_FREQ_HZ: f64 = 6e9;
const MAX_SAMPLE_RATE: f64 = 200e6;

/// When the simulated time/clock references report lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockBehavior {
    #[default]
    Immediate,
    AfterPolls(usize),
    Never,
}

/// Configuration for the simulated multi-channel front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub carrier_amplitude: f32,
    pub noise: f32,
    pub max_gain_db: f64,
    pub lock: LockBehavior,
    /// Deliver samples no faster than the configured sample rate.
    pub pace: bool,
    pub tag: Option<TagConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            carrier_amplitude: 1.0,
            noise: 0.02,
            max_gain_db: 76.0,
            lock: LockBehavior::Immediate,
            pace: true,
            tag: Some(TagConfig::default()),
        }
    }
}

/// In-process stand-in for the radio: a carrier seen by every antenna with
/// its own phase, amplitude-modulated by one backscatter tag, plus noise.
pub struct SimulatedRadio {
    channels: usize,
    config: SimulationConfig,
    rng: StdRng,
    phases: Vec<Complex32>,
    schedule: Option<TagSchedule>,
    sample_rate: f64,
    polls: usize,
    streaming_since: Option<Instant>,
    produced: u64,
}

impl SimulatedRadio {
    pub fn new(channels: usize, config: SimulationConfig) -> Self {
        let phases = (0..channels)
            .map(|channel| Complex32::from_polar(1.0, 0.7 * channel as f32))
            .collect();
        let schedule = config.tag.as_ref().map(|tag| TagSchedule::new(tag.data));
        Self {
            channels,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            phases,
            schedule,
            sample_rate: 0.0,
            polls: 0,
            streaming_since: None,
            produced: 0,
        }
    }

    /// Frame payload the injected tag sends, if any.
    pub fn tag_payload(&self) -> Option<[u8; 4]> {
        self.schedule.as_ref().map(TagSchedule::payload)
    }

    fn check_channel(&self, channel: usize) -> DeviceResult<()> {
        if channel < self.channels {
            Ok(())
        } else {
            Err(DeviceError::Unsupported(format!(
                "no channel {} on a {}-channel device",
                channel, self.channels
            )))
        }
    }

    fn samples_per_tag_symbol(&self) -> u64 {
        match self.config.tag.as_ref() {
            Some(tag) if tag.rate_hz > 0.0 && self.sample_rate > 0.0 => {
                ((self.sample_rate / tag.rate_hz).round() as u64).max(1)
            }
            _ => 1,
        }
    }

    fn pace(&self, started: Instant) {
        if !self.config.pace || self.sample_rate <= 0.0 {
            return;
        }
        let due = started + Duration::from_secs_f64(self.produced as f64 / self.sample_rate);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

impl RadioDevice for SimulatedRadio {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn set_center_freq(&mut self, channel: usize, freq_hz: f64) -> DeviceResult<()> {
        self.check_channel(channel)?;
        if !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&freq_hz) {
            return Err(DeviceError::Unsupported(format!(
                "center frequency {} Hz",
                freq_hz
            )));
        }
        Ok(())
    }

    fn set_gain(&mut self, channel: usize, gain_db: f64) -> DeviceResult<()> {
        self.check_channel(channel)?;
        if !(0.0..=self.config.max_gain_db).contains(&gain_db) {
            return Err(DeviceError::Unsupported(format!(
                "gain {} dB outside 0..={}",
                gain_db, self.config.max_gain_db
            )));
        }
        Ok(())
    }

    fn set_antenna(&mut self, channel: usize, antenna: AntennaPort) -> DeviceResult<()> {
        self.check_channel(channel)?;
        debug!("channel {} antenna {}", channel, antenna);
        Ok(())
    }

    fn set_bandwidth(&mut self, channel: usize, bandwidth_hz: f64) -> DeviceResult<()> {
        self.check_channel(channel)?;
        if !(bandwidth_hz > 0.0) {
            return Err(DeviceError::Unsupported(format!(
                "bandwidth {} Hz",
                bandwidth_hz
            )));
        }
        Ok(())
    }

    fn set_sample_rate(&mut self, rate: f64) -> DeviceResult<()> {
        if !(rate > 0.0 && rate <= MAX_SAMPLE_RATE) {
            return Err(DeviceError::Unsupported(format!("sample rate {}", rate)));
        }
        self.sample_rate = rate;
        Ok(())
    }

    fn set_time_source(&mut self, source: ReferenceSource) -> DeviceResult<()> {
        debug!("time source {}", source);
        Ok(())
    }

    fn set_clock_source(&mut self, source: ReferenceSource) -> DeviceResult<()> {
        debug!("clock source {}", source);
        Ok(())
    }

    fn reference_locked(&mut self) -> DeviceResult<bool> {
        self.polls += 1;
        Ok(match self.config.lock {
            LockBehavior::Immediate => true,
            LockBehavior::AfterPolls(polls) => self.polls > polls,
            LockBehavior::Never => false,
        })
    }

    fn set_time_at_next_pps(&mut self) -> DeviceResult<()> {
        self.produced = 0;
        Ok(())
    }

    fn start_streaming(&mut self) -> DeviceResult<()> {
        info!(
            "simulated radio streaming {} channels at {} S/s",
            self.channels, self.sample_rate
        );
        self.streaming_since = Some(Instant::now());
        Ok(())
    }

    fn read(&mut self, buffer: &mut Array2<Complex32>) -> DeviceResult<usize> {
        let started = self.streaming_since.ok_or(DeviceError::Closed)?;
        if buffer.nrows() > self.channels {
            return Err(DeviceError::Io(format!(
                "buffer has {} rows for {} channels",
                buffer.nrows(),
                self.channels
            )));
        }

        let symbol_len = self.samples_per_tag_symbol();
        let depth = self.config.tag.as_ref().map(|tag| tag.depth).unwrap_or(0.0);
        let noise = self.config.noise;
        let (rows, columns) = buffer.dim();

        for column in 0..columns {
            let position = self.produced + column as u64;
            let level = match self.schedule.as_ref() {
                Some(schedule) if !schedule.symbol_at(position / symbol_len) => 1.0 - depth,
                _ => 1.0,
            };
            let amplitude = self.config.carrier_amplitude * level;
            for (channel, phase) in self.phases.iter().take(rows).enumerate() {
                let mut value = *phase * amplitude;
                if noise > 0.0 {
                    value += Complex32::new(
                        self.rng.gen_range(-noise..noise),
                        self.rng.gen_range(-noise..noise),
                    );
                }
                buffer[[channel, column]] = value;
            }
        }

        self.produced += columns as u64;
        self.pace(started);
        Ok(columns)
    }

    fn stop_streaming(&mut self) -> DeviceResult<()> {
        if self.streaming_since.take().is_some() {
            info!("simulated radio stopped after {} samples", self.produced);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scattercore::acquisition::{AcquisitionConfig, AcquisitionError, MultiChannelSource};
    use scattercore::prelude::{ProcessingStage, StageConfig};
    use scattercore::processing::{Decimator, Demodulator};

    fn unpaced(tag_rate: f64) -> SimulationConfig {
        SimulationConfig {
            seed: 7,
            noise: 0.01,
            pace: false,
            tag: Some(TagConfig {
                data: 0x0_1234,
                rate_hz: tag_rate,
                depth: 0.5,
            }),
            ..SimulationConfig::default()
        }
    }

    fn acquisition(channels: usize, sample_rate: f64) -> AcquisitionConfig {
        let mut config = AcquisitionConfig::uniform(
            channels,
            sample_rate,
            2450e6,
            25.0,
            AntennaPort::Rx2,
            sample_rate,
        );
        config.lock_timeout = Duration::from_millis(50);
        config
    }

    #[test]
    fn gain_above_front_end_limit_is_rejected() {
        let mut radio = SimulatedRadio::new(2, SimulationConfig::default());
        assert!(radio.set_gain(0, 25.0).is_ok());
        assert!(matches!(
            radio.set_gain(1, 90.0),
            Err(DeviceError::Unsupported(_))
        ));
        assert!(radio.set_gain(2, 25.0).is_err());
    }

    #[test]
    fn lock_behaviour_follows_configuration() {
        let mut radio = SimulatedRadio::new(
            1,
            SimulationConfig {
                lock: LockBehavior::AfterPolls(2),
                ..SimulationConfig::default()
            },
        );
        let polls: Vec<bool> = (0..3).map(|_| radio.reference_locked().unwrap()).collect();
        assert_eq!(polls, vec![false, false, true]);
    }

    #[test]
    fn unlocked_reference_fails_configuration() {
        let radio = SimulatedRadio::new(
            4,
            SimulationConfig {
                lock: LockBehavior::Never,
                ..SimulationConfig::default()
            },
        );
        let result = MultiChannelSource::configure(Box::new(radio), &acquisition(4, 50e6));
        assert!(matches!(
            result,
            Err(AcquisitionError::Synchronization { .. })
        ));
    }

    #[test]
    fn read_requires_streaming() {
        let mut radio = SimulatedRadio::new(2, unpaced(250e3));
        let mut buffer = Array2::zeros((2, 16));
        assert!(matches!(radio.read(&mut buffer), Err(DeviceError::Closed)));
    }

    #[test]
    fn injected_tag_decodes_through_both_stages() {
        let sample_rate = 8e6;
        let radio = SimulatedRadio::new(2, unpaced(250e3));
        let expected = radio.tag_payload().unwrap();
        let mut source =
            MultiChannelSource::configure(Box::new(radio), &acquisition(2, sample_rate)).unwrap();
        source.start().unwrap();

        let stages = StageConfig {
            num_antennas: 2,
            sample_rate,
            symbol_rate: 1e6,
            tag_rate: 250e3,
        };
        let mut decimator = Decimator::new();
        decimator.initialize(&stages).unwrap();
        let mut demodulator = Demodulator::default();
        demodulator.initialize(&stages).unwrap();

        // Two full schedule periods of 32-sample symbols.
        let mut reports = Vec::new();
        for _ in 0..4 {
            let block = source.next_block(1_504).unwrap();
            let decimated = decimator.execute(block).unwrap();
            reports.extend(demodulator.execute(decimated).unwrap());
        }

        let power_lanes = stages.pair_count() as u16..stages.vector_len() as u16;
        let matching: Vec<_> = reports
            .iter()
            .filter(|report| report.payload == expected)
            .collect();
        assert!(!matching.is_empty());
        assert!(matching
            .iter()
            .any(|report| power_lanes.contains(&report.index) && report.antenna_count == 2));
    }
}
