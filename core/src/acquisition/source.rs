use crate::acquisition::channel::AcquisitionConfig;
use crate::acquisition::device::{DeviceError, RadioDevice};
use crate::prelude::SampleBlock;
use crate::telemetry::log::LogManager;
use log::{debug, warn};
use ndarray::{s, Array2};
use num_complex::Complex32;
use std::thread;
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Failures raised while bringing up or reading the acquisition front end.
#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("configuration rejected: {0}")]
    Configuration(String),
    #[error("time/clock reference did not lock within {waited:?}")]
    Synchronization { waited: Duration },
    #[error("device failure: {0}")]
    Device(#[from] DeviceError),
    #[error("source is not streaming")]
    NotStreaming,
}

/// Owner of the radio handle producing lockstep sample blocks.
pub struct MultiChannelSource {
    device: Box<dyn RadioDevice>,
    config: AcquisitionConfig,
    next_sample: u64,
    streaming: bool,
    logger: LogManager,
}

impl std::fmt::Debug for MultiChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiChannelSource")
            .field("channels", &self.config.channel_count())
            .field("sample_rate", &self.config.sample_rate)
            .field("next_sample", &self.next_sample)
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl MultiChannelSource {
    /// Applies every channel setting, binds the shared references and waits
    /// for them to lock. The device is dropped if any step fails.
    pub fn configure(
        mut device: Box<dyn RadioDevice>,
        config: &AcquisitionConfig,
    ) -> Result<Self, AcquisitionError> {
        let logger = LogManager::for_stage("source");

        config.validate().map_err(AcquisitionError::Configuration)?;
        if config.channel_count() > device.channel_count() {
            return Err(AcquisitionError::Configuration(format!(
                "{} channels requested but device exposes {}",
                config.channel_count(),
                device.channel_count()
            )));
        }

        for channel in &config.channels {
            let index = channel.index;
            device
                .set_center_freq(index, channel.center_freq_hz)
                .map_err(|e| configuration_error(index, "center frequency", e))?;
            device
                .set_gain(index, channel.gain_db)
                .map_err(|e| configuration_error(index, "gain", e))?;
            device
                .set_antenna(index, channel.antenna)
                .map_err(|e| configuration_error(index, "antenna", e))?;
            device
                .set_bandwidth(index, channel.bandwidth_hz)
                .map_err(|e| configuration_error(index, "bandwidth", e))?;
            debug!(
                "channel {} -> {:.0} Hz, {:.1} dB, {}, {:.0} Hz bw",
                index, channel.center_freq_hz, channel.gain_db, channel.antenna, channel.bandwidth_hz
            );
        }

        device.set_sample_rate(config.sample_rate).map_err(|e| {
            AcquisitionError::Configuration(format!(
                "sample rate {}: {}",
                config.sample_rate, e
            ))
        })?;

        device.set_time_source(config.time_source)?;
        device.set_clock_source(config.clock_source)?;
        wait_for_lock(device.as_mut(), config.lock_timeout)?;
        device.set_time_at_next_pps()?;

        logger.record(&format!(
            "{} channels synchronized at {:.0} S/s (time {}, clock {})",
            config.channel_count(),
            config.sample_rate,
            config.time_source,
            config.clock_source
        ));

        Ok(Self {
            device,
            config: config.clone(),
            next_sample: 0,
            streaming: false,
            logger,
        })
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.config.channel_count()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if !self.streaming {
            self.device.start_streaming()?;
            self.streaming = true;
            self.logger.record("streaming started");
        }
        Ok(())
    }

    /// Reads up to `len` aligned samples per channel. An empty block means the
    /// device had nothing to deliver in this call.
    pub fn next_block(&mut self, len: usize) -> Result<SampleBlock, AcquisitionError> {
        if !self.streaming {
            return Err(AcquisitionError::NotStreaming);
        }

        let channels = self.channel_count();
        let mut buffer = Array2::<Complex32>::zeros((channels, len));
        let written = self.device.read(&mut buffer)?.min(len);
        let samples = if written == len {
            buffer
        } else {
            buffer.slice(s![.., ..written]).to_owned()
        };

        let block = SampleBlock::new(self.next_sample, samples);
        self.next_sample += written as u64;
        Ok(block)
    }

    pub fn stop(&mut self) -> Result<(), AcquisitionError> {
        if self.streaming {
            self.streaming = false;
            self.device.stop_streaming()?;
            self.logger.record(&format!(
                "streaming stopped after {} samples per channel",
                self.next_sample
            ));
        }
        Ok(())
    }

    /// Stops streaming if needed and hands the device back for teardown.
    pub fn release(mut self) -> Box<dyn RadioDevice> {
        if let Err(err) = self.stop() {
            warn!("failed to stop streaming during release: {}", err);
        }
        self.device
    }
}

fn configuration_error(index: usize, what: &str, err: DeviceError) -> AcquisitionError {
    AcquisitionError::Configuration(format!("channel {} {}: {}", index, what, err))
}

fn wait_for_lock(device: &mut dyn RadioDevice, timeout: Duration) -> Result<(), AcquisitionError> {
    let started = Instant::now();
    loop {
        if device.reference_locked()? {
            debug!("references locked after {:?}", started.elapsed());
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(AcquisitionError::Synchronization {
                waited: started.elapsed(),
            });
        }
        thread::sleep(LOCK_POLL_INTERVAL);
    }
}
