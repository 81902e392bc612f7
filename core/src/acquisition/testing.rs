use crate::acquisition::channel::{AntennaPort, ReferenceSource};
use crate::acquisition::device::{DeviceError, DeviceResult, RadioDevice};
use ndarray::Array2;
use num_complex::Complex32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory radio that records every driver call.
pub struct ScriptedRadio {
    channels: usize,
    calls: Arc<Mutex<Vec<String>>>,
    streaming: Arc<AtomicBool>,
    polls_until_lock: Option<usize>,
    max_gain: f64,
    produced: u64,
    sample_limit: Option<u64>,
}

impl ScriptedRadio {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            calls: Arc::new(Mutex::new(Vec::new())),
            streaming: Arc::new(AtomicBool::new(false)),
            polls_until_lock: Some(0),
            max_gain: 76.0,
            produced: 0,
            sample_limit: None,
        }
    }

    pub fn never_locks(mut self) -> Self {
        self.polls_until_lock = None;
        self
    }

    pub fn locks_after(mut self, polls: usize) -> Self {
        self.polls_until_lock = Some(polls);
        self
    }

    pub fn max_gain(mut self, gain_db: f64) -> Self {
        self.max_gain = gain_db;
        self
    }

    pub fn sample_limit(mut self, samples: u64) -> Self {
        self.sample_limit = Some(samples);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    pub fn streaming_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.streaming)
    }

    fn log(&self, entry: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(entry);
        }
    }
}

impl RadioDevice for ScriptedRadio {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn set_center_freq(&mut self, channel: usize, freq_hz: f64) -> DeviceResult<()> {
        self.log(format!("freq {} {:.0}", channel, freq_hz));
        Ok(())
    }

    fn set_gain(&mut self, channel: usize, gain_db: f64) -> DeviceResult<()> {
        if gain_db > self.max_gain {
            return Err(DeviceError::Unsupported(format!(
                "gain {} above {}",
                gain_db, self.max_gain
            )));
        }
        self.log(format!("gain {} {}", channel, gain_db));
        Ok(())
    }

    fn set_antenna(&mut self, channel: usize, antenna: AntennaPort) -> DeviceResult<()> {
        self.log(format!("antenna {} {}", channel, antenna));
        Ok(())
    }

    fn set_bandwidth(&mut self, channel: usize, bandwidth_hz: f64) -> DeviceResult<()> {
        self.log(format!("bandwidth {} {:.0}", channel, bandwidth_hz));
        Ok(())
    }

    fn set_sample_rate(&mut self, rate: f64) -> DeviceResult<()> {
        self.log(format!("rate {:.0}", rate));
        Ok(())
    }

    fn set_time_source(&mut self, source: ReferenceSource) -> DeviceResult<()> {
        self.log(format!("time_source {}", source));
        Ok(())
    }

    fn set_clock_source(&mut self, source: ReferenceSource) -> DeviceResult<()> {
        self.log(format!("clock_source {}", source));
        Ok(())
    }

    fn reference_locked(&mut self) -> DeviceResult<bool> {
        match self.polls_until_lock.as_mut() {
            Some(0) => Ok(true),
            Some(remaining) => {
                *remaining -= 1;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn set_time_at_next_pps(&mut self) -> DeviceResult<()> {
        self.log("pps".to_string());
        Ok(())
    }

    fn start_streaming(&mut self) -> DeviceResult<()> {
        self.streaming.store(true, Ordering::SeqCst);
        self.log("start".to_string());
        Ok(())
    }

    fn read(&mut self, buffer: &mut Array2<Complex32>) -> DeviceResult<usize> {
        let wanted = buffer.ncols() as u64;
        let available = match self.sample_limit {
            Some(limit) => limit.saturating_sub(self.produced).min(wanted),
            None => wanted,
        } as usize;

        for ((channel, column), value) in buffer.indexed_iter_mut() {
            if column < available {
                let position = (self.produced + column as u64) as f32;
                *value = Complex32::new(position, channel as f32);
            }
        }
        self.produced += available as u64;
        Ok(available)
    }

    fn stop_streaming(&mut self) -> DeviceResult<()> {
        self.streaming.store(false, Ordering::SeqCst);
        self.log("stop".to_string());
        Ok(())
    }
}
