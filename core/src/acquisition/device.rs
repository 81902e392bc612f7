use crate::acquisition::channel::{AntennaPort, ReferenceSource};
use ndarray::Array2;
use num_complex::Complex32;

/// Errors reported by the hardware driver.
#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    #[error("unsupported setting: {0}")]
    Unsupported(String),
    #[error("device I/O failure: {0}")]
    Io(String),
    #[error("device handle closed")]
    Closed,
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Multi-channel receive front end.
///
/// Setters mirror the driver: one call per parameter per channel, applied
/// before streaming starts.
pub trait RadioDevice: Send {
    fn channel_count(&self) -> usize;

    fn set_center_freq(&mut self, channel: usize, freq_hz: f64) -> DeviceResult<()>;
    fn set_gain(&mut self, channel: usize, gain_db: f64) -> DeviceResult<()>;
    fn set_antenna(&mut self, channel: usize, antenna: AntennaPort) -> DeviceResult<()>;
    fn set_bandwidth(&mut self, channel: usize, bandwidth_hz: f64) -> DeviceResult<()>;
    fn set_sample_rate(&mut self, rate: f64) -> DeviceResult<()>;

    fn set_time_source(&mut self, source: ReferenceSource) -> DeviceResult<()>;
    fn set_clock_source(&mut self, source: ReferenceSource) -> DeviceResult<()>;

    /// Whether the time and clock references have locked.
    fn reference_locked(&mut self) -> DeviceResult<bool>;

    /// Zero the device time on the next PPS edge.
    fn set_time_at_next_pps(&mut self) -> DeviceResult<()>;

    fn start_streaming(&mut self) -> DeviceResult<()>;

    /// Fill `buffer` (channels x samples) with the next aligned samples and
    /// return how many columns were written.
    fn read(&mut self, buffer: &mut Array2<Complex32>) -> DeviceResult<usize>;

    fn stop_streaming(&mut self) -> DeviceResult<()>;
}
