use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Antenna port selection, serialized with the driver's own labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AntennaPort {
    #[default]
    #[serde(rename = "RX2")]
    Rx2,
    #[serde(rename = "TX/RX")]
    TxRx,
}

impl AntennaPort {
    pub fn label(&self) -> &'static str {
        match self {
            AntennaPort::Rx2 => "RX2",
            AntennaPort::TxRx => "TX/RX",
        }
    }
}

impl fmt::Display for AntennaPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for AntennaPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RX2" => Ok(AntennaPort::Rx2),
            "TX/RX" | "TXRX" => Ok(AntennaPort::TxRx),
            other => Err(format!("unknown antenna port '{}'", other)),
        }
    }
}

/// Selector for the time and clock references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceSource {
    Internal,
    #[default]
    External,
    Gpsdo,
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReferenceSource::Internal => "internal",
            ReferenceSource::External => "external",
            ReferenceSource::Gpsdo => "gpsdo",
        };
        f.write_str(label)
    }
}

/// Per-antenna front-end settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub index: usize,
    pub center_freq_hz: f64,
    pub gain_db: f64,
    #[serde(default)]
    pub antenna: AntennaPort,
    pub bandwidth_hz: f64,
}

/// Everything the sample source needs before acquisition can start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub sample_rate: f64,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub time_source: ReferenceSource,
    #[serde(default)]
    pub clock_source: ReferenceSource,
    #[serde(default = "default_lock_timeout", with = "duration_millis")]
    pub lock_timeout: Duration,
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(2)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl AcquisitionConfig {
    /// Builds `count` identically configured channels sharing one rate and
    /// external references.
    pub fn uniform(
        count: usize,
        sample_rate: f64,
        center_freq_hz: f64,
        gain_db: f64,
        antenna: AntennaPort,
        bandwidth_hz: f64,
    ) -> Self {
        let channels = (0..count)
            .map(|index| ChannelConfig {
                index,
                center_freq_hz,
                gain_db,
                antenna,
                bandwidth_hz,
            })
            .collect();

        Self {
            sample_rate,
            channels,
            time_source: ReferenceSource::External,
            clock_source: ReferenceSource::External,
            lock_timeout: default_lock_timeout(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Checks the values the driver would otherwise reject one setter at a time.
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.is_empty() {
            return Err("at least one channel is required".into());
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(format!("invalid sample rate {}", self.sample_rate));
        }

        for (position, channel) in self.channels.iter().enumerate() {
            if channel.index != position {
                return Err(format!(
                    "channel indices must be contiguous from 0, found {} at position {}",
                    channel.index, position
                ));
            }
            if !(channel.center_freq_hz.is_finite() && channel.center_freq_hz > 0.0) {
                return Err(format!(
                    "channel {}: invalid center frequency {}",
                    channel.index, channel.center_freq_hz
                ));
            }
            if !channel.gain_db.is_finite() {
                return Err(format!("channel {}: invalid gain", channel.index));
            }
            if !(channel.bandwidth_hz.is_finite() && channel.bandwidth_hz > 0.0) {
                return Err(format!(
                    "channel {}: invalid bandwidth {}",
                    channel.index, channel.bandwidth_hz
                ));
            }
        }

        Ok(())
    }
}
