use crate::generator::radio::SimulationConfig;
use anyhow::Context;
use scattercore::acquisition::{AcquisitionConfig, AntennaPort, ReferenceSource};
use scattercore::pipeline::{ControllerConfig, GraphConfig};
use scattercore::prelude::StageConfig;
use scattercore::telemetry::{IngestConfig, DEFAULT_ENDPOINT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Everything the receiver needs, loadable from YAML. Missing keys take the
/// deployment defaults: 4 antennas on RX2 at 2.45 GHz and 25 dB, 50 MS/s
/// capture, 1 MBd symbol rate, 62.5 kBd tags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub num_antennas: usize,
    pub sample_rate: f64,
    pub symbol_rate: f64,
    pub tag_rate: f64,
    pub center_freq: f64,
    pub gain: f64,
    pub antenna: AntennaPort,
    /// Defaults to the sample rate.
    pub bandwidth: Option<f64>,
    pub time_source: ReferenceSource,
    pub clock_source: ReferenceSource,
    pub lock_timeout_ms: u64,
    pub endpoint: String,
    pub block_len: usize,
    pub queue_depth: usize,
    pub realtime_priority: Option<i32>,
    pub recv_timeout_ms: u64,
    pub simulation: SimulationConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            num_antennas: 4,
            sample_rate: 50e6,
            symbol_rate: 1e6,
            tag_rate: 62.5e3,
            center_freq: 2450e6,
            gain: 25.0,
            antenna: AntennaPort::Rx2,
            bandwidth: None,
            time_source: ReferenceSource::External,
            clock_source: ReferenceSource::External,
            lock_timeout_ms: 2_000,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            block_len: GraphConfig::default().block_len,
            queue_depth: GraphConfig::default().queue_depth,
            realtime_priority: None,
            recv_timeout_ms: 250,
            simulation: SimulationConfig::default(),
        }
    }
}

impl ReceiverConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading receiver config {}", path_ref.display()))?;
        let config: ReceiverConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing receiver config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn to_acquisition(&self) -> AcquisitionConfig {
        let mut config = AcquisitionConfig::uniform(
            self.num_antennas,
            self.sample_rate,
            self.center_freq,
            self.gain,
            self.antenna,
            self.bandwidth.unwrap_or(self.sample_rate),
        );
        config.time_source = self.time_source;
        config.clock_source = self.clock_source;
        config.lock_timeout = Duration::from_millis(self.lock_timeout_ms);
        config
    }

    pub fn to_stage_config(&self) -> StageConfig {
        StageConfig {
            num_antennas: self.num_antennas,
            sample_rate: self.sample_rate,
            symbol_rate: self.symbol_rate,
            tag_rate: self.tag_rate,
        }
    }

    pub fn to_controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            acquisition: self.to_acquisition(),
            stages: self.to_stage_config(),
            graph: GraphConfig {
                block_len: self.block_len,
                queue_depth: self.queue_depth,
                realtime_priority: self.realtime_priority,
            },
            ingest: IngestConfig {
                endpoint: self.endpoint.clone(),
                recv_timeout: Duration::from_millis(self.recv_timeout_ms),
                ..IngestConfig::default()
            },
        }
    }

    /// Simulation settings with the injected tag keyed to the configured tag
    /// rate.
    pub fn simulation(&self) -> SimulationConfig {
        let mut simulation = self.simulation.clone();
        if let Some(tag) = simulation.tag.as_mut() {
            tag.rate_hz = self.tag_rate;
        }
        simulation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::radio::LockBehavior;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_deployment() {
        let cfg = ReceiverConfig::default();
        let stages = cfg.to_stage_config();
        assert_eq!(stages.num_antennas, 4);
        assert_eq!(stages.vector_len(), 10);

        let acquisition = cfg.to_acquisition();
        assert_eq!(acquisition.channel_count(), 4);
        assert_eq!(acquisition.channels[3].center_freq_hz, 2450e6);
        assert_eq!(acquisition.channels[3].bandwidth_hz, 50e6);
        assert_eq!(acquisition.time_source, ReferenceSource::External);
        assert!(acquisition.validate().is_ok());

        let controller = cfg.to_controller_config();
        assert_eq!(controller.ingest.endpoint, "ipc:///tmp/AnyScatterIPC");
    }

    #[test]
    fn config_load_reads_partial_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"num_antennas: 2\nsample_rate: 8000000.0\nantenna: TX/RX\ntime_source: internal\nsimulation:\n  lock: never\n  tag:\n    data: 4660\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = ReceiverConfig::load(&path).unwrap();

        assert_eq!(cfg.num_antennas, 2);
        assert_eq!(cfg.antenna, AntennaPort::TxRx);
        assert_eq!(cfg.time_source, ReferenceSource::Internal);
        assert_eq!(cfg.symbol_rate, 1e6);
        assert_eq!(cfg.simulation.lock, LockBehavior::Never);
        assert_eq!(cfg.simulation().tag.unwrap().rate_hz, 62.5e3);
    }

    #[test]
    fn config_load_reports_parse_errors() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"num_antennas: four\n").unwrap();
        let path = temp.into_temp_path();
        let err = ReceiverConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("parsing receiver config"));
    }
}
