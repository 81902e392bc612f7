pub mod channel;
pub mod device;
pub mod source;

pub use channel::{AcquisitionConfig, AntennaPort, ChannelConfig, ReferenceSource};
pub use device::{DeviceError, DeviceResult, RadioDevice};
pub use source::{AcquisitionError, MultiChannelSource};

#[cfg(test)]
pub(crate) mod testing;
