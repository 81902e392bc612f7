pub mod buffer_pool;
pub mod decimator;
pub mod demodulator;
pub mod frame;

pub use buffer_pool::BufferPool;
pub use decimator::{decimation_ratio, Decimator};
pub use demodulator::{samples_per_symbol, Demodulator, LaneKind, NearestStateSlicer, SymbolSlicer};
pub use frame::{crc8, encode_frame, frame_payload, FrameDecoder, FRAME_BITS};
