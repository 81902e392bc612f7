use scattercore::processing::{encode_frame, frame_payload, FRAME_BITS};
use serde::{Deserialize, Serialize};

/// Symbols sent between frames. Both levels appear and no five-symbol run
/// reads as a preamble.
pub const IDLE_SYMBOLS: [bool; 7] = [false, true, true, false, false, true, true];

/// Backscatter tag the simulated front end reflects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Low 20 bits are sent.
    pub data: u32,
    /// Tag symbol rate in Hz.
    pub rate_hz: f64,
    /// Fraction of the carrier removed while the tag sends a zero.
    pub depth: f32,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            data: 0x0_BEEF,
            rate_hz: 62.5e3,
            depth: 0.5,
        }
    }
}

/// Repeating symbol sequence: idle symbols followed by one coded frame.
#[derive(Debug, Clone)]
pub struct TagSchedule {
    payload: [u8; 4],
    symbols: Vec<bool>,
}

impl TagSchedule {
    pub fn new(data: u32) -> Self {
        let payload = frame_payload(data);
        let coded = encode_frame(payload);
        let mut symbols = IDLE_SYMBOLS.to_vec();
        symbols.extend((0..FRAME_BITS).rev().map(|bit| (coded >> bit) & 1 == 1));
        Self { payload, symbols }
    }

    /// Frame bytes a receiver should recover.
    pub fn payload(&self) -> [u8; 4] {
        self.payload
    }

    #[cfg(test)]
    pub fn period(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbol_at(&self, index: u64) -> bool {
        self.symbols[(index % self.symbols.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_repeats_idle_then_frame() {
        let schedule = TagSchedule::new(0x1_2345);
        assert_eq!(schedule.period(), IDLE_SYMBOLS.len() + FRAME_BITS as usize);
        assert!(!schedule.symbol_at(0));
        // 0xA preamble nibble leads the frame.
        let start = IDLE_SYMBOLS.len() as u64;
        let lead: Vec<bool> = (start..start + 4).map(|i| schedule.symbol_at(i)).collect();
        assert_eq!(lead, vec![true, false, true, false]);
        assert_eq!(
            schedule.symbol_at(3),
            schedule.symbol_at(3 + schedule.period() as u64)
        );
    }

    #[test]
    fn idle_symbols_never_look_like_a_preamble() {
        for window in IDLE_SYMBOLS.windows(5) {
            let alternating = window.windows(2).all(|pair| pair[0] != pair[1]);
            assert!(!alternating);
        }
    }
}
