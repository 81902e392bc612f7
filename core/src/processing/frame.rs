//! Tag frame layout.
//!
//! A frame is 40 coded bits, most significant first. Every 4-bit nibble is
//! followed by one stuffing bit (the complement of the nibble's last bit) so
//! runs never exceed five symbols. Decoded, the frame is four bytes: a
//! `0xA` preamble nibble, 20 data bits, and a CRC-8 (poly 0x07) over all of
//! it. A preamble read as `01010` means the slicer's polarity is inverted and
//! the whole frame is complemented before decoding.

pub const FRAME_BITS: u32 = 40;
const FRAME_MASK: u64 = (1 << FRAME_BITS) - 1;
const PREAMBLE: u64 = 0b10101;
const PREAMBLE_INVERTED: u64 = 0b01010;

const fn build_crc_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u8; 256] = build_crc_table();

pub fn crc8(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |crc, &byte| CRC_TABLE[(crc ^ byte) as usize])
}

/// Four frame bytes carrying `data` (low 20 bits used).
pub fn frame_payload(data: u32) -> [u8; 4] {
    let data = data & 0x000F_FFFF;
    let b0 = 0xA0 | ((data >> 16) & 0x0F) as u8;
    let b1 = (data >> 8) as u8;
    let b2 = data as u8;
    [b0, b1, b2, crc8(&[b0, b1, b2])]
}

/// Coded 40-bit representation of `payload`, first transmitted bit at bit 39.
pub fn encode_frame(payload: [u8; 4]) -> u64 {
    let mut coded = 0u64;
    for byte in payload {
        for nibble in [byte >> 4, byte & 0x0F] {
            for shift in (0..4).rev() {
                coded = (coded << 1) | u64::from((nibble >> shift) & 1);
            }
            let last = u64::from(nibble & 1);
            coded = (coded << 1) | (last ^ 1);
        }
    }
    coded
}

/// Per-lane shift register that recognizes complete frames.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    register: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shifts in one sliced bit and returns the payload if a valid frame now
    /// fills the register.
    pub fn push(&mut self, bit: bool) -> Option<[u8; 4]> {
        self.register = ((self.register << 1) | u64::from(bit)) & FRAME_MASK;

        let inverted = match self.register >> (FRAME_BITS - 5) {
            PREAMBLE => false,
            PREAMBLE_INVERTED => true,
            _ => return None,
        };

        let coded = if inverted {
            !self.register & FRAME_MASK
        } else {
            self.register
        };
        let bit_at = |position: u32| ((coded >> position) & 1) as u8;

        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let group = 39 - 10 * i as u32;
            for j in 0..4 {
                *byte = (*byte << 1) | bit_at(group - j);
            }
            for j in 0..4 {
                *byte = (*byte << 1) | bit_at(group - 5 - j);
            }
        }

        if crc8(&bytes) == 0 {
            Some(bytes)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.register = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `lead` is the symbol sent just before the frame.
    fn feed(decoder: &mut FrameDecoder, lead: bool, coded: u64) -> Vec<[u8; 4]> {
        let mut found: Vec<[u8; 4]> = decoder.push(lead).into_iter().collect();
        found.extend(
            (0..FRAME_BITS)
                .rev()
                .filter_map(|position| decoder.push((coded >> position) & 1 == 1)),
        );
        found
    }

    #[test]
    fn crc_table_matches_ccitt_polynomial() {
        assert_eq!(CRC_TABLE[1], 0x07);
        assert_eq!(CRC_TABLE[2], 0x0E);
        assert_eq!(CRC_TABLE[255], 0xF3);
    }

    #[test]
    fn payload_checks_out_to_zero_crc() {
        let payload = frame_payload(0x0B_EEF5);
        assert_eq!(payload[0] >> 4, 0xA);
        assert_eq!(crc8(&payload), 0);
    }

    #[test]
    fn coded_frame_starts_with_preamble_and_limits_runs() {
        let coded = encode_frame(frame_payload(0x0F_FFFF));
        assert_eq!(coded >> 35, PREAMBLE);
        let bits: Vec<u64> = (0..FRAME_BITS).rev().map(|p| (coded >> p) & 1).collect();
        let longest = bits
            .windows(6)
            .filter(|w| w.iter().all(|&b| b == w[0]))
            .count();
        assert_eq!(longest, 0);
    }

    #[test]
    fn decoder_recovers_payload() {
        let payload = frame_payload(0x01_2345);
        let mut decoder = FrameDecoder::new();
        assert_eq!(feed(&mut decoder, true, encode_frame(payload)), vec![payload]);
    }

    #[test]
    fn decoder_handles_inverted_polarity() {
        let payload = frame_payload(0x05_A5A5);
        let inverted = !encode_frame(payload) & FRAME_MASK;
        let mut decoder = FrameDecoder::new();
        assert_eq!(feed(&mut decoder, false, inverted), vec![payload]);
    }

    #[test]
    fn corrupted_frame_is_dropped() {
        let coded = encode_frame(frame_payload(0x01_2345)) ^ (1 << 12);
        let mut decoder = FrameDecoder::new();
        assert!(feed(&mut decoder, true, coded).is_empty());
    }
}
