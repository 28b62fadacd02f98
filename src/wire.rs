//! Wire-format helpers: the CRC-8 checksum, byte-order handling, and the
//! packed feature-set descriptor.

/// CRC-8 over arbitrary bytes, polynomial 0x31, initial value 0xFF, no
/// final XOR. The sensor appends one of these after every 16-bit word it
/// sends, and expects one after every argument word it receives.
pub const fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    let mut i = 0;
    while i < data.len() {
        crc ^= data[i];
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x31;
            } else {
                crc <<= 1;
            }
            bit += 1;
        }
        i += 1;
    }
    crc
}

// Known vector from the datasheet: 0xBEEF -> 0x92.
const _: () = assert!(crc8(&[0xBE, 0xEF]) == 0x92);

/// True iff `expected` is the checksum of `data`.
pub fn crc8_verify(data: &[u8], expected: u8) -> bool {
    crc8(data) == expected
}

/// Reverse the byte order of a 16-bit value.
///
/// The sensor transmits multi-byte integers most-significant-byte first.
/// Register codes are stored pre-swapped (see [`crate::protocol::Reg`]) so
/// the command bytes come out in wire order when written as a host-native
/// little-endian integer; data words instead pass through
/// `to_be_bytes`/`from_be_bytes` exactly once in each direction. Skipping
/// or doubling a swap yields silently wrong magnitudes, not an error.
pub const fn swap16(x: u16) -> u16 {
    x.swap_bytes()
}

/// Feature-set descriptor reported by [`crate::protocol::Reg::FeatureSet`].
///
/// Packed layout, first wire byte: product type in the low nibble, three
/// reserved bits, one must-be-zero bit. Second wire byte: version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeatureSet {
    pub product_type: u8,
    pub version: u8,
}

impl FeatureSet {
    /// Unpack from the big-endian-decoded feature-set word.
    pub fn unpack(word: u16) -> Self {
        Self {
            product_type: ((word >> 8) & 0x0F) as u8,
            version: (word & 0xFF) as u8,
        }
    }
}
