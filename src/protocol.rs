//! Register-style command protocol: command codes with their documented
//! timing contracts, and the byte-level primitives to drive one sensor on
//! the bus.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::warn;

use crate::wire::{crc8, swap16};

/// Command codes, stored pre-swapped so the bytes appear in wire order when
/// written as a host-native little-endian integer.
///
/// Arguments and replies are always 16-bit big-endian words, each followed
/// by its CRC byte. Settle windows are from the datasheet and are part of
/// the device contract, not tunable per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Reg {
    // Name = code,                   // [ min-delay, max-delay), in words, out words
    SerialId = swap16(0x3682),        // [ 0.5ms,   1ms), 0, 3
    FeatureSet = swap16(0x202F),      // [   1ms,   2ms), 0, 1
    SelfTest = swap16(0x2032),        // [ 200ms, 220ms), 0, 1
    RawMeasure = swap16(0x2050),      // [  20ms,  25ms), 0, 2
    HumiditySet = swap16(0x2061),     // [   1ms,  10ms), 1, 0
    IaqInit = swap16(0x2003),         // [   2ms,  10ms), 0, 0
    IaqMeasure = swap16(0x2008),      // [  10ms,  12ms), 0, 2
    IaqBaseline = swap16(0x2015),     // [  10ms,  10ms), 0, 2
    IaqBaselineSet = swap16(0x201E),  // [  10ms,  10ms), 2, 0; reversed field order vs `IaqBaseline`
    // Following two are not in the datasheet, seen in the vendor reference
    // library. Require product version >= 0x21.
    TvocBaseline = swap16(0x20B3),    // [   ???,  10ms), 0, 1
    TvocBaselineSet = swap16(0x2077), // [   ???,  10ms), 1, 0
}

impl Reg {
    /// Upper bound of the settle window: once this much time has passed
    /// after the command bytes, the device guarantees the reply is valid
    /// (or the next command may be issued). Waiting any longer buys
    /// nothing; a NACK after this window is a failure, not a retry point.
    pub const fn max_wait_us(self) -> u32 {
        match self {
            Reg::SerialId => 1_000,
            // datasheet says 2ms; the part wants longer in practice
            Reg::FeatureSet => 10_000,
            Reg::SelfTest => 220_000,
            Reg::RawMeasure => 25_000,
            Reg::HumiditySet => 10_000,
            Reg::IaqInit => 10_000,
            Reg::IaqMeasure => 12_000,
            Reg::IaqBaseline | Reg::IaqBaselineSet => 10_000,
            Reg::TvocBaseline | Reg::TvocBaselineSet => 10_000,
        }
    }

    /// Number of CRC-suffixed words in the reply.
    pub const fn reply_words(self) -> usize {
        match self {
            Reg::SerialId => 3,
            Reg::FeatureSet | Reg::SelfTest | Reg::TvocBaseline => 1,
            Reg::RawMeasure | Reg::IaqMeasure | Reg::IaqBaseline => 2,
            Reg::HumiditySet | Reg::IaqInit | Reg::IaqBaselineSet | Reg::TvocBaselineSet => 0,
        }
    }
}

/// Driver fault taxonomy.
///
/// Every wait in the protocol layer is bounded by the register's settle
/// window, so a reply that never becomes ready surfaces as [`Error::Bus`]
/// (the device NACKs the read) rather than an unbounded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// Bus write/read primitive failed (no acknowledgment, arbitration
    /// loss, reply not ready within the settle window).
    Bus(E),
    /// A received word's trailing checksum did not match.
    Crc { reg: Reg, expected: u8, actual: u8 },
    /// Feature descriptor reported a product type other than the SGP30's.
    WrongProductType(u8),
    /// Feature descriptor reported a version below the minimum supported.
    UnsupportedVersion(u8),
    /// Self-test status word differed from the pass sentinel.
    SelfTestFailed(u16),
    /// The operation requires the `Ready` state.
    NotReady,
}

// largest argument count in the register table (baseline restore)
const MAX_ARG_WORDS: usize = 2;

/// Byte-level access to one sensor: commands out, argument words with their
/// checksums out, replies in after the documented settle window. One
/// transaction at a time; the caller arbitrates bus ownership.
pub struct SensorBus<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C, D, E> SensorBus<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self { i2c, delay, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Fire-and-forget command: no arguments, no reply. Settles for the
    /// register's window before returning so the device is ready for the
    /// next command.
    pub async fn touch(&mut self, reg: Reg) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &(reg as u16).to_le_bytes())
            .await
            .map_err(Error::Bus)?;
        self.delay.delay_us(reg.max_wait_us()).await;
        Ok(())
    }

    /// Command plus argument words, each marshalled big-endian and followed
    /// by its checksum byte. Settles after the write.
    pub async fn write(&mut self, reg: Reg, words: &[u16]) -> Result<(), Error<E>> {
        // no register takes more; an oversized slice is a caller bug, not a
        // runtime condition, so it panics in every build profile
        assert!(words.len() <= MAX_ARG_WORDS, "too many argument words");
        let mut buf = [0u8; 2 + 3 * MAX_ARG_WORDS];
        buf[..2].copy_from_slice(&(reg as u16).to_le_bytes());
        let mut len = 2;
        for &word in words {
            let be = word.to_be_bytes();
            buf[len..len + 2].copy_from_slice(&be);
            buf[len + 2] = crc8(&be);
            len += 3;
        }
        self.i2c
            .write(self.address, &buf[..len])
            .await
            .map_err(Error::Bus)?;
        self.delay.delay_us(reg.max_wait_us()).await;
        Ok(())
    }

    /// Issue `reg`, wait out its settle window, then read `buf.len()` raw
    /// bytes. Checksums are *not* verified here: structured replies carry a
    /// CRC per field, which a single generic wrapper cannot express, so the
    /// caller verifies field by field.
    pub async fn read_into(&mut self, reg: Reg, buf: &mut [u8]) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &(reg as u16).to_le_bytes())
            .await
            .map_err(Error::Bus)?;
        self.delay.delay_us(reg.max_wait_us()).await;
        self.i2c.read(self.address, buf).await.map_err(Error::Bus)
    }

    /// The common single-scalar reply: one big-endian word plus its
    /// checksum, verified before the value is trusted.
    pub async fn read_u16_crc(&mut self, reg: Reg) -> Result<u16, Error<E>> {
        let mut buf = [0u8; 3];
        self.read_into(reg, &mut buf).await?;
        let expected = crc8(&buf[..2]);
        if buf[2] != expected {
            warn!(
                "checksum mismatch on {:?}: expected {:#04x}, got {:#04x}",
                reg, expected, buf[2]
            );
            return Err(Error::Crc {
                reg,
                expected,
                actual: buf[2],
            });
        }
        Ok(u16::from_be_bytes([buf[0], buf[1]]))
    }
}
