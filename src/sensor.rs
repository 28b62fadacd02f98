//! SGP30 lifecycle state machine and the periodic measurement cycle.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, error, info, warn};

use crate::humidity;
use crate::protocol::{Error, Reg, SensorBus};
use crate::types::{Environmental, Measurement, PeriodicSensor, VocIndex, VocRaw};
use crate::wire::{crc8, FeatureSet};

/// Bus addresses the SGP30 answers on. Immutable; multiple state machine
/// instances may scan it independently.
pub const ADDRESSES: [u8; 1] = [0x58];

const PRODUCT_TYPE: u8 = 0;
// Only 0x20 and 0x22 seem to exist in the wild.
const VERSION_MIN: u8 = 0x20;
/// Self-test status word meaning all tests passed (big-endian decode).
const SELF_TEST_OK: u16 = 0xD400;

/// Clean-indoor-air TVOC reference concentration, µg/m³.
/// Based on German federal standards (DOI 10.1007/s00103-007-0290-y).
const TVOC_UG_PER_M3_CLEAN_INDOORS: f32 = 300.0;
/// Mean molar mass of the indoor VOC gas mix, g/mol (Mølhave et al.).
const TVOC_MOLAR_MASS: f32 = 110.0;
/// Molar volume, m³/mol.
const MOLAR_VOLUME: f32 = 0.0244;

/// Largest absolute humidity the device accepts as compensation, mg/m³.
const ABS_HUMIDITY_MAX_MG_M3: u32 = 256_000;

/// Lifecycle of one sensor instance.
///
/// `Failed` is terminal: a setup fault means a wrong or incompatible part,
/// so the sensor is excluded for the life of the process. `Ready` is sticky
/// across transient measurement faults, which indicate bus noise instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Uninitialized,
    Identified,
    Initialized,
    SelfTested,
    Ready,
    Failed,
}

/// One SGP30 on the bus, plus its environmental side channel.
pub struct Sgp30<I2C, D, ENV> {
    bus: SensorBus<I2C, D>,
    side: ENV,
    state: State,
    version: u8,
}

impl<I2C, D, ENV, E> Sgp30<I2C, D, ENV>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
    ENV: Environmental,
    E: core::fmt::Debug,
{
    pub fn new(i2c: I2C, delay: D, side: ENV) -> Self {
        Self::with_address(i2c, delay, ADDRESSES[0], side)
    }

    pub fn with_address(i2c: I2C, delay: D, address: u8, side: ENV) -> Self {
        Self {
            bus: SensorBus::new(i2c, delay, address),
            side,
            state: State::Uninitialized,
            version: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Product version cached during identification; 0 before that.
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn side(&self) -> &ENV {
        &self.side
    }

    pub fn side_mut(&mut self) -> &mut ENV {
        &mut self.side
    }

    /// Drive the sensor from `Uninitialized` to `Ready`: identify, trigger
    /// IAQ initialization, run the self-test.
    ///
    /// Any fault parks the state machine in `Failed` permanently; there is
    /// no retry path for setup.
    pub async fn setup(&mut self) -> Result<(), Error<E>> {
        match self.state {
            State::Uninitialized => {}
            State::Ready => return Ok(()),
            _ => return Err(Error::NotReady),
        }
        match self.try_setup().await {
            Ok(()) => {
                self.state = State::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    async fn try_setup(&mut self) -> Result<(), Error<E>> {
        self.identify().await?;
        self.state = State::Identified;

        // fixed 10ms settle handled by the bus layer
        self.bus.touch(Reg::IaqInit).await.map_err(|e| {
            error!("SGP30: failed to init IAQ: {:?}", e);
            e
        })?;
        self.state = State::Initialized;

        self.self_test().await?;
        self.state = State::SelfTested;
        Ok(())
    }

    async fn identify(&mut self) -> Result<(), Error<E>> {
        let features = self.feature_set().await?;
        if features.product_type != PRODUCT_TYPE {
            error!("SGP30: unrecognised product type {}", features.product_type);
            return Err(Error::WrongProductType(features.product_type));
        }
        if features.version < VERSION_MIN {
            error!(
                "SGP30: unsupported version {:#04x} (minimum is {:#04x})",
                features.version, VERSION_MIN
            );
            return Err(Error::UnsupportedVersion(features.version));
        }

        self.version = features.version; // stash for future reference
        info!(
            "SGP30: product={} version={:#04x}",
            features.product_type, features.version
        );
        Ok(())
    }

    pub async fn feature_set(&mut self) -> Result<FeatureSet, Error<E>> {
        let word = self.bus.read_u16_crc(Reg::FeatureSet).await?;
        Ok(FeatureSet::unpack(word))
    }

    async fn self_test(&mut self) -> Result<(), Error<E>> {
        let status = match self.bus.read_u16_crc(Reg::SelfTest).await {
            Ok(status) => status,
            Err(e) => {
                error!("SGP30: self-test request failed: {:?}", e);
                return Err(e);
            }
        };
        if status != SELF_TEST_OK {
            error!(
                "SGP30: self-test failed, status {:#06x} (expected {:#06x})",
                status, SELF_TEST_OK
            );
            return Err(Error::SelfTestFailed(status));
        }
        Ok(())
    }

    /// 48-bit device serial, three CRC-protected words. Diagnostic only.
    pub async fn serial_id(&mut self) -> Result<u64, Error<E>> {
        let mut buf = [0u8; 9];
        self.bus.read_into(Reg::SerialId, &mut buf).await?;
        let mut serial: u64 = 0;
        for chunk in buf.chunks_exact(3) {
            let word = verify_word(Reg::SerialId, [chunk[0], chunk[1]], chunk[2])?;
            serial = serial << 16 | u64::from(word);
        }
        Ok(serial)
    }

    /// One measurement cycle: set humidity compensation, measure, derive
    /// and publish the VOC index and raw ppb.
    ///
    /// Faults here are transient: the cycle is abandoned, the previously
    /// published output stays as-is (stale but never corrupted), and the
    /// sensor remains `Ready` for the next tick.
    pub async fn read(&mut self) -> Result<(), Error<E>> {
        if self.state != State::Ready {
            return Err(Error::NotReady);
        }

        // f32 on purpose; f64 would get pointlessly expensive here
        let abs_humidity_g_m3 = humidity::absolute_fast(
            self.side.compensation_humidity(),
            self.side.compensation_temperature(),
        );
        if let Err(e) = self
            .humidity_absolute_set((abs_humidity_g_m3 * 1000.0) as u32)
            .await
        {
            error!("SGP30: failed to set humidity compensation: {:?}", e);
            return Err(e);
        }

        let result = self.measure(Reg::IaqMeasure).await?;
        debug!(
            "SGP30: measure  - co2-eq={} tvoc-ppb={}",
            result.co2_eq_ppm, result.tvoc_ppb
        );

        // Diagnostic only; nothing feeds the baseline back into correction.
        let baseline = self.measure(Reg::IaqBaseline).await?;
        debug!(
            "SGP30: baseline - co2-eq={} tvoc-ppb={}",
            baseline.co2_eq_ppm, baseline.tvoc_ppb
        );

        self.side.set_voc_index(voc_index_from_ppb(result.tvoc_ppb));
        self.side.set_voc_raw(VocRaw::new(u32::from(result.tvoc_ppb)));
        Ok(())
    }

    /// Send absolute humidity (mg/m³) as the compensation value, clamped to
    /// the largest value the device accepts and converted to its 8.8
    /// fixed-point g/m³ wire representation.
    pub async fn humidity_absolute_set(&mut self, abs_humidity_mg_m3: u32) -> Result<(), Error<E>> {
        let mg_m3 = abs_humidity_mg_m3.min(ABS_HUMIDITY_MAX_MG_M3);
        // (mg / 1000) * 256, in one fixed-point multiply
        let scaled = ((u64::from(mg_m3) * 16_777) >> 16) as u16;
        self.bus.write(Reg::HumiditySet, &[scaled]).await
    }

    /// Read back the device's current baseline pair. Diagnostic.
    pub async fn baseline(&mut self) -> Result<Measurement, Error<E>> {
        self.measure(Reg::IaqBaseline).await
    }

    /// Restore a previously captured baseline.
    ///
    /// The device expects the fields in the opposite order from how
    /// [`Self::baseline`] reads them back: TVOC word first, then the
    /// gas-equivalent word. That reversal is firmware behavior; do not
    /// "fix" it.
    pub async fn baseline_set(&mut self, m: Measurement) -> Result<(), Error<E>> {
        info!(
            "SGP30: set baseline co2-eq-ppm={} tvoc-ppb={}",
            m.co2_eq_ppm, m.tvoc_ppb
        );
        self.bus
            .write(Reg::IaqBaselineSet, &[m.tvoc_ppb, m.co2_eq_ppm])
            .await
    }

    /// Read a two-word reply (gas-equivalent word, then TVOC word), each
    /// verified against its own checksum before being trusted.
    async fn measure(&mut self, reg: Reg) -> Result<Measurement, Error<E>> {
        let mut buf = [0u8; 6];
        self.bus.read_into(reg, &mut buf).await?;
        let co2_eq_ppm = verify_word(reg, [buf[0], buf[1]], buf[2])?;
        let tvoc_ppb = verify_word(reg, [buf[3], buf[4]], buf[5])?;
        Ok(Measurement {
            co2_eq_ppm,
            tvoc_ppb,
        })
    }
}

/// Raw ppb to bounded index: convert through the molar constants to µg/m³,
/// then interpolate against the clean-indoor reference (0 maps to 0, the
/// reference concentration to 100) and clamp.
fn voc_index_from_ppb(tvoc_ppb: u16) -> VocIndex {
    let tvoc_ug_per_m3 = (TVOC_MOLAR_MASS / (MOLAR_VOLUME * 1000.0)) * tvoc_ppb as f32;
    VocIndex::new(100.0 * tvoc_ug_per_m3 / TVOC_UG_PER_M3_CLEAN_INDOORS)
}

fn verify_word<E>(reg: Reg, word: [u8; 2], actual: u8) -> Result<u16, Error<E>> {
    let expected = crc8(&word);
    if actual != expected {
        warn!(
            "SGP30: checksum mismatch on {:?}: expected {:#04x}, got {:#04x}",
            reg, expected, actual
        );
        return Err(Error::Crc {
            reg,
            expected,
            actual,
        });
    }
    Ok(u16::from_be_bytes(word))
}

impl<I2C, D, ENV, E> PeriodicSensor for Sgp30<I2C, D, ENV>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
    ENV: Environmental,
    E: core::fmt::Debug,
{
    fn name(&self) -> &'static str {
        "SGP30"
    }

    async fn tick(&mut self) {
        if let Err(e) = self.read().await {
            warn!("SGP30: measurement cycle skipped: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AirQuality;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    const ADDR: u8 = 0x58;

    fn word_with_crc(value: u16) -> [u8; 3] {
        let be = value.to_be_bytes();
        [be[0], be[1], crc8(&be)]
    }

    fn setup_transactions(feature_word: u16, self_test_status: u16) -> Vec<Transaction> {
        let fs = word_with_crc(feature_word);
        let st = word_with_crc(self_test_status);
        vec![
            Transaction::write(ADDR, vec![0x20, 0x2F]),
            Transaction::read(ADDR, fs.to_vec()),
            Transaction::write(ADDR, vec![0x20, 0x03]),
            Transaction::write(ADDR, vec![0x20, 0x32]),
            Transaction::read(ADDR, st.to_vec()),
        ]
    }

    fn measurement_reply(co2_eq_ppm: u16, tvoc_ppb: u16) -> Vec<u8> {
        let mut reply = word_with_crc(co2_eq_ppm).to_vec();
        reply.extend_from_slice(&word_with_crc(tvoc_ppb));
        reply
    }

    /// Transactions for one full measurement cycle against the default
    /// 25 °C / 50 %RH side channel.
    fn cycle_transactions(co2_eq_ppm: u16, tvoc_ppb: u16) -> Vec<Transaction> {
        let mg_m3 = (humidity::absolute_fast(50.0, 25.0) * 1000.0) as u32;
        let ticks = ((u64::from(mg_m3) * 16_777) >> 16) as u16;
        let hum = ticks.to_be_bytes();
        vec![
            Transaction::write(ADDR, vec![0x20, 0x61, hum[0], hum[1], crc8(&hum)]),
            Transaction::write(ADDR, vec![0x20, 0x08]),
            Transaction::read(ADDR, measurement_reply(co2_eq_ppm, tvoc_ppb)),
            Transaction::write(ADDR, vec![0x20, 0x15]),
            Transaction::read(ADDR, measurement_reply(0x0100, 0x0200)),
        ]
    }

    #[test]
    fn setup_reaches_ready_and_caches_version() {
        let mut i2c = I2cMock::new(&setup_transactions(0x0022, 0xD400));
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        block_on(sensor.setup()).unwrap();
        assert_eq!(sensor.state(), State::Ready);
        assert_eq!(sensor.version(), 0x22);
        i2c.done();
    }

    #[test]
    fn setup_rejects_wrong_product_type() {
        let fs = word_with_crc(0x0122);
        let mut i2c = I2cMock::new(&[
            Transaction::write(ADDR, vec![0x20, 0x2F]),
            Transaction::read(ADDR, fs.to_vec()),
        ]);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        assert_eq!(block_on(sensor.setup()), Err(Error::WrongProductType(1)));
        assert_eq!(sensor.state(), State::Failed);
        i2c.done();
    }

    #[test]
    fn setup_rejects_unsupported_version() {
        let fs = word_with_crc(0x001F);
        let mut i2c = I2cMock::new(&[
            Transaction::write(ADDR, vec![0x20, 0x2F]),
            Transaction::read(ADDR, fs.to_vec()),
        ]);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        assert_eq!(
            block_on(sensor.setup()),
            Err(Error::UnsupportedVersion(0x1F))
        );
        assert_eq!(sensor.state(), State::Failed);
        i2c.done();
    }

    #[test]
    fn failed_self_test_is_terminal() {
        let mut i2c = I2cMock::new(&setup_transactions(0x0022, 0x4B00));
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        assert_eq!(block_on(sensor.setup()), Err(Error::SelfTestFailed(0x4B00)));
        assert_eq!(sensor.state(), State::Failed);

        // no recovery out of Failed, and no reads either
        assert_eq!(block_on(sensor.setup()), Err(Error::NotReady));
        assert_eq!(block_on(sensor.read()), Err(Error::NotReady));
        assert_eq!(sensor.side().voc_index, None);
        i2c.done();
    }

    #[test]
    fn read_requires_setup() {
        let mut i2c = I2cMock::new(&[]);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        assert_eq!(block_on(sensor.read()), Err(Error::NotReady));
        i2c.done();
    }

    #[test]
    fn measurement_cycle_publishes_derived_output() {
        let mut transactions = setup_transactions(0x0022, 0xD400);
        transactions.extend(cycle_transactions(400, 125));
        let mut i2c = I2cMock::new(&transactions);

        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        block_on(sensor.setup()).unwrap();
        block_on(sensor.read()).unwrap();

        assert_eq!(sensor.side().voc_raw, VocRaw::new(125));
        let index = sensor.side().voc_index.expect("index published").value();
        let expected = 100.0 * ((110.0 / 24.4) * 125.0) / 300.0;
        assert!((index - expected).abs() < 1e-3, "got {index}, expected {expected}");
        i2c.done();
    }

    #[test]
    fn corrupted_reply_leaves_output_unchanged() {
        let mut transactions = setup_transactions(0x0022, 0xD400);
        // first cycle publishes a good value
        transactions.extend(cycle_transactions(400, 125));
        // second cycle: TVOC word checksum corrupted
        let mg_m3 = (humidity::absolute_fast(50.0, 25.0) * 1000.0) as u32;
        let ticks = ((u64::from(mg_m3) * 16_777) >> 16) as u16;
        let hum = ticks.to_be_bytes();
        let mut bad_reply = measurement_reply(400, 9_999);
        bad_reply[5] ^= 0xFF;
        transactions.push(Transaction::write(
            ADDR,
            vec![0x20, 0x61, hum[0], hum[1], crc8(&hum)],
        ));
        transactions.push(Transaction::write(ADDR, vec![0x20, 0x08]));
        transactions.push(Transaction::read(ADDR, bad_reply));

        let mut i2c = I2cMock::new(&transactions);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        block_on(sensor.setup()).unwrap();
        block_on(sensor.read()).unwrap();
        let published = *sensor.side();

        assert!(matches!(block_on(sensor.read()), Err(Error::Crc { .. })));
        assert_eq!(*sensor.side(), published, "stale output must survive a bad cycle");
        assert_eq!(sensor.state(), State::Ready);
        i2c.done();
    }

    #[test]
    fn humidity_compensation_clamps_at_device_maximum() {
        // 256 000 mg/m³ scales to full-range ticks
        let mut i2c = I2cMock::new(&[Transaction::write(
            ADDR,
            vec![0x20, 0x61, 0xFF, 0xFF, crc8(&[0xFF, 0xFF])],
        )]);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        block_on(sensor.humidity_absolute_set(400_000)).unwrap();
        i2c.done();
    }

    #[test]
    fn baseline_set_reverses_field_order() {
        let tvoc = 4040u16.to_be_bytes();
        let co2 = 215u16.to_be_bytes();
        let mut i2c = I2cMock::new(&[Transaction::write(
            ADDR,
            vec![
                0x20, 0x1E, tvoc[0], tvoc[1], crc8(&tvoc), co2[0], co2[1], crc8(&co2),
            ],
        )]);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        block_on(sensor.baseline_set(Measurement {
            co2_eq_ppm: 215,
            tvoc_ppb: 4040,
        }))
        .unwrap();
        i2c.done();
    }

    #[test]
    fn serial_id_assembles_three_words() {
        let mut reply = word_with_crc(0x0123).to_vec();
        reply.extend_from_slice(&word_with_crc(0x4567));
        reply.extend_from_slice(&word_with_crc(0x89AB));
        let mut i2c = I2cMock::new(&[
            Transaction::write(ADDR, vec![0x36, 0x82]),
            Transaction::read(ADDR, reply),
        ]);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        assert_eq!(block_on(sensor.serial_id()).unwrap(), 0x0123_4567_89AB);
        i2c.done();
    }

    #[test]
    fn index_derivation_scales_against_clean_indoor_reference() {
        assert_eq!(voc_index_from_ppb(0).value(), 0.0);

        // ~67 ppb is the 300 µg/m³ clean-indoor reference concentration
        let near_reference = voc_index_from_ppb(67).value();
        assert!((near_reference - 100.0).abs() < 1.0, "got {near_reference}");

        // far out of range clamps instead of producing nonsense
        assert_eq!(voc_index_from_ppb(u16::MAX).value(), 500.0);
    }

    #[test]
    fn tick_swallows_bus_faults() {
        let mut transactions = setup_transactions(0x0022, 0xD400);
        let mg_m3 = (humidity::absolute_fast(50.0, 25.0) * 1000.0) as u32;
        let ticks = ((u64::from(mg_m3) * 16_777) >> 16) as u16;
        let hum = ticks.to_be_bytes();
        transactions.push(
            Transaction::write(ADDR, vec![0x20, 0x61, hum[0], hum[1], crc8(&hum)])
                .with_error(embedded_hal_async::i2c::ErrorKind::Other),
        );

        let mut i2c = I2cMock::new(&transactions);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        block_on(sensor.setup()).unwrap();
        // the cycle aborts, gets logged, and the sensor stays Ready
        block_on(sensor.tick());
        assert_eq!(sensor.state(), State::Ready);
        assert_eq!(sensor.side().voc_index, None);
        i2c.done();
    }

    #[test]
    fn tick_swallows_transient_faults() {
        let mut i2c = I2cMock::new(&[]);
        let mut sensor = Sgp30::new(i2c.clone(), NoopDelay, AirQuality::default());
        assert_eq!(sensor.name(), "SGP30");
        // not Ready: the cycle fails, tick logs and returns
        block_on(sensor.tick());
        assert_eq!(sensor.side().voc_index, None);
        i2c.done();
    }
}
