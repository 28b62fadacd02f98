//! Derived-value types, the environmental side channel, and the seam the
//! periodic scheduler dispatches through.

/// Bounded VOC index: 0 is perfectly clean air, ~100 corresponds to the
/// clean-indoor-air reference concentration, hard-clamped to [0, 500] so
/// out-of-range inputs can never produce nonsensical output.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VocIndex(f32);

impl VocIndex {
    pub fn new(value: f32) -> Self {
        Self(value.clamp(0.0, 500.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Attribute wire form: unsigned 16-bit, little-endian.
    pub fn to_le_bytes(self) -> [u8; 2] {
        (self.0 as u16).to_le_bytes()
    }
}

/// Raw VOC concentration in parts per billion, capped at
/// [`VocRaw::NOT_KNOWN`] when the reading exceeds the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VocRaw(u16);

impl VocRaw {
    pub const NOT_KNOWN: VocRaw = VocRaw(u16::MAX);

    pub fn new(ppb: u32) -> Self {
        Self(ppb.min(u32::from(u16::MAX)) as u16)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// One measurement reply pair. On the wire both quantities are big-endian
/// words, each trailed by its own checksum byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    pub co2_eq_ppm: u16,
    pub tvoc_ppb: u16,
}

/// Environmental side channel: the ambient compensation inputs and the sink
/// the derived outputs are published to.
pub trait Environmental {
    /// Current ambient temperature, °C.
    fn compensation_temperature(&self) -> f32;
    /// Current ambient relative humidity, %RH.
    fn compensation_humidity(&self) -> f32;
    fn set_voc_index(&mut self, index: VocIndex);
    fn set_voc_raw(&mut self, raw: VocRaw);
}

impl<T: Environmental> Environmental for &mut T {
    fn compensation_temperature(&self) -> f32 {
        (**self).compensation_temperature()
    }

    fn compensation_humidity(&self) -> f32 {
        (**self).compensation_humidity()
    }

    fn set_voc_index(&mut self, index: VocIndex) {
        (**self).set_voc_index(index)
    }

    fn set_voc_raw(&mut self, raw: VocRaw) {
        (**self).set_voc_raw(raw)
    }
}

/// Published air-quality state: what the attribute bridge serves.
///
/// Until the first successful measurement cycle the derived values report
/// not-known, so nothing observable exists before self-test has passed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AirQuality {
    /// Ambient temperature used for compensation, °C.
    pub temperature: f32,
    /// Ambient relative humidity used for compensation, %RH.
    pub humidity: f32,
    pub voc_index: Option<VocIndex>,
    pub voc_raw: VocRaw,
}

impl Default for AirQuality {
    fn default() -> Self {
        // standard-condition fallbacks until a real T/RH source reports in
        Self {
            temperature: 25.0,
            humidity: 50.0,
            voc_index: None,
            voc_raw: VocRaw::NOT_KNOWN,
        }
    }
}

impl Environmental for AirQuality {
    fn compensation_temperature(&self) -> f32 {
        self.temperature
    }

    fn compensation_humidity(&self) -> f32 {
        self.humidity
    }

    fn set_voc_index(&mut self, index: VocIndex) {
        self.voc_index = Some(index);
    }

    fn set_voc_raw(&mut self, raw: VocRaw) {
        self.voc_raw = raw;
    }
}

/// Scheduler-facing capability set: a periodic sensor is set up once, then
/// polled on a fixed cadence. Each concrete sensor type owns its register
/// table and state machine; dispatch stays uniform for the scheduler.
#[allow(async_fn_in_trait)]
pub trait PeriodicSensor {
    fn name(&self) -> &'static str;
    /// One scheduling tick. Transient faults are logged, not propagated.
    async fn tick(&mut self);
}
