#![cfg_attr(not(test), no_std)]

//! Driver core for the Sensirion SGP30 air-quality sensor.
//!
//! The SGP30 speaks a register-style protocol over I2C: every command is a
//! 16-bit code, every 16-bit data word travels big-endian followed by its
//! own CRC-8 byte, and every command has a documented settle window before
//! the reply is valid. This crate covers the wire protocol, the sensor
//! lifecycle (identify, initialize, self-test, periodic measure), the
//! humidity compensation and VOC index math, and a thin attribute bridge
//! for serving the derived values to a BLE attribute server.
//!
//! The driver is platform-agnostic: bus access goes through
//! [`embedded_hal_async::i2c::I2c`] and every hardware settle window goes
//! through [`embedded_hal_async::delay::DelayNs`], so waits suspend the
//! cooperative task instead of spinning. Exclusive bus access is the
//! caller's responsibility; the driver never holds internal locks.

pub mod gatt;
pub mod humidity;
pub mod protocol;
pub mod sensor;
pub mod types;
pub mod wire;

pub use protocol::{Error, Reg};
pub use sensor::{Sgp30, State};
pub use types::{AirQuality, Environmental, Measurement, PeriodicSensor, VocIndex, VocRaw};
