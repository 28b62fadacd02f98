//! Absolute-humidity approximation used for sensor compensation.

use libm::expf;

/// Absolute humidity in g/m³ from relative humidity (%RH) and temperature
/// (°C), using the single-precision Magnus-form approximation: good to a
/// few percent across the sensor's operating range, and much cheaper than
/// a full psychrometric calculation.
pub fn absolute_fast(rel_humidity: f32, temperature: f32) -> f32 {
    // saturation vapor pressure, hPa
    let svp = 6.112 * expf((17.62 * temperature) / (243.12 + temperature));
    216.7 * ((rel_humidity / 100.0) * svp / (273.15 + temperature))
}
