//! Attribute bridge: marshals reads of the derived air-quality values for
//! a BLE attribute server. Pure marshaling, no business logic; the bridge
//! only touches already-published state and never blocks.

use log::warn;

use crate::types::AirQuality;

/// Attribute-protocol error codes (the subset this service reports).
pub const ATT_ERROR_INVALID_HANDLE: u8 = 0x01;
pub const ATT_ERROR_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const ATT_ERROR_INVALID_OFFSET: u8 = 0x07;
pub const ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0D;

/// Attribute handles served by this bridge.
pub const ATTR_VOC_INDEX: u16 = 0x0101;
pub const ATTR_VOC_RAW: u16 = 0x0102;

/// Connection handle, as handed over by the attribute server.
pub type ConnectionHandle = u16;

/// Serve an attribute read from the published state.
///
/// Returns the number of bytes written into `buffer`, or an attribute
/// error code. Values not yet published serialize as the not-known
/// sentinel 0xFFFF.
pub fn attr_read(
    _conn: ConnectionHandle,
    attr: u16,
    offset: u16,
    buffer: &mut [u8],
    state: &AirQuality,
) -> Result<usize, u8> {
    let value: [u8; 2] = match attr {
        ATTR_VOC_INDEX => match state.voc_index {
            Some(index) => index.to_le_bytes(),
            None => [0xFF, 0xFF],
        },
        ATTR_VOC_RAW => state.voc_raw.to_le_bytes(),
        _ => {
            warn!("attr_read: unhandled attr {:#06x}", attr);
            return Err(ATT_ERROR_INVALID_HANDLE);
        }
    };

    let offset = usize::from(offset);
    if offset > value.len() {
        return Err(ATT_ERROR_INVALID_OFFSET);
    }
    let remainder = &value[offset..];
    if buffer.len() < remainder.len() {
        return Err(ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH);
    }
    buffer[..remainder.len()].copy_from_slice(remainder);
    Ok(remainder.len())
}

/// Handle an attribute write. The derived values are read-only, so any
/// write to a recognized handle is rejected with write-not-permitted.
pub fn attr_write(
    _conn: ConnectionHandle,
    attr: u16,
    offset: u16,
    buffer: &[u8],
) -> Result<(), u8> {
    if usize::from(offset) > buffer.len() {
        return Err(ATT_ERROR_INVALID_OFFSET);
    }
    match attr {
        ATTR_VOC_INDEX | ATTR_VOC_RAW => Err(ATT_ERROR_WRITE_NOT_PERMITTED),
        _ => {
            warn!("attr_write: unhandled attr {:#06x}", attr);
            Err(ATT_ERROR_INVALID_HANDLE)
        }
    }
}
