//! Per-voltage-range calibration constants, fetched from the instrument once
//! per connection.
//!
//! The `get_calibration` response carries 17 big-endian u16 entries. Slots
//! 0–7 are sense-resistor scale factors (stored as value × 1000), slots 8–16
//! are raw sleep-current offsets. Which slot belongs to which voltage range
//! is fixed by the firmware and keyed here by the voltage command name.

use thiserror::Error;

/// Number of entries in the calibration table.
pub const CALIBRATION_ENTRIES: usize = 17;

/// Exact byte length of the `get_calibration` payload.
pub const CALIBRATION_PAYLOAD_LEN: usize = CALIBRATION_ENTRIES * 2;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration payload must be {CALIBRATION_PAYLOAD_LEN} bytes, got {actual}")]
    PayloadLength { actual: usize },

    #[error("no calibration slot mapped for command '{name}'")]
    UnknownKey { name: String },
}

/// The instrument's calibration table.
///
/// Immutable once parsed; lookups are pure and never touch session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationTable([u16; CALIBRATION_ENTRIES]);

/// Scale slot (0–7) for a voltage command.
///
/// 3v0 and 3v2 share slot 3: both ranges run through the same physical
/// sense resistor, so the firmware stores one calibration for the pair.
fn scale_slot(voltage_command: &str) -> Option<usize> {
    let slot = match voltage_command {
        "set_voltage_1v2" => 0,
        "set_voltage_1v5" => 1,
        "set_voltage_2v4" => 2,
        "set_voltage_3v0" | "set_voltage_3v2" => 3,
        "set_voltage_3v6" => 4,
        "set_voltage_3v7" => 5,
        "set_voltage_4v2" => 6,
        "set_voltage_4v5" => 7,
        _ => return None,
    };
    Some(slot)
}

/// Sleep-current offset slot (8–16) for a voltage command.
fn offset_slot(voltage_command: &str) -> Option<usize> {
    let slot = match voltage_command {
        "set_voltage_1v2" => 8,
        "set_voltage_1v5" => 9,
        "set_voltage_2v4" => 10,
        "set_voltage_3v0" => 11,
        "set_voltage_3v2" => 12,
        "set_voltage_3v6" => 13,
        "set_voltage_3v7" => 14,
        "set_voltage_4v2" => 15,
        "set_voltage_4v5" => 16,
        _ => return None,
    };
    Some(slot)
}

impl CalibrationTable {
    /// Parse the raw `get_calibration` payload.
    pub fn parse(payload: &[u8]) -> Result<Self, CalibrationError> {
        if payload.len() != CALIBRATION_PAYLOAD_LEN {
            return Err(CalibrationError::PayloadLength {
                actual: payload.len(),
            });
        }

        let mut entries = [0u16; CALIBRATION_ENTRIES];
        for (entry, pair) in entries.iter_mut().zip(payload.chunks_exact(2)) {
            *entry = u16::from_be_bytes([pair[0], pair[1]]);
        }
        Ok(Self(entries))
    }

    /// Raw table entries, in wire order.
    pub fn entries(&self) -> &[u16; CALIBRATION_ENTRIES] {
        &self.0
    }

    /// Dimensionless calibration adjustment factor for a voltage range.
    pub fn scale_for(&self, voltage_command: &str) -> Result<f64, CalibrationError> {
        let slot = scale_slot(voltage_command).ok_or_else(|| CalibrationError::UnknownKey {
            name: voltage_command.to_string(),
        })?;
        Ok(f64::from(self.0[slot]) / 1000.0)
    }

    /// Raw sleep-current offset for a voltage range.
    pub fn offset_for(&self, voltage_command: &str) -> Result<u16, CalibrationError> {
        let slot = offset_slot(voltage_command).ok_or_else(|| CalibrationError::UnknownKey {
            name: voltage_command.to_string(),
        })?;
        Ok(self.0[slot])
    }
}
