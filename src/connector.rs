//! Discovery of BattLab One instruments among the available serial ports.
//!
//! The instrument enumerates as an FTDI USB-serial bridge; it is recognized
//! by the FTDI vendor/product pair plus the `BB` serial-number prefix the
//! manufacturer programs into every unit.

use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, SerialPortType, StopBits};
use thiserror::Error;

use crate::session::{Session, SessionConfig, SessionError};

/// FTDI FT232R vendor id.
pub const USB_VID: u16 = 0x0403;
/// FTDI FT232R product id.
pub const USB_PID: u16 = 0x6001;
/// Serial-number prefix programmed into every BattLab One.
pub const SERIAL_NUMBER_PREFIX: &str = "BB";

/// Fixed line rate of the instrument.
pub const BAUD_RATE: u32 = 115_200;

// Must comfortably exceed worst-case firmware response latency.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A discovered BattLab One.
#[derive(Debug, Clone)]
pub struct BattLabDevice {
    /// Platform port name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub serial_number: String,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("no BattLab One found. Please connect one or specify the port manually")]
    DeviceNotFound,

    #[error("{count} BattLab Ones found, expected exactly one")]
    MultipleDevicesFound { count: usize },

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

pub struct BattLabConnector;

impl BattLabConnector {
    /// List every connected BattLab One.
    pub fn get_available_devices() -> Result<Vec<BattLabDevice>, ConnectorError> {
        let devices = serialport::available_ports()?
            .into_iter()
            .filter_map(|port| {
                let SerialPortType::UsbPort(usb) = port.port_type else {
                    return None;
                };
                let serial_number = usb.serial_number?;
                let matches = usb.vid == USB_VID
                    && usb.pid == USB_PID
                    && serial_number.starts_with(SERIAL_NUMBER_PREFIX);
                matches.then(|| BattLabDevice {
                    port: port.port_name,
                    serial_number,
                })
            })
            .collect();
        Ok(devices)
    }

    /// Connect to the single attached BattLab One with default config.
    pub fn connect() -> Result<Session<Box<dyn SerialPort>>, ConnectorError> {
        Self::connect_with(SessionConfig::default())
    }

    /// Connect to the single attached BattLab One.
    ///
    /// Zero and multiple matches are distinct failures: with more than one
    /// instrument attached the caller has to pick a port explicitly via
    /// [`Self::connect_port`].
    pub fn connect_with(
        config: SessionConfig,
    ) -> Result<Session<Box<dyn SerialPort>>, ConnectorError> {
        let devices = Self::get_available_devices()?;
        let device = match devices.as_slice() {
            [] => return Err(ConnectorError::DeviceNotFound),
            [device] => device,
            many => {
                return Err(ConnectorError::MultipleDevicesFound { count: many.len() });
            }
        };
        log::debug!(
            "found BattLab One {} at {}",
            device.serial_number,
            device.port
        );
        Self::connect_port(&device.port, config)
    }

    /// Connect to a BattLab One on a specific port.
    pub fn connect_port(
        port: &str,
        config: SessionConfig,
    ) -> Result<Session<Box<dyn SerialPort>>, ConnectorError> {
        let serial = serialport::new(port, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()?;
        serial.clear(serialport::ClearBuffer::All)?;

        Ok(Session::connect_with(serial, config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_only_reports_battlab_serials() {
        // Depends on what is actually plugged in; enumeration itself may
        // fail on hosts without serial support.
        match BattLabConnector::get_available_devices() {
            Ok(devices) => {
                for device in devices {
                    assert!(device.serial_number.starts_with(SERIAL_NUMBER_PREFIX));
                    assert!(!device.port.is_empty());
                }
            }
            Err(ConnectorError::Serial(_)) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
}
