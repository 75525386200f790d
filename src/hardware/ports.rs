//! Serial port enumeration.

use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of one serial port as reported by the operating system.
///
/// Vendor and product ids are lowercase four-digit hex strings (`"1a2b"`), matching the
/// form used by the platform signature lists.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Device path (e.g., "/dev/ttyUSB0", "COM3")
    pub path: String,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB vendor id
    pub vendor_id: Option<String>,
    /// USB product id
    pub product_id: Option<String>,
    /// USB product string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// USB serial number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl PortDescriptor {
    /// A port with no hardware metadata.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            manufacturer: None,
            vendor_id: None,
            product_id: None,
            product: None,
            serial_number: None,
        }
    }

    /// Sets vendor and product id from their numeric USB values.
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vendor_id = Some(format!("{vid:04x}"));
        self.product_id = Some(format!("{pid:04x}"));
        self
    }

    /// Sets the USB manufacturer string.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Identity used to key cached classifications.
    pub fn identity(&self) -> PortIdentity {
        PortIdentity {
            path: self.path.clone(),
            vendor_id: self.vendor_id.clone(),
            product_id: self.product_id.clone(),
        }
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if let (Some(vid), Some(pid)) = (&self.vendor_id, &self.product_id) {
            write!(f, " [{vid}:{pid}]")?;
        }
        if let Some(manufacturer) = &self.manufacturer {
            write!(f, " ({manufacturer})")?;
        }
        Ok(())
    }
}

/// Cache key for a port: a replugged device with different ids is a different port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortIdentity {
    /// Device path
    pub path: String,
    /// USB vendor id
    pub vendor_id: Option<String>,
    /// USB product id
    pub product_id: Option<String>,
}

/// Lists the serial ports present on the host.
#[async_trait]
pub trait PortEnumerator: Send + Sync {
    /// Every serial port currently present.
    async fn list_ports(&self) -> RigResult<Vec<PortDescriptor>>;
}

/// Enumerates real ports through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortEnumerator;

#[async_trait]
impl PortEnumerator for SystemPortEnumerator {
    #[cfg(feature = "instrument_serial")]
    async fn list_ports(&self) -> RigResult<Vec<PortDescriptor>> {
        use serialport::SerialPortType;

        // udev/IOKit lookups block, keep them off the async workers
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| RigError::port_io("*", std::io::Error::other(e)))?
            .map_err(|e| RigError::port_io("*", e.into()))?;

        Ok(ports
            .into_iter()
            .map(|info| match info.port_type {
                SerialPortType::UsbPort(usb) => {
                    let mut port =
                        PortDescriptor::new(info.port_name).with_usb_ids(usb.vid, usb.pid);
                    port.manufacturer = usb.manufacturer;
                    port.product = usb.product;
                    port.serial_number = usb.serial_number;
                    port
                }
                _ => PortDescriptor::new(info.port_name),
            })
            .collect())
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn list_ports(&self) -> RigResult<Vec<PortDescriptor>> {
        Err(RigError::SerialFeatureDisabled)
    }
}

/// Returns a fixed port list. Used for tests and for pinning ports manually.
#[derive(Debug, Default, Clone)]
pub struct FixedPortEnumerator {
    ports: Vec<PortDescriptor>,
}

impl FixedPortEnumerator {
    /// Enumerator that always returns `ports`.
    pub fn new(ports: Vec<PortDescriptor>) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl PortEnumerator for FixedPortEnumerator {
    async fn list_ports(&self) -> RigResult<Vec<PortDescriptor>> {
        Ok(self.ports.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_ids_are_lower_hex() {
        let port = PortDescriptor::new("/dev/ttyACM0").with_usb_ids(0x1A2B, 0x0004);
        assert_eq!(port.vendor_id.as_deref(), Some("1a2b"));
        assert_eq!(port.product_id.as_deref(), Some("0004"));
    }

    #[test]
    fn test_identity_includes_ids() {
        let a = PortDescriptor::new("/dev/ttyUSB0").with_usb_ids(0x0403, 0x6001);
        let b = PortDescriptor::new("/dev/ttyUSB0").with_usb_ids(0x067b, 0x2303);
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity(), a.clone().identity());
    }

    #[test]
    fn test_display() {
        let port = PortDescriptor::new("COM3")
            .with_usb_ids(0x1546, 0x01a7)
            .with_manufacturer("u-blox AG");
        assert_eq!(port.to_string(), "COM3 [1546:01a7] (u-blox AG)");
    }
}
