//! Serial port handling
//!
//! Low-level access to the gimbal controller's serial device: discovery,
//! opening and line configuration.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::LinkError;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key putting ttyACM* first, then ttyUSB*, then ttyTHS*/ttyS* and the
/// rest by name. Numeric suffixes sort numerically.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in ["ttyACM", "ttyUSB", "ttyTHS"].iter().enumerate() {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank as u8, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List candidate serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::warn!("serial port enumeration failed: {e}"),
    }

    // udev may not have announced the device yet; fall back to /dev
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if ["ttyACM", "ttyUSB", "ttyTHS"]
                    .iter()
                    .any(|p| fname.starts_with(p))
                {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port
///
/// `poll_timeout` is the per-read timeout of the underlying handle, not the
/// response timeout; reads are polled until the caller's deadline.
pub fn open_port(
    name: &str,
    baud_rate: u32,
    poll_timeout: Duration,
) -> Result<Box<dyn SerialPort>, LinkError> {
    serialport::new(name, baud_rate)
        .timeout(poll_timeout)
        .open()
        .map_err(|e| LinkError::PortUnavailable {
            port: name.to_string(),
            reason: e.to_string(),
        })
}

/// Configure a serial port as 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), LinkError> {
    let name = port.name().unwrap_or_default();
    let unavailable = |e: serialport::Error| LinkError::PortUnavailable {
        port: name.clone(),
        reason: e.to_string(),
    };

    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(unavailable)?;
    port.set_parity(serialport::Parity::None)
        .map_err(unavailable)?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(unavailable)?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(unavailable)?;

    // Some USB-serial bridges reset the MCU when DTR drops
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!(port = %name, "failed to set DTR high: {e} (continuing)");
    }
    if let Err(e) = port.write_request_to_send(true) {
        tracing::debug!(port = %name, "failed to set RTS high: {e} (continuing)");
    }

    Ok(())
}

/// Clear both serial buffers of a freshly opened port
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), LinkError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| LinkError::PortUnavailable {
            port: port.name().unwrap_or_default(),
            reason: format!("failed to clear buffers: {e}"),
        })
}
