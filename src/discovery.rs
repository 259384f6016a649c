// Serial endpoint discovery
//
// Drives show up as USB serial adapters. Anything whose name looks like one
// is a candidate endpoint for the bus transport.

use serialport::{SerialPortInfo, SerialPortType};

/// Name fragments of USB serial adapters on Linux, macOS and Windows
const ADAPTER_NAME_MARKERS: [&str; 4] = ["ttyUSB", "ttyACM", "cu.usbserial", "COM"];

pub fn is_candidate_endpoint(port_name: &str) -> bool {
    ADAPTER_NAME_MARKERS
        .iter()
        .any(|marker| port_name.contains(marker))
}

fn is_candidate(info: &SerialPortInfo) -> bool {
    matches!(info.port_type, SerialPortType::UsbPort(_)) || is_candidate_endpoint(&info.port_name)
}

/// Candidate endpoints, sorted by name
pub fn list_candidate_endpoints() -> Result<Vec<String>, serialport::Error> {
    let mut names: Vec<String> = serialport::available_ports()?
        .into_iter()
        .filter(is_candidate)
        .map(|info| info.port_name)
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// One-line description of a port for listings
pub fn describe_port(info: &SerialPortInfo) -> String {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{} (usb {:04x}:{:04x} {})",
            info.port_name,
            usb.vid,
            usb.pid,
            usb.product.as_deref().unwrap_or("unknown product")
        ),
        SerialPortType::PciPort => format!("{} (pci)", info.port_name),
        SerialPortType::BluetoothPort => format!("{} (bluetooth)", info.port_name),
        SerialPortType::Unknown => info.port_name.clone(),
    }
}

/// All candidate ports with their descriptions
pub fn describe_candidates() -> Result<Vec<String>, serialport::Error> {
    Ok(serialport::available_ports()?
        .iter()
        .filter(|info| is_candidate(info))
        .map(describe_port)
        .collect())
}
