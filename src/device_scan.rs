// Serial device listing, filtering and resolution
//
// Enumerates serial ports through the serialport crate, keeps a short-lived
// snapshot of the listing, matches ports against attribute filters given on
// the command line and resolves a device path for the console.

use once_cell::sync::Lazy;
use regex::Regex;
use serialport::{SerialPortInfo, SerialPortType};
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::io::DeviceError;

// ============================================================================
// Constants
// ============================================================================

/// How long a port listing snapshot stays valid
pub const PORT_CACHE_TTL: Duration = Duration::from_millis(500);

/// USB interface number at the end of a location, e.g. `1-1.2:1.3` -> 3
static IFNO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r":.*\.(\d+)$").unwrap());

/// One `name=value` (or `name==value`) term of a filter expression
static KV_FILTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<name>\w+)={1,2}(?P<value>[^=&\s]+)$").unwrap());

/// Filter fields with their descriptions, in help order
const FILTER_FIELDS: &[(&str, &str)] = &[
    ("vid", "vendor id"),
    ("pid", "product id"),
    ("serial_number", "unique serial port number (note: it may absent)"),
    ("ifno", "usb device interface number if it contains multiple interfaces"),
    ("port", "explicit serial device path"),
];

// ============================================================================
// Types
// ============================================================================

/// A serial port as seen in the live device listing
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PortRecord {
    pub device: String,
    pub description: String,
    pub hwid: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    /// Bus location, e.g. `1-1.2:1.0` (Linux sysfs)
    pub location: Option<String>,
    /// USB interface number, for composite devices
    pub interface_number: Option<u32>,
}

impl PortRecord {
    fn from_serialport(info: SerialPortInfo) -> Self {
        let location = sysfs_location(&info.port_name);
        let interface_number = location.as_deref().and_then(parse_interface_number);

        let mut record = PortRecord {
            device: info.port_name,
            description: "n/a".to_string(),
            hwid: "n/a".to_string(),
            location,
            interface_number,
            ..PortRecord::default()
        };

        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                record.description = usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_else(|| "n/a".to_string());
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(ref sn) = usb.serial_number {
                    hwid.push_str(&format!(" SER={}", sn));
                }
                if let Some(ref loc) = record.location {
                    hwid.push_str(&format!(" LOCATION={}", loc));
                }
                record.hwid = hwid;
                record.vid = Some(usb.vid);
                record.pid = Some(usb.pid);
                record.serial_number = usb.serial_number;
            }
            SerialPortType::PciPort => {
                record.description = "PCI".to_string();
                record.hwid = "PCI".to_string();
            }
            SerialPortType::BluetoothPort => {
                record.description = "Bluetooth".to_string();
                record.hwid = "Bluetooth".to_string();
            }
            SerialPortType::Unknown => {}
        }

        record
    }

    /// Ports without location or USB identity are usually phantom entries
    pub fn is_known(&self) -> bool {
        self.location.is_some() || self.vid.is_some()
    }

    /// `device; description; hwid (ifno = N)`
    pub fn description_line(&self) -> String {
        let ifno = match self.interface_number {
            Some(n) => format!(" (ifno = {})", n),
            None => String::new(),
        };
        format!("{}; {}; {}{}", self.device, self.description, self.hwid, ifno)
    }
}

/// Extract the USB interface number from a bus location string.
pub fn parse_interface_number(location: &str) -> Option<u32> {
    IFNO_RE
        .captures(location)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Bus location of a tty from sysfs (`/sys/class/tty/<name>/device` link)
#[cfg(target_os = "linux")]
fn sysfs_location(device: &str) -> Option<String> {
    let name = std::path::Path::new(device).file_name()?.to_str()?;
    let link = std::fs::read_link(format!("/sys/class/tty/{}/device", name)).ok()?;
    link.file_name()?.to_str().map(|s| s.to_string())
}

#[cfg(not(target_os = "linux"))]
fn sysfs_location(_device: &str) -> Option<String> {
    None
}

// ============================================================================
// Listing
// ============================================================================

/// Enumerate every serial port the platform reports.
///
/// On macOS only `/dev/cu.*` devices are kept; the `/dev/tty.*` twins block
/// on open waiting for carrier detect.
pub fn scan_ports() -> Result<Vec<PortRecord>, DeviceError> {
    let ports = serialport::available_ports().map_err(|e| DeviceError::Enumerate(e.to_string()))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(PortRecord::from_serialport)
        .collect())
}

/// Memoised snapshot of the port listing with a fixed time-to-live
pub struct PortCache {
    ttl: Duration,
    snapshot: Mutex<Option<(Instant, Vec<PortRecord>)>>,
}

impl PortCache {
    pub fn new(ttl: Duration) -> Self {
        PortCache {
            ttl,
            snapshot: Mutex::new(None),
        }
    }

    /// Return the cached listing, or refresh it with `scan` when stale.
    pub fn get_or_scan<F>(&self, scan: F) -> Result<Vec<PortRecord>, DeviceError>
    where
        F: FnOnce() -> Result<Vec<PortRecord>, DeviceError>,
    {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|e| DeviceError::Enumerate(format!("port cache poisoned: {}", e)))?;

        if let Some((taken_at, ref ports)) = *guard {
            if taken_at.elapsed() < self.ttl {
                return Ok(ports.clone());
            }
        }

        let ports = scan()?;
        *guard = Some((Instant::now(), ports.clone()));
        Ok(ports)
    }
}

impl Default for PortCache {
    fn default() -> Self {
        PortCache::new(PORT_CACHE_TTL)
    }
}

/// Validate that `port` names a live serial device, resolving aliases to the
/// canonical path where the platform supports it.
pub fn check_device<'a>(port: &str, ports: &'a [PortRecord]) -> Result<&'a PortRecord, DeviceError> {
    if let Some(found) = ports.iter().find(|p| p.device == port) {
        return Ok(found);
    }
    if let Some(canonical) = canonical_port_form(port) {
        if let Some(found) = ports.iter().find(|p| p.device == canonical) {
            return Ok(found);
        }
    }
    Err(DeviceError::NotSerialDevice(port.to_string()))
}

#[cfg(target_os = "linux")]
fn canonical_port_form(port: &str) -> Option<String> {
    std::fs::canonicalize(port)
        .ok()
        .and_then(|p| p.to_str().map(|s| s.to_string()))
}

#[cfg(not(target_os = "linux"))]
fn canonical_port_form(_port: &str) -> Option<String> {
    None
}

/// Human description of a device for the connect banner
pub fn describe_device(port: &str, ports: &[PortRecord]) -> String {
    ports
        .iter()
        .find(|p| p.device == port)
        .map(|p| p.description.clone())
        .unwrap_or_else(|| "n/a".to_string())
}

/// One `- description` line per port
pub fn format_comports(ports: &[PortRecord]) -> String {
    ports
        .iter()
        .map(|p| format!("- {}", p.description_line()))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("Invalid filter expression \"{term}\" in \"{expr}\"")]
    InvalidExpression { term: String, expr: String },

    #[error("Unknown filter field \"{0}\"")]
    UnknownField(String),

    #[error("Invalid value \"{value}\" of field \"{field}\"")]
    InvalidValue { field: String, value: String },
}

/// Attribute filter over port records. Set fields must all match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortFilter {
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub ifno: Option<u32>,
    pub port: Option<String>,
}

impl PortFilter {
    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FilterError> {
        let invalid = || FilterError::InvalidValue {
            field: name.to_string(),
            value: value.to_string(),
        };
        match name.to_lowercase().as_str() {
            "vid" => self.vid = Some(u16::from_str_radix(value, 16).map_err(|_| invalid())?),
            "pid" => self.pid = Some(u16::from_str_radix(value, 16).map_err(|_| invalid())?),
            "serial_number" => self.serial_number = Some(value.to_string()),
            "ifno" => self.ifno = Some(value.parse().map_err(|_| invalid())?),
            "port" => self.port = Some(value.to_string()),
            other => return Err(FilterError::UnknownField(other.to_string())),
        }
        Ok(())
    }

    fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self, FilterError> {
        let mut filter = PortFilter::default();
        for (name, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(FilterError::InvalidValue {
                        field: name.clone(),
                        value: other.to_string(),
                    })
                }
            };
            filter.set_field(name, &text)?;
        }
        Ok(filter)
    }

    pub fn matches(&self, port: &PortRecord) -> bool {
        (self.vid.is_none() || self.vid == port.vid)
            && (self.pid.is_none() || self.pid == port.pid)
            && (self.serial_number.is_none() || self.serial_number == port.serial_number)
            && (self.ifno.is_none() || self.ifno == port.interface_number)
            && (self.port.is_none() || self.port.as_deref() == Some(port.device.as_str()))
    }

    fn describe(&self) -> String {
        let mut terms = Vec::new();
        if let Some(vid) = self.vid {
            terms.push(format!("vid == {:04X}", vid));
        }
        if let Some(pid) = self.pid {
            terms.push(format!("pid == {:04X}", pid));
        }
        if let Some(ref sn) = self.serial_number {
            terms.push(format!("serial_number == {}", sn));
        }
        if let Some(ifno) = self.ifno {
            terms.push(format!("ifno == {}", ifno));
        }
        if let Some(ref port) = self.port {
            terms.push(format!("port == {}", port));
        }
        format!("({})", terms.join(" and "))
    }
}

impl FromStr for PortFilter {
    type Err = FilterError;

    /// Either a JSON object `{"vid": "0483"}` or `k1=v1&&k2=v2`.
    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(expr) {
            return PortFilter::from_json(&map);
        }

        let mut filter = PortFilter::default();
        for term in expr.trim().split("&&") {
            let caps = KV_FILTER_RE
                .captures(term)
                .ok_or_else(|| FilterError::InvalidExpression {
                    term: term.to_string(),
                    expr: expr.to_string(),
                })?;
            filter.set_field(&caps["name"], &caps["value"])?;
        }
        Ok(filter)
    }
}

/// Help text for the `--filter` option
pub fn filter_help() -> String {
    let mut lines = vec![
        "Filter represent json object {\"k1\": \"v1\", \"k2\": \"v2\", ... } or string k1=v1&&k2=v2&&... with the following fields:".to_string(),
    ];
    for (name, description) in FILTER_FIELDS {
        lines.push(format!("- {} - {};", name, description));
    }
    lines.push("Filter can be specified multiple times to match device against any one.".to_string());
    lines.join("\n")
}

// ============================================================================
// Resolution
// ============================================================================

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No ports found with {filters}\nAvailable serial ports:\n{available}")]
    NoMatch { filters: String, available: String },

    #[error("Multiple com ports are found with {filters}\nFound serial ports:\n{found}")]
    Ambiguous { filters: String, found: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Failed to read port choice: {0}")]
    Input(#[from] std::io::Error),
}

/// Searches the port listing with a set of OR-ed filters
pub struct PortSearcher {
    filters: Vec<PortFilter>,
    no_input: bool,
    cache: PortCache,
}

impl PortSearcher {
    /// No filters means every port matches.
    pub fn new(filters: Vec<PortFilter>, no_input: bool) -> Self {
        let filters = if filters.is_empty() {
            vec![PortFilter::default()]
        } else {
            filters
        };
        PortSearcher {
            filters,
            no_input,
            cache: PortCache::default(),
        }
    }

    /// Parse filter expressions as given on the command line.
    pub fn from_expressions(exprs: &[String], no_input: bool) -> Result<Self, FilterError> {
        let filters = exprs
            .iter()
            .map(|e| e.parse())
            .collect::<Result<Vec<PortFilter>, _>>()?;
        Ok(PortSearcher::new(filters, no_input))
    }

    /// Known ports from the cached listing
    pub fn list_comports(&self) -> Result<Vec<PortRecord>, DeviceError> {
        let ports = self.cache.get_or_scan(scan_ports)?;
        Ok(ports.into_iter().filter(PortRecord::is_known).collect())
    }

    pub fn filter_ports(&self, ports: &[PortRecord]) -> Vec<PortRecord> {
        ports
            .iter()
            .filter(|p| self.filters.iter().any(|f| f.matches(p)))
            .cloned()
            .collect()
    }

    pub fn list_filtered_ports(&self) -> Result<Vec<PortRecord>, DeviceError> {
        Ok(self.filter_ports(&self.list_comports()?))
    }

    fn describe_filters(&self) -> String {
        let parts: Vec<String> = self.filters.iter().map(PortFilter::describe).collect();
        format!("serial filters {}", parts.join(" or "))
    }

    /// Resolve the single matching device path, asking on stdin when several
    /// ports match and interactive input is allowed.
    pub fn resolve(&self) -> Result<String, ResolveError> {
        let ports = self.list_comports()?;
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.resolve_from(&ports, &mut stdin.lock(), &mut stdout.lock())
    }

    pub fn resolve_from(
        &self,
        ports: &[PortRecord],
        input: &mut impl BufRead,
        out: &mut impl Write,
    ) -> Result<String, ResolveError> {
        let matched = self.filter_ports(ports);

        match matched.len() {
            0 => Err(ResolveError::NoMatch {
                filters: self.describe_filters(),
                available: format_comports(ports),
            }),
            1 => Ok(matched[0].device.clone()),
            _ if self.no_input => Err(ResolveError::Ambiguous {
                filters: self.describe_filters(),
                found: format_comports(&matched),
            }),
            _ => choose_port(&matched, input, out),
        }
    }
}

/// Numbered interactive choice between several matching ports.
fn choose_port(
    ports: &[PortRecord],
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<String, ResolveError> {
    writeln!(out, "Found {} serial ports", ports.len())?;
    for (i, port) in ports.iter().enumerate() {
        writeln!(out, "{} - {}", i + 1, port.description_line())?;
    }

    loop {
        write!(out, "Please enter a port number [1-{}]: ", ports.len())?;
        out.flush()?;

        let mut choice = String::new();
        if input.read_line(&mut choice)? == 0 {
            return Err(ResolveError::Input(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no port selected",
            )));
        }
        let choice = choice.trim();
        match choice.parse::<usize>() {
            Ok(n) if n >= 1 && n <= ports.len() => return Ok(ports[n - 1].device.clone()),
            _ => writeln!(out, "Invalid input \"{}\"!", choice)?,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn usb_port(device: &str, vid: u16, pid: u16, sn: Option<&str>, location: &str) -> PortRecord {
        PortRecord {
            device: device.to_string(),
            description: "STM32 Virtual ComPort".to_string(),
            hwid: format!("USB VID:PID={:04X}:{:04X}", vid, pid),
            vid: Some(vid),
            pid: Some(pid),
            serial_number: sn.map(|s| s.to_string()),
            location: Some(location.to_string()),
            interface_number: parse_interface_number(location),
        }
    }

    fn sample_ports() -> Vec<PortRecord> {
        vec![
            usb_port("/dev/ttyACM0", 0x0483, 0x5740, Some("A1"), "1-1.2:1.0"),
            usb_port("/dev/ttyACM1", 0x0483, 0x374B, Some("B2"), "1-1.3:1.2"),
            usb_port("/dev/ttyUSB0", 0x0403, 0x6001, None, "1-1.4:1.0"),
        ]
    }

    #[test]
    fn test_parse_interface_number() {
        assert_eq!(parse_interface_number("1-1.2:1.0"), Some(0));
        assert_eq!(parse_interface_number("1-1.3:1.12"), Some(12));
        assert_eq!(parse_interface_number("1-1.3"), None);
    }

    #[test]
    fn test_description_line() {
        let port = usb_port("/dev/ttyACM1", 0x0483, 0x374B, None, "1-1.3:1.2");
        assert_eq!(
            port.description_line(),
            "/dev/ttyACM1; STM32 Virtual ComPort; USB VID:PID=0483:374B (ifno = 2)"
        );
    }

    #[test]
    fn test_parse_kv_filter() {
        let filter: PortFilter = "vid=0483&&pid==374b&&ifno=2".parse().unwrap();
        assert_eq!(filter.vid, Some(0x0483));
        assert_eq!(filter.pid, Some(0x374B));
        assert_eq!(filter.ifno, Some(2));
        assert_eq!(filter.serial_number, None);

        let filter: PortFilter = "port=/dev/ttyACM0".parse().unwrap();
        assert_eq!(filter.port.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_parse_json_filter() {
        let filter: PortFilter = r#"{"serial_number": "A1", "port": "/dev/ttyACM0"}"#
            .parse()
            .unwrap();
        assert_eq!(filter.serial_number.as_deref(), Some("A1"));
        assert_eq!(filter.port.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_filter_errors() {
        assert_eq!(
            "colour=red".parse::<PortFilter>(),
            Err(FilterError::UnknownField("colour".to_string()))
        );
        assert!(matches!(
            "vid=xyz".parse::<PortFilter>(),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            "vid".parse::<PortFilter>(),
            Err(FilterError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_filters_are_ored() {
        let searcher = PortSearcher::from_expressions(
            &["serial_number=A1".to_string(), "vid=0403".to_string()],
            true,
        )
        .unwrap();
        let matched = searcher.filter_ports(&sample_ports());
        let devices: Vec<&str> = matched.iter().map(|p| p.device.as_str()).collect();
        assert_eq!(devices, vec!["/dev/ttyACM0", "/dev/ttyUSB0"]);
    }

    #[test]
    fn test_resolve_single_match() {
        let searcher = PortSearcher::from_expressions(&["pid=374B".to_string()], true).unwrap();
        let mut input = std::io::Cursor::new(Vec::new());
        let mut out = Vec::new();
        let device = searcher.resolve_from(&sample_ports(), &mut input, &mut out).unwrap();
        assert_eq!(device, "/dev/ttyACM1");
    }

    #[test]
    fn test_resolve_no_match_lists_ports() {
        let searcher = PortSearcher::from_expressions(&["vid=1234".to_string()], true).unwrap();
        let mut input = std::io::Cursor::new(Vec::new());
        let mut out = Vec::new();
        let err = searcher
            .resolve_from(&sample_ports(), &mut input, &mut out)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No ports found with serial filters (vid == 1234)"));
        assert!(msg.contains("- /dev/ttyUSB0;"));
    }

    #[test]
    fn test_resolve_ambiguous_without_input() {
        let searcher = PortSearcher::from_expressions(&["vid=0483".to_string()], true).unwrap();
        let mut input = std::io::Cursor::new(Vec::new());
        let mut out = Vec::new();
        let err = searcher
            .resolve_from(&sample_ports(), &mut input, &mut out)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { .. }));
    }

    #[test]
    fn test_resolve_interactive_choice() {
        let searcher = PortSearcher::from_expressions(&["vid=0483".to_string()], false).unwrap();
        let mut input = std::io::Cursor::new(b"7\nabc\n2\n".to_vec());
        let mut out = Vec::new();
        let device = searcher
            .resolve_from(&sample_ports(), &mut input, &mut out)
            .unwrap();
        assert_eq!(device, "/dev/ttyACM1");

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Found 2 serial ports"));
        assert!(printed.contains("Invalid input \"7\"!"));
        assert!(printed.contains("Invalid input \"abc\"!"));
    }

    #[test]
    fn test_resolve_interactive_eof() {
        let searcher = PortSearcher::new(Vec::new(), false);
        let mut input = std::io::Cursor::new(Vec::new());
        let mut out = Vec::new();
        let err = searcher
            .resolve_from(&sample_ports(), &mut input, &mut out)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Input(_)));
    }

    #[test]
    fn test_check_device() {
        let ports = sample_ports();
        assert_eq!(
            check_device("/dev/ttyUSB0", &ports).unwrap().device,
            "/dev/ttyUSB0"
        );
        assert!(matches!(
            check_device("/dev/null", &ports),
            Err(DeviceError::NotSerialDevice(_))
        ));
    }

    #[test]
    fn test_describe_device() {
        let ports = sample_ports();
        assert_eq!(describe_device("/dev/ttyUSB0", &ports), "STM32 Virtual ComPort");
        assert_eq!(describe_device("/dev/ttyS9", &ports), "n/a");
    }

    #[test]
    fn test_port_cache_ttl() {
        let scans = Cell::new(0);
        let scan = || {
            scans.set(scans.get() + 1);
            Ok(sample_ports())
        };

        let cache = PortCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_scan(scan).unwrap().len(), 3);
        assert_eq!(cache.get_or_scan(scan).unwrap().len(), 3);
        assert_eq!(scans.get(), 1);

        let expired = PortCache::new(Duration::ZERO);
        expired.get_or_scan(scan).unwrap();
        expired.get_or_scan(scan).unwrap();
        assert_eq!(scans.get(), 3);
    }

    #[test]
    fn test_filter_help_lists_fields() {
        let help = filter_help();
        for (name, _) in FILTER_FIELDS {
            assert!(help.contains(&format!("- {} -", name)));
        }
    }
}
