use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use serialport::{ClearBuffer, SerialPort, SerialPortType};

use crate::consts::DEFAULT_TIMEOUT;
use crate::errors::{Result, ToolError};

const DISCOVERY_WINDOW: Duration = Duration::from_secs(10);
const DISCOVERY_POLL: Duration = Duration::from_millis(500);

/// Exclusive owner of one serial handle. Acquired for the duration of an
/// operation group and released on every exit path when dropped.
pub struct Transport {
    port: Box<dyn SerialPort>,
}

impl Transport {
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;
        Ok(Self { port })
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    /// Reads exactly `n` bytes within the current deadline.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; n];
        match self.port.read_exact(&mut buffer) {
            Ok(()) => Ok(buffer),
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::UnexpectedEof =>
            {
                Err(ToolError::TransportTimeout { expected: n })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops anything the device already queued for us.
    pub fn reset_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    /// Runs `f` with the read deadline overridden, restoring the previous
    /// deadline whether or not `f` succeeds.
    pub fn with_timeout<T>(
        &mut self,
        timeout: Duration,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = self.port.timeout();
        self.port.set_timeout(timeout)?;
        let result = f(self);
        let restored = self.port.set_timeout(previous);
        let value = result?;
        restored?;
        Ok(value)
    }
}

/// Polls the attached serial devices until one matches a (VID, PID) pair,
/// or, with no pairs given, until a device path looks like a CDC modem
/// (`com*`, `ttyACM*`, `ttyUSB*`, `usbmodem*`).
pub fn find_cdc_port(pairs: &[(u16, u16)], wait: Duration) -> Option<String> {
    let deadline = Instant::now() + wait;
    loop {
        let ports = serialport::available_ports().unwrap_or_default();
        for port in &ports {
            match &port.port_type {
                SerialPortType::UsbPort(usb) => {
                    if !pairs.is_empty() && !pairs.contains(&(usb.vid, usb.pid)) {
                        continue;
                    }
                    if pairs.is_empty() && !name_looks_like_cdc(&port.port_name) {
                        continue;
                    }
                    return Some(port.port_name.clone());
                }
                _ => {
                    if pairs.is_empty() && name_looks_like_cdc(&port.port_name) {
                        return Some(port.port_name.clone());
                    }
                }
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(DISCOVERY_POLL);
    }
}

fn name_looks_like_cdc(device: &str) -> bool {
    let name = device.rsplit('/').next().unwrap_or(device).to_lowercase();
    name.starts_with("com")
        || name.contains("ttyacm")
        || name.contains("ttyusb")
        || name.contains("usbmodem")
}

/// Discovery with status output, used by every stage that has no
/// explicit `--port`.
pub fn auto_detect_cdc_port(pairs: &[(u16, u16)]) -> Result<String> {
    if pairs.is_empty() {
        info!("Auto-detecting serial port...");
    } else {
        let formatted = pairs
            .iter()
            .map(|(vid, pid)| format!("VID:{:#06X}, PID:{:#06X}", vid, pid))
            .collect::<Vec<_>>()
            .join("; ");
        info!("Auto-detecting {} serial port...", formatted);
    }

    match find_cdc_port(pairs, DISCOVERY_WINDOW) {
        Some(port) => {
            info!("USB CDC port detected: {}", port);
            Ok(port)
        }
        None => Err(ToolError::DiscoveryFailure),
    }
}

#[test]
fn test_name_heuristic() {
    assert!(name_looks_like_cdc("/dev/ttyACM0"));
    assert!(name_looks_like_cdc("/dev/ttyUSB3"));
    assert!(name_looks_like_cdc("COM7"));
    assert!(name_looks_like_cdc("/dev/cu.usbmodem14201"));
    assert!(!name_looks_like_cdc("/dev/ttyS0"));
}
