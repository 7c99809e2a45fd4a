//! Byte-level channel I/O over the serial medium (spec §4.3). No framing
//! logic lives here — just opening/configuring the port and exposing
//! `read_exact`/`write` plus the ACK/NACK single-byte signals.

use std::io::{Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::Result;

/// Positive acknowledgement byte.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement byte.
pub const NACK: u8 = 0x15;

/// Serial port configuration, mirroring the reference driver's
/// `serial_settings` dictionary. Defaults to 9600 8-N-1. `serialport`
/// exposes a single combined read/write timeout on the open port, so there
/// is only one `timeout` field here rather than separate read/write ones.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// A thin adapter over any full-duplex byte stream. Generic over `T` so it
/// wraps a real `serialport::SerialPort` in production and an in-memory
/// duplex double in tests.
pub struct Channel<T: Read + Write> {
    inner: T,
}

impl<T: Read + Write> Channel<T> {
    pub fn new(inner: T) -> Self {
        Channel { inner }
    }

    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        debug!(target: "c1218::connection::io", "read {n} bytes");
        Ok(buf)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        debug!(target: "c1218::connection::io", "wrote {} bytes", bytes.len());
        Ok(())
    }

    pub fn write_ack(&mut self) -> Result<()> {
        self.write(&[ACK])
    }

    pub fn write_nack(&mut self) -> Result<()> {
        self.write(&[NACK])
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

/// Opens a real serial device by path, applies `settings`, and asserts RTS
/// while de-asserting DTR — matching the reference driver's
/// `setRTS(True)` / `setDTR(False)` sequence at open.
pub fn open(device: &str, settings: &SerialSettings) -> Result<Channel<Box<dyn SerialPort>>> {
    let mut port = serialport::new(device, settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .flow_control(settings.flow_control)
        .timeout(settings.timeout)
        .open()?;

    port.write_request_to_send(true)?;
    port.write_data_terminal_ready(false)?;
    debug!(target: "c1218::connection", "opened serial device: {device}");

    Ok(Channel::new(port))
}


#[cfg(test)]
mod tests {
    use super::test_support::DuplexStub;
    use super::*;

    #[test]
    fn read_exact_and_write_round_trip() {
        let stub = DuplexStub::new(vec![0xAA, 0xBB, 0xCC]);
        let mut channel = Channel::new(stub);
        assert_eq!(channel.read_exact(3).unwrap(), vec![0xAA, 0xBB, 0xCC]);
        channel.write(&[ACK]).unwrap();
        assert_eq!(channel.get_mut().written, vec![ACK]);
    }
}
