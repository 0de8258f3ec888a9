//! System serial port backend for [`SerialLine`].

use std::io::{self, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::interface::SerialLine;

// Per-read timeout of the underlying port. Short enough that the protocol
// loops keep polling their retransmission timer between bytes.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A system serial port configured for 8N1 operation.
pub struct SystemSerial {
    port: Box<dyn SerialPort>,
}

impl SystemSerial {
    /// Open `device` at `baud`: 8 data bits, no parity, one stop bit, no
    /// flow control.
    pub fn open(device: &str, baud: u32) -> io::Result<Self> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;
        debug!(target: "serial", "opened {} at {} baud", device, baud);
        Ok(SystemSerial { port })
    }
}

impl SerialLine for SystemSerial {
    fn read_one(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }
}
