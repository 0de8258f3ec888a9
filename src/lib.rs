//! # SWP
//! A connection-oriented stop-and-wait data-link protocol over a raw serial
//! line, together with the file transfer application that drives it.
//!
//! Frames are delimited by a flag byte and byte-stuffed; the header carries
//! an XOR check (BCC1) and information frames carry a second XOR check over
//! the payload (BCC2). A session is established with a SET/UA handshake,
//! payloads travel in I-frames with a 1-bit alternating sequence number
//! acknowledged by RR/REJ supervisory frames, and the link is torn down with
//! a symmetric DISC/DISC/UA exchange. At most one frame is outstanding at
//! any time; a per-session timer retransmits it until the retry budget runs
//! out.

//! ## Example
//! ```
//! use std::sync::mpsc::{channel, Receiver, Sender};
//! use std::thread;
//! use std::time::Duration;
//!
//! use swp_rs::{Error, LinkConfig, LinkSession, Role, SerialLine};
//!
//! struct Pipe {
//!     tx: Sender<u8>,
//!     rx: Receiver<u8>,
//! }
//!
//! impl SerialLine for Pipe {
//!     fn read_one(&mut self) -> std::io::Result<Option<u8>> {
//!         match self.rx.recv_timeout(Duration::from_millis(5)) {
//!             Ok(byte) => Ok(Some(byte)),
//!             Err(_) => Ok(None),
//!         }
//!     }
//!
//!     fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
//!         for &byte in buf {
//!             let _ = self.tx.send(byte);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let (tx_out, rx_in) = channel();
//! let (rx_out, tx_in) = channel();
//!
//! let config = LinkConfig {
//!     device: String::from("mock"),
//!     baud: 9600,
//!     role: Role::Transmitter,
//!     timeout_seconds: 1,
//!     max_retransmissions: 3,
//! };
//! let receiver_config = LinkConfig {
//!     role: Role::Receiver,
//!     ..config.clone()
//! };
//!
//! let receiver = thread::spawn(move || {
//!     let line = Pipe { tx: rx_out, rx: rx_in };
//!     let mut session = LinkSession::open(line, &receiver_config).unwrap();
//!     let mut buf = [0u8; 2048];
//!     let n = session.read(&mut buf).unwrap();
//!     assert_eq!(&buf[..n], b"hello");
//!     match session.read(&mut buf) {
//!         Err(Error::PeerDisconnected) => {}
//!         other => panic!("expected disconnect, got {:?}", other),
//!     }
//! });
//!
//! let line = Pipe { tx: tx_out, rx: tx_in };
//! let mut session = LinkSession::open(line, &config).unwrap();
//! session.write(b"hello").unwrap();
//! session.close().unwrap();
//! receiver.join().unwrap();
//! ```

pub mod app;
pub mod frame;
pub mod interface;
pub mod link;
pub mod serial;
mod timer;

pub use crate::app::{receive_file, send_file};
pub use crate::interface::SerialLine;
pub use crate::link::{Error, LinkConfig, LinkSession, Role, Stats};
pub use crate::serial::SystemSerial;
