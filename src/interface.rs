use std::io;

/// Byte-granular serial line as seen by the protocol loops.
///
/// `read_one` blocks for at most the line's configured read timeout and
/// reports an expired timeout as `Ok(None)`, so that the loops can poll
/// their retransmission timer between bytes.
pub trait SerialLine {
    /// Read a single byte, or `None` once the read timeout elapses.
    fn read_one(&mut self) -> io::Result<Option<u8>>;

    /// Write the whole buffer to the line.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}
