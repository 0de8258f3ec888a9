//! Link layer: connection handshake, stop-and-wait information transfer
//! and symmetric teardown over a raw serial line.

use std::io;

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::frame::{
    bcc2, encode_info, encode_super, ADDR, CTRL_DISC, CTRL_I0, CTRL_I1, CTRL_REJ0, CTRL_REJ1,
    CTRL_RR0, CTRL_RR1, CTRL_SET, CTRL_UA, ESCAPE, ESCAPE_MASK, FLAG, MAX_PAYLOAD,
};
use crate::interface::SerialLine;
use crate::timer::RetryTimer;

// Bound on reply-decoding retries within a single write or read call.
const TRIES: u32 = 10;
// Cross-parity acknowledgements tolerated before the previous RR is assumed
// lost and the outstanding frame is taken as delivered.
const RR_LOST_TRIES: u32 = 2;

/// Which end of the link this session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Transmitter,
    Receiver,
}

/// Immutable per-session parameters.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial device identifier, e.g. `/dev/ttyS10`.
    pub device: String,
    /// Line speed in baud.
    pub baud: u32,
    pub role: Role,
    /// Seconds to wait for an expected response before retransmitting.
    pub timeout_seconds: u64,
    /// Consecutive unanswered timeouts tolerated per operation.
    pub max_retransmissions: u32,
}

/// Counters accumulated over a session's lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Frame bytes handed to `write`, counted once per frame.
    pub unique_bytes: u64,
    /// Frame bytes actually placed on the wire, retransmissions included.
    pub wire_bytes: u64,
    /// Number of frame (re)transmissions.
    pub send_calls: u64,
    /// Aligned rejections received, i.e. frames the peer had to discard.
    pub read_errors: u64,
}

/// Conditions surfaced by the link layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("serial line error: {0}")]
    Io(#[from] io::Error),
    #[error("no usable reply after {0} attempts")]
    ProtocolExhausted(u32),
    #[error("acknowledgement assumed lost; frame taken as delivered")]
    AssumedDelivered,
    #[error("peer restarted the session")]
    SessionReset,
    #[error("peer disconnected")]
    PeerDisconnected,
    #[error("peer disconnected but the closing handshake did not complete")]
    PeerDisconnectedWithError,
    #[error("frame exceeded the payload limit")]
    FrameOverrun,
}

// Decoder for five-byte supervisory exchanges (handshake and teardown).
#[derive(Clone, Copy)]
enum SuperState {
    Start,
    FlagRcv,
    ARcv,
    CRcv,
    BccOk,
}

// Decoder for acknowledgement replies while an I-frame is outstanding.
#[derive(Clone, Copy)]
enum ReplyState {
    Start,
    FlagRcv,
    ARcv,
    CRcv,
    BccOk,
}

// Decoder for incoming I-frames and the in-band SET and DISC paths.
#[derive(Clone, Copy)]
enum ReadState {
    Start,
    FlagRcv,
    ARcv,
    CRcv,
    Data,
    Escaped,
    Disc,
    DiscBccOk,
    Set,
    SetBccOk,
}

// Retransmission policy while waiting for a supervisory frame.
enum Resend<'a> {
    /// Listen only.
    Never,
    /// Rewrite the frame on expiry until the peer's reply starts arriving.
    UntilReply(&'a [u8; 5]),
    /// Rewrite the frame on every expiry.
    EveryExpiry(&'a [u8; 5]),
}

/// An established link endpoint.
///
/// Created by [`LinkSession::open`] once the SET/UA handshake completes and
/// destroyed by [`LinkSession::close`] (or by the peer's in-band DISC,
/// reported through [`Error::PeerDisconnected`]). The session owns the
/// serial line and the alternating sequence bit; at any quiescent point the
/// bit names the next frame this side will send or accept.
pub struct LinkSession<L: SerialLine> {
    line: L,
    sequence_bit: u8,
    timer: RetryTimer,
    stats: Stats,
}

impl<L: SerialLine> LinkSession<L> {
    /// Run the connection handshake over `line` and return the session.
    ///
    /// The transmitter writes SET on every timer expiry until a UA decodes;
    /// the receiver waits for a SET and answers a single UA.
    pub fn open(line: L, config: &LinkConfig) -> Result<Self, Error> {
        let mut session = LinkSession {
            line,
            sequence_bit: 0,
            timer: RetryTimer::new(config.timeout_seconds, config.max_retransmissions),
            stats: Stats::default(),
        };
        match config.role {
            Role::Transmitter => {
                let set = encode_super(CTRL_SET);
                session.await_supervisory(CTRL_UA, Resend::UntilReply(&set))?;
            }
            Role::Receiver => {
                session.await_supervisory(CTRL_SET, Resend::Never)?;
                session.line.write_all(&encode_super(CTRL_UA))?;
            }
        }
        info!(target: "link", "connection established ({:?})", config.role);
        Ok(session)
    }

    /// Session statistics so far.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Give the serial line back without running the teardown exchange.
    pub fn into_line(self) -> L {
        self.line
    }

    /// Transmit one information frame and wait for its acknowledgement.
    ///
    /// Returns the number of bytes placed on the wire for the frame. An
    /// aligned REJ triggers an immediate retransmission; a cross-parity
    /// REJ past the tolerance threshold means the peer has already
    /// accepted the frame and the previous RR was lost, reported as
    /// [`Error::AssumedDelivered`] with the sequence bit advanced.
    pub fn write(&mut self, payload: &[u8]) -> Result<usize, Error> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::FrameOverrun);
        }

        let frame = encode_info(self.sequence_bit, payload);
        self.stats.unique_bytes += frame.len() as u64;

        // Replies that agree with the outstanding sequence bit, and the
        // pair that indicates the peer is out of phase with us.
        let (rej_aligned, rr_aligned, rej_cross, rr_cross) = if self.sequence_bit == 0 {
            (CTRL_REJ0, CTRL_RR1, CTRL_REJ1, CTRL_RR0)
        } else {
            (CTRL_REJ1, CTRL_RR0, CTRL_REJ0, CTRL_RR1)
        };

        trace!(target: "link", "write: I{} frame, {} wire bytes", self.sequence_bit, frame.len());

        let mut state = ReplyState::Start;
        let mut code: u8 = 0;
        let mut reply_retries: u32 = 0;
        self.timer.reset();

        loop {
            self.timer.tick();
            if !self.timer.armed() {
                if self.timer.exhausted() {
                    warn!(target: "link", "write: retry budget exhausted");
                    return Err(Error::ProtocolExhausted(self.timer.expiries()));
                }
                self.line.write_all(&frame)?;
                self.stats.send_calls += 1;
                self.stats.wire_bytes += frame.len() as u64;
                self.timer.arm();
            }
            let byte = match self.line.read_one()? {
                Some(byte) => byte,
                None => continue,
            };
            self.timer.note_progress();

            match state {
                ReplyState::Start => {
                    if byte == FLAG {
                        state = ReplyState::FlagRcv;
                    }
                }
                ReplyState::FlagRcv => {
                    if byte == FLAG {
                    } else if byte == ADDR {
                        state = ReplyState::ARcv;
                    } else {
                        state = ReplyState::Start;
                    }
                }
                ReplyState::ARcv => {
                    if byte == FLAG {
                        state = ReplyState::FlagRcv;
                    } else if byte == CTRL_UA || byte == rej_aligned || byte == rr_aligned {
                        code = byte;
                        state = ReplyState::CRcv;
                    } else if byte == rej_cross || byte == rr_cross {
                        // The peer acknowledges the other parity: either our
                        // previous RR was lost or a stale reply is in flight.
                        warn!(target: "link", "write: cross-parity reply 0x{:02x}", byte);
                        if (reply_retries > RR_LOST_TRIES && byte == rej_cross)
                            || reply_retries >= TRIES
                        {
                            self.sequence_bit ^= 1;
                            self.timer.disarm();
                            debug!(target: "link", "write: assuming frame delivered");
                            return Err(Error::AssumedDelivered);
                        }
                        reply_retries += 1;
                        state = ReplyState::Start;
                    } else {
                        warn!(target: "link", "write: unexpected control 0x{:02x}", byte);
                        if reply_retries >= TRIES {
                            self.sequence_bit ^= 1;
                            self.timer.disarm();
                            return Err(Error::ProtocolExhausted(reply_retries));
                        }
                        reply_retries += 1;
                        state = ReplyState::Start;
                    }
                }
                ReplyState::CRcv => {
                    if byte == FLAG {
                        state = ReplyState::FlagRcv;
                    } else if byte == (ADDR ^ code) {
                        state = ReplyState::BccOk;
                    } else {
                        state = ReplyState::Start;
                    }
                }
                ReplyState::BccOk => {
                    if byte == FLAG {
                        if code == CTRL_UA {
                            // The peer re-acknowledged the connection;
                            // absorb it and keep waiting for the real reply.
                            debug!(target: "link", "write: spurious UA absorbed");
                            state = ReplyState::Start;
                        } else if code == rej_aligned {
                            debug!(target: "link", "write: REJ, retransmitting");
                            self.stats.read_errors += 1;
                            self.timer.disarm();
                            state = ReplyState::Start;
                        } else {
                            self.sequence_bit ^= 1;
                            self.timer.disarm();
                            trace!(target: "link", "write: acknowledged");
                            return Ok(frame.len());
                        }
                    } else {
                        state = ReplyState::Start;
                    }
                }
            }
        }
    }

    /// Receive one information frame into `buf` and acknowledge it.
    ///
    /// Returns the payload length. In-band SET resets the sequence bit,
    /// answers a UA and surfaces [`Error::SessionReset`]; in-band DISC runs
    /// the teardown echo and surfaces [`Error::PeerDisconnected`] (or
    /// [`Error::PeerDisconnectedWithError`] when the closing UA never
    /// arrives).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let (expected_i, out_of_order_i, rej_expected, rr_next) = if self.sequence_bit == 0 {
            (CTRL_I0, CTRL_I1, CTRL_REJ0, CTRL_RR1)
        } else {
            (CTRL_I1, CTRL_I0, CTRL_REJ1, CTRL_RR0)
        };

        let mut state = ReadState::Start;
        let mut code: u8 = 0;
        let mut len: usize = 0;
        let mut attempts: u32 = 0;
        self.timer.reset();

        loop {
            self.timer.tick();
            if !self.timer.armed() {
                if self.timer.exhausted() {
                    warn!(target: "link", "read: retry budget exhausted");
                    return Err(Error::ProtocolExhausted(self.timer.expiries()));
                }
                self.timer.arm();
            }
            let byte = match self.line.read_one()? {
                Some(byte) => byte,
                None => continue,
            };
            self.timer.note_progress();

            // len counts the payload plus its trailing check byte.
            if len > MAX_PAYLOAD + 1 {
                warn!(target: "link", "read: no closing flag after {} bytes", len);
                return Err(Error::FrameOverrun);
            }

            match state {
                ReadState::Start => {
                    if byte == FLAG {
                        state = ReadState::FlagRcv;
                    }
                }
                ReadState::FlagRcv => {
                    if byte == FLAG {
                    } else if byte == ADDR {
                        state = ReadState::ARcv;
                    } else {
                        state = ReadState::Start;
                    }
                }
                ReadState::ARcv => {
                    if byte == FLAG {
                        state = ReadState::FlagRcv;
                    } else if byte == CTRL_SET {
                        state = ReadState::Set;
                    } else if byte == CTRL_DISC {
                        state = ReadState::Disc;
                    } else if byte == expected_i || byte == out_of_order_i {
                        code = byte;
                        len = 0;
                        state = ReadState::CRcv;
                    } else {
                        // Unknown control; collect the frame and let the
                        // classification at the closing flag discard it.
                        trace!(target: "link", "read: unknown control 0x{:02x}", byte);
                        code = byte;
                        len = 0;
                        state = ReadState::CRcv;
                    }
                }
                ReadState::Set => {
                    if byte == FLAG {
                        state = ReadState::FlagRcv;
                    } else if byte == (ADDR ^ CTRL_SET) {
                        state = ReadState::SetBccOk;
                    } else {
                        state = ReadState::Start;
                    }
                }
                ReadState::SetBccOk => {
                    if byte == FLAG {
                        // The transmitter restarted the session; acknowledge
                        // and let the caller rewind its output.
                        self.timer.disarm();
                        self.sequence_bit = 0;
                        self.line.write_all(&encode_super(CTRL_UA))?;
                        info!(target: "link", "read: in-band SET, session reset");
                        return Err(Error::SessionReset);
                    }
                    state = ReadState::Start;
                }
                ReadState::Disc => {
                    if byte == FLAG {
                        state = ReadState::FlagRcv;
                    } else if byte == (ADDR ^ CTRL_DISC) {
                        state = ReadState::DiscBccOk;
                    } else {
                        state = ReadState::Start;
                    }
                }
                ReadState::DiscBccOk => {
                    if byte == FLAG {
                        debug!(target: "link", "read: in-band DISC, echoing teardown");
                        return match self.echo_teardown() {
                            Ok(()) => Err(Error::PeerDisconnected),
                            Err(Error::Io(e)) => Err(Error::Io(e)),
                            Err(_) => Err(Error::PeerDisconnectedWithError),
                        };
                    }
                    state = ReadState::Start;
                }
                ReadState::CRcv => {
                    if byte == FLAG {
                        state = ReadState::FlagRcv;
                    } else if byte == (ADDR ^ code) {
                        state = ReadState::Data;
                    } else {
                        // Header check failed; resync on the next flag.
                        state = ReadState::Start;
                    }
                }
                ReadState::Data => {
                    if byte == FLAG {
                        match self.finish_frame(
                            buf,
                            &mut len,
                            code,
                            expected_i,
                            out_of_order_i,
                            rej_expected,
                            rr_next,
                            &mut attempts,
                        )? {
                            Some(delivered) => return Ok(delivered),
                            None => state = ReadState::Start,
                        }
                    } else if byte == ESCAPE {
                        state = ReadState::Escaped;
                    } else {
                        if len >= buf.len() {
                            return Err(Error::FrameOverrun);
                        }
                        buf[len] = byte;
                        len += 1;
                    }
                }
                ReadState::Escaped => {
                    if len >= buf.len() {
                        return Err(Error::FrameOverrun);
                    }
                    buf[len] = byte ^ ESCAPE_MASK;
                    len += 1;
                    state = ReadState::Data;
                }
            }
        }
    }

    // Classify a fully collected frame at its closing flag. `Ok(Some(n))`
    // delivers n payload bytes; `Ok(None)` drops the frame and rearms the
    // decoder for another attempt.
    #[allow(clippy::too_many_arguments)]
    fn finish_frame(
        &mut self,
        buf: &mut [u8],
        len: &mut usize,
        code: u8,
        expected_i: u8,
        out_of_order_i: u8,
        rej_expected: u8,
        rr_next: u8,
        attempts: &mut u32,
    ) -> Result<Option<usize>, Error> {
        if code == out_of_order_i {
            // Duplicate of the frame already delivered; its RR must have
            // been lost. Reject with the expected parity so the sender can
            // tell the two cases apart.
            warn!(target: "link", "read: duplicate I-frame, rejecting");
            *len = 0;
            self.line.write_all(&encode_super(rej_expected))?;
            if *attempts >= TRIES {
                self.timer.disarm();
                return Err(Error::ProtocolExhausted(*attempts));
            }
            *attempts += 1;
            return Ok(None);
        }

        if code != expected_i {
            warn!(target: "link", "read: dropping frame with control 0x{:02x}", code);
            *len = 0;
            if *attempts >= TRIES {
                self.timer.disarm();
                return Err(Error::ProtocolExhausted(*attempts));
            }
            *attempts += 1;
            return Ok(None);
        }

        let delivered = match len.checked_sub(1) {
            Some(delivered) if bcc2(&buf[..delivered]) == buf[delivered] => delivered,
            _ => {
                warn!(target: "link", "read: payload check failed, rejecting");
                *len = 0;
                self.line.write_all(&encode_super(rej_expected))?;
                if *attempts >= TRIES {
                    self.timer.disarm();
                    return Err(Error::ProtocolExhausted(*attempts));
                }
                *attempts += 1;
                return Ok(None);
            }
        };

        self.line.write_all(&encode_super(rr_next))?;
        self.timer.disarm();
        self.sequence_bit ^= 1;
        trace!(target: "link", "read: delivered {} bytes", delivered);
        Ok(Some(delivered))
    }

    /// Initiate the disconnect exchange and consume the session.
    ///
    /// Writes DISC until the peer's DISC decodes, answers a final UA and
    /// returns the session statistics.
    pub fn close(mut self) -> Result<Stats, Error> {
        let disc = encode_super(CTRL_DISC);
        self.await_supervisory(CTRL_DISC, Resend::EveryExpiry(&disc))?;
        self.line.write_all(&encode_super(CTRL_UA))?;
        info!(
            target: "link",
            "closed: {} unique bytes, {} on the wire over {} sends, {} rejected frames",
            self.stats.unique_bytes,
            self.stats.wire_bytes,
            self.stats.send_calls,
            self.stats.read_errors
        );
        Ok(self.stats)
    }

    // Receiver half of the teardown: answer the initiator's DISC and wait
    // for its UA, retransmitting our DISC on each expiry.
    fn echo_teardown(&mut self) -> Result<(), Error> {
        self.sequence_bit = 0;
        let disc = encode_super(CTRL_DISC);
        self.await_supervisory(CTRL_UA, Resend::EveryExpiry(&disc))
    }

    // Drive the five-state supervisory decoder until a frame with control
    // `expected` is accepted, retransmitting per `resend`.
    fn await_supervisory(&mut self, expected: u8, resend: Resend<'_>) -> Result<(), Error> {
        let mut state = SuperState::Start;
        let mut seen_bytes = false;
        self.timer.reset();

        loop {
            self.timer.tick();
            if !self.timer.armed() {
                if self.timer.exhausted() {
                    warn!(target: "link", "no frame with control 0x{:02x} in time", expected);
                    return Err(Error::ProtocolExhausted(self.timer.expiries()));
                }
                match resend {
                    Resend::UntilReply(frame) if !seen_bytes => self.line.write_all(frame)?,
                    Resend::EveryExpiry(frame) => self.line.write_all(frame)?,
                    _ => {}
                }
                self.timer.arm();
            }
            let byte = match self.line.read_one()? {
                Some(byte) => byte,
                None => continue,
            };
            seen_bytes = true;
            self.timer.note_progress();

            match state {
                SuperState::Start => {
                    if byte == FLAG {
                        state = SuperState::FlagRcv;
                    }
                }
                SuperState::FlagRcv => {
                    if byte == FLAG {
                    } else if byte == ADDR {
                        state = SuperState::ARcv;
                    } else {
                        state = SuperState::Start;
                    }
                }
                SuperState::ARcv => {
                    if byte == FLAG {
                        state = SuperState::FlagRcv;
                    } else if byte == expected {
                        state = SuperState::CRcv;
                    } else {
                        state = SuperState::Start;
                    }
                }
                SuperState::CRcv => {
                    if byte == FLAG {
                        state = SuperState::FlagRcv;
                    } else if byte == (ADDR ^ expected) {
                        state = SuperState::BccOk;
                    } else {
                        state = SuperState::Start;
                    }
                }
                SuperState::BccOk => {
                    if byte == FLAG {
                        self.timer.disarm();
                        return Ok(());
                    }
                    state = SuperState::Start;
                }
            }
        }
    }
}
