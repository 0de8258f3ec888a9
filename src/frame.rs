//! Frame codec: wire constants, XOR block checks and byte stuffing.

/// Frame delimiter.
pub const FLAG: u8 = 0x7E;
/// Escape byte introducing a stuffed octet.
pub const ESCAPE: u8 = 0x7D;
/// Mask toggled on the octet following an escape.
pub const ESCAPE_MASK: u8 = 0x20;

/// Address byte; the same value is used in both directions.
pub const ADDR: u8 = 0x03;

// Supervisory control bytes
pub const CTRL_SET: u8 = 0x03;
pub const CTRL_UA: u8 = 0x07;
pub const CTRL_RR0: u8 = 0xAA;
pub const CTRL_RR1: u8 = 0xAB;
pub const CTRL_REJ0: u8 = 0x54;
pub const CTRL_REJ1: u8 = 0x55;
pub const CTRL_DISC: u8 = 0x0B;

// Information frame control bytes, one per sequence bit
pub const CTRL_I0: u8 = 0x00;
pub const CTRL_I1: u8 = 0x80;

/// Largest payload an information frame may carry.
pub const MAX_PAYLOAD: usize = 1000;

/// Control byte of an information frame with the given sequence bit.
pub fn info_control(sequence_bit: u8) -> u8 {
    if sequence_bit == 0 {
        CTRL_I0
    } else {
        CTRL_I1
    }
}

/// XOR reduction of the unescaped payload bytes.
pub fn bcc2(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, byte| acc ^ byte)
}

fn push_stuffed(out: &mut Vec<u8>, byte: u8) {
    if byte == FLAG || byte == ESCAPE {
        out.push(ESCAPE);
        out.push(byte ^ ESCAPE_MASK);
    } else {
        out.push(byte);
    }
}

/// Encode an information frame carrying `payload` under `sequence_bit`.
///
/// The header bytes are fixed values that never collide with FLAG or ESCAPE,
/// so stuffing applies only to the payload and its check byte.
pub fn encode_info(sequence_bit: u8, payload: &[u8]) -> Vec<u8> {
    let control = info_control(sequence_bit);
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.push(FLAG);
    frame.push(ADDR);
    frame.push(control);
    frame.push(ADDR ^ control);
    for &byte in payload {
        push_stuffed(&mut frame, byte);
    }
    push_stuffed(&mut frame, bcc2(payload));
    frame.push(FLAG);
    frame
}

/// Encode the fixed five-byte supervisory frame for `control`.
pub fn encode_super(control: u8) -> [u8; 5] {
    [FLAG, ADDR, control, ADDR ^ control, FLAG]
}
