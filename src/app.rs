//! Application layer: file partitioning, control/data packets and the
//! transfer drivers for each side of the link.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::interface::SerialLine;
use crate::link::{Error, LinkSession, Stats};

/// File bytes carried per data packet.
pub const CHUNK_SIZE: usize = 16;

const PACKET_START: u8 = 1;
const PACKET_DATA: u8 = 2;
const PACKET_END: u8 = 3;

// Control-packet parameter tags.
const PARAM_FILE_SIZE: u8 = 0;
const PARAM_FILE_NAME: u8 = 1;

// Large enough for any frame the link layer can deliver.
const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Metadata carried by the start and end control packets.
#[derive(Debug, PartialEq, Eq)]
struct FileInfo {
    size: u64,
    name: String,
}

// [kind, 0, 8, size (8 bytes, big endian), 1, name_len, name...]
fn control_packet(kind: u8, file_size: u64, file_name: &str) -> Vec<u8> {
    let name = file_name.as_bytes();
    let name = &name[..name.len().min(255)];
    let mut packet = Vec::with_capacity(13 + name.len());
    packet.push(kind);
    packet.push(PARAM_FILE_SIZE);
    packet.push(8);
    packet.extend_from_slice(&file_size.to_be_bytes());
    packet.push(PARAM_FILE_NAME);
    packet.push(name.len() as u8);
    packet.extend_from_slice(name);
    packet
}

// [2, seq, len_hi, len_lo, bytes...]
fn data_packet(seq: u8, chunk: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + chunk.len());
    packet.push(PACKET_DATA);
    packet.push(seq);
    packet.push((chunk.len() / 256) as u8);
    packet.push((chunk.len() % 256) as u8);
    packet.extend_from_slice(chunk);
    packet
}

fn parse_control(packet: &[u8]) -> Option<FileInfo> {
    if packet.len() < 13 || packet[1] != PARAM_FILE_SIZE || packet[2] != 8 {
        return None;
    }
    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&packet[3..11]);
    if packet[11] != PARAM_FILE_NAME {
        return None;
    }
    let name_len = packet[12] as usize;
    if packet.len() < 13 + name_len {
        return None;
    }
    Some(FileInfo {
        size: u64::from_be_bytes(size_bytes),
        name: String::from_utf8_lossy(&packet[13..13 + name_len]).into_owned(),
    })
}

// One link write, treating an assumed-lost acknowledgement as delivery.
fn write_packet<L: SerialLine>(session: &mut LinkSession<L>, packet: &[u8]) -> Result<(), Error> {
    match session.write(packet) {
        Ok(_) => Ok(()),
        Err(Error::AssumedDelivered) => {
            warn!(target: "app", "acknowledgement lost; continuing with the next packet");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Transmit the file at `path` over an open session, then tear the link
/// down. Returns the session statistics.
pub fn send_file<L: SerialLine>(mut session: LinkSession<L>, path: &Path) -> Result<Stats, Error> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!(target: "app", "sending {:?} ({} bytes)", file_name, file_size);
    write_packet(&mut session, &control_packet(PACKET_START, file_size, &file_name))?;

    let mut chunk = [0u8; CHUNK_SIZE];
    let mut seq: u8 = 0;
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        seq = seq.wrapping_add(1);
        debug!(target: "app", "data packet {} ({} bytes)", seq, n);
        write_packet(&mut session, &data_packet(seq, &chunk[..n]))?;
    }

    write_packet(&mut session, &control_packet(PACKET_END, file_size, &file_name))?;
    session.close()
}

/// Receive a single file into `path`, looping on the link until the peer
/// disconnects.
pub fn receive_file<L: SerialLine>(mut session: LinkSession<L>, path: &Path) -> Result<(), Error> {
    let mut file = File::create(path)?;
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    let mut expected_seq: u8 = 0;
    let mut transfer: Option<FileInfo> = None;

    loop {
        let len = match session.read(&mut buf) {
            Ok(len) => len,
            Err(Error::SessionReset) => {
                warn!(target: "app", "transmitter restarted; truncating the output file");
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                expected_seq = 0;
                transfer = None;
                continue;
            }
            Err(Error::PeerDisconnected) => {
                info!(target: "app", "transfer finished");
                file.flush()?;
                return Ok(());
            }
            Err(Error::PeerDisconnectedWithError) => {
                warn!(
                    target: "app",
                    "peer disconnected without completing the closing handshake"
                );
                file.flush()?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if len == 0 {
            debug!(target: "app", "empty payload ignored");
            continue;
        }

        match buf[0] {
            PACKET_START => {
                transfer = parse_control(&buf[..len]);
                match &transfer {
                    Some(meta) => {
                        info!(target: "app", "incoming file {:?} ({} bytes)", meta.name, meta.size)
                    }
                    None => warn!(target: "app", "malformed start packet ({} bytes)", len),
                }
                expected_seq = 0;
            }
            PACKET_DATA => {
                if len < 4 {
                    warn!(target: "app", "malformed data packet ({} bytes)", len);
                    continue;
                }
                let seq = buf[1];
                if seq != expected_seq.wrapping_add(1) {
                    // The link already guarantees ordering; only worth noting.
                    warn!(target: "app", "packet sequence {} after {}", seq, expected_seq);
                }
                expected_seq = seq;
                let declared = buf[2] as usize * 256 + buf[3] as usize;
                let available = len - 4;
                if declared != available {
                    warn!(
                        target: "app",
                        "length field says {} but {} bytes arrived", declared, available
                    );
                }
                file.write_all(&buf[4..4 + declared.min(available)])?;
            }
            PACKET_END => {
                debug!(target: "app", "end packet received");
                match (&transfer, parse_control(&buf[..len])) {
                    (Some(start), Some(end)) if *start != end => {
                        warn!(target: "app", "end packet metadata differs from start packet")
                    }
                    _ => {}
                }
                // One more read catches the DISC that normally follows.
                match session.read(&mut buf) {
                    Err(Error::PeerDisconnected) => {
                        info!(target: "app", "transfer finished");
                        file.flush()?;
                        return Ok(());
                    }
                    Err(Error::PeerDisconnectedWithError) => {
                        warn!(
                            target: "app",
                            "peer disconnected without completing the closing handshake"
                        );
                        file.flush()?;
                        return Ok(());
                    }
                    Ok(_) => warn!(target: "app", "unexpected frame after the end packet"),
                    Err(e) => return Err(e),
                }
            }
            other => warn!(target: "app", "unknown packet type {}", other),
        }
    }
}
