#[cfg(test)]
mod tests {
    extern crate swp_rs as swp;

    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::thread;
    use std::time::Duration;

    use swp::frame::{encode_super, CTRL_UA};
    use swp::{receive_file, send_file, LinkConfig, LinkSession, Role, SerialLine};

    // One end of an in-memory duplex wire.
    struct Pipe {
        tx: Sender<u8>,
        rx: Receiver<u8>,
    }

    impl SerialLine for Pipe {
        fn read_one(&mut self) -> io::Result<Option<u8>> {
            match self.rx.recv_timeout(Duration::from_millis(5)) {
                Ok(byte) => Ok(Some(byte)),
                Err(_) => Ok(None),
            }
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            for &byte in buf {
                let _ = self.tx.send(byte);
            }
            Ok(())
        }
    }

    // Flips one bit of one outgoing frame, once.
    struct FlipOnce {
        inner: Pipe,
        calls: usize,
        target_call: usize,
        target_byte: usize,
    }

    impl SerialLine for FlipOnce {
        fn read_one(&mut self) -> io::Result<Option<u8>> {
            self.inner.read_one()
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.calls += 1;
            if self.calls == self.target_call && self.target_byte < buf.len() {
                let mut corrupted = buf.to_vec();
                corrupted[self.target_byte] ^= 0x01;
                return self.inner.write_all(&corrupted);
            }
            self.inner.write_all(buf)
        }
    }

    // Swallows one outgoing frame entirely.
    struct DropNth {
        inner: Pipe,
        calls: usize,
        target_call: usize,
    }

    impl SerialLine for DropNth {
        fn read_one(&mut self) -> io::Result<Option<u8>> {
            self.inner.read_one()
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.calls += 1;
            if self.calls == self.target_call {
                return Ok(());
            }
            self.inner.write_all(buf)
        }
    }

    // Slips a spurious UA onto the wire ahead of one outgoing frame.
    struct InjectUa {
        inner: Pipe,
        calls: usize,
        target_call: usize,
    }

    impl SerialLine for InjectUa {
        fn read_one(&mut self) -> io::Result<Option<u8>> {
            self.inner.read_one()
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.calls += 1;
            if self.calls == self.target_call {
                self.inner.write_all(&encode_super(CTRL_UA))?;
            }
            self.inner.write_all(buf)
        }
    }

    fn config(role: Role) -> LinkConfig {
        LinkConfig {
            device: String::from("mock"),
            baud: 9600,
            role,
            timeout_seconds: 1,
            max_retransmissions: 3,
        }
    }

    fn duplex() -> (Pipe, Pipe) {
        let (tx_out, rx_in) = channel();
        let (rx_out, tx_in) = channel();
        (
            Pipe { tx: tx_out, rx: tx_in },
            Pipe { tx: rx_out, rx: rx_in },
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("swp-{}-{}", std::process::id(), name));
        path
    }

    fn spawn_receiver<L>(line: L, output: PathBuf) -> thread::JoinHandle<()>
    where
        L: SerialLine + Send + 'static,
    {
        thread::spawn(move || {
            let session = LinkSession::open(line, &config(Role::Receiver)).unwrap();
            receive_file(session, &output).unwrap();
        })
    }

    #[test]
    fn clean_transfer_is_byte_identical() {
        let input = temp_path("clean-in");
        let output = temp_path("clean-out");
        fs::write(&input, &b"0123456789abcdefghijklmnopqrstuvw"[..]).unwrap();

        let (tx_line, rx_line) = duplex();
        let receiver = spawn_receiver(rx_line, output.clone());

        let session = LinkSession::open(tx_line, &config(Role::Transmitter)).unwrap();
        let stats = send_file(session, &input).unwrap();
        receiver.join().unwrap();

        // Start packet, three data packets (16 + 16 + 1 bytes), end packet.
        assert_eq!(stats.send_calls, 5);
        assert_eq!(stats.wire_bytes, stats.unique_bytes);
        assert_eq!(fs::read(&output).unwrap(), fs::read(&input).unwrap());

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&output);
    }

    #[test]
    fn transfer_survives_a_corrupted_data_frame() {
        let input = temp_path("flip-in");
        let output = temp_path("flip-out");
        fs::write(&input, &b"0123456789abcdefghijklmnopqrstuvw"[..]).unwrap();

        let (tx_line, rx_line) = duplex();
        let receiver = spawn_receiver(rx_line, output.clone());

        // Frame writes: SET, start packet, data 1, data 2, ... Flip a bit
        // inside the second data frame's payload region.
        let line = FlipOnce {
            inner: tx_line,
            calls: 0,
            target_call: 4,
            target_byte: 8,
        };
        let session = LinkSession::open(line, &config(Role::Transmitter)).unwrap();
        let stats = send_file(session, &input).unwrap();
        receiver.join().unwrap();

        assert!(stats.wire_bytes > stats.unique_bytes);
        assert_eq!(fs::read(&output).unwrap(), fs::read(&input).unwrap());

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&output);
    }

    #[test]
    fn transfer_survives_a_lost_acknowledgement() {
        let input = temp_path("drop-in");
        let output = temp_path("drop-out");
        fs::write(&input, &b"0123456789abcdefghijklmnopqrstuvw"[..]).unwrap();

        let (tx_line, rx_line) = duplex();

        // Receiver writes: UA, RR for the start packet, RR for data 1, ...
        // Swallow the third so the first data frame goes unacknowledged.
        let line = DropNth {
            inner: rx_line,
            calls: 0,
            target_call: 3,
        };
        let out_path = output.clone();
        let receiver = thread::spawn(move || {
            let session = LinkSession::open(line, &config(Role::Receiver)).unwrap();
            receive_file(session, &out_path).unwrap();
        });

        let session = LinkSession::open(tx_line, &config(Role::Transmitter)).unwrap();
        let stats = send_file(session, &input).unwrap();
        receiver.join().unwrap();

        // The sender retransmitted until it concluded the acknowledgement
        // was lost; the file is still intact on the other side.
        assert!(stats.wire_bytes > stats.unique_bytes);
        assert_eq!(fs::read(&output).unwrap(), fs::read(&input).unwrap());

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&output);
    }

    #[test]
    fn transfer_survives_a_spurious_ua() {
        let input = temp_path("ua-in");
        let output = temp_path("ua-out");
        fs::write(&input, &b"0123456789abcdefghijklmnopqrstuvw"[..]).unwrap();

        let (tx_line, rx_line) = duplex();

        let line = InjectUa {
            inner: rx_line,
            calls: 0,
            target_call: 3,
        };
        let out_path = output.clone();
        let receiver = thread::spawn(move || {
            let session = LinkSession::open(line, &config(Role::Receiver)).unwrap();
            receive_file(session, &out_path).unwrap();
        });

        let session = LinkSession::open(tx_line, &config(Role::Transmitter)).unwrap();
        send_file(session, &input).unwrap();
        receiver.join().unwrap();

        assert_eq!(fs::read(&output).unwrap(), fs::read(&input).unwrap());

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&output);
    }

    fn control_packet(kind: u8, size: u64, name: &str) -> Vec<u8> {
        let mut packet = vec![kind, 0, 8];
        packet.extend_from_slice(&size.to_be_bytes());
        packet.push(1);
        packet.push(name.len() as u8);
        packet.extend_from_slice(name.as_bytes());
        packet
    }

    fn data_packet(seq: u8, chunk: &[u8]) -> Vec<u8> {
        let mut packet = vec![2, seq, (chunk.len() / 256) as u8, (chunk.len() % 256) as u8];
        packet.extend_from_slice(chunk);
        packet
    }

    #[test]
    fn mid_session_restart_rewinds_the_output() {
        let output = temp_path("restart-out");
        let content = b"0123456789abcdefghijklmnopqrstuvw";

        let (tx_line, rx_line) = duplex();
        let receiver = spawn_receiver(rx_line, output.clone());

        let tx_cfg = config(Role::Transmitter);
        let mut session = LinkSession::open(tx_line, &tx_cfg).unwrap();
        session
            .write(&control_packet(1, content.len() as u64, "f.bin"))
            .unwrap();
        session.write(&data_packet(1, &content[..16])).unwrap();
        session.write(&data_packet(2, &content[16..32])).unwrap();

        // Restart the session over the same wire without tearing down.
        let line = session.into_line();
        let mut session = LinkSession::open(line, &tx_cfg).unwrap();
        session
            .write(&control_packet(1, content.len() as u64, "f.bin"))
            .unwrap();
        session.write(&data_packet(1, &content[..16])).unwrap();
        session.write(&data_packet(2, &content[16..32])).unwrap();
        session.write(&data_packet(3, &content[32..])).unwrap();
        session
            .write(&control_packet(3, content.len() as u64, "f.bin"))
            .unwrap();
        session.close().unwrap();
        receiver.join().unwrap();

        assert_eq!(fs::read(&output).unwrap(), content.to_vec());

        let _ = fs::remove_file(&output);
    }

    #[test]
    fn transfer_with_stuffed_bytes_round_trips() {
        let input = temp_path("stuff-in");
        let output = temp_path("stuff-out");
        let content: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        fs::write(&input, &content).unwrap();

        let (tx_line, rx_line) = duplex();
        let receiver = spawn_receiver(rx_line, output.clone());

        let session = LinkSession::open(tx_line, &config(Role::Transmitter)).unwrap();
        send_file(session, &input).unwrap();
        receiver.join().unwrap();

        assert_eq!(fs::read(&output).unwrap(), content);

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&output);
    }
}
