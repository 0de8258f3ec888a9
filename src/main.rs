use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info};

use swp_rs::{receive_file, send_file, LinkConfig, LinkSession, Role, SystemSerial};

/// File transfer over a stop-and-wait serial link.
#[derive(Parser)]
#[command(name = "swp", version)]
struct Args {
    /// Serial device, e.g. /dev/ttyS10
    serial_port: String,
    /// End of the link to drive
    #[arg(value_enum)]
    role: CliRole,
    /// Line speed in baud
    baud_rate: u32,
    /// Retransmission budget per operation
    max_tries: u32,
    /// Seconds to wait for a reply before retransmitting
    timeout: u64,
    /// File to send (tx) or path to write (rx)
    filename: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliRole {
    Tx,
    Rx,
}

fn run(config: &LinkConfig, filename: &Path) -> Result<(), swp_rs::Error> {
    let line = SystemSerial::open(&config.device, config.baud)?;
    let session = LinkSession::open(line, config)?;
    match config.role {
        Role::Transmitter => {
            send_file(session, filename)?;
        }
        Role::Receiver => receive_file(session, filename)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = LinkConfig {
        device: args.serial_port,
        baud: args.baud_rate,
        role: match args.role {
            CliRole::Tx => Role::Transmitter,
            CliRole::Rx => Role::Receiver,
        },
        timeout_seconds: args.timeout,
        max_retransmissions: args.max_tries,
    };

    match run(&config, &args.filename) {
        Ok(()) => {
            info!(target: "swp", "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "swp", "{}", e);
            ExitCode::FAILURE
        }
    }
}
