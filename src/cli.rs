//! Command line definitions.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "band-companion", version, about = "Companion controller for BLE wearable bands")]
pub struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Talk to a simulated band instead of the Bluetooth adapter
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan for bands and list them
    Scan {
        /// Scan window in seconds (overrides the configured window)
        #[arg(long, value_name = "SECS")]
        seconds: Option<u64>,
    },
    /// Connect to a band and print readings until Ctrl-C
    Connect {
        /// Peripheral address, e.g. C0:FF:EE:00:00:01
        address: Option<String>,
        /// Push the host clock once services are ready
        #[arg(long, action = ArgAction::SetTrue)]
        sync_time: bool,
        /// Disconnect after this many seconds
        #[arg(long, value_name = "SECS")]
        seconds: Option<u64>,
    },
    /// Decode a sensor frame given as hex
    Decode {
        #[arg(value_name = "HEX")]
        hex: String,
    },
    /// Print an encoded command frame as hex
    Encode {
        #[command(subcommand)]
        frame: EncodeFrame,
    },
}

#[derive(Subcommand, Debug)]
pub enum EncodeFrame {
    /// Time-sync frame for the current local time
    Time,
    /// Call-event frame
    Call {
        /// Caller number; only sent while ringing
        #[arg(long)]
        number: Option<String>,
        /// Encode "call ended" instead of "ringing"
        #[arg(long, action = ArgAction::SetTrue)]
        ended: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        let cli = Cli::try_parse_from([
            "band-companion",
            "--simulate",
            "connect",
            "C0:FF:EE:00:00:01",
            "--sync-time",
            "--seconds",
            "30",
        ])
        .unwrap();

        assert!(cli.simulate);
        match cli.cmd {
            Commands::Connect {
                address,
                sync_time,
                seconds,
            } => {
                assert_eq!(address.as_deref(), Some("C0:FF:EE:00:00:01"));
                assert!(sync_time);
                assert_eq!(seconds, Some(30));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_encode_call() {
        let cli =
            Cli::try_parse_from(["band-companion", "encode", "call", "--number", "5551234"]).unwrap();
        assert!(matches!(
            cli.cmd,
            Commands::Encode {
                frame: EncodeFrame::Call { ended: false, .. }
            }
        ));
    }
}
