//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Talk to an in-process simulated companion instead of Bluetooth
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Data directory for preferences and recordings
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Scan for companions advertising the sync service
    Scan,
    /// Connect and follow link events until interrupted
    Connect {
        /// Companion address; defaults to the remembered companion
        address: Option<String>,
    },
    /// Connect, run a recording session and save sensor rows
    Record {
        /// Label the recording is filed under
        #[arg(short, long)]
        label: String,
        /// Free-form metadata sent with SYNC_START
        #[arg(short, long, default_value = "")]
        metadata: String,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
        /// Companion address; defaults to the remembered companion
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Remember a companion address for later connects
    SetAddress {
        address: String,
    },
    /// Show preferences and effective configuration
    Status,
    /// Act as the wrist companion (GATT server)
    Companion {
        /// Advertised name
        #[arg(short, long)]
        name: Option<String>,
        /// Generate synthetic heart rate and motion samples
        #[arg(long)]
        demo_sensors: bool,
    },
}
