//! `nxm-airgap`: sign animated-QR Ethereum requests with a Keycard on a PC/SC reader.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod display;
mod reader;

use commands::*;
use config::{config_path, load_config};

#[derive(Parser)]
#[command(version, about = "Air-gapped Ethereum signer for Status Keycard")]
struct Cli {
    /// Config file (defaults to ~/.nxm/airgap.toml)
    #[arg(long, env = "NXM_AIRGAP_CONFIG")]
    config: Option<PathBuf>,

    /// Reader name to use (first reader found if not specified)
    #[arg(short, long)]
    reader: Option<String>,

    /// Pairing store file
    #[arg(long)]
    pairing_store: Option<PathBuf>,

    /// Trace level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available readers
    Readers,

    /// Reassemble scanned `ur:eth-sign-request` frames and show the request
    Decode {
        /// Scanned frames, read one per line from stdin when omitted
        frames: Vec<String>,
    },

    /// Sign a scanned request with a Keycard and print the `ur:eth-signature`
    Sign {
        /// Scanned frames, read one per line from stdin when omitted
        frames: Vec<String>,

        /// PIN code (prompted for when omitted)
        #[arg(long, env = "NXM_AIRGAP_PIN", hide_env_values = true)]
        pin: Option<String>,
    },

    /// Manage stored pairings
    Pairings {
        #[command(subcommand)]
        command: PairingsCommand,
    },
}

#[derive(Subcommand)]
enum PairingsCommand {
    /// List stored pairings by card instance UID
    List,

    /// Forget the pairing of a card
    Forget {
        /// Hex instance UID of the card
        instance_uid: String,
    },
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let path = match cli.config {
        Some(path) => path,
        None => config_path()?,
    };
    let mut config =
        load_config(&path).wrap_err_with(|| format!("failed to load {}", path.display()))?;
    if let Some(reader) = cli.reader {
        config.reader = Some(reader);
    }
    if let Some(pairing_store) = cli.pairing_store {
        config.pairing_store = pairing_store;
    }

    match cli.command {
        Commands::Readers => readers_command(&config),
        Commands::Decode { frames } => decode_command(frames),
        Commands::Sign { frames, pin } => sign_command(&config, frames, pin),
        Commands::Pairings { command } => match command {
            PairingsCommand::List => list_pairings_command(&config),
            PairingsCommand::Forget { instance_uid } => {
                forget_pairing_command(&config, &instance_uid)
            }
        },
    }
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();
}
