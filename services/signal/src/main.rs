//! Main Entrypoint for the Enunciate signaling tool
//!
//! This binary is responsible for:
//! 1. Loading the voice configuration from the environment.
//! 2. Initializing logging.
//! 3. Either exchanging one SDP offer for an answer against the realtime
//!    calls endpoint, or printing the `session.update` payload for a
//!    turn-taking mode.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use enunciate_voice::{
    HttpSignaling, InputMode, VoiceConfig,
    protocol::ClientEvent,
    session::turn_taking_patch,
    transport::SignalingClient,
};
use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "signal")]
#[command(version)]
#[command(about = "Realtime voice signaling tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Post an SDP offer and print the SDP answer
    Exchange {
        /// File holding the offer, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        offer: String,

        /// Write the answer here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the `session.update` message for a turn-taking mode
    Session {
        #[arg(short, long, value_enum, default_value_t = ModeArg::Tap)]
        mode: ModeArg,

        /// Instructions to include; falls back to SESSION_INSTRUCTIONS
        #[arg(long)]
        instructions: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Tap,
    Auto,
}

impl From<ModeArg> for InputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Tap => InputMode::Tap,
            ModeArg::Auto => InputMode::Auto,
        }
    }
}

fn read_offer(source: &str) -> anyhow::Result<String> {
    let offer = if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read offer from stdin")?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("Failed to read offer from {source}"))?
    };
    anyhow::ensure!(!offer.trim().is_empty(), "The SDP offer is empty");
    Ok(offer)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = VoiceConfig::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(io::stderr)
        .init();

    // --- 3. Run the requested command ---
    match cli.command {
        Command::Exchange { offer, output } => {
            let offer = read_offer(&offer)?;
            info!(
                endpoint = %config.signaling_url,
                model = %config.model,
                authenticated = config.api_key.is_some(),
                "Exchanging SDP offer..."
            );
            let signaling =
                HttpSignaling::from_config(&config).context("Failed to build HTTP client")?;
            let answer = signaling
                .exchange_offer(&offer)
                .await
                .context("Signaling exchange failed")?;

            match output {
                Some(path) => {
                    fs::write(&path, &answer)
                        .with_context(|| format!("Failed to write answer to {}", path.display()))?;
                    info!(path = %path.display(), "Answer written.");
                }
                None => print!("{answer}"),
            }
        }
        Command::Session { mode, instructions } => {
            let mut patch = turn_taking_patch(mode.into());
            patch.instructions = instructions.or(config.instructions);
            let message = ClientEvent::session_update(patch);
            println!(
                "{}",
                serde_json::to_string_pretty(&message).context("Failed to encode session.update")?
            );
        }
    }

    Ok(())
}
