mod replay;

use std::io::stdout;

use clap::{Parser, Subcommand, ValueEnum};
use onecard_bridge::{activation, ActivationEvent};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::replay::{MemoryAdapter, Step};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("Failed to write the report: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AdapterMode {
    /// The device has a reader and it is turned on.
    Enabled,

    /// The device has a reader but it is turned off.
    Disabled,

    /// The device has no reader.
    Absent,
}

#[derive(Subcommand)]
enum Command {
    /// Replays a host timeline against the bridge and prints what the consumer observes.
    /// Steps: resume, pause, attach, link:<uri>, adapter:on, adapter:off.
    Replay {
        /// The link the host is launched with.
        #[arg(long)]
        launch: Option<String>,

        #[arg(long, value_enum, default_value_t = AdapterMode::Enabled)]
        adapter: AdapterMode,

        steps: Vec<Step>,
    },

    /// Checks whether a link would be routed to the consumer.
    Check { link: String },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pretty-prints the output JSON.
    #[arg(short, long)]
    pretty: bool,
}

#[derive(Serialize)]
struct CheckReport {
    link: String,
    eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            launch,
            adapter,
            steps,
        } => {
            let adapter = match adapter {
                AdapterMode::Enabled => Some(MemoryAdapter::new(true)),
                AdapterMode::Disabled => Some(MemoryAdapter::new(false)),
                AdapterMode::Absent => None,
            };

            let report = replay::replay(adapter, launch.as_deref(), &steps);
            write(&report, cli.pretty)
        }
        Command::Check { link } => {
            let reason = ActivationEvent::parse(&link)
                .err()
                .map(|e: activation::Error| e.to_string());

            let report = CheckReport {
                eligible: reason.is_none(),
                link,
                reason,
            };
            write(&report, cli.pretty)
        }
    }
}

fn write<T>(value: &T, pretty: bool) -> Result<()>
where
    T: Serialize,
{
    match pretty {
        true => serde_json::to_writer_pretty(stdout(), value)?,
        _ => serde_json::to_writer(stdout(), value)?,
    };

    println!();
    Ok(())
}
