//! AutoTest operator CLI.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "autotest")]
#[command(about = "AutoTest operator CLI", long_about = None)]
struct Cli {
    /// Webhook server URL
    #[arg(long, env = "AUTOTEST_URL", default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a course file
    Validate {
        /// Path to the course file
        #[arg(default_value = "course.kdl")]
        path: PathBuf,
    },
    /// Show how long a student must wait for feedback
    Wait {
        /// Deliverable feedback delay in seconds
        #[arg(long)]
        delay: u64,
        /// When feedback was last given (RFC 3339)
        #[arg(long)]
        last: DateTime<Utc>,
        /// Time of the new request (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Send a saved webhook payload to a running server
    Replay {
        /// Path to the JSON payload
        payload: PathBuf,
        /// GitHub event type
        #[arg(long, value_enum)]
        event: Event,
        /// Sign the payload with this webhook secret
        #[arg(long, env = "GITHUB_WEBHOOK_SECRET")]
        secret: Option<String>,
    },
    /// Show queued and executing jobs
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Event {
    Push,
    CommitComment,
}

impl Event {
    pub fn header_value(self) -> &'static str {
        match self {
            Event::Push => "push",
            Event::CommitComment => "commit_comment",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Wait { delay, last, at } => {
            println!("{}", commands::wait(delay, last, at.unwrap_or_else(Utc::now)));
        }
        Commands::Replay {
            payload,
            event,
            secret,
        } => {
            commands::remote::replay(&cli.url, &payload, event, secret.as_deref()).await?;
        }
        Commands::Status => {
            commands::remote::status(&cli.url).await?;
        }
    }

    Ok(())
}
