//! jobgate CLI: runs the trigger service and helps author configuration.

use clap::{Parser, Subcommand, ValueEnum};
use jobgate_core::event::EventType;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "jobgate")]
#[command(about = "Trigger CI jobs from message-bus events", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "JOBGATE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume trigger events and create jobs
    Serve(commands::serve::ServeArgs),
    /// Validate a static configuration file
    Validate {
        /// Path to the configuration file
        #[arg(env = "JOBGATE_CONFIG", default_value = "jobgate.kdl")]
        path: PathBuf,
    },
    /// Parse the repository configuration of a local checkout and print its jobs
    CheckInrepo {
        /// Root of the checkout
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Repository identifier (`org/repo`); with --config, also default,
        /// validate and admit the jobs
        #[arg(long)]
        repo: Option<String>,
        /// Static configuration to validate against
        #[arg(long, env = "JOBGATE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Publish a trigger event read from a JSON file
    Publish {
        /// NATS server URL
        #[arg(long, env = "JOBGATE_NATS_URL", default_value = "nats://localhost:4222")]
        nats_url: String,
        /// Subject to publish on
        #[arg(long)]
        subject: String,
        /// Kind of job the event triggers
        #[arg(long = "type", value_enum)]
        event_type: EventKind,
        /// JSON event file
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EventKind {
    Periodic,
    Presubmit,
    Postsubmit,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Periodic => EventType::Periodic,
            EventKind::Presubmit => EventType::Presubmit,
            EventKind::Postsubmit => EventType::Postsubmit,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve(args) => {
            commands::serve::run(args).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path).await?;
        }
        Commands::CheckInrepo { dir, repo, config } => {
            commands::check_inrepo(&dir, repo.as_deref(), config.as_deref()).await?;
        }
        Commands::Publish {
            nats_url,
            subject,
            event_type,
            file,
        } => {
            commands::publish(&nats_url, subject, event_type.into(), &file).await?;
        }
    }

    Ok(())
}
