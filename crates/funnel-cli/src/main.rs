use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "funnel",
    about = "Funnel: drive a singular update queue",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Queue configuration file (funnel.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Override how long SLOW operations hold the queue, in milliseconds
    #[arg(long, global = true)]
    slow_delay_ms: Option<u64>,
    /// Override the artificial per-operation delay, in milliseconds
    #[arg(long, global = true)]
    processing_delay_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines operation script.
    ///
    /// Each line is `{"kind": "SET", "payload": {...}, "client": "c1"}`.
    /// Lines sharing a client run in file order; distinct clients run
    /// concurrently. Blank lines and lines starting with `#` are skipped.
    Run {
        /// Path to the script
        script: PathBuf,
        /// Print the final state after shutdown
        #[arg(long)]
        show_state: bool,
        /// Print the process log after shutdown
        #[arg(long)]
        show_log: bool,
    },
    /// Increment one counter from many concurrent clients and verify the total
    Stress {
        #[arg(long, default_value = "10")]
        clients: usize,
        /// Increments per client
        #[arg(long, default_value = "10")]
        ops: usize,
        #[arg(long, default_value = "counter")]
        key: String,
    },
    /// Print the effective queue configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,funnel=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = commands::load_config(cli.config.as_deref())?;
    if let Some(ms) = cli.slow_delay_ms {
        config.slow_delay_ms = ms;
    }
    if let Some(ms) = cli.processing_delay_ms {
        config.processing_delay_ms = ms;
    }

    match cli.command {
        Commands::Run {
            script,
            show_state,
            show_log,
        } => commands::run::run(config, &script, show_state, show_log).await,
        Commands::Stress { clients, ops, key } => {
            commands::stress::stress(config, clients, ops, &key).await
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
