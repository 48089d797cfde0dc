//! Outbox relay - moves committed outbox rows from SQLite to Kafka.

use clap::{Parser, Subcommand};
use outbox_database::AsyncDatabase;
use outbox_relay::broker::kafka::KafkaProducer;
use relay_bin::{run_relay, shutdown_on_signal, status_report, SERVICE_NAME};
use relay_config::{init_logging, Config, Paths};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outbox relay command-line interface.
#[derive(Parser)]
#[command(name = "outbox-relay")]
#[command(about = "Relays transactional outbox messages to Kafka")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.outbox-relay
    #[arg(long, env = "OUTBOX_RELAY_HOME", global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until interrupted
    Run {
        /// Also log to stderr
        #[arg(short, long)]
        foreground: bool,
    },
    /// Print outbox statistics as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
        config.validate()?;
    }

    match cli.command.unwrap_or(Commands::Run { foreground: true }) {
        Commands::Run { foreground } => {
            init_logging(SERVICE_NAME, &config.log_level, &paths, foreground)?;
            run(config, paths).await
        }
        Commands::Status => {
            let db = AsyncDatabase::open(&config.database_file(&paths)).await?;
            let report = status_report(&db).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            db.close().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: Config, paths: Paths) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let db = AsyncDatabase::open(&config.database_file(&paths)).await?;
    let producer = Arc::new(KafkaProducer::new(
        &config.kafka.servers,
        config
            .kafka
            .properties
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str())),
    )?);

    let cancel = CancellationToken::new();
    shutdown_on_signal(cancel.clone());

    let code = run_relay(&config, db, producer.clone(), &cancel).await;

    let flush_timeout = config.kafka.flush_timeout();
    match tokio::task::spawn_blocking(move || producer.flush(flush_timeout)).await? {
        Ok(()) => info!("Kafka producer flushed"),
        Err(e) => warn!(error = %e, "Kafka producer flush incomplete"),
    }

    Ok(ExitCode::from(code as u8))
}
