//! mysql-client - command line entry point.
//!
//! Checks connectivity, applies migrations and lists recorded schema
//! versions for one MySQL schema.

use clap::Parser;
use mysql_client::config::{Cli, Command};
use mysql_client::MysqlClient;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(
        command = ?cli.command,
        "Starting mysql-client v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = cli.client_config()?;
    let client = MysqlClient::connect(config).await?;

    let result = match cli.command {
        Command::Ping => client.live_pool().await.map(|_| {
            println!("ok");
        }),
        Command::Migrate => client.migrate().await.map(|report| {
            for script in &report.applied {
                println!("applied  {script}");
            }
            for script in &report.verified {
                println!("verified {script}");
            }
            if report.is_noop() {
                println!("schema is up to date");
            }
        }),
        Command::Versions => client.schema_versions().await.map(|versions| {
            for v in versions {
                println!(
                    "{:>4}  {:<7}  {:>8}  {}  {}",
                    v.id,
                    v.status.as_str(),
                    v.execution_time,
                    v.checksum,
                    v.script
                );
            }
        }),
    };

    client.close().await;

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Command failed");
        return Err(e.into());
    }
    Ok(())
}
