//! pg-collections CLI - schema migrations and health checks for PostgreSQL.

use clap::{Parser, Subcommand};
use pg_collections::{
    discover_migrations, init_database, pending_migrations, Config, Database, OrmError,
    PgProvider,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "pg-collections")]
#[command(about = "Apply and inspect PostgreSQL schema migrations")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the database and apply pending migrations
    Migrate,

    /// List applied and pending migrations
    Status,

    /// Validate the migration directory without connecting
    Check {
        /// Override the configured migrations directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), OrmError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Migrate => {
            let init = init_database(&config).await?;

            if cli.output_json {
                println!("{}", json!({ "applied": init.applied }));
            } else if init.applied.is_empty() {
                println!("Database is up to date");
            } else {
                println!("Applied {} migrations:", init.applied.len());
                for name in &init.applied {
                    println!("  {}", name);
                }
            }
        }

        Commands::Status => {
            let migrations = discover_migrations(&config.migrations.dir).await?;
            let db = Database::new(Arc::new(PgProvider::connect(&config.database)?));
            let status = pending_migrations(&db, &migrations).await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "applied": status.applied,
                        "pending": status.pending,
                    }))?
                );
            } else {
                println!("Applied migrations: {}", status.applied.len());
                for record in &status.applied {
                    println!("  {} ({})", record.name, record.run_at);
                }
                println!("Pending migrations: {}", status.pending.len());
                for name in &status.pending {
                    println!("  {}", name);
                }
            }
        }

        Commands::Check { dir } => {
            let dir = dir.unwrap_or_else(|| config.migrations.dir.clone());
            let migrations = discover_migrations(&dir).await?;
            let names: Vec<&str> = migrations.iter().map(|m| m.name.as_str()).collect();

            if cli.output_json {
                println!("{}", json!({ "dir": dir, "migrations": names }));
            } else {
                println!("Found {} migrations in {}", names.len(), dir.display());
                for name in &names {
                    println!("  {}", name);
                }
            }
        }

        Commands::HealthCheck => {
            let provider = PgProvider::connect(&config.database)?;
            let result = provider.ping().await;

            if cli.output_json {
                let body = match &result {
                    Ok(latency) => json!({
                        "healthy": true,
                        "latency_ms": latency.as_millis() as u64,
                    }),
                    Err(e) => json!({ "healthy": false, "error": e.to_string() }),
                };
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("Health Check Results:");
                match &result {
                    Ok(latency) => println!("  PostgreSQL: OK ({}ms)", latency.as_millis()),
                    Err(e) => println!("  PostgreSQL: FAILED\n    Error: {}", e),
                }
            }

            result?;
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
