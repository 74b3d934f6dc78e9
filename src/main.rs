use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use kolide::configuration::{Backend, Config};
use kolide::datastore::{self, migrations};
use log::{error, info};
use serde_json::json;

#[derive(Parser)]
#[command(name = "kolide")]
#[command(version)]
#[command(about = "Kolide datastore administration")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides `datastore.backend`
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Overrides `datastore.path`
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    PrepareDb,
    /// Erase every table, schema metadata included
    DropDb {
        /// Confirm the destructive operation
        #[arg(long)]
        yes: bool,
    },
    /// Print the backend and schema version as JSON
    Info,
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(Path::new(path))?,
        None => {
            let mut config = Config::default();
            config.apply_env()?;
            config
        }
    };
    if let Some(backend) = cli.backend {
        config.datastore.backend = backend;
    }
    if let Some(path) = &cli.db_path {
        config.datastore.path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli, config: Config) -> Result<(), Box<dyn Error>> {
    let ds = datastore::open(&config.datastore)?;

    match cli.command {
        Command::PrepareDb => {
            ds.migrate()?;
            info!(
                "{} datastore prepared at schema version {}",
                ds.name(),
                ds.schema_version()?
            );
        }
        Command::DropDb { yes } => {
            if !yes {
                return Err("refusing to drop the datastore without --yes".into());
            }
            ds.drop_all()?;
            info!("{} datastore dropped", ds.name());
        }
        Command::Info => {
            let report = json!({
                "backend": ds.name(),
                "schema_version": ds.schema_version()?,
                "latest_version": migrations::latest_version(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG, when set, wins over the configured level
    env_logger::Builder::new()
        .filter_level(config.logging.level_filter().unwrap_or(log::LevelFilter::Info))
        .parse_default_env()
        .format_target(false)
        .init();

    if let Err(e) = run(cli, config) {
        error!("{}", e);
        std::process::exit(1);
    }
}
