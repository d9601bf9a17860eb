mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schemata_config::{ConfigLoader, MigrateConfig};
use schemata_db::MigrationGenerator;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemata", version, about = "Versioned SQL migrations")]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ./schemata.{yml,yaml,toml} if present.
    #[arg(long, global = true, env = "SCHEMATA_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL, e.g. sqlite://data/app.db. Overrides DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory holding the NNN-name.sql files. Overrides MIGRATIONS_DIR.
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the next numbered, empty migration file
    New {
        /// Migration name, e.g. add-user-preferences
        name: Option<String>,
    },
    /// Apply all pending migrations in order
    Up,
    /// Show applied and pending migrations
    Status {
        /// Print machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Clear a run lock left behind by a crashed run
    Unlock,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,schemata={level},schemata_db={level},schemata_config={level}"
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    // Checked before loading config.
    if let Command::New { name } = &cli.command {
        if name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            eprintln!("Please provide a migration name");
            eprintln!("Example: schemata new add-user-preferences");
            return Ok(ExitCode::FAILURE);
        }
    }

    let config = load_config(&cli)?;
    debug!("migrations directory: {}", config.migrations_dir.display());

    match cli.command {
        Command::New { name } => {
            let name = name.unwrap_or_default();
            let generator = MigrationGenerator::new(&config.migrations_dir, config.sequence_width);
            let file_name = generator.generate(&name).with_context(|| {
                format!("failed to create migration in {}", generator.dir().display())
            })?;
            println!("Created new migration: {file_name}");
        }
        Command::Up => {
            let applied = schemata_db::apply(&config)?;
            report::print_apply(&applied);
        }
        Command::Status { json } => {
            let status = schemata_db::status(&config)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status).context("failed to serialize status")?
                );
            } else {
                report::print_status(&status);
            }
        }
        Command::Unlock => {
            if schemata_db::unlock(&config)? {
                println!("Removed run lock.");
            } else {
                println!("No run lock was held.");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn load_config(cli: &Cli) -> Result<MigrateConfig> {
    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let mut loader = ConfigLoader::new(cwd);
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load()?;

    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir = dir.clone();
    }
    Ok(config)
}
