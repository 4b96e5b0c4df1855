use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sqlgrade::config::{Config, DATABASE_ENV};

mod commands;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Check SQL statements against a reference on a live database", long_about = None)]
struct Cli {
    /// Configuration file (default: $SQLGRADE_CONFIG or ./sqlgrade.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding the configured path
    #[arg(long, global = true, env = DATABASE_ENV)]
    database: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one statement (rolled back unless --commit)
    Run {
        /// SQL to run
        #[arg(required_unless_present = "file")]
        sql: Option<String>,

        /// Read the SQL from a file ("-" for stdin)
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Keep the statement's effects
        #[arg(long)]
        commit: bool,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Check a submission against a reference statement
    Validate {
        /// Known-correct SQL
        #[arg(long, required_unless_present = "reference_file")]
        reference: Option<String>,

        /// Read the reference from a file
        #[arg(long, conflicts_with = "reference")]
        reference_file: Option<PathBuf>,

        /// SQL to check
        #[arg(long, required_unless_present = "submission_file")]
        submission: Option<String>,

        /// Read the submission from a file
        #[arg(long, conflicts_with = "submission")]
        submission_file: Option<PathBuf>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Serve the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.database {
        config.database.path = path;
        config.validate()?;
    }

    match cli.command {
        Commands::Run {
            sql,
            file,
            commit,
            json,
        } => {
            commands::run::execute(
                &config,
                commands::run::RunOptions {
                    sql,
                    file,
                    commit,
                    json,
                },
            )?;
        }
        Commands::Validate {
            reference,
            reference_file,
            submission,
            submission_file,
            json,
        } => {
            let exit_code = commands::validate::execute(
                &config,
                commands::validate::ValidateOptions {
                    reference,
                    reference_file,
                    submission,
                    submission_file,
                    json,
                },
            )?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        Commands::Serve { host, port } => {
            let options = commands::serve::ServeOptions::from_config(&config, host, port);
            let verifier = commands::open_verifier(&config)?;
            commands::serve::execute(options, verifier)?;
        }
    }

    Ok(())
}
