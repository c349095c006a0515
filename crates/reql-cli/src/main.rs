use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reql_core::{Config, Diagnostic, DialectConfig, Principal, Severity};
use reql_engine::{ExecutionOutcome, Federation};
use reql_sql::{extract_references, ReqlParser};

mod store;

use store::DirectoryBackend;

/// ReQL - SQL over the results of other saved queries
#[derive(Parser)]
#[command(name = "reql")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: reql.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a statement and print its syntax tree
    Parse {
        /// File holding the statement
        file: PathBuf,

        /// SQL dialect (sqlite or postgres)
        #[arg(short, long)]
        dialect: Option<DialectConfig>,

        /// Reject embedded blocks
        #[arg(long)]
        no_macros: bool,
    },

    /// List the query references of a statement as JSON
    Refs {
        /// File holding the statement
        file: PathBuf,
    },

    /// Run a statement against a directory of saved queries
    Run {
        /// File holding the statement
        file: PathBuf,

        /// Directory of saved query files
        #[arg(short, long)]
        store: PathBuf,

        /// Acting user id
        #[arg(long, default_value_t = 1)]
        user: u64,

        /// Acting organization id
        #[arg(long, default_value_t = 1)]
        org: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref(), cli.verbose)?;
    config.apply_env()?;

    if cli.verbose {
        eprintln!("{} dialect: {:?}", "Using".cyan(), config.dialect);
    }

    match cli.command {
        Commands::Parse {
            file,
            dialect,
            no_macros,
        } => {
            if let Some(dialect) = dialect {
                config.dialect = dialect;
            }
            if no_macros {
                config.macros = false;
            }
            parse_command(&config, &file)
        }
        Commands::Refs { file } => refs_command(&config, &file),
        Commands::Run {
            file,
            store,
            user,
            org,
        } => run_command(&config, &file, &store, Principal::new(user, org), cli.verbose).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let config = if let Some(config_path) = path {
        Config::from_file(config_path)?
    } else if Path::new("reql.toml").exists() {
        Config::from_file(Path::new("reql.toml"))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };
    Ok(config)
}

fn read_statement(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn parser(config: &Config) -> Result<ReqlParser> {
    ReqlParser::from_config(config).context("Failed to build the parser")
}

/// Parse command - print the syntax tree or the syntax error
fn parse_command(config: &Config, file: &Path) -> Result<()> {
    let text = read_statement(file)?;
    let parser = parser(config)?;

    match parser.parse_with_diagnostic(&text) {
        Ok(tree) => {
            print!("{}", tree);
            Ok(())
        }
        Err(diagnostic) => {
            print_diagnostic(&diagnostic, file);
            std::process::exit(1);
        }
    }
}

/// Refs command - print the query references as JSON
fn refs_command(config: &Config, file: &Path) -> Result<()> {
    let text = read_statement(file)?;
    let parser = parser(config)?;

    let tree = match parser.parse_with_diagnostic(&text) {
        Ok(tree) => tree,
        Err(diagnostic) => {
            print_diagnostic(&diagnostic, file);
            std::process::exit(1);
        }
    };

    let references = extract_references(&tree);
    println!("{}", serde_json::to_string_pretty(&references)?);
    Ok(())
}

/// Run command - federate the statement and print the result as JSON
async fn run_command(
    config: &Config,
    file: &Path,
    store: &Path,
    principal: Principal,
    verbose: bool,
) -> Result<()> {
    let text = read_statement(file)?;
    let backend = DirectoryBackend::load(store)?;

    if backend.is_empty() {
        eprintln!("{} {}", "No saved queries found in".yellow(), store.display());
    } else if verbose {
        eprintln!(
            "{} {} saved queries from {}",
            "Loaded".cyan(),
            backend.len(),
            store.display()
        );
    }

    let federation = Federation::new(config, Arc::new(backend))?;

    // Ctrl-C cancels the running statement instead of killing the process
    let token = federation.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    match federation.run(&text, &principal).await {
        Ok(ExecutionOutcome::Completed(result)) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if verbose {
                eprintln!("{} {} rows", "✓".green(), result.row_count());
            }
            Ok(())
        }
        Ok(outcome) => {
            if let Some(diagnostic) = outcome.to_diagnostic() {
                print_diagnostic(&diagnostic, file);
            }
            if outcome == ExecutionOutcome::Cancelled {
                std::process::exit(130);
            }
            Ok(())
        }
        Err(error) => {
            print_diagnostic(&error.to_diagnostic(), file);
            std::process::exit(1);
        }
    }
}

fn print_diagnostic(diagnostic: &Diagnostic, file: &Path) {
    let label = match diagnostic.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warn => "warning".yellow().bold(),
        Severity::Info => "info".cyan().bold(),
    };

    eprintln!("{} [{}]: {}", label, diagnostic.code, diagnostic.message);
    if let Some(location) = &diagnostic.location {
        let location = location.clone().in_file(file.display().to_string());
        eprintln!("  {} {}", "-->".bright_blue(), location);
    }
    if let Some(hint) = &diagnostic.hint {
        eprintln!("  {} {}", "hint:".bold(), hint);
    }
}
