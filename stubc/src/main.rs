//! stubc CLI

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use stubc::{Repository, StubError, StubcConfig};

#[derive(Parser)]
#[command(name = "stubc", version, about = "Contracts for external functions")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load stub files and report load-time errors
    Check {
        /// Stub files or directories of stub files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print every loaded contract with its cases, then the initialized globals
        #[arg(long)]
        list: bool,
    },
    /// Parse and dump AST (debug)
    Parse {
        /// Stub file to parse
        file: PathBuf,
    },
    /// Tokenize and dump tokens (debug)
    Tokens {
        /// Stub file to tokenize
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Check {
            paths,
            config,
            list,
        } => check(&paths, config.as_deref(), list),
        Command::Parse { file } => parse_file(&file),
        Command::Tokens { file } => tokenize_file(&file),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns `Ok(false)` when some file failed to load
fn check(
    paths: &[PathBuf],
    config: Option<&Path>,
    list: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => StubcConfig::load(path)?,
        None => StubcConfig::default(),
    };
    let mut repo = Repository::with_config(config.loader);

    let mut ok = true;
    let mut files = 0;
    for path in paths {
        let report = if path.is_dir() {
            repo.load_dir(path)?
        } else {
            repo.load_files([path])
        };
        report.report()?;
        files += report.loaded.len();
        ok &= report.is_ok();
    }

    if list {
        let mut contracts: Vec<_> = repo.contracts().collect();
        contracts.sort_by(|a, b| a.name().cmp(b.name()));
        for contract in contracts {
            let labels: Vec<&str> = contract.cases().iter().map(|c| c.label.node.as_str()).collect();
            if labels.is_empty() {
                println!("{}", contract.signature());
            } else {
                println!("{}  [{}]", contract.signature(), labels.join(", "));
            }
        }
        let mut initializers: Vec<_> = repo.initializers().map(|c| c.name()).collect();
        initializers.sort_unstable();
        for name in initializers {
            println!("global {name}  [initializer]");
        }
    }

    if ok {
        println!("✓ {} contracts loaded from {} files", repo.len(), files);
    }
    Ok(ok)
}

fn read(path: &Path) -> Result<(String, String), StubError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| StubError::io_error(format!("failed to read {}: {e}", path.display())))?;
    Ok((path.display().to_string(), source))
}

fn parse_file(path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let (filename, source) = read(path)?;
    let parsed = stubc::lexer::tokenize(&source)
        .and_then(|tokens| stubc::parser::parse(&filename, &source, tokens));
    match parsed {
        Ok(ast) => {
            println!("{}", serde_json::to_string_pretty(&ast)?);
            Ok(true)
        }
        Err(e) => {
            stubc::error::report_error(&filename, &source, &e)?;
            Ok(false)
        }
    }
}

fn tokenize_file(path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let (filename, source) = read(path)?;
    match stubc::lexer::tokenize(&source) {
        Ok(tokens) => {
            for (tok, span) in &tokens {
                println!("{:?} @ {}..{}", tok, span.start, span.end);
            }
            Ok(true)
        }
        Err(e) => {
            stubc::error::report_error(&filename, &source, &e)?;
            Ok(false)
        }
    }
}
