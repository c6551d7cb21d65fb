//! Rowguard Command-Line Client
//!
//! Filters queries and checks entities against the access rules of a unit
//! configuration file.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::Parser;
use commands::Command;
use formatter::OutputFormat;

/// Rowguard Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "rowguard")]
#[command(version, about = "Row-level access rules for entity queries")]
pub struct Args {
    /// Unit configuration file (mapping, rules, security context)
    #[arg(short, long, default_value = "rowguard.json")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rowguard=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let formatter = formatter::create_formatter(args.format);

    match commands::execute(&args.config, &args.command, &*formatter) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
