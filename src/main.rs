//! extscript - validate and run extension scripts from the command line.

#![forbid(unsafe_code)]

use std::io::{self, Write};

use anyhow::Result;
use clap::Parser;
use extscript::cli;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = main_impl() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    cli::execute(&cli, &mut out)?;
    out.flush()?;
    Ok(())
}
