//! CLI argument parsing using Clap, plus the command implementations.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use crate::config::EngineConfig;
use crate::extension_events::ExtensionEvent;
use crate::model::{Payload, ScopePath, ScriptDraft};
use crate::service::ExtensionService;
use crate::store::InMemoryScriptStore;
use crate::validator;

/// extscript - validate and run extension scripts
#[derive(Parser, Debug)]
#[command(name = "extscript")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  extscript validate hook.js
  extscript run hook.js --event TAX_ID_NUMBER_VALIDATION --payload '{\"taxId\":\"CHE-1\"}'
  extscript run hook.js --event INVOICE_GENERATION --scope acme.summer-conf
")]
pub struct Cli {
    /// Engine settings file (JSON)
    #[arg(long, global = true, env = "EXTSCRIPT_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a script and print its symbol tree and metadata
    Validate {
        /// Script file
        file: PathBuf,
    },

    /// Register a script in a scratch store and fire a sync event at it
    Run {
        /// Script file
        file: PathBuf,
        /// Event name, e.g. RESERVATION_CONFIRMED
        #[arg(long)]
        event: String,
        /// Scope the script is registered at and the event fires at
        #[arg(long, default_value = "")]
        scope: String,
        /// JSON object bound as script globals
        #[arg(long)]
        payload: Option<String>,
        /// Script name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
}

/// Run the parsed command, writing its JSON report to `out`.
pub fn execute(cli: &Cli, out: &mut impl Write) -> Result<()> {
    let config = EngineConfig::load(cli.config.as_deref())?;
    match &cli.command {
        Commands::Validate { file } => validate_file(&config, file, out),
        Commands::Run {
            file,
            event,
            scope,
            payload,
            name,
        } => run_file(
            &config,
            file,
            event,
            scope,
            payload.as_deref(),
            name.as_deref(),
            out,
        ),
    }
}

fn validate_file(config: &EngineConfig, file: &Path, out: &mut impl Write) -> Result<()> {
    let source = read_script(file)?;
    let report = match validator::validate(&source) {
        Err(err) => json!({ "valid": false, "issues": err.issues }),
        Ok(tree) => {
            let service = scratch_service(config)?;
            match service.save_script(ScriptDraft::new(ScopePath::root(), script_name(file, None)?, source)) {
                Ok(definition) => json!({
                    "valid": true,
                    "contentHash": definition.content_hash,
                    "metadata": definition.metadata,
                    "symbols": tree,
                }),
                Err(crate::Error::Validation(err)) => json!({ "valid": false, "issues": err.issues }),
                Err(err) => return Err(err.into()),
            }
        }
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    if report["valid"] == Value::Bool(false) {
        bail!("{} failed validation", file.display());
    }
    Ok(())
}

fn run_file(
    config: &EngineConfig,
    file: &Path,
    event: &str,
    scope: &str,
    payload: Option<&str>,
    name: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let event: ExtensionEvent = event.parse()?;
    let scope = ScopePath::parse(scope)?;
    let payload = parse_payload(payload)?;
    let source = read_script(file)?;

    let service = scratch_service(config)?;
    let definition = service.save_script(ScriptDraft::new(scope.clone(), script_name(file, name)?, source))?;
    if definition.async_capable {
        bail!(
            "{} declares async: true; only sync scripts return a result",
            definition.id()
        );
    }
    if !definition.subscribes_to(event.event_name()) {
        bail!("{} does not subscribe to {event}", definition.id());
    }

    let result: Value = service.fire_sync(event.event_name(), &scope, &payload, Value::Null)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
    Ok(())
}

fn scratch_service(config: &EngineConfig) -> Result<ExtensionService> {
    Ok(ExtensionService::from_config(
        config,
        Arc::new(InMemoryScriptStore::new()),
    )?)
}

fn read_script(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

fn script_name(file: &Path, name: Option<&str>) -> Result<String> {
    if let Some(name) = name {
        return Ok(name.to_string());
    }
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .with_context(|| format!("cannot derive a script name from {}", file.display()))
}

fn parse_payload(raw: Option<&str>) -> Result<Payload> {
    let Some(raw) = raw else {
        return Ok(Payload::new());
    };
    match serde_json::from_str::<Value>(raw).context("parsing --payload")? {
        Value::Object(map) => Ok(map),
        other => bail!("--payload must be a JSON object, got {other}"),
    }
}
