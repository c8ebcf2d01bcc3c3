//! BIM script runner
//!
//! Runs a script file inside a sandbox against the recording backend and
//! prints the result envelope, plus every capability call the script made,
//! as JSON on stdout.
//!
//! Usage:
//!   bimscript run walls.js --fixtures responses.json --deny viewer
//!   bimscript schema
//!
//! Exits with status 1 when the script faults.

use anyhow::{Context, Result, bail};
use bimscript_sandbox::fakes::RecordingBackend;
use bimscript_sandbox::registry::NAMESPACES;
use bimscript_sandbox::{
    CapabilityBackend, EvalOptions, Permission, Sandbox, SandboxConfig, SandboxError,
};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "bimscript")]
#[command(about = "Run BIM scripts in a resource-limited sandbox")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a script file
    Run(RunArgs),
    /// Print every namespace and method scripts can call
    Schema {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Script to evaluate
    file: PathBuf,

    /// Sandbox configuration (TOML with [permissions] and [limits])
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON object of canned responses keyed by "namespace.method"
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Wall-clock budget in milliseconds (overrides the config file)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Deny a namespace (repeatable)
    #[arg(long, value_name = "NS")]
    deny: Vec<Permission>,

    /// Allow a namespace (repeatable)
    #[arg(long, value_name = "NS")]
    allow: Vec<Permission>,

    /// Force (true) or disable (false) typed-dialect handling
    #[arg(long)]
    alt_dialect: Option<bool>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let outcome = match args.command {
        Command::Run(run) => run_script(&run),
        Command::Schema { json } => print_schema(json).map(|()| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Layers the config file, then `--timeout-ms`, `--allow` and `--deny`.
fn build_config(args: &RunArgs) -> Result<SandboxConfig> {
    let mut config = match &args.config {
        Some(path) => SandboxConfig::load_from(path)?,
        None => SandboxConfig::default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_timeout_ms(timeout_ms);
    }
    for &permission in &args.allow {
        config = config.with_permission(permission, true);
    }
    for &permission in &args.deny {
        if args.allow.contains(&permission) {
            bail!("'{permission}' is both allowed and denied");
        }
        config = config.with_permission(permission, false);
    }
    Ok(config)
}

fn load_backend(fixtures: Option<&Path>) -> Result<RecordingBackend> {
    let Some(path) = fixtures else {
        return Ok(RecordingBackend::new());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixtures {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    Ok(RecordingBackend::from_fixtures(&value)?)
}

/// Returns whether the script succeeded.
fn run_script(args: &RunArgs) -> Result<bool> {
    let code = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let config = build_config(args)?;
    let backend = Arc::new(load_backend(args.fixtures.as_deref())?);

    let options = EvalOptions {
        filename: Some(args.file.display().to_string()),
        use_alt_dialect: args.alt_dialect,
    };

    info!(file = %args.file.display(), "Running script");
    let outcome = Sandbox::scoped(backend.clone() as Arc<dyn CapabilityBackend>, &config, |sandbox| {
        debug!(session = %sandbox.id(), namespaces = ?sandbox.installed_namespaces(), "Sandbox ready");
        sandbox.eval_with(&code, &options)
    });

    let calls = serde_json::to_value(backend.calls())?;
    let (ok, report) = match outcome {
        Ok(result) => (true, json!({"ok": true, "result": result, "calls": calls})),
        Err(SandboxError::Script(err)) => (false, json!({"ok": false, "error": err, "calls": calls})),
        Err(other) => return Err(other.into()),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ok)
}

fn schema_report() -> Value {
    Value::Array(
        NAMESPACES
            .iter()
            .map(|ns| {
                json!({
                    "namespace": ns.name,
                    "permission": ns.permission,
                    "grantedByDefault": ns.permission.granted_by_default(),
                    "methods": ns.methods.iter().map(|m| m.signature()).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}

fn print_schema(as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&schema_report())?);
        return Ok(());
    }
    for ns in NAMESPACES {
        let default = if ns.permission.granted_by_default() {
            "granted by default"
        } else {
            "denied by default"
        };
        println!("bim.{} ({default})", ns.name);
        for method in ns.methods {
            println!("  {}", method.signature());
        }
    }
    Ok(())
}
