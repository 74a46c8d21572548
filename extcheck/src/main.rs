//! extcheck: run external check steps and inspect check execution status.
//!
//! `run` launches a command with the orchestration context injected and
//! prints the messages it reports. `checks`, `executions` and `latest` read a
//! storage snapshot and print resolved check state as JSON.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use extcheck::checks::{fetch_checks, fetch_execution_for_latest_materialization, fetch_executions};
use extcheck::core::protocol::{EnvVars, Extras};
use extcheck::core::types::{
    AssetKey, ExecutionContext, ExternalCheckDefinition, ResolvedExecution,
};
use extcheck::error::ExternalExecutionError;
use extcheck::exit_codes;
use extcheck::io::client::{ExternalClient, RunRequest, SubprocessClient};
use extcheck::io::config::load_config;
use extcheck::io::snapshot::{SnapshotStore, load_snapshot};
use extcheck::io::store::Stores;
use extcheck::logging;

#[derive(Parser)]
#[command(
    name = "extcheck",
    version,
    about = "Run external check steps and reconcile check execution status"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch a command with the orchestration context injected and print its messages.
    Run {
        /// Client config (TOML). Defaults apply when the file is missing.
        #[arg(long, default_value = "extcheck.toml")]
        config: PathBuf,
        /// Working directory for the command.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Extra env var for the child (`KEY=VALUE`, repeatable).
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        /// Extra passed verbatim to the child (`KEY=VALUE`; VALUE may be JSON).
        #[arg(long = "extra", value_parser = parse_key_val)]
        extras: Vec<(String, String)>,
        /// Run id reported to the child. Generated when omitted.
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long, default_value = "adhoc")]
        job: String,
        #[arg(long, default_value = "external")]
        step: String,
        /// Asset the step targets (`a/b`, repeatable).
        #[arg(long = "asset")]
        assets: Vec<String>,
        #[arg(long)]
        partition: Option<String>,
        /// Program and arguments to run.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// List checks defined for an asset.
    Checks {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        asset: String,
        #[arg(long)]
        check: Option<String>,
    },
    /// List executions of a check, newest first, with resolved status.
    Executions {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        asset: String,
        #[arg(long)]
        check: String,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        /// Storage id of the last execution of the previous page.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Print the execution that describes the asset's latest materialization.
    Latest {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        asset: String,
        #[arg(long)]
        check: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            cwd,
            env,
            extras,
            run_id,
            job,
            step,
            assets,
            partition,
            command,
        } => {
            let context = ExecutionContext {
                run_id: run_id.unwrap_or_else(generate_run_id),
                job_name: job,
                step_key: step,
                asset_keys: assets.iter().map(String::as_str).map(AssetKey::parse).collect(),
                partition_key: partition,
                retry_number: 0,
            };
            cmd_run(&config, cwd, env.into_iter().collect(), parse_extras(extras), &context, command)
        }
        Command::Checks {
            snapshot,
            asset,
            check,
        } => cmd_checks(&snapshot, &AssetKey::parse(&asset), check.as_deref()),
        Command::Executions {
            snapshot,
            asset,
            check,
            limit,
            cursor,
        } => cmd_executions(
            &snapshot,
            &AssetKey::parse(&asset),
            &check,
            limit,
            cursor.as_deref(),
        ),
        Command::Latest {
            snapshot,
            asset,
            check,
        } => cmd_latest(&snapshot, &AssetKey::parse(&asset), &check),
    }
}

fn cmd_run(
    config_path: &Path,
    cwd: Option<PathBuf>,
    env: EnvVars,
    extras: Extras,
    context: &ExecutionContext,
    command: Vec<String>,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let client = SubprocessClient::new(cfg);
    let mut request = RunRequest::new(command, context).extras(extras).env(env);
    if let Some(dir) = cwd {
        request = request.cwd(dir);
    }

    match client.run(request) {
        Ok(report) => {
            for message in &report.messages {
                println!("{}", serde_json::to_string(message).context("serialize message")?);
            }
            Ok(exit_codes::OK)
        }
        Err(ExternalExecutionError::Failed { code }) => {
            eprintln!("external process failed with exit code {code:?}");
            Ok(exit_codes::EXTERNAL_FAILED)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_checks(snapshot_path: &Path, asset: &AssetKey, check: Option<&str>) -> Result<i32> {
    let snapshot = load_snapshot(snapshot_path)?;
    let checks = fetch_checks(&snapshot, &snapshot.checks, asset, check)?;
    print_json(&checks)?;
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct ExecutionsPage {
    executions: Vec<ResolvedExecution>,
    /// Pass as `--cursor` to fetch the next page.
    cursor: Option<String>,
}

fn cmd_executions(
    snapshot_path: &Path,
    asset: &AssetKey,
    check: &str,
    limit: usize,
    cursor: Option<&str>,
) -> Result<i32> {
    let snapshot = load_snapshot(snapshot_path)?;
    let definition = find_check(&snapshot, asset, check)?;
    let executions = fetch_executions(Stores::from_single(&snapshot), &definition, limit, cursor)?;
    let cursor = executions.last().map(|e| e.record.id.to_string());
    print_json(&ExecutionsPage { executions, cursor })?;
    Ok(exit_codes::OK)
}

fn cmd_latest(snapshot_path: &Path, asset: &AssetKey, check: &str) -> Result<i32> {
    let snapshot = load_snapshot(snapshot_path)?;
    let definition = find_check(&snapshot, asset, check)?;
    match fetch_execution_for_latest_materialization(Stores::from_single(&snapshot), &definition)? {
        Some(execution) => {
            print_json(&execution)?;
            Ok(exit_codes::OK)
        }
        None => Ok(exit_codes::NO_CURRENT_EXECUTION),
    }
}

fn find_check(
    snapshot: &SnapshotStore,
    asset: &AssetKey,
    name: &str,
) -> Result<ExternalCheckDefinition> {
    fetch_checks(snapshot, &snapshot.checks, asset, Some(name))?
        .into_iter()
        .next()
        .cloned()
        .ok_or_else(|| anyhow!("no check '{name}' defined for asset {asset}"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Values that parse as JSON are passed structured; anything else as a string.
fn parse_extras(pairs: Vec<(String, String)>) -> Extras {
    pairs
        .into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            (key, value)
        })
        .collect()
}

fn generate_run_id() -> String {
    format!("local-{}", Utc::now().format("%Y%m%d%H%M%S%3f"))
}
