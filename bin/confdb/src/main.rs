//! confdb - Configuration database command line tool
//!
//! Reads go through the layered engine; writes go to an in-process writer
//! over the local bus, so the tool works without a running arbiter.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use confdb_client::{CancellationToken, Client};
use confdb_common::config::Config;
use confdb_common::Value;
use confdb_common::path::{is_dir, validate_dir};
use confdb_engine::stack::parse_profile;
use confdb_writer::{LocalBus, Writer};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "confdb")]
#[command(about = "Layered configuration database")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "CONFDB_CONFIG")]
    config: Option<PathBuf>,

    /// Profile file listing one layer per line, overriding the configured profile
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective value of a key
    Read {
        key: String,
        /// Print the value the key would have after a reset
        #[arg(short, long, conflicts_with = "user")]
        default: bool,
        /// Print only the value stored in the writable layer
        #[arg(short, long)]
        user: bool,
    },
    /// List the immediate children of a dir
    List { dir: String },
    /// Print every key below a dir as a JSON object
    Dump { dir: String },
    /// Write a value; text that is not JSON is stored as a string
    Write { key: String, value: String },
    /// Write every key of a JSON object read from stdin below a dir
    Load { dir: String },
    /// Reset a key, or with --force everything below a dir
    Reset {
        path: String,
        #[arg(short, long)]
        force: bool,
    },
    /// Lock a key or dir in the most authoritative system layer
    Lock { path: String },
    /// Remove a lock
    Unlock { path: String },
    /// Check whether a key or dir may be written
    IsWritable { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args)?;
    debug!("Profile: {:?}", config.profile);

    let writer = Arc::new(Writer::new(config.clone()).context("failed to start writer")?);
    let client = Client::from_config(&config, Arc::new(LocalBus::new(writer)))
        .context("failed to open profile")?;

    match args.command {
        Commands::Read { key, default, user } => {
            let value = if default {
                client.read_default(&key)
            } else if user {
                client.read_no_default(&key)
            } else {
                client.read(&key)
            };
            if let Some(value) = value {
                println!("{value}");
            }
        }
        Commands::List { dir } => {
            for child in client.list(&dir)? {
                println!("{child}");
            }
        }
        Commands::Dump { dir } => {
            validate_dir(&dir)?;
            let mut entries = BTreeMap::new();
            dump(&client, &dir, &dir, &mut entries)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Write { key, value } => {
            let sequence = write(&client, &key, Some(Value::parse(&value))).await?;
            info!("Wrote {} (change {:?})", key, sequence);
        }
        Commands::Load { dir } => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            let entries: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&text).context("stdin must hold a JSON object")?;

            let (rels, values): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .map(|(rel, value)| (rel, Some(Value::from_json(value))))
                .unzip();
            let sequence = client
                .write_many_async(&dir, &rels, values, cancel_on_interrupt())
                .await?;
            info!("Loaded {} keys below {} (change {:?})", rels.len(), dir, sequence);
        }
        Commands::Reset { path, force } => {
            if is_dir(&path) && !force {
                bail!("{path} is a dir; use --force to reset everything below it");
            }
            let sequence = write(&client, &path, None).await?;
            info!("Reset {} (change {:?})", path, sequence);
        }
        Commands::Lock { path } => client.set_locked(&path, true, &cancel_on_interrupt())?,
        Commands::Unlock { path } => client.set_locked(&path, false, &cancel_on_interrupt())?,
        Commands::IsWritable { path } => {
            let writable = client.is_writable(&path, &cancel_on_interrupt())?;
            println!("{writable}");
            if !writable {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(profile) = &args.profile {
        let text = std::fs::read_to_string(profile)
            .with_context(|| format!("failed to read profile {}", profile.display()))?;
        config.profile = parse_profile(&text);
    }
    Ok(config)
}

async fn write(client: &Client, path: &str, value: Option<Value>) -> Result<Option<u64>> {
    Ok(client.write_async(path, value, cancel_on_interrupt()).await?)
}

/// Token cancelled when the user interrupts the tool
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        token.cancel();
    });
    cancel
}

/// Collect every key below `dir`, keyed relative to `root`
fn dump(
    client: &Client,
    root: &str,
    dir: &str,
    entries: &mut BTreeMap<String, serde_json::Value>,
) -> Result<()> {
    for child in client.list(dir)? {
        let full = format!("{dir}{child}");
        if is_dir(&full) {
            dump(client, root, &full, entries)?;
        } else if let Some(value) = client.read(&full) {
            let rel = full.strip_prefix(root).unwrap_or(&full).to_string();
            entries.insert(rel, value.to_json());
        }
    }
    Ok(())
}
