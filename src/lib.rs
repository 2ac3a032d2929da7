pub mod cli;
pub mod clock;
pub mod config;
pub mod models;
pub mod storage;
pub mod tab;
pub mod tracker;
pub mod transport;
mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use cli::{parse_host_command, Args, Command, HostCommand};
use clock::SystemClock;
use config::{default_settings_path, SettingsStore, TrackerSettings};
use storage::{MemoryStorage, SharedStorage, SqliteStorage};
use tab::resolve_tab_id;
use tracker::{DurationTracker, PendingQueue, TrackerEvent};
use transport::HttpSink;

pub fn run() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(dispatch(args))
}

async fn dispatch(args: Args) -> Result<()> {
    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);

    match args.command {
        Command::InitConfig { force } => init_config(&settings_path, force),
        Command::Flush => {
            let settings = SettingsStore::new(settings_path.clone())?.settings();
            flush_once(&settings, &settings_path).await
        }
        Command::Run => {
            let settings = SettingsStore::new(settings_path.clone())?.settings();
            run_tracker(&settings, &settings_path).await
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let store = SettingsStore::new(path.to_path_buf())?;
    store.update(TrackerSettings::default())?;
    info!("Wrote default settings to {}", store.path().display());
    Ok(())
}

fn build_sink(settings: &TrackerSettings, settings_path: &Path) -> Result<HttpSink> {
    let endpoint = settings
        .endpoint
        .clone()
        .ok_or_else(|| anyhow!("no endpoint configured in {}", settings_path.display()))?;

    Ok(HttpSink::new(endpoint, settings.request_timeout())?
        .with_auth_token(settings.auth_token.clone())
        .with_user_id(settings.user_id.clone()))
}

async fn flush_once(settings: &TrackerSettings, settings_path: &Path) -> Result<()> {
    let sink = build_sink(settings, settings_path)?;
    let storage = SqliteStorage::open(settings.resolved_storage_path())?;
    let queue = PendingQueue::new(Arc::new(storage), settings.pending_key.clone(), settings.max_pending_logs);

    let outcome = queue.flush(&sink).await;
    println!(
        "attempted {} / delivered {} / remaining {}",
        outcome.attempted, outcome.delivered, outcome.remaining
    );
    Ok(())
}

async fn run_tracker(settings: &TrackerSettings, settings_path: &Path) -> Result<()> {
    let sink = Arc::new(build_sink(settings, settings_path)?);
    let storage = SqliteStorage::open(settings.resolved_storage_path())?;

    // Each process is its own tab, so the tab slot lives only as long as we do.
    let tab_slot = MemoryStorage::new();
    let tab_id = resolve_tab_id(&tab_slot, &settings.tab_key).await;

    let config = settings.tracker_config();
    if config.activity.is_none() {
        warn!("No activity type configured; time will not be tracked");
    }

    info!("learnclock tab {tab_id} starting, reporting to {}", sink.endpoint());

    let watcher = storage.watch();
    let duration_tracker =
        DurationTracker::new(tab_id, config, Arc::new(storage), sink, Arc::new(SystemClock));
    let handle = tracker::spawn(duration_tracker, watcher);
    handle.send(TrackerEvent::Load)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, finalizing");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_host_command(&line) {
                    Some(HostCommand::Event(event)) => handle.send(event)?,
                    Some(HostCommand::Unload) => {
                        handle.send(TrackerEvent::BeforeUnload)?;
                        break;
                    }
                    None => warn!("Unknown command '{}' (show, hide, online, load, unload)", line.trim()),
                },
                Ok(None) => break,
                Err(err) => {
                    error!("Failed to read stdin: {err}");
                    break;
                }
            },
        }
    }

    let stopped = handle.shutdown().await?;
    let pending = stopped.pending().load().await.len();
    info!("learnclock tab {} stopped ({pending} logs pending)", stopped.tab_id());
    Ok(())
}
