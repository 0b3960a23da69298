//! # ReportDesk — report schedule dashboard client
//!
//! Usage:
//!   reportdesk list                          # Show all schedules
//!   reportdesk add -d "Weekly sales" -i 60   # Register a schedule
//!   reportdesk toggle 3                      # Activate / deactivate
//!   reportdesk watch                         # Live table, follows pushed alerts

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reportdesk_core::{
    ActionRequest, DeskConfig, DeskError, NewSchedule, ScheduleChanges, ScheduleId,
};
use reportdesk_sync::history::{display_offset, render_history};
use reportdesk_sync::{
    load_history, project, render_table, ActionDispatcher, Dispatched, HttpScheduleApi,
    PushListener, ScheduleApi, SharedStore, WsPushTransport,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reportdesk",
    version,
    about = "📋 ReportDesk — recurring report schedules from the terminal"
)]
struct Cli {
    /// Config file (default: ~/.reportdesk/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Backend base URL, overrides the config file
    #[arg(long)]
    base_url: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List schedules
    List,
    /// Register a new schedule
    Add {
        #[arg(short, long)]
        description: String,
        /// Interval in minutes
        #[arg(short, long)]
        interval: i64,
        /// Report file path
        #[arg(long)]
        path: Option<String>,
        /// Form URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Change fields of a schedule (an empty --path/--url clears it)
    Edit {
        id: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        interval: Option<i64>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Delete a schedule
    Delete { id: String },
    /// Activate or deactivate a schedule
    Toggle { id: String },
    /// Run a report now
    Run { id: String },
    /// Mark the current report as completed
    Complete { id: String },
    /// Show completed reports by month
    History,
    /// Keep the table on screen and follow pushed alerts until Ctrl-C
    Watch,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "reportdesk=debug,reportdesk_sync=debug"
    } else {
        "reportdesk=info,reportdesk_sync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => DeskConfig::load_from(&expand_path(path))?,
        None => DeskConfig::load()?,
    };
    if let Some(base_url) = &cli.base_url {
        config.api.base_url = base_url.clone();
    }

    if let Err(e) = run(cli.command, config).await {
        match e.downcast_ref::<DeskError>() {
            Some(err) => eprintln!("❌ {}", err.user_message()),
            None => eprintln!("❌ {e:#}"),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, config: DeskConfig) -> Result<()> {
    let api: Arc<dyn ScheduleApi> = Arc::new(HttpScheduleApi::new(&config.api)?);
    let store = SharedStore::new();
    let dispatcher = ActionDispatcher::new(api.clone(), store.clone());

    match command {
        Command::List => {
            dispatcher.reload().await?;
            print!("{}", store.read(|s| render_table(&project(s))));
        }
        Command::Add {
            description,
            interval,
            path,
            url,
        } => {
            let mut new = NewSchedule::new(description, interval);
            if let Some(path) = path {
                new = new.target_path(path);
            }
            if let Some(url) = url {
                new = new.target_url(url);
            }
            let created = dispatcher.create(new).await?;
            println!("✅ Schedule {} created: {}", created.id, created.description);
        }
        Command::Edit {
            id,
            description,
            interval,
            path,
            url,
        } => {
            let id = ScheduleId::from(id);
            dispatcher.reload().await?;
            dispatcher.fetch(&id).await?;

            let mut changes = ScheduleChanges::default();
            if let Some(d) = description {
                changes = changes.description(d);
            }
            if let Some(m) = interval {
                changes = changes.interval_minutes(m);
            }
            if let Some(p) = path {
                changes = changes.target_path(p);
            }
            if let Some(u) = url {
                changes = changes.target_url(u);
            }
            if let Dispatched::Updated(updated) =
                dispatcher.dispatch(ActionRequest::update(id, changes)).await?
            {
                println!("✅ Schedule {} updated: {}", updated.id, updated.description);
            }
        }
        Command::Delete { id } => {
            let id = ScheduleId::from(id);
            dispatcher.reload().await?;
            dispatcher.delete(&id).await?;
            println!("🗑️  Schedule {id} deleted");
        }
        Command::Toggle { id } => {
            let id = ScheduleId::from(id);
            dispatcher.reload().await?;
            let active = dispatcher.toggle_active(&id).await?;
            let state = if active { "active" } else { "inactive" };
            println!("✅ Schedule {id} is now {state}");
        }
        Command::Run { id } => {
            let id = ScheduleId::from(id);
            dispatcher.reload().await?;
            dispatcher.run_now(&id).await?;
            println!("▶️  Report for schedule {id} started");
        }
        Command::Complete { id } => {
            let id = ScheduleId::from(id);
            dispatcher.reload().await?;
            dispatcher.mark_completed(&id).await?;
            println!("✅ Schedule {id} marked completed");
        }
        Command::History => {
            let offset = display_offset(&config.history)?;
            let groups = load_history(api.as_ref(), &config.history).await?;
            print!("{}", render_history(&groups, offset));
        }
        Command::Watch => watch_loop(&dispatcher, &config).await?,
    }
    Ok(())
}

async fn watch_loop(dispatcher: &ActionDispatcher, config: &DeskConfig) -> Result<()> {
    let store = dispatcher.store().clone();
    dispatcher.reload().await?;
    let mut changes = store.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener_task = if config.push.enabled {
        let transport = Arc::new(WsPushTransport::new(&config.push.url));
        let listener = PushListener::new(store.clone(), transport, &config.push);
        Some(tokio::spawn(async move { listener.run(shutdown_rx).await }))
    } else {
        tracing::info!("Push channel disabled; showing a static table");
        None
    };

    print!("{}", store.read(|s| render_table(&project(s))));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 Shutting down...");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                println!();
                print!("{}", store.read(|s| render_table(&project(s))));
            }
        }
    }

    shutdown_tx.send_replace(true);
    if let Some(task) = listener_task {
        match task.await {
            Ok(Ok(stats)) => tracing::debug!("push listener stopped: {stats:?}"),
            Ok(Err(e)) => tracing::warn!("push listener failed: {}", e.user_message()),
            Err(e) => tracing::warn!("push listener task panicked: {e}"),
        }
    }
    Ok(())
}
