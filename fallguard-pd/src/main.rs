//! Fallguard Pipeline Daemon (fallguard-pd) - Main entry point
//!
//! `run` (the default) starts a pipeline for every active source and serves the status
//! surface until interrupted. The other subcommands manage the source registry.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fallguard_common::config::{load_toml, locate_config_file, resolve_root_folder, ROOT_FOLDER_ENV};
use fallguard_common::db::{self, SourceKind};
use fallguard_pd::api::{self, AppContext};
use fallguard_pd::capture::FfmpegBackend;
use fallguard_pd::config::{TomlConfig, DEFAULT_PORT};
use fallguard_pd::detection::HttpOracleLoader;
use fallguard_pd::notify::TelegramFactory;
use fallguard_pd::pipeline::{ManagerServices, PipelineManager, PipelineSpec};
use fallguard_pd::store::{EventStore, SqliteEventStore};
use fallguard_pd::SharedState;
use sqlx::SqlitePool;
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for fallguard-pd
#[derive(Parser, Debug)]
#[command(name = "fallguard-pd")]
#[command(about = "Fall detection pipeline daemon")]
#[command(version)]
struct Args {
    /// Config file (defaults to the user, then system, fallguard.toml)
    #[arg(short, long, env = "FALLGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database and event artifacts
    #[arg(short, long, env = "FALLGUARD_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Status surface port
    #[arg(short, long, env = "FALLGUARD_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run pipelines for all active sources (default)
    Run,
    /// Register a notification group
    AddGroup {
        name: String,
        #[arg(long)]
        chat_id: Option<String>,
        #[arg(long, env = "FALLGUARD_GROUP_BOT_TOKEN")]
        bot_token: Option<String>,
    },
    /// Register a video source
    AddSource {
        name: String,
        /// Device index, file path or stream URL
        url: String,
        /// live, file or webcam
        #[arg(long, default_value = "live")]
        kind: String,
        #[arg(long)]
        group: Option<i64>,
    },
    /// Print the most recent fall events as JSON lines
    Events {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fallguard_pd=info,fallguard_common=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path = locate_config_file(args.config.as_deref());
    let config: TomlConfig =
        load_toml(config_path.as_deref()).context("Failed to load config file")?;

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    info!("Root folder: {}", root_folder.display());

    let pool = db::init_database(&root_folder.join("fallguard.db"))
        .await
        .context("Failed to open database")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let port = args.port.or(config.port).unwrap_or(DEFAULT_PORT);
            run_daemon(config, root_folder, pool, port).await
        }
        Command::AddGroup {
            name,
            chat_id,
            bot_token,
        } => {
            let id = db::sources::insert_group(&pool, &name, chat_id.as_deref(), bot_token.as_deref())
                .await
                .context("Failed to add group")?;
            println!("{}", id);
            Ok(())
        }
        Command::AddSource {
            name,
            url,
            kind,
            group,
        } => {
            let kind: SourceKind = kind.parse()?;
            let id = db::sources::insert_source(&pool, &name, &url, kind, group)
                .await
                .context("Failed to add source")?;
            println!("{}", id);
            Ok(())
        }
        Command::Events { limit } => {
            let store = SqliteEventStore::new(pool);
            for event in store.recent_events(limit).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
    }
}

async fn run_daemon(
    config: TomlConfig,
    root_folder: PathBuf,
    pool: SqlitePool,
    port: u16,
) -> Result<()> {
    info!("Starting Fallguard pipeline daemon on port {}", port);

    let state = Arc::new(SharedState::new());
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool.clone()));
    let rt_handle = Handle::current();

    let manager = Arc::new(PipelineManager::new(
        config.clone(),
        root_folder.join("snapshots"),
        ManagerServices {
            loader: Arc::new(HttpOracleLoader::new(config.model.clone(), rt_handle.clone())),
            backend: Arc::new(FfmpegBackend::new(&config.capture)),
            store: Arc::clone(&store),
            notifiers: Arc::new(TelegramFactory::new(config.notify.clone())),
            events: state.event_tx.clone(),
            shutdown: state.shutdown.clone(),
            rt_handle,
        },
    ));

    for source in db::sources::list_active_sources(&pool).await? {
        let group = match source.group_id {
            Some(group_id) => db::sources::get_group(&pool, group_id).await?,
            None => None,
        };
        let source_id = source.id;
        if let Err(e) = manager.start(PipelineSpec::new(source, group)) {
            error!("Failed to start pipeline for source {}: {}", source_id, e);
        }
    }
    if manager.active_sources().is_empty() {
        warn!("No active sources; add one with `fallguard-pd add-source`");
    }

    let server = tokio::spawn(api::run(
        AppContext {
            state: Arc::clone(&state),
            manager: Arc::clone(&manager),
            store,
        },
        port,
    ));

    shutdown_signal().await;
    manager.stop_all().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server failed: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
