mod activity_store;
mod api;
mod config;
mod monitor;
mod playlist;
mod progress;
mod queue;
mod run;
mod state;
mod sync;
mod utils;

use std::sync::Arc;

use activity_store::{ActivityStore, KIND_ERROR, KIND_RUN};
use api::api_router;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use parking_lot::RwLock;
use playlist::YtDlpSource;
use progress::Progress;
use queue::MetubeClient;
use reqwest::Client;
use run::RunController;
use state::{AppState, Engine};
use sync::{report_summary, SyncEngine, SyncSettings};
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    if config.playlists.is_empty() {
        warn!("No playlists configured; add some to {:?}", config_path);
    }

    let activity_path = resolve_path(&config_path, &config.activity_path);
    let activity = ActivityStore::open(&activity_path)?;

    let client = Client::builder().user_agent("uplink/0.1").build()?;
    let queue = MetubeClient::new(
        client,
        config.metube_url.clone(),
        config.quality.clone(),
        config.format.clone(),
        config.request_timeout(),
    );
    let source = YtDlpSource::new(config.yt_dlp_path.clone(), config.metadata_timeout());
    let settings = SyncSettings::from_config(&config_path, &config);
    let engine = Arc::new(SyncEngine::new(settings, source, queue));

    if once {
        return run_once(&engine, activity).await;
    }

    let port = if config.port == 0 { 5000 } else { config.port };
    let bind_addr = format!("0.0.0.0:{}", port);
    let state = AppState {
        config: Arc::new(RwLock::new(config)),
        config_path,
        engine,
        runs: RunController::new(),
        activity,
    };
    let runs = state.runs.clone();

    let app = api_router(state)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if runs.stop() {
                info!("Stopping the active sync.");
            }
        })
        .await?;
    Ok(())
}

async fn run_once(
    engine: &Engine,
    activity: ActivityStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        watcher.cancel();
    });

    let progress = Progress::new(None, Some(activity));
    progress.event(KIND_RUN, "Sync started");
    match engine.run(&progress, &cancel).await {
        Ok(summary) => {
            report_summary(&progress, &summary);
            Ok(())
        }
        Err(err) => {
            progress.event(KIND_ERROR, format!("Sync aborted: {}", err));
            Err(Box::new(err))
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
