//! Voicehub server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voicehub_config::{load_settings, Settings, VoiceCatalog};
use voicehub_core::EngineKind;
use voicehub_server::{init_metrics, metrics_router, websocket::ws_router, AppState};

#[derive(Parser)]
#[command(name = "voicehub", about = "Realtime voice-assistant backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the WebSocket and metrics servers (default)
    Serve,
    /// Validate voice assets and report engine availability
    CheckVoices,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("VOICEHUB_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CheckVoices => check_voices(),
    }
}

async fn serve(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting voicehub v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    tracing::info!(environment = ?config.environment, "Configuration loaded");

    let _metrics_handle = init_metrics();
    tracing::info!("Initialized Prometheus metrics at /metrics");

    let state = AppState::new(config)?;

    // Metrics/health server on its own port.
    let metrics_addr: SocketAddr = format!(
        "{}:{}",
        state.config.metrics.host, state.config.metrics.port
    )
    .parse()?;
    let metrics_app = metrics_router(state.clone());
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    tracing::info!("Metrics listening on {}", metrics_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    // WebSocket server.
    let ws_addr: SocketAddr =
        format!("{}:{}", state.config.server.host, state.config.server.port).parse()?;
    let app = ws_router(state.clone());
    let listener = tokio::net::TcpListener::bind(ws_addr).await?;
    state.mark_accepting();
    tracing::info!("WebSocket listening on {}", ws_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn check_voices() -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Arc::new(VoiceCatalog::load(std::path::Path::new("config/voices.json")));
    let availability = catalog.validate();

    println!("{} voices in catalog", catalog.voices().len());
    for voice in catalog.voices() {
        let engines: Vec<&str> = EngineKind::all()
            .into_iter()
            .filter(|&k| voice.supports(k))
            .map(|k| k.as_str())
            .collect();
        println!("  {} ({}) -> {}", voice.id, voice.language, engines.join(", "));
    }
    for kind in EngineKind::all() {
        println!(
            "engine {}: {}",
            kind,
            if availability.is_available(kind) {
                "available"
            } else {
                "unavailable"
            }
        );
    }

    if !availability.any_available() {
        eprintln!("error: no TTS engine has usable assets");
        std::process::exit(1);
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("voicehub={},tower_http=warn", config.observability.log_level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
