use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use tollgate::{
    AppState,
    build_app,
    config::GatewayConfig,
    jobs,
    models::generate_api_key_with_prefix,
    observability,
};

const DEFAULT_CONFIG_PATH: &str = "tollgate.toml";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// CLI arguments for the Tollgate gateway
#[derive(Parser, Debug)]
#[command(version, about = "Tollgate API access gateway", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file. Built-in defaults are used when the default
    /// path does not exist.
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the gateway server (default)
    Serve,
    /// Generate a new API key and print it with its stored hash
    Keygen {
        /// Key prefix (defaults to the configured generation prefix)
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Some(Command::Keygen { prefix }) => run_keygen(config_path, prefix),
        Some(Command::CheckConfig) => run_check_config(config_path),
        Some(Command::Serve) | None => run_server(config_path).await,
    }
}

/// Load config from an explicit path, or from `tollgate.toml` if present.
fn load_config(explicit_config_path: Option<&str>) -> (GatewayConfig, Option<PathBuf>) {
    let path = match explicit_config_path {
        Some(path) => PathBuf::from(path),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if !default.exists() {
                return (GatewayConfig::default(), None);
            }
            default
        }
    };

    match GatewayConfig::from_file(&path) {
        Ok(config) => (config, Some(path)),
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn run_keygen(explicit_config_path: Option<&str>, prefix: Option<String>) {
    let prefix = match prefix {
        Some(prefix) => prefix,
        None => load_config(explicit_config_path).0.auth.generation_prefix(),
    };
    let key = generate_api_key_with_prefix(&prefix);

    println!("key:  {}", key.raw);
    println!("hash: {}", key.hash);
    eprintln!("Store only the hash. The key cannot be recovered later.");
}

fn run_check_config(explicit_config_path: Option<&str>) {
    let (config, path) = load_config(explicit_config_path);
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());

    // from_file validates already; defaults are validated here
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration ({}): {}", source, e);
        std::process::exit(1);
    }
    println!("Configuration OK ({})", source);
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config(explicit_config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Starting Tollgate"),
        None => tracing::info!("Starting Tollgate with built-in defaults"),
    }

    if !config.server.trusted_proxies.is_configured() && !config.server.host.is_loopback() {
        tracing::warn!(
            "No trusted_proxies configured. Forwarding headers are ignored and clients are \
             keyed by their socket address."
        );
    }

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize gateway");
            std::process::exit(1);
        }
    };

    let billing_worker = state
        .billing_queue
        .start_worker(state.services.billing_monitor.clone());
    tracing::info!("Billing queue worker started");

    let sweeper = tokio::spawn(jobs::start_window_sweep_worker(
        state.services.rate_limiter.clone(),
        config.limits.sweep_interval_secs,
    ));

    let app = build_app(&config, state.clone());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("Server listening on http://{}", bind_addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    // Connections are closed, so no new commits can start
    sweeper.abort();
    state.drain(billing_worker, DRAIN_TIMEOUT).await;
    tracing::info!("Shutdown complete");

    if let Err(e) = served {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing in-flight requests...");
}
