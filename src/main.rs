use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use facemeter::config::Config;
use facemeter::faces::blazeface::BlazeFaceDetector;
use facemeter::faces::mesh::FaceMeshDetector;
use facemeter::logging;
use facemeter::server::{self, AppState};
use facemeter::storage::UploadStore;

/// Command line overrides
#[derive(Default)]
struct Args {
    config_path: Option<PathBuf>,
    bind: Option<SocketAddr>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("facemeter {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--bind" | "-b" => {
                match args.get(i + 1).map(|a| a.parse::<SocketAddr>()) {
                    Some(Ok(addr)) => parsed.bind = Some(addr),
                    Some(Err(_)) => {
                        eprintln!("Error: invalid address for --bind: {}", args[i + 1]);
                        std::process::exit(1);
                    }
                    None => {
                        eprintln!("Error: --bind requires an address argument");
                        std::process::exit(1);
                    }
                }
                i += 1;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"facemeter - face distance and framing estimation service

USAGE:
    facemeter [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --bind, -b ADDR     Listen address (overrides [server].bind)
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FACEMETER_CONFIG    Path to config file (overrides default location)
    FACEMETER_LOG       Log level (trace, debug, info, warn, error)

ROUTES:
    POST /mtcnn/detect-face/          Eye keypoint distance, single face
    GET  /mtcnn/hello-world/
    POST /mediapipe/detect-face/      Cheekbone distance, framing, annotated copy
    GET  /mediapipe/mediapipe-test/

Config file location: $XDG_CONFIG_HOME/facemeter/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let mut config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let store = UploadStore::new(config.storage.clone(), config.retention.clone());
    store.ensure_dirs()?;
    info!(root = ?config.storage.root, "Storage directories ready");

    let keypoint = BlazeFaceDetector::load(&config.models).context("Failed to load face detector")?;
    let landmark = FaceMeshDetector::load(&config.models).context("Failed to load face mesh")?;

    let state = AppState::new(Arc::new(keypoint), Arc::new(landmark), store);

    if config.retention.is_enabled() {
        spawn_retention_sweep(Arc::clone(&state.store), config.retention.sweep_interval_secs);
    }

    let app = server::router(state, config.server.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "Facemeter listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Facemeter stopped");
    Ok(())
}

fn spawn_retention_sweep(store: Arc<UploadStore>, interval_secs: u64) {
    info!(interval_secs, "Retention sweep enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.sweep()).await {
                Ok(Ok(result)) if result.files_deleted > 0 => {
                    info!(
                        files = result.files_deleted,
                        bytes = result.bytes_freed,
                        "Retention sweep removed files"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Retention sweep failed"),
                Err(e) => warn!(error = %e, "Retention sweep task panicked"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
