//! tsdb-shim
//!
//! OpenTSDB-compatible HTTP server over the in-memory backend.
//!
//! ```text
//! tsdb-shim serve [--config PATH] [--host H] [--port P] [--seed FILE]
//! tsdb-shim config [--output PATH]
//! ```
//!
//! Configuration is read from `--config`, or the first of
//! `~/.config/tsdb-shim/config.toml`, `/etc/tsdb-shim/config.toml` and
//! `./config.toml`, then overridden by `TSDB_SHIM_*` environment variables.
//! `RUST_LOG` overrides the configured log level.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tsdb_shim::api::{serve, AppState};
use tsdb_shim::backend::MemoryBackend;
use tsdb_shim::config::{generate_default_config, Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "tsdb-shim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "OpenTSDB-compatible query API over a pluggable backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Config file (default: search the standard locations)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// JSON file of series to load into the backend
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            seed,
        } => {
            let mut config = match config {
                Some(path) => Config::load_with_env(&path)?,
                None => Config::load_default(),
            };
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(seed) = seed {
                config.backend.seed_file = Some(seed.to_string_lossy().into_owned());
            }

            init_tracing(&config.logging);
            run(config).await?;
        }

        Commands::Config { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)
                        .with_context(|| format!("writing {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting tsdb-shim v{}", env!("CARGO_PKG_VERSION"));

    let backend = match config.backend.seed_file.as_deref() {
        Some(path) => MemoryBackend::from_seed_file(path.as_ref())
            .with_context(|| format!("loading seed file {}", path))?,
        None => MemoryBackend::new(),
    };
    tracing::info!("Backend holds {} series", backend.series_count().await);

    let api = config.api.clone();
    let state = AppState::new(Arc::new(backend), config);
    serve(state, &api).await?;

    tracing::info!("tsdb-shim stopped");
    Ok(())
}

/// Initialize the tracing subscriber from the logging config
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("tsdb_shim={0},tower_http={0}", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
