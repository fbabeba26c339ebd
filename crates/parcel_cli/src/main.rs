use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use parcel_backends::{
    FsObjectStager, InMemoryCodeRegistry, InMemoryObjectStager, ObjectStager, UrlSigner,
};
use parcel_control_plane::{
    build_router, AppState, Dependencies, ExpirySweeper, HttpSettings, SendSettings,
};
use parcel_storage::{SqliteTransferStore, StorageConfig};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Parcel Drop pickup-code transfer daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve {
        #[arg(long, default_value = "config/parcel.toml")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RuntimeConfig {
    #[serde(default)]
    http: HttpSection,
    #[serde(default)]
    storage: StorageSection,
    objects: ObjectsSection,
    #[serde(default)]
    registry: RegistrySection,
    #[serde(default)]
    transfer: TransferSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HttpSection {
    bind: String,
    public_base_url: String,
    max_body_bytes: usize,
    cors_allow_any_origin: bool,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            max_body_bytes: 100 * 1024 * 1024,
            cors_allow_any_origin: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StorageSection {
    sqlite_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            sqlite_path: "data/parcel.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ObjectBackend {
    #[default]
    Filesystem,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
struct ObjectsSection {
    #[serde(default)]
    backend: ObjectBackend,
    #[serde(default = "default_object_root")]
    root: PathBuf,
    #[serde(default = "default_bucket")]
    bucket: String,
    signing_secret: String,
    #[serde(default = "default_download_ttl_secs")]
    download_ttl_secs: u64,
}

fn default_object_root() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_bucket() -> String {
    "file-trans".to_string()
}

fn default_download_ttl_secs() -> u64 {
    15 * 60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RegistrySection {
    sweep_interval_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TransferSection {
    max_expiry_secs: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            max_expiry_secs: 30 * 86_400,
        }
    }
}

impl RuntimeConfig {
    fn parse(source: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(source)?;
        if config.objects.signing_secret.trim().is_empty() {
            bail!("objects.signing_secret must not be empty");
        }
        if config.registry.sweep_interval_secs == 0 {
            bail!("registry.sweep_interval_secs must be at least 1");
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config_source = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file {}", config_path.display()))?;
    let config = RuntimeConfig::parse(&config_source)
        .with_context(|| format!("invalid config TOML at {}", config_path.display()))?;

    let store = Arc::new(
        SqliteTransferStore::connect(&StorageConfig {
            sqlite_path: config.storage.sqlite_path.clone(),
        })
        .await?,
    );

    let signer = UrlSigner::new(&config.objects.signing_secret, &config.http.public_base_url)
        .with_context(|| format!("invalid http.public_base_url {}", config.http.public_base_url))?;

    let stager: Arc<dyn ObjectStager> = match config.objects.backend {
        ObjectBackend::Filesystem => Arc::new(
            FsObjectStager::open(&config.objects.root, &config.objects.bucket, signer.clone())
                .await
                .with_context(|| {
                    format!("failed to open object root {}", config.objects.root.display())
                })?,
        ),
        ObjectBackend::Memory => {
            warn!("in-memory object backend selected: staged payloads are lost on restart");
            Arc::new(InMemoryObjectStager::new(&config.objects.bucket, signer.clone()))
        }
    };
    let registry = Arc::new(InMemoryCodeRegistry::new());

    let sweeper = ExpirySweeper::new(
        registry.clone(),
        store.clone(),
        Duration::from_secs(config.registry.sweep_interval_secs),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = sweeper.spawn(shutdown_rx);

    let state = AppState::new(
        Dependencies {
            store,
            registry,
            stager,
            signer,
        },
        SendSettings {
            download_ttl: Duration::from_secs(config.objects.download_ttl_secs),
            max_expiry_secs: config.transfer.max_expiry_secs,
        },
        HttpSettings {
            max_body_bytes: config.http.max_body_bytes,
            cors_allow_any_origin: config.http.cors_allow_any_origin,
        },
    );
    let app = build_router(state);

    let socket: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid socket address {}", config.http.bind))?;

    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;

    info!(
        bind = %config.http.bind,
        public_base_url = %config.http.public_base_url,
        backend = ?config.objects.backend,
        "parceld listening"
    );
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server failed");

    let _ = shutdown_tx.send(true);
    if let Err(err) = sweeper_task.await {
        warn!(error = %err, "expiry sweeper did not stop cleanly");
    }
    info!("parceld stopped");
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = RuntimeConfig::parse(
            r#"
            [objects]
            signing_secret = "s3cret"
            "#,
        )
        .unwrap();

        assert_eq!(config.http.bind, "0.0.0.0:8080");
        assert_eq!(config.http.max_body_bytes, 104_857_600);
        assert_eq!(config.storage.sqlite_path, "data/parcel.db");
        assert_eq!(config.objects.backend, ObjectBackend::Filesystem);
        assert_eq!(config.objects.bucket, "file-trans");
        assert_eq!(config.objects.download_ttl_secs, 900);
        assert_eq!(config.registry.sweep_interval_secs, 30);
        assert_eq!(config.transfer.max_expiry_secs, 2_592_000);
    }

    #[test]
    fn sample_config_parses() {
        let config = RuntimeConfig::parse(include_str!("../../../config/parcel.toml")).unwrap();
        assert_eq!(config.objects.root, PathBuf::from("data/objects"));
    }

    #[test]
    fn signing_secret_is_required() {
        assert!(RuntimeConfig::parse("[http]\nbind = \"127.0.0.1:9000\"\n").is_err());
        assert!(RuntimeConfig::parse("[objects]\nsigning_secret = \"  \"\n").is_err());
    }

    #[test]
    fn memory_backend_is_selectable() {
        let config = RuntimeConfig::parse(
            "[objects]\nbackend = \"memory\"\nsigning_secret = \"x\"\n",
        )
        .unwrap();
        assert_eq!(config.objects.backend, ObjectBackend::Memory);
    }
}
