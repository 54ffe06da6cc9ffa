use anyhow::{Context, Result};
use axum::Router;
use bucket_store::{
    config::{AppConfig, BackendKind},
    handlers::object_handlers::SharedBucket,
    routes,
    services::{Bucket, BucketInternal},
    storage::{LocalStorage, MemoryStorage, ObjectStorage},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting bucket-store with config: {:?}", cfg);

    // --- Initialize storage backend ---
    let storage: Arc<dyn ObjectStorage> = match cfg.backend {
        BackendKind::Memory => {
            if migrate {
                anyhow::bail!("--migrate only applies to the local backend");
            }
            tracing::warn!("Using in-memory storage; objects are lost on exit");
            Arc::new(MemoryStorage::new().with_bucket(cfg.bucket.clone()))
        }
        BackendKind::Local => match open_local_storage(&cfg, migrate).await? {
            Some(local) => Arc::new(local),
            None => return Ok(()), // exit after migration
        },
    };

    // --- Initialize bucket facade ---
    let internal = BucketInternal::new(storage, cfg.bucket.clone(), cfg.public_url.clone())
        .with_part_size(cfg.part_size);
    let bucket: SharedBucket = Arc::new(Bucket::new(internal, cfg.bucket_config()));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(bucket);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite pool and payload directory. Returns `None` after a
/// `--migrate` run.
async fn open_local_storage(cfg: &AppConfig, migrate: bool) -> Result<Option<LocalStorage>> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    // --- Apply schema; exit afterwards in migration mode ---
    LocalStorage::migrate(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(None);
    }

    let storage = LocalStorage::new(db, cfg.storage_dir.clone());
    let bucket = storage
        .ensure_bucket(&cfg.bucket)
        .await
        .with_context(|| format!("registering bucket `{}`", cfg.bucket))?;
    tracing::info!("Serving bucket {} ({})", bucket.name, bucket.id);

    Ok(Some(storage))
}
