use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

use crate::services::{BucketConfig, bucket::DEFAULT_MULTIPART_THRESHOLD, bucket_internal::DEFAULT_PART_SIZE};

/// Which [`crate::storage::ObjectStorage`] implementation backs the bucket.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// SQLite metadata plus payloads on local disk.
    Local,
    /// Process memory; contents vanish on exit.
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(value, true)
            .map_err(|_| anyhow::anyhow!("unknown backend `{}` (expected `local` or `memory`)", value))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub public_url: String,
    pub multipart_threshold: u64,
    pub part_size: usize,
    pub fetch_concurrency: Option<usize>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Bucket-scoped object storage API")]
pub struct Args {
    /// Host to bind to (overrides BUCKET_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides BUCKET_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory where payloads are stored (overrides BUCKET_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BUCKET_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket served by this instance (overrides BUCKET_STORE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base of public object URLs (overrides BUCKET_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Largest size in bytes uploaded in a single put (overrides BUCKET_STORE_MULTIPART_THRESHOLD)
    #[arg(long)]
    pub multipart_threshold: Option<u64>,

    /// Multipart chunk size in bytes (overrides BUCKET_STORE_PART_SIZE)
    #[arg(long)]
    pub part_size: Option<usize>,

    /// Max concurrent fetches when reading the whole bucket (overrides BUCKET_STORE_FETCH_CONCURRENCY)
    #[arg(long)]
    pub fetch_concurrency: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name`, parsing it when set. Unset yields `None`.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_backend = env_parse::<BackendKind>("BUCKET_STORE_BACKEND")?;
        let env_port = env_parse::<u16>("BUCKET_STORE_PORT")?;
        let env_threshold = env_parse::<u64>("BUCKET_STORE_MULTIPART_THRESHOLD")?;
        let env_part_size = env_parse::<usize>("BUCKET_STORE_PART_SIZE")?;
        let env_concurrency = env_parse::<usize>("BUCKET_STORE_FETCH_CONCURRENCY")?;

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("BUCKET_STORE_HOST", "0.0.0.0")),
            port: args.port.or(env_port).unwrap_or(3000),
            backend: args
                .backend
                .or(env_backend)
                .unwrap_or(BackendKind::Local),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("BUCKET_STORE_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or(
                    "BUCKET_STORE_DATABASE_URL",
                    "sqlite://./data/meta/bucket_store.db",
                )
            }),
            bucket: args
                .bucket
                .unwrap_or_else(|| env_or("BUCKET_STORE_BUCKET", "media")),
            public_url: args.public_url.unwrap_or_else(|| {
                env_or("BUCKET_STORE_PUBLIC_URL", "http://localhost:3000/objects")
            }),
            multipart_threshold: args
                .multipart_threshold
                .or(env_threshold)
                .unwrap_or(DEFAULT_MULTIPART_THRESHOLD),
            part_size: args
                .part_size
                .or(env_part_size)
                .unwrap_or(DEFAULT_PART_SIZE),
            fetch_concurrency: args.fetch_concurrency.or(env_concurrency),
        };

        if cfg.part_size == 0 {
            anyhow::bail!("part size must be greater than zero");
        }
        if cfg.fetch_concurrency == Some(0) {
            anyhow::bail!("fetch concurrency must be greater than zero");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig {
            multipart_threshold: self.multipart_threshold,
            fetch_concurrency: self.fetch_concurrency,
        }
    }
}
