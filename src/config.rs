use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base for download URLs. When unset it is derived per request.
    pub public_base_url: Option<String>,
    pub reclaim_interval: Duration,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Anonymous temporary file host")]
pub struct Args {
    /// Host to bind to (overrides TEMPDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TEMPDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploads are stored (overrides TEMPDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides TEMPDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for download links (overrides TEMPDROP_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Seconds between reclamation passes (overrides TEMPDROP_RECLAIM_INTERVAL_SECS)
    #[arg(long)]
    pub reclaim_interval_secs: Option<u64>,

    /// Largest accepted upload in bytes (overrides TEMPDROP_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("TEMPDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("TEMPDROP_PORT", 3000u16)?;
        let env_storage =
            env::var("TEMPDROP_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_db = env::var("TEMPDROP_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/tempdrop.db".into());
        let env_base = env::var("TEMPDROP_PUBLIC_BASE_URL").ok();
        let env_interval = env_parse("TEMPDROP_RECLAIM_INTERVAL_SECS", 1u64)?;
        let env_max_upload = env_parse("TEMPDROP_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args
                .public_base_url
                .or(env_base)
                .map(|base| base.trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty()),
            reclaim_interval: Duration::from_secs(
                args.reclaim_interval_secs.unwrap_or(env_interval).max(1),
            ),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional numeric env var, falling back to `default`
/// when it is unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
