use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    /// Secret compared by the authorization predicate. Empty means every
    /// credentialed operation is denied (private-by-default deployment).
    pub auth_token: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP facade over a single object-storage bucket")]
pub struct Args {
    /// Host to bind to (overrides STOREGATE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides STOREGATE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides STOREGATE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides STOREGATE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket identifier fronted by this process (overrides STOREGATE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Authorization secret (overrides STOREGATE_AUTH_TOKEN)
    #[arg(long)]
    pub auth_token: Option<String>,

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
        let env_host = env::var("STOREGATE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("STOREGATE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing STOREGATE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading STOREGATE_PORT"),
        };
        let env_storage =
            env::var("STOREGATE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("STOREGATE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/storegate.db".into());
        let env_bucket = env::var("STOREGATE_BUCKET").unwrap_or_else(|_| "storegate".into());
        let env_token = env::var("STOREGATE_AUTH_TOKEN").unwrap_or_default();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            auth_token: args.auth_token.unwrap_or(env_token),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
