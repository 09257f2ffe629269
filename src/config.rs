use crate::services::drive_service::{
    DEFAULT_MAX_STORAGE_BYTES, DEFAULT_PAGE_SIZE, DEFAULT_SCAN_TIMEOUT, DriveConfig,
};
use anyhow::{Result, ensure};
use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Which `ObjectStore` backend the service runs against.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SQLite metadata plus payload files under `storage_dir`.
    Local,
    /// Process memory; everything is lost on exit.
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub drive: DriveConfig,
}

/// Command-line + environment configuration. Flags win over environment.
#[derive(Parser, Debug)]
#[command(author, version, about = "Per-user file and folder storage over an object store")]
pub struct Args {
    /// Host to bind to
    #[arg(long, env = "DRIVE_STORE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind to
    #[arg(long, env = "DRIVE_STORE_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Object store backend
    #[arg(long, env = "DRIVE_STORE_BACKEND", value_enum, default_value_t = Backend::Local)]
    pub backend: Backend,

    /// Directory where object payloads are stored
    #[arg(long, env = "DRIVE_STORE_STORAGE_DIR", default_value = "./data/objects")]
    pub storage_dir: String,

    /// Metadata database URL
    #[arg(
        long,
        env = "DRIVE_STORE_DATABASE_URL",
        default_value = "sqlite://./data/meta/drive_store.db"
    )]
    pub database_url: String,

    /// Bucket all user namespaces live in
    #[arg(long, env = "DRIVE_STORE_BUCKET", default_value = "drive")]
    pub bucket: String,

    /// Per-user quota in bytes
    #[arg(long, env = "DRIVE_STORE_MAX_STORAGE_BYTES", default_value_t = DEFAULT_MAX_STORAGE_BYTES)]
    pub max_storage_bytes: u64,

    /// Keys requested per list call (1-1000)
    #[arg(long, env = "DRIVE_STORE_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Deadline in seconds for full listings and folder deletes
    #[arg(long, env = "DRIVE_STORE_SCAN_TIMEOUT_SECS", default_value_t = DEFAULT_SCAN_TIMEOUT.as_secs())]
    pub scan_timeout_secs: u64,

    /// Validate user ids, folder paths and file names before building keys
    #[arg(
        long,
        env = "DRIVE_STORE_STRICT_PATHS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub strict_paths: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        ensure!(
            (1..=1000).contains(&args.page_size),
            "page size must be between 1 and 1000, got {}",
            args.page_size
        );
        ensure!(args.scan_timeout_secs > 0, "scan timeout must be positive");
        ensure!(!args.bucket.is_empty(), "bucket name must not be empty");

        let cfg = Self {
            host: args.host,
            port: args.port,
            backend: args.backend,
            storage_dir: args.storage_dir,
            database_url: args.database_url,
            bucket: args.bucket,
            drive: DriveConfig {
                max_storage_bytes: args.max_storage_bytes,
                page_size: args.page_size,
                scan_timeout: Duration::from_secs(args.scan_timeout_secs),
                strict_paths: args.strict_paths,
            },
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<(AppConfig, bool)> {
        let args = Args::try_parse_from(std::iter::once("drive-store").chain(argv.iter().copied()))?;
        AppConfig::from_args(args)
    }

    #[test]
    fn flags_override_defaults() {
        let (cfg, migrate) = parse(&[
            "--port",
            "8080",
            "--backend",
            "memory",
            "--max-storage-bytes",
            "2048",
            "--strict-paths",
            "false",
            "--migrate",
        ])
        .unwrap();

        assert_eq!(cfg.addr(), format!("{}:8080", cfg.host));
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.drive.max_storage_bytes, 2048);
        assert!(!cfg.drive.strict_paths);
        assert!(migrate);
    }

    #[test]
    fn rejects_oversized_pages() {
        assert!(parse(&["--page-size", "5000"]).is_err());
        assert!(parse(&["--page-size", "0"]).is_err());
    }
}
