// src/config.rs
use clap::Parser;
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf};

use crate::error::AppError;

pub const DEFAULT_DATABASE_PATH: &str = "./data/app.db";
pub const DEFAULT_REPORTS_DIR: &str = "./reports";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 50;
pub const REPORT_RETENTION_DAYS: u64 = 30;

/// Values read from `BILLING_*` environment variables (a `.env` file is
/// loaded first).
#[derive(Debug, Clone, Deserialize)]
pub struct EnvConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from(DEFAULT_REPORTS_DIR)
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_upload_mb() -> usize {
    DEFAULT_MAX_UPLOAD_MB
}

#[derive(Debug, Parser)]
#[command(name = "helpdesk-billing", about = "Helpdesk billing backend")]
pub struct Cli {
    /// SQLite database file
    #[arg(long)]
    pub database_path: Option<PathBuf>,
    /// Directory where generated PDF reports are written
    #[arg(long)]
    pub reports_dir: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub reports_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsPaths>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_path: String,
    pub key_path: String,
}

impl AppConfig {
    pub fn load(cli: Cli) -> Result<Self, AppError> {
        let env_config = envy::prefixed("BILLING_")
            .from_env::<EnvConfig>()
            .map_err(|e| AppError::Config(format!("Invalid BILLING_* environment: {}", e)))?;
        Self::merge(env_config, cli)
    }

    /// CLI flags win over the environment.
    pub fn merge(env_config: EnvConfig, cli: Cli) -> Result<Self, AppError> {
        let tls = match (env_config.cert_path, env_config.key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsPaths {
                cert_path,
                key_path,
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "BILLING_CERT_PATH and BILLING_KEY_PATH must be set together".to_string(),
                ))
            }
        };

        if env_config.max_upload_mb == 0 {
            return Err(AppError::Config(
                "BILLING_MAX_UPLOAD_MB must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            database_path: cli.database_path.unwrap_or(env_config.database_path),
            reports_dir: cli.reports_dir.unwrap_or(env_config.reports_dir),
            host: cli.host.unwrap_or(env_config.host),
            port: cli.port.unwrap_or(env_config.port),
            tls,
            max_upload_bytes: env_config.max_upload_mb * 1024 * 1024,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid listen address: {}", e)))
    }
}
