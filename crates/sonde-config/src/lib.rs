//! Configuration loading for Sonde Hub binaries.
//!
//! Layered the way the teacher's server config crate layers it: a
//! `default.toml` file, an optional profile file, an optional
//! operator-supplied file, environment variables prefixed `SONDE__`, and
//! finally explicit CLI overrides applied last.

mod overrides;

pub use overrides::*;

use std::net::SocketAddr;
use std::path::Path;

use config::{Config, ConfigError as BuilderError, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_DIR: &str = "config";

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub server: ServerSection,
    pub store: StoreSection,
    #[serde(default)]
    pub observability: ObservabilitySection,
    #[serde(default)]
    pub enrollment: EnrollmentSection,
}

impl HubConfig {
    pub fn metrics_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.observability.metrics_socket_addr()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: Option<ServerTlsConfig>,
}

impl ServerSection {
    pub fn bind_address(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerTlsConfig {
    pub cert_path: Option<std::path::PathBuf>,
    pub key_path: Option<std::path::PathBuf>,
    pub client_ca_path: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentSection {
    #[serde(default = "default_enrollment_ttl_seconds")]
    pub token_ttl_seconds: u64,
}

impl Default for EnrollmentSection {
    fn default() -> Self {
        Self {
            token_ttl_seconds: default_enrollment_ttl_seconds(),
        }
    }
}

fn default_enrollment_ttl_seconds() -> u64 {
    15 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_metrics_bind")]
    pub metrics_bind: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_metrics_bind() -> String {
    "127.0.0.1".into()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_bind: default_metrics_bind(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl ObservabilitySection {
    pub fn metrics_socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.metrics_bind, self.metrics_port).parse()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

impl From<std::net::AddrParseError> for ConfigError {
    fn from(err: std::net::AddrParseError) -> Self {
        ConfigError::Message(err.to_string())
    }
}

pub fn load(overrides: ConfigOverrides) -> Result<HubConfig, ConfigError> {
    let mut builder = Config::builder();
    builder = builder.add_source(required_file(DEFAULT_CONFIG_DIR, "default.toml"));

    if let Some(profile) = overrides.profile.as_deref() {
        let profile_file = format!("{profile}.toml");
        builder = builder.add_source(optional_file(DEFAULT_CONFIG_DIR, &profile_file));
    }

    if let Some(path) = overrides.config_path {
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(Environment::with_prefix("SONDE").separator("__"));

    if let Some(host) = overrides.server_host {
        builder = builder.set_override("server.host", host)?;
    }
    if let Some(port) = overrides.server_port {
        builder = builder.set_override("server.port", port as i64)?;
    }
    if let Some(db_path) = overrides.db_path {
        builder = builder.set_override("store.db_path", db_path)?;
    }
    if let Some(metrics_bind) = overrides.metrics_bind {
        builder = builder.set_override("observability.metrics_bind", metrics_bind)?;
    }
    if let Some(metrics_port) = overrides.metrics_port {
        builder = builder.set_override("observability.metrics_port", metrics_port as i64)?;
    }
    if let Some(log_level) = overrides.log_level {
        builder = builder.set_override("observability.log_level", log_level)?;
    }
    if let Some(log_format) = overrides.log_format {
        builder = builder.set_override("observability.log_format", log_format)?;
    }

    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}

fn required_file(dir: &str, name: &str) -> File<config::FileSourceFile, FileFormat> {
    File::from(Path::new(dir).join(name)).format(FileFormat::Toml)
}

fn optional_file(dir: &str, name: &str) -> File<config::FileSourceFile, FileFormat> {
    File::from(Path::new(dir).join(name))
        .required(false)
        .format(FileFormat::Toml)
}
