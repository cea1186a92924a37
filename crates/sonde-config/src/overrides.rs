//! CLI-sourced overrides merged on top of file/environment configuration.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub db_path: Option<String>,
    pub metrics_bind: Option<String>,
    pub metrics_port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}
