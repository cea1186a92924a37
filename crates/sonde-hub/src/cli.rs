//! Command-line flags, layered on top of file/env configuration the same
//! way the teacher's `GatewayCli` layers its flags (spec.md §0 "CLI").

use std::path::PathBuf;

use clap::Parser;
use sonde_config::ConfigOverrides;

#[derive(Parser, Debug, Clone)]
#[command(name = "sonde-hub", about = "Sonde Hub coordination binary")]
pub struct HubCli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub profile: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long = "metrics-bind")]
    pub metrics_bind: Option<String>,
    #[arg(long = "metrics-port")]
    pub metrics_port: Option<u16>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    #[arg(long = "log-format")]
    pub log_format: Option<String>,
    #[arg(long = "db-path")]
    pub db_path: Option<String>,
}

impl HubCli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            profile: self.profile.clone(),
            server_host: self.host.clone(),
            server_port: self.port,
            db_path: self.db_path.clone(),
            metrics_bind: self.metrics_bind.clone(),
            metrics_port: self.metrics_port,
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
        }
    }
}
