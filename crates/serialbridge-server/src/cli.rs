use anyhow::{Context, Result};
use clap::Parser;
use serialbridge_core::config::BridgeConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default websocket listen port
pub const DEFAULT_PORT: u16 = 5678;

#[derive(Parser, Debug)]
#[command(name = "serialbridge-server")]
#[command(about = "Share one serial device with any number of websocket observers")]
#[command(version)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "SERIALBRIDGE_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "SERIALBRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// JSON file with bridge tunables (buffer sizes, intervals)
    #[arg(short, long, env = "SERIALBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Load the bridge config file if one was given, else the defaults
    pub fn bridge_config(&self) -> Result<BridgeConfig> {
        match &self.config {
            Some(path) => BridgeConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Ok(BridgeConfig::default()),
        }
    }
}
