use std::path::PathBuf;

use clap::Parser;

/// Tollgate metering and billing gateway
#[derive(Debug, Parser)]
#[command(name = "tollgate", about = "Metering and billing gateway for an OpenAI-compatible upstream")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tollgate.toml", env = "TOLLGATE_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "TOLLGATE_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,
}
