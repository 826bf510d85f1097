use std::path::PathBuf;

use clap::Parser;
use gw_auth::AuthMode;

#[derive(Parser)]
#[command(name = "gatewayd", version, about = "MCP gateway: transports, supervisor, router, AI channels, auth, hooks")]
pub struct Cli {
    /// Path to a toml gateway config file (defaults to ./gatewayd.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the HTTP admin surface bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the HTTP admin surface port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the authentication mode.
    #[arg(long, value_enum)]
    pub auth_mode: Option<CliAuthMode>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum CliAuthMode {
    LocalTrusted,
    ExternalSecure,
    Dual,
}

impl From<CliAuthMode> for AuthMode {
    fn from(value: CliAuthMode) -> Self {
        match value {
            CliAuthMode::LocalTrusted => AuthMode::LocalTrusted,
            CliAuthMode::ExternalSecure => AuthMode::ExternalSecure,
            CliAuthMode::Dual => AuthMode::Dual,
        }
    }
}
