use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::config::{ProxyConfig, Substitution};
use crate::pump::DEFAULT_BUFFER_SIZE;

#[derive(Parser, Debug)]
#[command(
    name = "starttls-mitm",
    version,
    about = "Relays a STARTTLS protocol and re-terminates the upgraded TLS to log it in cleartext"
)]
pub struct Cli {
    /// Listen port
    #[arg(long, default_value_t = 5222)]
    pub port: u16,

    /// Listen address
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Target server as host:port
    #[arg(long)]
    pub server: String,

    /// Path to the PEM TLS certificate chain (a self-signed one is generated if omitted)
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// Path to the PEM TLS certificate key
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// Literal in client traffic to replace with --replace-remote
    #[arg(long, default_value = "")]
    pub replace_local: String,

    /// Literal in server traffic to replace with --replace-local
    #[arg(long, default_value = "")]
    pub replace_remote: String,

    /// Read buffer size per direction
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE as u32, value_parser = clap::value_parser!(u32).range(1..))]
    pub buffer_size: u32,
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        let substitution = Substitution::new(self.replace_local.as_bytes(), self.replace_remote.as_bytes());
        ProxyConfig::new(self.server.clone())
            .with_substitution(substitution)
            .with_buffer_size(self.buffer_size as usize)
    }
}
