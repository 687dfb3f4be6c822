use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use starttls_mitm::cli::Cli;
use starttls_mitm::{Interceptor, Listener, TlsIdentity, Transcript};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout carries the transcript
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let identity = TlsIdentity::from_paths(cli.cert.as_deref(), cli.key.as_deref())?;
    if cli.cert.is_none() {
        tracing::warn!("no certificate given, presenting a generated self-signed localhost certificate");
    }
    let interceptor = Interceptor::new(&identity)?;

    let config = Arc::new(cli.proxy_config());
    if config.substitution.is_some() {
        tracing::info!(local = %cli.replace_local, remote = %cli.replace_remote, "substitution enabled");
    }

    let listener = Listener::bind(cli.listen_addr(), config, interceptor, Transcript::stdout())?;
    listener.serve().await?;
    Ok(())
}
