use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use querytap::config::Config;
use querytap::proxy::{init_tracing, ProxyServer};

#[derive(Parser)]
#[command(name = "querytap", version, about = "Capture and complete paginated query results")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the proxy listens on
    #[arg(long)]
    bind: Option<String>,

    /// Upstream base URL requests are forwarded to
    #[arg(long)]
    upstream: Option<String>,

    /// Rows per page when fetching a full result
    #[arg(long)]
    batch_size: Option<usize>,

    /// Quiet period before a partial result is flushed
    #[arg(long)]
    flush_delay_ms: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        if let Some(bind) = &self.bind {
            config.proxy.bind_addr = bind.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.proxy.upstream_base_url = upstream.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.fetch.batch_size = batch_size;
        }
        if let Some(delay) = self.flush_delay_ms {
            config.capture.flush_delay_ms = delay;
        }

        config.validate().context("invalid command-line override")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    tracing::info!(
        upstream = %config.proxy.upstream_base_url,
        batch_size = config.fetch.batch_size,
        flush_delay_ms = config.capture.flush_delay_ms,
        "Config loaded"
    );

    let mut server = ProxyServer::new(&config)?;
    server.bind().await.context("failed to bind proxy listener")?;
    server.run().await?;
    Ok(())
}
