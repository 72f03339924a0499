use anyhow::Context;
use browser_ragent_server::backend;
use browser_ragent_server::core::{Config, TransportKind};
use browser_ragent_server::protocol;
use browser_ragent_server::ServerBuilder;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// JSON-RPC tool server for driving a browser from AI agents.
#[derive(Parser, Debug)]
#[command(name = "browser-ragent-server", version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// Listen address for the tcp and http transports
    #[arg(long)]
    bind: Option<String>,

    /// Driver command and its arguments, e.g. `--driver node driver.js`
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    driver: Vec<String>,

    #[arg(long)]
    cache_size: Option<usize>,

    #[arg(long)]
    max_concurrency: Option<usize>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(transport) = self.transport {
            config.server.transport = transport;
        }
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if !self.driver.is_empty() {
            config.tools.driver_command = self.driver.clone();
        }
        if let Some(cache_size) = self.cache_size {
            config.cache.max_size = cache_size;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.batch.max_concurrency = max_concurrency;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the stdio transport, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    let executor = backend::executor_for(&config.tools.driver_command)
        .context("failed to start browser driver")?;
    let server = ServerBuilder::new(config)
        .with_executor(executor)
        .with_browser_tools()
        .build()?;
    let sweeper = server.spawn_session_sweeper();

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_server.shutdown(),
            Err(e) => warn!("failed to listen for ctrl-c: {}", e),
        }
    });

    let transport = server.config().server.transport;
    let bind = server.config().server.bind.clone();
    match transport {
        TransportKind::Stdio => protocol::serve_stdio(Arc::clone(&server)).await?,
        TransportKind::Tcp => protocol::serve_tcp(Arc::clone(&server), &bind).await?,
        TransportKind::Http => serve_http(Arc::clone(&server), &bind).await?,
    }

    server.shutdown();
    let _ = sweeper.await;
    info!("server stopped");
    Ok(())
}

#[cfg(feature = "http")]
async fn serve_http(
    server: Arc<browser_ragent_server::Server>,
    bind: &str,
) -> anyhow::Result<()> {
    protocol::http::serve_http(server, bind).await?;
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn serve_http(
    _server: Arc<browser_ragent_server::Server>,
    _bind: &str,
) -> anyhow::Result<()> {
    anyhow::bail!("the http transport needs a build with `--features http`")
}
