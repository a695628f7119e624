use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use docent::config::Config;
use docent::server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if std::env::args().skip(1).any(|arg| arg == "--version" || arg == "-V") {
        println!("docent {}", VERSION);
        return Ok(());
    }

    let config = Config::from_env();
    tracing::info!(
        "starting docent {} (graph: {})",
        VERSION,
        config.graph_base_url
    );

    server::serve(config).await
}
