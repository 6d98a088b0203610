use clap::Parser;
use sitesync_lib::config::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let config = ServerConfig::parse();
    if let Err(e) = sitesync_lib::run(config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
