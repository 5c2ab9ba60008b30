use clap::Parser;
use duet::config::{Cli, ServerConfig};
use duet::signaling::SignalingServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_cli(&cli)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let server = SignalingServer::bind(&config.bind_addr(), config.keepalive).await?;

    println!("Signaling server listening on {}", config.ws_url());
    println!("Press Ctrl+C to stop\n");

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
