use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use emberdb::config::Config;
use emberdb::server::Server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::new(std::env::args()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("emberdb: {}", error);
            std::process::exit(2);
        }
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(error) => {
            error!(%error, "failed to start");
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown.send(());
        }
    });

    if let Err(error) = server.run().await {
        error!(%error, "server exited with an error");
        std::process::exit(1);
    }
}
