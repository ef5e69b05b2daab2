use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdfs::api;
use sdfs::cli;
use sdfs::node::ClusterNode;
use sdfs::shell::Shell;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdfs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings();
    settings.validate()?;
    let http_address = settings.http_address();

    let node = ClusterNode::start(settings).await?;

    // Status API runs beside the shell
    let app = api::api(node.clone());
    info!("Starting status API on {}", http_address);
    let server = axum::Server::try_bind(&http_address)?.serve(app.into_make_service());
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Status API stopped: {}", e);
        }
    });

    let shell = Shell::new(node);
    let input = BufReader::new(tokio::io::stdin());
    shell.run(input, tokio::io::stdout()).await?;
    Ok(())
}
