use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use oxserve::config::Args;
use oxserve::server_impl::server::Server;
use oxserve::AnyResult;

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oxserve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config()?;
    let server = Server::bind(config).await?;

    server.start().wait().await;

    Ok(())
}
