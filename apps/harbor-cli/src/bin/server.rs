use std::sync::Arc;
use tracing::info;

use harbor_cli::{init_tracing, load_app_config};
use harbor_jobs::SharedContext;
use harbor_service::{router, AnalyserService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = load_app_config()?;
    let ctx = SharedContext::from_config(&config).await?;
    let service = Arc::new(AnalyserService::new(ctx));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, collections = ?service.list_collections().await, "harbor server listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}
