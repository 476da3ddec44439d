//! Hosts compute plugins for a `RemoteInference` server entry.
//!
//! Usage: harbor-worker [--inference <name>] [--addr <host:port>]
//! Without `--inference` every configured plugin is hosted.

use std::env;
use tracing::info;

use harbor_cli::{flag_value, init_tracing, load_app_config};
use harbor_core::ComputePlugin;
use harbor_plugins::{register_all, worker_router, ComputePluginManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    let config = load_app_config()?;
    let registries = register_all();
    let plugins = ComputePluginManager::from_config(&config.compute_plugin, &registries.compute)?;

    let hosted = match flag_value(&args, "--inference") {
        Some(server) => {
            let hosted = plugins.bound_to(server);
            if hosted.is_empty() {
                anyhow::bail!("no compute plugin is bound to inference server \"{server}\"");
            }
            hosted
        }
        None => plugins.names().into_iter().filter_map(|n| plugins.get(n).cloned()).collect(),
    };
    let names: Vec<String> = hosted.iter().map(|p| p.instance_name().to_string()).collect();

    let addr = flag_value(&args, "--addr").unwrap_or("127.0.0.1:8001").to_string();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, plugins = ?names, "inference worker listening");
    axum::serve(listener, worker_router(hosted)).await?;
    Ok(())
}
