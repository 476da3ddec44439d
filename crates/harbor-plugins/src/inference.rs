//! Where compute plugins run: in-process or on a remote worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use harbor_core::config::InferenceServerConfig;
use harbor_core::{ComputePlugin, Error, PluginConfig, PluginResult, PluginRun, Registry, Result};

use crate::compute::ComputePluginManager;

/// Body of a remote plugin call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub inputs: PluginRun,
}

#[async_trait]
pub trait InferenceServer: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, plugin: Arc<dyn ComputePlugin>, run: PluginRun) -> Result<PluginResult>;
}

pub type InferenceRegistry = Registry<Arc<dyn InferenceServer>>;

pub struct LocalInference {
    name: String,
}

impl LocalInference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl InferenceServer for LocalInference {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, plugin: Arc<dyn ComputePlugin>, run: PluginRun) -> Result<PluginResult> {
        tokio::task::spawn_blocking(move || plugin.call(&run))
            .await
            .map_err(|e| Error::Inference(format!("plugin task failed: {e}")))?
    }
}

/// POSTs `{"inputs": PluginRun}` to `<base_url>/<instance_name>`.
pub struct RemoteInference {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl RemoteInference {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { name: name.into(), base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    /// Params: `base_url` (required), `timeout_secs` (30).
    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        let base_url = config
            .param_str("base_url")
            .ok_or_else(|| Error::Config(format!("inference server \"{}\" needs params.base_url", config.name)))?;
        let timeout = Duration::from_secs(config.param_usize("timeout_secs").unwrap_or(30) as u64);
        Self::new(config.name.clone(), base_url, timeout)
    }
}

#[async_trait]
impl InferenceServer for RemoteInference {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, plugin: Arc<dyn ComputePlugin>, run: PluginRun) -> Result<PluginResult> {
        let url = format!("{}/{}", self.base_url, plugin.instance_name());
        debug!(%url, "remote plugin call");
        let response = self
            .client
            .post(&url)
            .json(&RemoteRequest { inputs: run })
            .send()
            .await
            .map_err(|e| Error::Inference(format!("{url}: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Inference(format!("{url}: {e}")))?;
        response
            .json::<PluginResult>()
            .await
            .map_err(|e| Error::Inference(format!("{url}: invalid reply: {e}")))
    }
}

pub fn register_inference(registry: &mut InferenceRegistry) {
    registry.register("LocalInference", |cfg: &PluginConfig| {
        Ok(Arc::new(LocalInference::new(cfg.name.clone())) as Arc<dyn InferenceServer>)
    });
    registry.register("RemoteInference", |cfg: &PluginConfig| {
        Ok(Arc::new(RemoteInference::from_config(cfg)?) as Arc<dyn InferenceServer>)
    });
}

/// Routes a plugin run to the inference server its instance is bound to.
/// Failures never propagate: they are logged and yield an empty result.
pub struct InferenceManager {
    plugins: ComputePluginManager,
    servers: HashMap<String, Arc<dyn InferenceServer>>,
    local: Arc<dyn InferenceServer>,
}

impl InferenceManager {
    pub fn new(plugins: ComputePluginManager) -> Self {
        Self { plugins, servers: HashMap::new(), local: Arc::new(LocalInference::new("local")) }
    }

    pub fn from_config(
        plugins: ComputePluginManager,
        servers: &[InferenceServerConfig],
        registry: &InferenceRegistry,
    ) -> Result<Self> {
        let mut manager = Self::new(plugins);
        for cfg in servers {
            let server = registry.build(&cfg.kind, &PluginConfig::new(cfg.name.clone(), cfg.params.clone()))?;
            manager.add_server(server);
        }
        Ok(manager)
    }

    pub fn add_server(&mut self, server: Arc<dyn InferenceServer>) {
        self.servers.insert(server.name().to_string(), server);
    }

    pub fn plugins(&self) -> &ComputePluginManager {
        &self.plugins
    }

    /// Like `run`, but surfaces the failure.
    pub async fn try_run(&self, instance: &str, run: PluginRun) -> Result<PluginResult> {
        let plugin = self
            .plugins
            .get(instance)
            .cloned()
            .ok_or_else(|| Error::UnknownPlugin(instance.to_string()))?;
        let server = match self.plugins.binding(instance) {
            Some(name) => self
                .servers
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Config(format!("unknown inference server \"{name}\"")))?,
            None => self.local.clone(),
        };
        server.run(plugin, run).await
    }

    pub async fn run(&self, instance: &str, run: PluginRun) -> PluginResult {
        match self.try_run(instance, run).await {
            Ok(result) => result,
            Err(e @ Error::UnknownPlugin(_)) => {
                warn!(instance, error = %e, "skipping run");
                PluginResult::empty()
            }
            Err(e) => {
                error!(instance, error = %e, "plugin run failed");
                PluginResult::empty()
            }
        }
    }
}
