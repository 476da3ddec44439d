use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use crate::collection::CollectionConfig;
use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
    base: PathBuf,
}

impl Config {
    /// Load from the current directory.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Merge `<dir>/config.toml`, `<dir>/config.<RUST_ENV>.toml` and `APP_*`
    /// env vars (`__` separates nesting, e.g. `APP_SERVER__PORT`).
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment, base: dir.to_path_buf() })
    }

    pub fn from_figment(figment: Figment, base: &Path) -> Self {
        Self { figment, base: base.to_path_buf() }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed, validated application config with `data_dir` resolved against
    /// the directory the config was loaded from.
    pub fn app(&self) -> Result<AppConfig> {
        let mut app: AppConfig = self.figment.extract().map_err(|e| Error::Config(e.to_string()))?;
        app.data.data_dir = resolve_with_base(&self.base, app.data.data_dir.to_string_lossy());
        app.validate()?;
        Ok(app)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataSection {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self { workers: default_workers() }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self { max_results: default_max_results() }
    }
}

pub const DEFAULT_SEARCH_SIZE: usize = 100;

fn default_max_results() -> usize {
    DEFAULT_SEARCH_SIZE
}

/// An inference server: where compute plugins bound to it actually run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceServerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

/// A compute plugin instance. `inference` names the server it runs on;
/// unbound instances run in-process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputePluginConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub inference: Option<String>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub jobs: JobsSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub inference: Vec<InferenceServerConfig>,
    #[serde(default)]
    pub compute_plugin: Vec<ComputePluginConfig>,
    #[serde(default)]
    pub collection: Vec<CollectionConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jobs.workers == 0 {
            return Err(Error::Config("jobs.workers must be at least 1".into()));
        }

        let servers = unique_names("inference", self.inference.iter().map(|i| i.name.as_str()))?;
        let plugins = unique_names("compute_plugin", self.compute_plugin.iter().map(|p| p.name.as_str()))?;
        unique_names("collection", self.collection.iter().map(|c| c.name.as_str()))?;

        for plugin in &self.compute_plugin {
            if let Some(server) = &plugin.inference {
                if !servers.contains(server.as_str()) {
                    return Err(Error::Config(format!(
                        "compute plugin \"{}\" references unknown inference server \"{server}\"",
                        plugin.name
                    )));
                }
            }
        }

        for collection in &self.collection {
            collection.validate()?;
            for mapping in collection.indexing_plugin.iter().chain(collection.search_plugin.iter()) {
                if !plugins.contains(mapping.compute_plugin.as_str()) {
                    return Err(Error::Config(format!(
                        "collection \"{}\" maps to unknown compute plugin \"{}\"",
                        collection.name, mapping.compute_plugin
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn compute_plugin(&self, name: &str) -> Option<&ComputePluginConfig> {
        self.compute_plugin.iter().find(|p| p.name == name)
    }
}

fn unique_names<'a>(section: &str, names: impl Iterator<Item = &'a str>) -> Result<HashSet<&'a str>> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(Error::Config(format!("{section}: name must not be empty")));
        }
        if !seen.insert(name) {
            return Err(Error::Config(format!("{section}: duplicate name \"{name}\"")));
        }
    }
    Ok(seen)
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
