//! Name -> constructor tables for plugins.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::plugin::PluginConfig;

/// Factory function building a plugin instance from its configuration.
pub type Constructor<T> = Arc<dyn Fn(&PluginConfig) -> Result<T> + Send + Sync>;

/// Explicit registration table. Names keep registration order.
pub struct Registry<T> {
    kind: &'static str,
    constructors: HashMap<String, Constructor<T>>,
    order: Vec<String>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self { kind: self.kind, constructors: self.constructors.clone(), order: self.order.clone() }
    }
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, constructors: HashMap::new(), order: Vec::new() }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&PluginConfig) -> Result<T> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.insert(name.clone(), Arc::new(constructor)).is_none() {
            self.order.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn build(&self, name: &str, config: &PluginConfig) -> Result<T> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownPlugin(format!("{} \"{name}\"", self.kind)))?;
        constructor(config)
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_unknown() {
        let mut r: Registry<usize> = Registry::new("compute_plugin");
        r.register("Len", |c: &PluginConfig| Ok(c.name.len()));
        r.register("Zero", |_c: &PluginConfig| Ok(0));
        assert_eq!(r.names(), ["Len", "Zero"]);
        assert_eq!(r.build("Len", &PluginConfig::new("abc", serde_json::Value::Null)).unwrap(), 3);
        let err = r.build("Missing", &PluginConfig::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownPlugin(_)));
    }
}
