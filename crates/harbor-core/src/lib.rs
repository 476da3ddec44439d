#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod collection;
pub mod config;
pub mod error;
pub mod index;
pub mod plugin;
pub mod registry;
pub mod traits;
pub mod types;

pub use collection::{BackendConfig, CollectionConfig, PluginMapping};
pub use error::{Error, Result};
pub use index::{Distance, Filter, FilterFlag, IndexPoint, IndexSpec, NamedVectors, ScoredPoint, VectorQuery};
pub use plugin::{Concept, NamedResult, PluginConfig, PluginResult, PluginRun, ResultData};
pub use registry::Registry;
pub use traits::{ComputePlugin, Embedder, IndexerPlugin};
pub use types::{DataField, DataPoint, FieldValue, Payload, Scalar};
