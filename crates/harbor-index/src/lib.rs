pub mod manager;
pub mod memory;
pub mod score;

#[cfg(feature = "lance")]
pub mod lance;

pub use manager::{init_collection, target_indexes, CollectionManager, IndexerRegistry};
pub use memory::MemoryIndexer;

#[cfg(feature = "lance")]
pub use lance::LanceIndexer;
