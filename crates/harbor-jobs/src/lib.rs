pub mod context;
pub mod indexing;
pub mod mapping;
pub mod registry;
pub mod search;

pub use context::SharedContext;
pub use indexing::{run_indexing, IndexingReport};
pub use mapping::{route, CompiledMapping, Route};
pub use registry::{JobKind, JobOutput, JobRecord, JobRegistry, JobState, PollStatus};
pub use search::{rerank, run_search, HydratedField, SearchRequest, SearchResultEntry, SearchTerm};
