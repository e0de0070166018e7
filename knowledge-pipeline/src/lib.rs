pub mod batch;
pub mod index;
pub mod passages;
pub mod reconcile;
pub mod sources;

pub use batch::{BatchReport, CollectionBatchBuilder, SegmentTriple};
pub use index::{collection_name, RetrievedPassage, VectorIndexManager};
pub use passages::{Passage, SegmentKnowledgeBuilder};
pub use sources::SegmentDataSource;
