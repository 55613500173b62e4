//! Chunked upload and merge

mod descriptor;
mod store;

pub use descriptor::ChunkDescriptor;
pub use store::{ChunkStore, MergeReport};
