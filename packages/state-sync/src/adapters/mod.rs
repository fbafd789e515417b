//! Implementations of the durable-store capability.

pub mod documents_sea;
pub mod memory_store;

pub use documents_sea::SeaDocumentStore;
pub use memory_store::MemoryDocumentStore;
