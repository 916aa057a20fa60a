pub mod document;
pub mod memory;
pub mod sqlite;

pub use document::{DocumentStore, WriteOp};
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
