//! Tracked item persistence.
//!
//! The engine only ever talks to the [`Storage`] trait; ownership of the
//! document set stays with whatever implements it. Two implementations ship
//! here: an in-memory map for tests and embedding, and a single-file JSON
//! store with write-back on every mutation.

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::Storage;
