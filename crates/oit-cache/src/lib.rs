//! OIT Cache: Local Persistence
//!
//! Write-through storage for sampling data, keyed by visit. Every mutation is
//! written here before any network call so captured data survives reloads and
//! connectivity loss.
//!
//! ```text
//! Sequencer ──update──▶ SamplingCache ──▶ KeyValueStore (memory | files)
//! Reconciler ─update──▶      ▲
//! ```

pub mod cache;
pub mod error;
pub mod file;
pub mod store;

pub use cache::SamplingCache;
pub use error::CacheError;
pub use file::FileStore;
pub use store::{KeyValueStore, MemoryStore};
