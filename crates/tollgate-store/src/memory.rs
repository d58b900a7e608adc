//! In-process stores
//!
//! Used by tests and by deployments that run without MySQL for local
//! development. Each store guards its whole state with one lock, so every
//! trait operation is atomic the same way a transaction would be.

mod mirror;
mod upstream;

pub use mirror::MemoryMirrorStore;
pub use upstream::MemoryUpstreamStore;
