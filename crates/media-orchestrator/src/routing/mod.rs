//! Per-consultation routing contexts.

pub mod allocator;
pub mod codecs;

pub use allocator::{resolve_hosting_server, RouterAllocator, RouterEntry};
pub use codecs::baseline_codecs;
