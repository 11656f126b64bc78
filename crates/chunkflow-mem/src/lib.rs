#![forbid(unsafe_code)]
//! chunkflow-mem: memory governor and spill manager.
//!
//! The governor makes the "spill now?" decision for one operation call. The
//! spill manager turns accumulated batches into compressed columnar segments
//! and records them in a `SpillManifest`.
//!
//! No async or object-store IO lives here. A generic `Storage` trait is exposed
//! (in `spill::`) and implemented by `chunkflow-io`.

pub mod error;
pub mod governor;
pub mod spill;
pub mod tracking;

pub use governor::MemoryGovernor;
pub use spill::{Codec, SpillManager, SpillReader, Storage};
