//! Bootstrap, housekeeping scheduler, and smoke-test driver for a
//! standalone run of the Mashery credential-custody engine (§10.3, §10.5).
//!
//! None of this is part of the engine's core surface — `mashery-core`,
//! `mashery-crypto`, `mashery-client`, `mashery-engine`, and `mashery-server`
//! are usable as a library without it. This crate exists so the repo also
//! produces something a reader can actually run: a file-backed storage
//! adapter, process-level configuration, a periodic eviction task, and the
//! end-to-end scenario driver of §8.

pub mod config;
pub mod file_storage;
pub mod housekeeping;
pub mod smoke;

pub use config::{CliConfig, init_tracing};
pub use file_storage::FileStorage;
