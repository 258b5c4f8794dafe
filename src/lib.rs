//! portsy-core: a content-addressed version-control engine for Ableton Live
//! project folders. See `SyncEngine` (push/pull), `Watcher` (session-file
//! change detection), and `Engine` (the wiring that ties both to durable
//! metadata and blob storage) for the main entry points.

pub mod cli;
pub mod domain;
pub mod engine;
pub mod services;
pub mod utils;

pub use domain::{Algo, CommitMeta, FileEntry, ProjectState};
pub use engine::Engine;
