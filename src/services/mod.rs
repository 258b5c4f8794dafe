pub mod als;
pub mod blobstore;
pub mod cache;
pub mod change_tracker;
pub mod diff;
pub mod events;
pub mod hasher;
pub mod metastore;
pub mod scanner;
pub mod sync;
pub mod watcher;
