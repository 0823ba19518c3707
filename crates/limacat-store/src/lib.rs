// Flat-file persistence: one JSON record per line, plus single-document state files
// Small enough to diff in git, which is the whole point

pub mod store;

pub use store::{JsonLinesStore, StoreError};
