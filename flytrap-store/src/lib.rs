//! Durable envelope storage.
//!
//! An embedded sled database holds one tree per UTC day (`YYYYMMDD`); within
//! a tree, records are keyed by envelope id and hold the JSON-serialized
//! envelope. Writes go through a single pipeline consumer; reads come from
//! tree iterators and see a consistent point-in-time view.

pub mod error;
pub mod service;

pub use error::{Result, StoreError};
pub use service::EnvelopeStore;
