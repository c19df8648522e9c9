//! Source registry
//!
//! Configured filesystem roots and their lookup.

pub mod registry;

pub use registry::{Source, SourceRegistry, SourceType};
