//! Utility functions
//!
//! Provides input validation helpers shared by the storage and protocol layers.

pub mod validation;
