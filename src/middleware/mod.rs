//! Middleware
//!
//! CORS headers and request logging, applied to every route.

pub mod cors;
pub mod logging;
