//! HTTP server
//!
//! Binds the listener and serves the router over shared state.

pub mod core;
pub mod state;

pub use self::core::Server;
pub use self::state::AppState;
