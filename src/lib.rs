//! File manager server
//!
//! HTTP/JSON backend for browsing and managing files across one or more
//! configured directory roots ("sources").

pub mod config;
pub mod error;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod sources;
pub mod storage;
pub mod transfer;
pub mod utils;

pub use server::{AppState, Server};
