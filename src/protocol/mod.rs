//! HTTP/JSON protocol
//!
//! Request types, the response envelope, handlers and the route table.

pub mod extract;
pub mod handlers;
pub mod requests;
pub mod responses;
pub mod router;

pub use responses::{ApiError, ApiResponse};
pub use router::build_router;
