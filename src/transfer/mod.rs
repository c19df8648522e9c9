//! Transfer module
//!
//! Streams file bodies in and out of the server: uploads, served and
//! downloaded files, and inline previews.

pub mod file_ops;
pub mod preview;

pub use file_ops::{ByteRange, Disposition, UploadWriter, file_response, parse_range};
pub use preview::{Preview, is_text_content, read_preview};
