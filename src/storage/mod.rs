//! File system storage management
//!
//! Path resolution against source roots, the filesystem operations built on
//! it, copy/move mechanics and disk usage.

pub mod copy;
pub mod disk;
pub mod locks;
pub mod operations;
pub mod resolver;
pub mod results;

pub use copy::{CollisionPolicy, CopyStrategy};
pub use operations::{Storage, StorageOptions};
pub use resolver::{PathResolver, ResolvedPath};
pub use results::{FileEntry, RetrieveResult, StorageInfo, TransferResult, UploadTarget};
