//! Input validation utilities
//!
//! Checks applied to client-supplied names before they reach the filesystem.

use std::path::{Component, Path};

/// Longest entry name most filesystems accept, in bytes
pub const MAX_NAME_BYTES: usize = 255;

/// A single plain file name: non-empty, no separators, not `.` or `..`,
/// no NUL, and not interpreted as a prefix or root by the host platform.
pub fn is_valid_entry_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_BYTES {
        return false;
    }
    if name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Strip leading separators so a client path is always taken as relative
pub fn trim_leading_separators(input: &str) -> &str {
    input.trim_start_matches(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(is_valid_entry_name("report.txt"));
        assert!(is_valid_entry_name(".hidden"));
        assert!(is_valid_entry_name("name with spaces (1).tar.gz"));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert!(!is_valid_entry_name(""));
        assert!(!is_valid_entry_name("."));
        assert!(!is_valid_entry_name(".."));
        assert!(!is_valid_entry_name("a/b"));
        assert!(!is_valid_entry_name("..\\evil"));
        assert!(!is_valid_entry_name("nul\0byte"));
        assert!(!is_valid_entry_name(&"x".repeat(256)));
    }

    #[test]
    fn trims_both_separator_styles() {
        assert_eq!(trim_leading_separators("/\\/docs/a.txt"), "docs/a.txt");
        assert_eq!(trim_leading_separators("docs"), "docs");
    }
}
