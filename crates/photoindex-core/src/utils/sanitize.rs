//! Sanitizers for values that become derivative cache path components or
//! index keys.

use std::path::{Component, Path, PathBuf};

/// Reduce a fingerprint to characters that are safe as a directory name.
pub fn sanitize_fingerprint(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(64));
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        }
        if out.len() >= 64 {
            break;
        }
    }
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

/// Variant names are lowercase `[a-z0-9_-]`; anything else is dropped.
pub fn sanitize_variant_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(32));
    for c in input.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        }
        if out.len() >= 32 {
            break;
        }
    }
    if out.is_empty() {
        "variant".to_string()
    } else {
        out
    }
}

/// Display title for an album: the last path component, or the whole path
/// when it has none (e.g. `/`).
pub fn album_title_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lexically clean a root path: no trailing separator, no `.` components,
/// `..` folded into its parent. Symlinks are not resolved.
pub fn normalize_root_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_base = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir)
                        | Some(Component::Prefix(_))
                        | Some(Component::ParentDir)
                );
                if !at_base {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_fingerprint_removes_path_chars() {
        let s = sanitize_fingerprint("../..\\evil:hash");
        assert!(!s.contains('/'));
        assert!(!s.contains('\\'));
        assert!(!s.contains(':'));
        assert!(!s.contains('.'));
        assert_eq!(s, "evilhash");
    }

    #[test]
    fn sanitize_variant_name_never_empty() {
        assert_eq!(sanitize_variant_name("   "), "variant");
        assert_eq!(sanitize_variant_name("../Thumb"), "thumb");
    }

    #[test]
    fn album_title_uses_last_component() {
        assert_eq!(album_title_for(Path::new("/photos/2020")), "2020");
        assert_eq!(album_title_for(Path::new("/")), "/");
    }

    #[test]
    fn normalize_root_path_cleans_lexically() {
        assert_eq!(normalize_root_path(Path::new("/photos/")), PathBuf::from("/photos"));
        assert_eq!(normalize_root_path(Path::new("/photos//2020/")), PathBuf::from("/photos/2020"));
        assert_eq!(normalize_root_path(Path::new("/photos/./a/../b")), PathBuf::from("/photos/b"));
        assert_eq!(normalize_root_path(Path::new("/../photos")), PathBuf::from("/photos"));
        assert_eq!(normalize_root_path(Path::new("/")), PathBuf::from("/"));
    }
}
