//! Server-relative ("oppy") path derivation.
//!
//! An oppy path is the content-root-relative path of a file or directory,
//! joined with `/`, without a trailing slash and lower-cased. The content
//! root itself maps to the empty string, which is also what a request for
//! `/` normalizes to.

use std::path::{Component, Path};

/// Derive the oppy path of `path` under `www_dir`, requiring it to exist.
///
/// Returns `None` when the entry does not exist or lies outside `www_dir`.
pub fn oppy_path(path: &Path, www_dir: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    oppy_path_unchecked(path, www_dir)
}

/// Derive the oppy path of `path` under `www_dir` without touching the disk.
///
/// Used for entries that were just deleted, whose path must still be
/// resolvable so handlers can drop them.
pub fn oppy_path_unchecked(path: &Path, www_dir: &Path) -> Option<String> {
    let relative = path.strip_prefix(www_dir).ok()?;
    let mut out = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                out.push('/');
                out.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            // `..`, roots and prefixes would escape the content root
            _ => return None,
        }
    }
    Some(out.to_lowercase())
}

/// Normalize a request path into the same key space as [`oppy_path`].
///
/// Percent-escapes are decoded; an undecodable path is used verbatim.
pub fn normalize_request_path(path: &str) -> String {
    let decoded = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_owned());
    decoded.trim_end_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn derives_lowercase_slash_joined_paths() {
        let root = PathBuf::from("/srv/www");
        assert_eq!(
            oppy_path_unchecked(&root.join("Docs").join("Index.HTML"), &root),
            Some("/docs/index.html".to_string())
        );
    }

    #[test]
    fn content_root_maps_to_empty_path() {
        let root = PathBuf::from("/srv/www");
        assert_eq!(oppy_path_unchecked(&root, &root), Some(String::new()));
    }

    #[test]
    fn outside_root_has_no_path() {
        let root = PathBuf::from("/srv/www");
        assert_eq!(oppy_path_unchecked(Path::new("/etc/passwd"), &root), None);
        assert_eq!(oppy_path_unchecked(Path::new("/srv/wwwx/a"), &root), None);
    }

    #[test]
    fn missing_entries_have_no_checked_path() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(oppy_path(&dir.path().join("nope.txt"), dir.path()), None);

        std::fs::write(dir.path().join("yes.txt"), b"y").unwrap();
        assert_eq!(
            oppy_path(&dir.path().join("yes.txt"), dir.path()),
            Some("/yes.txt".to_string())
        );
    }

    #[test]
    fn request_paths_normalize_like_disk_paths() {
        assert_eq!(normalize_request_path("/"), "");
        assert_eq!(normalize_request_path("/Docs/"), "/docs");
        assert_eq!(normalize_request_path("/a%20b/C.txt"), "/a b/c.txt");
    }
}
