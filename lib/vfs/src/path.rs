//! Pure path-string algebra.
//!
//! Paths are absolute, `/`-separated strings. Nothing here touches the node
//! graph; the resolver in [`crate::Vfs`] builds on these primitives.

use crate::{FsError, Result};

/// Maximum length of a single path component.
pub const NAME_MAX: usize = 255;

/// Normalize an absolute path:
///
/// * the path must start with `/`,
/// * `.` components disappear,
/// * `..` pops the previous component and is an error above the root,
/// * repeated and trailing separators disappear.
///
/// Normalizing an already-normalized path returns it unchanged.
pub fn normalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidInput);
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => (),
            ".." => {
                if parts.pop().is_none() {
                    return Err(FsError::InvalidInput);
                }
            }
            name => {
                if name.len() > NAME_MAX {
                    return Err(FsError::NameTooLong);
                }
                parts.push(name);
            }
        }
    }

    if parts.is_empty() {
        return Ok("/".to_string());
    }

    let mut out = String::with_capacity(path.len());
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    Ok(out)
}

/// Join `base` (absolute) and `tail`. An absolute `tail` replaces `base`.
pub fn join(base: &str, tail: &str) -> Result<String> {
    if tail.starts_with('/') {
        return normalize(tail);
    }
    let mut combined = String::with_capacity(base.len() + tail.len() + 1);
    combined.push_str(base);
    combined.push('/');
    combined.push_str(tail);
    normalize(&combined)
}

/// Make `path` absolute against `cwd` and normalize it.
pub fn absolute(cwd: &str, path: &str) -> Result<String> {
    if path.starts_with('/') {
        normalize(path)
    } else {
        join(cwd, path)
    }
}

/// Express `path` relative to `base`. Both must be normalized absolute paths.
pub fn relative(base: &str, path: &str) -> String {
    let base_parts: Vec<&str> = base.split('/').filter(|c| !c.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

    let common = base_parts
        .iter()
        .zip(path_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::new();
    for _ in common..base_parts.len() {
        parts.push("..");
    }
    parts.extend(&path_parts[common..]);

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Split a normalized path into its parent path and file name.
///
/// The root has no parent and no name.
pub fn split(path: &str) -> Option<(&str, &str)> {
    if path == "/" {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

/// Iterate the components of a normalized path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "/",
            "/foo",
            "/foo/bar",
            "/./././foo/",
            "/foo/bar//",
            "/foo/bar/../bar",
            "/foo/./../foo/bar/./baz/./../baz/qux/../../baz/./qux/hello.txt",
        ] {
            let once = normalize(raw).unwrap();
            assert_eq!(normalize(&once), Ok(once.clone()), "normalizing {raw:?}");
        }
    }

    #[test]
    fn normalize_rejects_relative_and_escaping_paths() {
        assert_eq!(normalize("foo"), Err(FsError::InvalidInput));
        assert_eq!(normalize("/.."), Err(FsError::InvalidInput));
        assert_eq!(normalize("/foo/../../bar"), Err(FsError::InvalidInput));
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize("/foo/bar/../..").as_deref(), Ok("/"));
        assert_eq!(normalize("/foo/bar/../bar").as_deref(), Ok("/foo/bar"));
        assert_eq!(normalize("//foo///bar/").as_deref(), Ok("/foo/bar"));
    }

    #[test]
    fn join_handles_absolute_tails() {
        assert_eq!(join("/a/b", "c/d").as_deref(), Ok("/a/b/c/d"));
        assert_eq!(join("/a/b", "/c").as_deref(), Ok("/c"));
        assert_eq!(join("/a/b", "../c").as_deref(), Ok("/a/c"));
    }

    #[test]
    fn relative_walks_up_and_down() {
        assert_eq!(relative("/a/b", "/a/b/c"), "c");
        assert_eq!(relative("/a/b", "/a/x"), "../x");
        assert_eq!(relative("/a/b", "/a/b"), ".");
        assert_eq!(relative("/", "/a"), "a");
    }

    #[test]
    fn split_peels_the_last_component() {
        assert_eq!(split("/"), None);
        assert_eq!(split("/foo"), Some(("/", "foo")));
        assert_eq!(split("/foo/bar"), Some(("/foo", "bar")));
    }
}
