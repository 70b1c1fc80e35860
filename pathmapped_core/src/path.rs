//! Path canonicalization for the virtual namespace.
//!
//! A path is split into `(parent_path, filename)` on its last
//! `/`-terminated segment. Parent paths always start with `/` and never end
//! with one (the root is `/` itself). Directory filenames keep their trailing
//! `/`, which is the only thing that tells a file `foo` apart from a
//! directory `foo/`.

pub const ROOT_DIR: &str = "/";

pub fn is_root(path: &str) -> bool {
    path == ROOT_DIR
}

/// Splits after every `/`: `"/path/to/file"` -> `["/", "path/", "to/", "file"]`.
fn segments(path: &str) -> Vec<&str> {
    path.split_inclusive('/').collect()
}

/// Returns the normalized parent of `path`, or `None` for the root.
pub fn parent_path(path: &str) -> Option<String> {
    if is_root(path) || path.is_empty() {
        return None;
    }
    let segs = segments(path);
    let parent: String = segs[..segs.len() - 1].concat();
    Some(normalize_parent_path(&parent))
}

/// Returns the leaf segment of `path` (with its trailing `/` for
/// directories), or `None` for the root.
pub fn filename(path: &str) -> Option<String> {
    if is_root(path) {
        return None;
    }
    segments(path).last().map(|s| (*s).to_owned())
}

/// Prepends `/` if missing and strips one trailing `/`, so `org/` and
/// `/org/` both become `/org`.
pub fn normalize_parent_path(path: &str) -> String {
    if is_root(path) {
        return path.to_owned();
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Joins a normalized parent path and a filename back into a full path.
/// Directory filenames keep their trailing `/`.
pub fn full_path(parent_path: &str, filename: &str) -> String {
    if is_root(parent_path) {
        format!("/{filename}")
    } else {
        format!("{parent_path}/{filename}")
    }
}

/// Joins segments into an absolute path, collapsing repeated separators.
/// A trailing `/` on the last segment is preserved.
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::from(ROOT_DIR);
    for seg in segments {
        for tok in seg.as_ref().split('/').filter(|t| !t.is_empty()) {
            if !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(tok);
        }
    }
    let dir = segments
        .last()
        .map(|s| s.as_ref().ends_with('/'))
        .unwrap_or(false);
    if dir && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Appends a trailing `/` unless already present.
pub fn as_dir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

/// The canonical `"filesystem:/path"` string stored in the reverse index.
pub fn canonical_reference(filesystem: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{filesystem}:{path}")
    } else {
        format!("{filesystem}:/{path}")
    }
}

/// Directory markers for every ancestor of `parent_path`, top-down, as
/// `(parent_path, filename)` pairs.
///
/// `/foo/bar/1.0` yields `("/", "foo/")`, `("/foo", "bar/")`,
/// `("/foo/bar", "1.0/")`.
pub fn ancestors_top_down(parent_path: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current = ROOT_DIR.to_owned();
    for tok in parent_path.split('/').filter(|t| !t.trim().is_empty()) {
        out.push((current.clone(), format!("{tok}/")));
        if !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(tok);
    }
    out
}

pub fn random_file_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

const LEVEL_1_DIR_LENGTH: usize = 2;
const LEVEL_2_DIR_LENGTH: usize = 2;

/// Two-level fan-out directory for a file id: `"0a1b..."` -> `"0a/1b"`.
pub fn storage_dir_for(file_id: &str) -> String {
    let l1 = LEVEL_1_DIR_LENGTH.min(file_id.len());
    let l2 = (LEVEL_1_DIR_LENGTH + LEVEL_2_DIR_LENGTH).min(file_id.len());
    format!("{}/{}", &file_id[..l1], &file_id[l1..l2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_path_of_files_and_dirs() {
        assert_eq!(parent_path("/path/to/file.txt").as_deref(), Some("/path/to"));
        assert_eq!(parent_path("/path/to/").as_deref(), Some("/path"));
        assert_eq!(parent_path("/path").as_deref(), Some("/"));
        assert_eq!(parent_path("path/to/file.txt").as_deref(), Some("/path/to"));
        assert_eq!(parent_path("file.txt").as_deref(), Some("/"));
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn filename_keeps_directory_slash() {
        assert_eq!(filename("/path/to/file.txt").as_deref(), Some("file.txt"));
        assert_eq!(filename("/path/to/").as_deref(), Some("to/"));
        assert_eq!(filename("/path/").as_deref(), Some("path/"));
        assert_eq!(filename("/"), None);
    }

    #[test]
    fn normalize_parent_path_variants() {
        assert_eq!(normalize_parent_path("/"), "/");
        assert_eq!(normalize_parent_path("org/"), "/org");
        assert_eq!(normalize_parent_path("/org/"), "/org");
        assert_eq!(normalize_parent_path("/org"), "/org");
        assert_eq!(normalize_parent_path(""), "/");
    }

    #[test]
    fn full_path_roundtrips_split() {
        for p in ["/a/b/c.txt", "/a/b/", "/top.txt", "/dir/"] {
            let parent = parent_path(p).unwrap();
            let name = filename(p).unwrap();
            assert_eq!(full_path(&parent, &name), p);
        }
    }

    #[test]
    fn join_collapses_separators() {
        assert_eq!(join(&["/foo/", "/bar", "baz.txt"]), "/foo/bar/baz.txt");
        assert_eq!(join(&["foo", "bar/"]), "/foo/bar/");
        assert_eq!(join::<&str>(&[]), "/");
    }

    #[test]
    fn ancestors_are_top_down() {
        let ancestors = ancestors_top_down("/path/to/my");
        assert_eq!(
            ancestors,
            vec![
                ("/".to_owned(), "path/".to_owned()),
                ("/path".to_owned(), "to/".to_owned()),
                ("/path/to".to_owned(), "my/".to_owned()),
            ]
        );
        assert!(ancestors_top_down("/").is_empty());
    }

    #[test]
    fn canonical_reference_always_has_leading_slash() {
        assert_eq!(canonical_reference("maven", "a/b.jar"), "maven:/a/b.jar");
        assert_eq!(canonical_reference("maven", "/a/b.jar"), "maven:/a/b.jar");
    }

    #[test]
    fn storage_dir_fans_out_on_prefix() {
        assert_eq!(storage_dir_for("0a1b2c3d"), "0a/1b");
        assert_eq!(storage_dir_for("abc"), "ab/c");
    }
}
