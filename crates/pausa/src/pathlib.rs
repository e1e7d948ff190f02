//! Pure path manipulation for `pathlib.Path` values.
//!
//! Paths are plain strings inside the VM. Nothing here touches a filesystem: operations
//! that need one pause execution with an OS call instead.

/// Normalizes like `PurePosixPath`: repeated and trailing slashes and `.` parts are dropped.
///
/// `..` is kept, since resolving it needs the filesystem.
pub(crate) fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_owned();
    }
    let absolute = path.starts_with('/');
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// `base / part`, an absolute `part` replaces `base`.
pub(crate) fn join(base: &str, part: &str) -> String {
    if part.starts_with('/') || base == "." {
        normalize(part)
    } else {
        normalize(&format!("{base}/{part}"))
    }
}

/// Final path component, empty for `/`.
pub(crate) fn name(path: &str) -> &str {
    if path == "/" || path == "." {
        return "";
    }
    path.rsplit('/').next().unwrap_or("")
}

pub(crate) fn parent(path: &str) -> String {
    if path == "/" || path == "." {
        return path.to_owned();
    }
    match path.rfind('/') {
        Some(0) => "/".to_owned(),
        Some(idx) => path[..idx].to_owned(),
        None => ".".to_owned(),
    }
}

pub(crate) fn suffix(path: &str) -> &str {
    let name = name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx < name.len() - 1 => &name[idx..],
        _ => "",
    }
}

pub(crate) fn stem(path: &str) -> &str {
    let name = name(path);
    let suffix = suffix(path);
    &name[..name.len() - suffix.len()]
}

/// Components of the path, with a leading `/` for absolute paths.
pub(crate) fn parts(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    if path.starts_with('/') {
        parts.push("/".to_owned());
    }
    parts.extend(path.split('/').filter(|p| !p.is_empty() && *p != ".").map(str::to_owned));
    parts
}

/// Replaces the final component, `None` if the path has no name.
pub(crate) fn with_name(path: &str, new_name: &str) -> Option<String> {
    if name(path).is_empty() {
        return None;
    }
    Some(join(&parent(path), new_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize("a//b/./c/"), "a/b/c");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("//x"), "/x");
        assert_eq!(normalize("./"), ".");
        assert_eq!(normalize("a/../b"), "a/../b");
    }

    #[test]
    fn components() {
        assert_eq!(name("/data/report.tar.gz"), "report.tar.gz");
        assert_eq!(suffix("/data/report.tar.gz"), ".gz");
        assert_eq!(stem("/data/report.tar.gz"), "report.tar");
        assert_eq!(suffix("/data/.bashrc"), "");
        assert_eq!(parent("/data/x.txt"), "/data");
        assert_eq!(parent("/x.txt"), "/");
        assert_eq!(parent("x.txt"), ".");
        assert_eq!(join("/data", "/etc"), "/etc");
        assert_eq!(join(".", "a"), "a");
        assert_eq!(with_name("/a/b.txt", "c.md").as_deref(), Some("/a/c.md"));
        assert_eq!(parts("/a/b"), vec!["/", "a", "b"]);
    }
}
