//! In-memory filesystem answering the engine's OS calls.
//!
//! A [`PseudoFs`] is an immutable value: every mutation returns a new snapshot and leaves the
//! original untouched. The maps are shared behind `Arc`s, so a snapshot that is never written
//! costs one reference count to clone.
//!
//! Paths are absolute and `/` separated. Every file's ancestor directories exist, and `/`
//! always exists.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    ops::Bound,
    sync::Arc,
};

use pausa::{ExcType, Object, OsFunction, dir_stat, file_stat};
use tracing::trace;

use crate::handler::{HandlerFailure, HandlerResult};

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Failure of a filesystem operation, formatted like the matching `OSError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    NotFound(String),
    AlreadyExists(String),
    IsADirectory(String),
    NotADirectory(String),
    DirectoryNotEmpty(String),
    PermissionDenied(String),
    InvalidArgument(String),
    /// File content is not valid UTF-8; `position` is the offset of the first bad byte.
    InvalidUtf8 { path: String, position: usize },
}

impl FsError {
    /// The exception type the guest sees.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        match self {
            Self::NotFound(_) => ExcType::FileNotFoundError,
            Self::AlreadyExists(_) => ExcType::FileExistsError,
            Self::IsADirectory(_) => ExcType::IsADirectoryError,
            Self::NotADirectory(_) => ExcType::NotADirectoryError,
            Self::PermissionDenied(_) => ExcType::PermissionError,
            Self::DirectoryNotEmpty(_) | Self::InvalidArgument(_) => ExcType::OSError,
            Self::InvalidUtf8 { .. } => ExcType::UnicodeDecodeError,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "[Errno 2] No such file or directory: '{path}'"),
            Self::AlreadyExists(path) => write!(f, "[Errno 17] File exists: '{path}'"),
            Self::IsADirectory(path) => write!(f, "[Errno 21] Is a directory: '{path}'"),
            Self::NotADirectory(path) => write!(f, "[Errno 20] Not a directory: '{path}'"),
            Self::DirectoryNotEmpty(path) => write!(f, "[Errno 39] Directory not empty: '{path}'"),
            Self::PermissionDenied(path) => write!(f, "[Errno 13] Permission denied: '{path}'"),
            Self::InvalidArgument(path) => write!(f, "[Errno 22] Invalid argument: '{path}'"),
            Self::InvalidUtf8 { path, position } => {
                write!(f, "'utf-8' codec can't decode '{path}' at position {position}: invalid utf-8")
            }
        }
    }
}

impl std::error::Error for FsError {}

impl From<FsError> for HandlerFailure {
    fn from(err: FsError) -> Self {
        Self::new(err.exc_type(), err.to_string())
    }
}

/// What `stat` reports for one path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metadata {
    pub is_dir: bool,
    /// Permission bits only, without the file type bits.
    pub mode: u32,
    /// Content length in bytes, 0 for directories.
    pub size: u64,
    pub mtime: f64,
}

impl Metadata {
    /// Converts to the `os.stat_result` the guest receives.
    #[must_use]
    pub fn to_stat_result(&self) -> Object {
        if self.is_dir {
            dir_stat(i64::from(self.mode), self.mtime)
        } else {
            file_stat(i64::from(self.mode), self.size as i64, self.mtime)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileEntry {
    content: Vec<u8>,
    mode: u32,
}

/// Copy-on-write virtual filesystem with environment variables.
///
/// ```
/// use pausa_sandbox::PseudoFs;
///
/// let fs = PseudoFs::new().put_file("/data/a.txt", "hello").put_env("HOME", "/home/guest");
/// assert!(fs.is_dir("/data"));
///
/// let updated = fs.write_text("/data/b.txt", "world").unwrap();
/// assert_eq!(updated.list_dir("/data").unwrap(), vec!["/data/a.txt", "/data/b.txt"]);
/// assert!(!fs.exists("/data/b.txt"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoFs {
    files: Arc<BTreeMap<String, FileEntry>>,
    dirs: Arc<BTreeSet<String>>,
    env: Arc<BTreeMap<String, String>>,
    mtime: f64,
}

impl Default for PseudoFs {
    fn default() -> Self {
        Self::new()
    }
}

// builder
impl PseudoFs {
    /// An empty filesystem holding only `/`, with every timestamp at 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: Arc::default(),
            dirs: Arc::new(BTreeSet::from(["/".to_owned()])),
            env: Arc::default(),
            mtime: 0.0,
        }
    }

    /// Sets the modification time reported for every path.
    #[must_use]
    pub fn with_mtime(mut self, mtime: f64) -> Self {
        self.mtime = mtime;
        self
    }

    #[must_use]
    pub fn put_file(self, path: &str, content: impl Into<String>) -> Self {
        self.put_bytes_with_mode(path, content.into().into_bytes(), DEFAULT_FILE_MODE)
    }

    #[must_use]
    pub fn put_file_with_mode(self, path: &str, content: impl Into<String>, mode: u32) -> Self {
        self.put_bytes_with_mode(path, content.into().into_bytes(), mode)
    }

    #[must_use]
    pub fn put_bytes(self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.put_bytes_with_mode(path, content, DEFAULT_FILE_MODE)
    }

    /// Adds a file, creating its ancestors.
    ///
    /// Whatever was at the path or at an ancestor path is replaced. `/` itself cannot be
    /// replaced and is left as it is.
    #[must_use]
    pub fn put_bytes_with_mode(mut self, path: &str, content: impl Into<Vec<u8>>, mode: u32) -> Self {
        let path = normalize(path);
        if path == "/" {
            return self;
        }
        self.remove_subtree(&path);
        self.make_ancestors(&path);
        Arc::make_mut(&mut self.files).insert(
            path,
            FileEntry {
                content: content.into(),
                mode: mode & 0o7777,
            },
        );
        self
    }

    /// Adds a directory and its ancestors.
    #[must_use]
    pub fn mkdir(mut self, path: &str) -> Self {
        let path = normalize(path);
        Arc::make_mut(&mut self.files).remove(&path);
        self.make_ancestors(&path);
        Arc::make_mut(&mut self.dirs).insert(path);
        self
    }

    #[must_use]
    pub fn put_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.env).insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn put_envs<K: Into<String>, V: Into<String>>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self {
        let env = Arc::make_mut(&mut self.env);
        for (key, value) in vars {
            env.insert(key.into(), value.into());
        }
        self
    }
}

// queries
impl PseudoFs {
    #[must_use]
    pub fn mtime(&self) -> f64 {
        self.mtime
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        self.files.contains_key(&path) || self.dirs.contains(&path)
    }

    #[must_use]
    pub fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    #[must_use]
    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(&normalize(path))
    }

    pub fn read_bytes(&self, path: &str) -> Result<&[u8], FsError> {
        let path = normalize(path);
        if let Some(entry) = self.files.get(&path) {
            return Ok(&entry.content);
        }
        if self.dirs.contains(&path) {
            return Err(FsError::IsADirectory(path));
        }
        Err(self.lookup_error(path))
    }

    pub fn read_text(&self, path: &str) -> Result<&str, FsError> {
        let bytes = self.read_bytes(path)?;
        std::str::from_utf8(bytes).map_err(|err| FsError::InvalidUtf8 {
            path: normalize(path),
            position: err.valid_up_to(),
        })
    }

    /// Immediate children of a directory, files and directories together in path order.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let path = normalize(path);
        if !self.dirs.contains(&path) {
            return Err(if self.files.contains_key(&path) {
                FsError::NotADirectory(path)
            } else {
                self.lookup_error(path)
            });
        }
        let prefix = child_prefix(&path);
        let is_child = |candidate: &str| candidate.len() > prefix.len() && !candidate[prefix.len()..].contains('/');
        let mut children: Vec<String> = self
            .descendant_files(&prefix)
            .map(|(p, _)| p)
            .chain(self.descendant_dirs(&prefix))
            .filter(|p| is_child(*p))
            .map(str::to_owned)
            .collect();
        children.sort();
        Ok(children)
    }

    pub fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let path = normalize(path);
        if let Some(entry) = self.files.get(&path) {
            return Ok(Metadata {
                is_dir: false,
                mode: entry.mode,
                size: entry.content.len() as u64,
                mtime: self.mtime,
            });
        }
        if self.dirs.contains(&path) {
            return Ok(Metadata {
                is_dir: true,
                mode: DEFAULT_DIR_MODE,
                size: 0,
                mtime: self.mtime,
            });
        }
        Err(self.lookup_error(path))
    }

    #[must_use]
    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn environ(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Every file path with its content, in path order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(path, entry)| (path.as_str(), entry.content.as_slice()))
    }

    /// Every directory path, `/` included, in path order.
    pub fn dirs(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().map(String::as_str)
    }
}

// mutations, each returning a new snapshot
impl PseudoFs {
    /// Creates or overwrites a file, creating missing ancestor directories.
    ///
    /// An existing file keeps its mode.
    pub fn write_bytes(&self, path: &str, content: impl Into<Vec<u8>>) -> Result<Self, FsError> {
        let path = normalize(path);
        if self.dirs.contains(&path) {
            return Err(FsError::IsADirectory(path));
        }
        if self.has_file_ancestor(&path) {
            return Err(FsError::NotADirectory(path));
        }
        let content = content.into();
        trace!(path = %path, bytes = content.len(), "pseudo fs write");
        let mode = self.files.get(&path).map_or(DEFAULT_FILE_MODE, |entry| entry.mode);
        let mut next = self.clone();
        next.make_ancestors(&path);
        Arc::make_mut(&mut next.files).insert(path, FileEntry { content, mode });
        Ok(next)
    }

    pub fn write_text(&self, path: &str, text: &str) -> Result<Self, FsError> {
        self.write_bytes(path, text.as_bytes())
    }

    /// `Path.mkdir(parents=..., exist_ok=...)`.
    pub fn create_dir(&self, path: &str, parents: bool, exist_ok: bool) -> Result<Self, FsError> {
        let path = normalize(path);
        if self.dirs.contains(&path) {
            return if exist_ok {
                Ok(self.clone())
            } else {
                Err(FsError::AlreadyExists(path))
            };
        }
        if self.files.contains_key(&path) {
            return Err(FsError::AlreadyExists(path));
        }
        if self.has_file_ancestor(&path) {
            return Err(FsError::NotADirectory(path));
        }
        let parent_exists = parent(&path).is_some_and(|p| self.dirs.contains(p));
        if !parent_exists && !parents {
            return Err(FsError::NotFound(path));
        }
        trace!(path = %path, parents, "pseudo fs mkdir");
        let mut next = self.clone();
        next.make_ancestors(&path);
        Arc::make_mut(&mut next.dirs).insert(path);
        Ok(next)
    }

    /// `Path.unlink()`.
    pub fn remove_file(&self, path: &str) -> Result<Self, FsError> {
        let path = normalize(path);
        if self.dirs.contains(&path) {
            return Err(FsError::IsADirectory(path));
        }
        if !self.files.contains_key(&path) {
            return Err(self.lookup_error(path));
        }
        trace!(path = %path, "pseudo fs unlink");
        let mut next = self.clone();
        Arc::make_mut(&mut next.files).remove(&path);
        Ok(next)
    }

    /// `Path.rmdir()`: the directory must exist and be empty.
    pub fn remove_dir(&self, path: &str) -> Result<Self, FsError> {
        let path = normalize(path);
        if !self.dirs.contains(&path) {
            return Err(if self.files.contains_key(&path) {
                FsError::NotADirectory(path)
            } else {
                self.lookup_error(path)
            });
        }
        if path == "/" {
            return Err(FsError::PermissionDenied(path));
        }
        let prefix = child_prefix(&path);
        if self.descendant_files(&prefix).next().is_some() || self.descendant_dirs(&prefix).next().is_some() {
            return Err(FsError::DirectoryNotEmpty(path));
        }
        trace!(path = %path, "pseudo fs rmdir");
        let mut next = self.clone();
        Arc::make_mut(&mut next.dirs).remove(&path);
        Ok(next)
    }

    /// `Path.rename(target)`: moves a file, or a directory with everything below it.
    ///
    /// An existing target file is replaced, an existing target directory must be empty.
    pub fn rename(&self, from: &str, to: &str) -> Result<Self, FsError> {
        let from = normalize(from);
        let to = normalize(to);
        let from_is_dir = self.dirs.contains(&from);
        if !from_is_dir && !self.files.contains_key(&from) {
            return Err(self.lookup_error(from));
        }
        if from == to {
            return Ok(self.clone());
        }
        if from == "/" || to.starts_with(&child_prefix(&from)) {
            return Err(FsError::InvalidArgument(to));
        }
        if self.has_file_ancestor(&to) {
            return Err(FsError::NotADirectory(to));
        }
        if !parent(&to).is_some_and(|p| self.dirs.contains(p)) {
            return Err(FsError::NotFound(to));
        }

        let mut next = self.clone();
        if from_is_dir {
            if self.files.contains_key(&to) {
                return Err(FsError::NotADirectory(to));
            }
            if self.dirs.contains(&to) {
                let to_prefix = child_prefix(&to);
                let occupied = self.descendant_files(&to_prefix).next().is_some()
                    || self.descendant_dirs(&to_prefix).next().is_some();
                if occupied {
                    return Err(FsError::DirectoryNotEmpty(to));
                }
            }
            let from_prefix = child_prefix(&from);
            let moved_files: Vec<String> = self.descendant_files(&from_prefix).map(|(p, _)| p.to_owned()).collect();
            let moved_dirs: Vec<String> = self.descendant_dirs(&from_prefix).map(str::to_owned).collect();
            let files = Arc::make_mut(&mut next.files);
            for old in moved_files {
                if let Some(entry) = files.remove(&old) {
                    files.insert(format!("{to}{}", &old[from.len()..]), entry);
                }
            }
            let dirs = Arc::make_mut(&mut next.dirs);
            dirs.remove(&from);
            for old in moved_dirs {
                dirs.remove(&old);
                dirs.insert(format!("{to}{}", &old[from.len()..]));
            }
            dirs.insert(to.clone());
        } else {
            if self.dirs.contains(&to) {
                return Err(FsError::IsADirectory(to));
            }
            let files = Arc::make_mut(&mut next.files);
            if let Some(entry) = files.remove(&from) {
                files.insert(to.clone(), entry);
            }
        }
        trace!(from = %from, to = %to, "pseudo fs rename");
        Ok(next)
    }
}

// engine bridge
impl PseudoFs {
    /// Answers one OS call.
    ///
    /// Returns the result for the guest and, when the call changed the filesystem, the new
    /// snapshot. Failed calls never produce a snapshot.
    #[must_use]
    pub fn handle(
        &self,
        function: OsFunction,
        args: &[Object],
        kwargs: &[(String, Object)],
    ) -> (HandlerResult, Option<Self>) {
        match self.dispatch(&OsArgs { function, args, kwargs }) {
            Ok((value, updated)) => (HandlerResult::Success(value), updated),
            Err(failure) => (HandlerResult::Failure(failure), None),
        }
    }

    fn dispatch(&self, call: &OsArgs<'_>) -> Result<(Object, Option<Self>), HandlerFailure> {
        let value = match call.function {
            OsFunction::Exists => Object::Bool(self.exists(call.path()?)),
            OsFunction::IsFile => Object::Bool(self.is_file(call.path()?)),
            OsFunction::IsDir => Object::Bool(self.is_dir(call.path()?)),
            OsFunction::IsSymlink => {
                call.path()?;
                Object::Bool(false)
            }
            OsFunction::ReadText => Object::String(self.read_text(call.path()?)?.to_owned()),
            OsFunction::ReadBytes => Object::Bytes(self.read_bytes(call.path()?)?.to_vec()),
            OsFunction::WriteText => {
                let data = call.string(1, "data")?;
                let next = self.write_text(call.path()?, data)?;
                return Ok((Object::Int(data.len() as i64), Some(next)));
            }
            OsFunction::WriteBytes => {
                let data = call.bytes(1, "data")?;
                let next = self.write_bytes(call.path()?, data)?;
                return Ok((Object::Int(data.len() as i64), Some(next)));
            }
            OsFunction::Mkdir => {
                // positional order follows Path.mkdir(mode, parents, exist_ok); mode is ignored
                let next = self.create_dir(call.path()?, call.flag(2, "parents"), call.flag(3, "exist_ok"))?;
                return Ok((Object::None, Some(next)));
            }
            OsFunction::Unlink => return Ok((Object::None, Some(self.remove_file(call.path()?)?))),
            OsFunction::Rmdir => return Ok((Object::None, Some(self.remove_dir(call.path()?)?))),
            OsFunction::Iterdir => Object::List(self.list_dir(call.path()?)?.into_iter().map(Object::Path).collect()),
            OsFunction::Stat => self.stat(call.path()?)?.to_stat_result(),
            OsFunction::Rename => {
                let target = call.path_arg(1, "target")?;
                let next = self.rename(call.path()?, target)?;
                return Ok((Object::Path(normalize(target)), Some(next)));
            }
            OsFunction::Resolve | OsFunction::Absolute => Object::Path(normalize(call.path()?)),
            OsFunction::Getenv => {
                let key = call.string(0, "key")?;
                match self.getenv(key) {
                    Some(value) => Object::String(value.to_owned()),
                    None => call.get(1, "default").cloned().unwrap_or(Object::None),
                }
            }
            OsFunction::GetEnviron => Object::dict(
                self.env
                    .iter()
                    .map(|(k, v)| (Object::String(k.clone()), Object::String(v.clone()))),
            ),
        };
        Ok((value, None))
    }
}

// internals
impl PseudoFs {
    fn make_ancestors(&mut self, path: &str) {
        let missing: Vec<String> = ancestors(path)
            .filter(|a| !self.dirs.contains(*a))
            .map(str::to_owned)
            .collect();
        if missing.is_empty() {
            return;
        }
        let files = Arc::make_mut(&mut self.files);
        for dir in &missing {
            files.remove(dir);
        }
        Arc::make_mut(&mut self.dirs).extend(missing);
    }

    /// Drops the path and everything below it.
    fn remove_subtree(&mut self, path: &str) {
        let prefix = child_prefix(path);
        let files: Vec<String> = self.descendant_files(&prefix).map(|(p, _)| p.to_owned()).collect();
        let dirs: Vec<String> = self.descendant_dirs(&prefix).map(str::to_owned).collect();
        let file_map = Arc::make_mut(&mut self.files);
        file_map.remove(path);
        for file in files {
            file_map.remove(&file);
        }
        let dir_set = Arc::make_mut(&mut self.dirs);
        dir_set.remove(path);
        for dir in dirs {
            dir_set.remove(&dir);
        }
    }

    fn descendant_files<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a FileEntry)> + 'a {
        self.files
            .range::<str, _>((Bound::Excluded(prefix), Bound::Unbounded))
            .take_while(move |(p, _)| p.starts_with(prefix))
            .map(|(p, entry)| (p.as_str(), entry))
    }

    fn descendant_dirs<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.dirs
            .range::<str, _>((Bound::Excluded(prefix), Bound::Unbounded))
            .take_while(move |p| p.starts_with(prefix))
            .map(String::as_str)
    }

    fn has_file_ancestor(&self, path: &str) -> bool {
        ancestors(path).any(|a| self.files.contains_key(a))
    }

    fn lookup_error(&self, path: String) -> FsError {
        if self.has_file_ancestor(&path) {
            FsError::NotADirectory(path)
        } else {
            FsError::NotFound(path)
        }
    }
}

/// Lexical normalization: repeated slashes and `.` vanish, `..` pops a segment, relative paths
/// are anchored at `/`.
pub(crate) fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for part in &parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent(path), |p| parent(*p))
}

/// Prefix shared by every path strictly below `dir`.
fn child_prefix(dir: &str) -> String {
    if dir == "/" { "/".to_owned() } else { format!("{dir}/") }
}

/// Argument access for one OS call: positional first, then keyword.
struct OsArgs<'a> {
    function: OsFunction,
    args: &'a [Object],
    kwargs: &'a [(String, Object)],
}

impl<'a> OsArgs<'a> {
    fn get(&self, index: usize, name: &str) -> Option<&'a Object> {
        self.args
            .get(index)
            .or_else(|| self.kwargs.iter().find(|(key, _)| key == name).map(|(_, value)| value))
    }

    fn required(&self, index: usize, name: &str) -> Result<&'a Object, HandlerFailure> {
        self.get(index, name).ok_or_else(|| {
            HandlerFailure::new(
                ExcType::TypeError,
                format!("{}() missing required argument: '{name}'", self.function),
            )
        })
    }

    fn wrong_type(&self, name: &str, expected: &str, got: &Object) -> HandlerFailure {
        HandlerFailure::new(
            ExcType::TypeError,
            format!(
                "{}() argument '{name}' must be {expected}, not {}",
                self.function,
                got.type_name()
            ),
        )
    }

    fn path(&self) -> Result<&'a str, HandlerFailure> {
        self.path_arg(0, "path")
    }

    fn path_arg(&self, index: usize, name: &str) -> Result<&'a str, HandlerFailure> {
        match self.required(index, name)? {
            Object::Path(p) | Object::String(p) => Ok(p),
            other => Err(self.wrong_type(name, "str or Path", other)),
        }
    }

    fn string(&self, index: usize, name: &str) -> Result<&'a str, HandlerFailure> {
        match self.required(index, name)? {
            Object::String(s) => Ok(s),
            other => Err(self.wrong_type(name, "str", other)),
        }
    }

    fn bytes(&self, index: usize, name: &str) -> Result<&'a [u8], HandlerFailure> {
        match self.required(index, name)? {
            Object::Bytes(b) => Ok(b),
            other => Err(self.wrong_type(name, "bytes", other)),
        }
    }

    fn flag(&self, index: usize, name: &str) -> bool {
        self.get(index, name).is_some_and(Object::is_truthy)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn p(path: &str) -> Object {
        Object::Path(path.to_owned())
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize("/a/b"), "/a/b");
        assert_eq!(normalize("a//b/"), "/a/b");
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn parents_and_prefixes() {
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(ancestors("/a/b/c").collect::<Vec<_>>(), vec!["/a/b", "/a", "/"]);
        assert_eq!(child_prefix("/"), "/");
        assert_eq!(child_prefix("/a"), "/a/");
    }

    #[test]
    fn builder_creates_ancestors() {
        let fs = PseudoFs::new().put_file("/x/y/z.txt", "hi");
        assert!(fs.is_dir("/x"));
        assert!(fs.is_dir("/x/y"));
        assert!(fs.is_file("/x/y/z.txt"));
        assert!(fs.is_dir("/"));
    }

    #[test]
    fn write_then_read() {
        let fs = PseudoFs::new().write_text("/notes/today.txt", "done").unwrap();
        assert_eq!(fs.read_text("/notes/today.txt").unwrap(), "done");
        assert!(fs.is_dir("/notes"));
    }

    #[test]
    fn writes_do_not_touch_the_original() {
        let original = PseudoFs::new().put_file("/a.txt", "one");
        let updated = original.write_text("/a.txt", "two").unwrap();
        assert_eq!(original.read_text("/a.txt").unwrap(), "one");
        assert_eq!(updated.read_text("/a.txt").unwrap(), "two");
    }

    #[test]
    fn overwrite_keeps_mode() {
        let fs = PseudoFs::new().put_file_with_mode("/run.sh", "#!", 0o755);
        let fs = fs.write_text("/run.sh", "#!/bin/sh").unwrap();
        assert_eq!(fs.stat("/run.sh").unwrap().mode, 0o755);
    }

    #[test]
    fn read_errors() {
        let fs = PseudoFs::new().put_file("/f", "x").mkdir("/d").put_bytes("/bin", vec![0xff, 0xfe]);
        assert_eq!(fs.read_text("/missing"), Err(FsError::NotFound("/missing".to_owned())));
        assert_eq!(fs.read_text("/d"), Err(FsError::IsADirectory("/d".to_owned())));
        assert_eq!(fs.read_text("/f/inner"), Err(FsError::NotADirectory("/f/inner".to_owned())));
        assert_eq!(
            fs.read_text("/bin"),
            Err(FsError::InvalidUtf8 {
                path: "/bin".to_owned(),
                position: 0
            })
        );
        assert_eq!(
            FsError::NotFound("/missing".to_owned()).to_string(),
            "[Errno 2] No such file or directory: '/missing'"
        );
    }

    #[test]
    fn mkdir_rules() {
        let fs = PseudoFs::new();
        assert_eq!(
            fs.create_dir("/a/b", false, false),
            Err(FsError::NotFound("/a/b".to_owned()))
        );
        let fs = fs.create_dir("/a/b", true, false).unwrap();
        assert!(fs.is_dir("/a") && fs.is_dir("/a/b"));
        assert_eq!(fs.create_dir("/a", false, false), Err(FsError::AlreadyExists("/a".to_owned())));
        assert!(fs.create_dir("/a", false, true).is_ok());
        let fs = fs.put_file("/file", "");
        assert_eq!(fs.create_dir("/file", false, true), Err(FsError::AlreadyExists("/file".to_owned())));
    }

    #[test]
    fn rmdir_rules() {
        let fs = PseudoFs::new().put_file("/full/x.txt", "x").mkdir("/empty");
        assert_eq!(fs.remove_dir("/full"), Err(FsError::DirectoryNotEmpty("/full".to_owned())));
        assert_eq!(
            fs.remove_dir("/full").unwrap_err().to_string(),
            "[Errno 39] Directory not empty: '/full'"
        );
        let fs = fs.remove_dir("/empty").unwrap();
        assert!(!fs.exists("/empty"));
        assert_eq!(fs.remove_dir("/full/x.txt"), Err(FsError::NotADirectory("/full/x.txt".to_owned())));
        assert_eq!(fs.remove_dir("/"), Err(FsError::PermissionDenied("/".to_owned())));
    }

    #[test]
    fn unlink_rules() {
        let fs = PseudoFs::new().put_file("/d/f", "x");
        assert_eq!(fs.remove_file("/d"), Err(FsError::IsADirectory("/d".to_owned())));
        let fs = fs.remove_file("/d/f").unwrap();
        assert!(!fs.exists("/d/f"));
        assert!(fs.is_dir("/d"));
        assert_eq!(fs.remove_file("/d/f"), Err(FsError::NotFound("/d/f".to_owned())));
    }

    #[test]
    fn list_dir_immediate_children() {
        let fs = PseudoFs::new()
            .put_file("/data/a.txt", "a")
            .put_file("/data/b.txt", "b")
            .put_file("/data/sub/c.txt", "c")
            .put_file("/database/x", "x");
        assert_eq!(
            fs.list_dir("/data").unwrap(),
            vec!["/data/a.txt", "/data/b.txt", "/data/sub"]
        );
        assert_eq!(fs.list_dir("/").unwrap(), vec!["/data", "/database"]);
        assert_eq!(fs.list_dir("/data/a.txt"), Err(FsError::NotADirectory("/data/a.txt".to_owned())));
    }

    #[test]
    fn rename_file_and_directory() {
        let fs = PseudoFs::new().put_file("/src/a.txt", "a").put_file("/src/deep/b.txt", "b").mkdir("/dst");
        let moved = fs.rename("/src/a.txt", "/dst/a2.txt").unwrap();
        assert_eq!(moved.read_text("/dst/a2.txt").unwrap(), "a");
        assert!(!moved.exists("/src/a.txt"));

        let moved = fs.rename("/src", "/renamed").unwrap();
        assert_eq!(moved.read_text("/renamed/deep/b.txt").unwrap(), "b");
        assert!(moved.is_dir("/renamed/deep"));
        assert!(!moved.exists("/src"));
        assert!(!moved.exists("/src/deep"));

        assert_eq!(fs.rename("/src", "/src/deep/x"), Err(FsError::InvalidArgument("/src/deep/x".to_owned())));
        assert_eq!(fs.rename("/nope", "/x"), Err(FsError::NotFound("/nope".to_owned())));
        assert_eq!(fs.rename("/src/a.txt", "/no/such/dir"), Err(FsError::NotFound("/no/such/dir".to_owned())));
    }

    #[test]
    fn stat_metadata() {
        let fs = PseudoFs::new().with_mtime(1_700_000_000.0).put_file("/f.txt", "hello");
        assert_eq!(
            fs.stat("/f.txt").unwrap(),
            Metadata {
                is_dir: false,
                mode: 0o644,
                size: 5,
                mtime: 1_700_000_000.0
            }
        );
        assert_eq!(fs.stat("/").unwrap().to_stat_result(), dir_stat(0o755, 1_700_000_000.0));
    }

    #[test]
    fn handle_reports_updates() {
        let fs = PseudoFs::new();
        let args = [p("/a.txt"), Object::String("héllo".to_owned())];
        let (result, updated) = fs.handle(OsFunction::WriteText, &args, &[]);
        assert_eq!(result, HandlerResult::Success(Object::Int(6)));
        let updated = updated.unwrap();
        let (result, none) = updated.handle(OsFunction::ReadText, &[p("/a.txt")], &[]);
        assert_eq!(result, HandlerResult::Success(Object::String("héllo".to_owned())));
        assert!(none.is_none());
    }

    #[test]
    fn handle_file_tags() {
        let fs = PseudoFs::new().with_mtime(5.0).put_file("/d/a.txt", "abc");

        let args = [p("/d/b.bin"), Object::Bytes(vec![0, 159])];
        let (result, updated) = fs.handle(OsFunction::WriteBytes, &args, &[]);
        assert_eq!(result, HandlerResult::Success(Object::Int(2)));
        let fs = updated.unwrap();
        let (result, _) = fs.handle(OsFunction::ReadBytes, &[p("/d/b.bin")], &[]);
        assert_eq!(result, HandlerResult::Success(Object::Bytes(vec![0, 159])));
        let (result, _) = fs.handle(OsFunction::IsSymlink, &[p("/d/a.txt")], &[]);
        assert_eq!(result, HandlerResult::Success(Object::Bool(false)));
        let (result, _) = fs.handle(OsFunction::Stat, &[p("/d/a.txt")], &[]);
        assert_eq!(result, HandlerResult::Success(file_stat(0o644, 3, 5.0)));
        let (result, _) = fs.handle(OsFunction::Stat, &[p("/d")], &[]);
        assert_eq!(result, HandlerResult::Success(dir_stat(0o755, 5.0)));

        let (result, updated) = fs.handle(OsFunction::Unlink, &[p("/d/b.bin")], &[]);
        assert_eq!(result, HandlerResult::Success(Object::None));
        assert!(!updated.unwrap().exists("/d/b.bin"));
        let (result, updated) = fs.handle(OsFunction::Unlink, &[p("/d/nope")], &[]);
        assert_eq!(result, HandlerResult::Failure(FsError::NotFound("/d/nope".to_owned()).into()));
        assert!(updated.is_none());
    }

    #[test]
    fn handle_rename_takes_source_then_target() {
        let fs = PseudoFs::new().put_file("/in/a.txt", "a");
        let (result, updated) = fs.handle(OsFunction::Rename, &[p("/in/a.txt"), p("/in/../out.txt")], &[]);
        assert_eq!(result, HandlerResult::Success(p("/out.txt")));
        let moved = updated.unwrap();
        assert_eq!(moved.read_text("/out.txt").unwrap(), "a");
        assert!(!moved.exists("/in/a.txt"));

        let target = vec![("target".to_owned(), Object::String("/b.txt".to_owned()))];
        let (result, updated) = fs.handle(OsFunction::Rename, &[p("/in/a.txt")], &target);
        assert_eq!(result, HandlerResult::Success(p("/b.txt")));
        assert!(updated.unwrap().is_file("/b.txt"));
    }

    #[test]
    fn handle_resolve_and_absolute_normalize() {
        let fs = PseudoFs::new();
        for function in [OsFunction::Resolve, OsFunction::Absolute] {
            let (result, updated) = fs.handle(function, &[p("/a/./b/../c")], &[]);
            assert_eq!(result, HandlerResult::Success(p("/a/c")));
            assert!(updated.is_none());
        }
        let (result, _) = fs.handle(OsFunction::Resolve, &[p("rel/x")], &[]);
        assert_eq!(result, HandlerResult::Success(p("/rel/x")));
    }

    #[test]
    fn handle_mkdir_kwargs() {
        let fs = PseudoFs::new();
        let kwargs = vec![("parents".to_owned(), Object::Bool(true))];
        let (result, updated) = fs.handle(OsFunction::Mkdir, &[p("/x/y")], &kwargs);
        assert_eq!(result, HandlerResult::Success(Object::None));
        assert!(updated.unwrap().is_dir("/x/y"));
    }

    #[test]
    fn handle_argument_errors() {
        let fs = PseudoFs::new();
        let (result, _) = fs.handle(OsFunction::WriteText, &[p("/a.txt"), Object::Bytes(vec![1])], &[]);
        assert_eq!(
            result,
            HandlerResult::Failure(HandlerFailure::new(
                ExcType::TypeError,
                "write_text() argument 'data' must be str, not bytes"
            ))
        );
        let (result, _) = fs.handle(OsFunction::Exists, &[], &[]);
        assert_eq!(
            result,
            HandlerResult::Failure(HandlerFailure::new(
                ExcType::TypeError,
                "exists() missing required argument: 'path'"
            ))
        );
    }

    #[test]
    fn handle_env() {
        let fs = PseudoFs::new().put_envs([("A", "1"), ("B", "2")]);
        let (result, _) = fs.handle(OsFunction::Getenv, &[Object::String("A".to_owned()), Object::None], &[]);
        assert_eq!(result, HandlerResult::Success(Object::String("1".to_owned())));
        let (result, _) = fs.handle(
            OsFunction::Getenv,
            &[Object::String("Z".to_owned()), Object::String("dflt".to_owned())],
            &[],
        );
        assert_eq!(result, HandlerResult::Success(Object::String("dflt".to_owned())));
        let (result, _) = fs.handle(OsFunction::GetEnviron, &[], &[]);
        assert_eq!(
            result,
            HandlerResult::Success(Object::dict([
                (Object::String("A".to_owned()), Object::String("1".to_owned())),
                (Object::String("B".to_owned()), Object::String("2".to_owned())),
            ]))
        );
    }
}
