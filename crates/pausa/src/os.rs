//! OS-level operations that sandboxed code may request from the host.
//!
//! The interpreter never touches the real filesystem or environment. `pathlib.Path` methods,
//! `os.getenv` and `os.environ` pause execution with [`RunProgress::OsCall`](crate::RunProgress::OsCall)
//! carrying one of these function tags, and the host answers with a value.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::Object;

/// An OS operation requested by sandboxed code.
///
/// The string form is snake_case and matches the `pathlib.Path` method name for filesystem
/// operations, e.g. `OsFunction::IsFile` is `"is_file"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum OsFunction {
    Exists,
    IsFile,
    IsDir,
    IsSymlink,
    ReadText,
    ReadBytes,
    WriteText,
    WriteBytes,
    Mkdir,
    Unlink,
    Rmdir,
    Iterdir,
    Stat,
    Rename,
    Resolve,
    Absolute,
    Getenv,
    GetEnviron,
}

impl OsFunction {
    /// Maps a `pathlib.Path` method name to the operation it performs.
    ///
    /// Returns `None` for names that are not filesystem operations, including `getenv`.
    #[must_use]
    pub fn from_path_method(name: &str) -> Option<Self> {
        match name.parse() {
            Ok(Self::Getenv | Self::GetEnviron) | Err(_) => None,
            Ok(function) => Some(function),
        }
    }

    /// Whether this operation changes filesystem state.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::WriteText | Self::WriteBytes | Self::Mkdir | Self::Unlink | Self::Rmdir | Self::Rename
        )
    }
}

/// Field names of `os.stat_result`, in tuple order.
pub const STAT_RESULT_FIELDS: [&str; 10] = [
    "st_mode", "st_ino", "st_dev", "st_nlink", "st_uid", "st_gid", "st_size", "st_atime", "st_mtime", "st_ctime",
];

/// File type bit for regular files in `st_mode`.
pub const S_IFREG: i64 = 0o100_000;
/// File type bit for directories in `st_mode`.
pub const S_IFDIR: i64 = 0o040_000;

/// Builds an `os.stat_result` named tuple from all ten fields.
#[must_use]
#[expect(clippy::too_many_arguments)]
pub fn stat_result(
    st_mode: i64,
    st_ino: i64,
    st_dev: i64,
    st_nlink: i64,
    st_uid: i64,
    st_gid: i64,
    st_size: i64,
    st_atime: f64,
    st_mtime: f64,
    st_ctime: f64,
) -> Object {
    Object::NamedTuple {
        type_name: "os.stat_result".to_owned(),
        field_names: STAT_RESULT_FIELDS.iter().map(|f| (*f).to_owned()).collect(),
        values: vec![
            Object::Int(st_mode),
            Object::Int(st_ino),
            Object::Int(st_dev),
            Object::Int(st_nlink),
            Object::Int(st_uid),
            Object::Int(st_gid),
            Object::Int(st_size),
            Object::Float(st_atime),
            Object::Float(st_mtime),
            Object::Float(st_ctime),
        ],
    }
}

/// `stat_result` for a regular file with the given permission bits, size and modification time.
///
/// The regular-file type bit is added to `mode`, so pass `0o644` rather than `0o100644`.
#[must_use]
pub fn file_stat(mode: i64, size: i64, mtime: f64) -> Object {
    stat_result(S_IFREG | (mode & 0o7777), 0, 0, 1, 0, 0, size, mtime, mtime, mtime)
}

/// `stat_result` for a directory with the given permission bits and modification time.
#[must_use]
pub fn dir_stat(mode: i64, mtime: f64) -> Object {
    stat_result(S_IFDIR | (mode & 0o7777), 0, 0, 2, 0, 0, 0, mtime, mtime, mtime)
}
