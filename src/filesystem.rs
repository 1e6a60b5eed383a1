//! File-system bridge. Native invokers for `WinNTFileSystem` and
//! `UnixFileSystem` dispatch here; the bridge itself is embedder-supplied so
//! sandboxed hosts can virtualize every path.

use std::io;
use std::path::Path;

/// Attribute bits as the JDK encodes them, union-style.
pub const ATTR_EXISTS: i32 = 0x01;
pub const ATTR_REGULAR: i32 = 0x02;
pub const ATTR_DIRECTORY: i32 = 0x04;

/// Access modes for `check_access`/`set_permission`.
pub const ACCESS_READ: i32 = 0x04;
pub const ACCESS_WRITE: i32 = 0x02;
pub const ACCESS_EXECUTE: i32 = 0x01;

/// Space query kinds for `get_space`.
pub const SPACE_TOTAL: i32 = 0;
pub const SPACE_FREE: i32 = 1;
pub const SPACE_USABLE: i32 = 2;

pub trait FileManager: Send + Sync {
    fn canonicalize(&self, path: &str) -> io::Result<String>;
    fn list(&self, path: &str) -> io::Result<Vec<String>>;
    /// Union of the `ATTR_*` bits for the path.
    fn get_attributes(&self, path: &str) -> io::Result<i32>;
    fn rename(&self, from: &str, to: &str) -> io::Result<bool>;
    fn delete(&self, path: &str) -> io::Result<bool>;
    fn set_last_modified_time(&self, path: &str, millis: i64) -> io::Result<bool>;
    fn set_read_only(&self, path: &str) -> io::Result<bool>;
    fn create_file_exclusively(&self, path: &str) -> io::Result<bool>;
    fn set_permission(&self, path: &str, access: i32, enable: bool, owner_only: bool)
    -> io::Result<bool>;
    fn get_space(&self, path: &str, kind: i32) -> io::Result<i64>;
    fn check_access(&self, path: &str, access: i32) -> io::Result<bool>;
}

/// Pass-through implementation over the host file system.
pub struct HostFileManager;

impl FileManager for HostFileManager {
    fn canonicalize(&self, path: &str) -> io::Result<String> {
        Ok(std::fs::canonicalize(path)?.to_string_lossy().into_owned())
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn get_attributes(&self, path: &str) -> io::Result<i32> {
        let path = Path::new(path);
        let Ok(metadata) = std::fs::metadata(path) else {
            return Ok(0);
        };
        let mut attributes = ATTR_EXISTS;
        if metadata.is_file() {
            attributes |= ATTR_REGULAR;
        }
        if metadata.is_dir() {
            attributes |= ATTR_DIRECTORY;
        }
        Ok(attributes)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<bool> {
        Ok(std::fs::rename(from, to).is_ok())
    }

    fn delete(&self, path: &str) -> io::Result<bool> {
        let target = Path::new(path);
        let removed = if target.is_dir() {
            std::fs::remove_dir(target)
        } else {
            std::fs::remove_file(target)
        };
        Ok(removed.is_ok())
    }

    fn set_last_modified_time(&self, _path: &str, _millis: i64) -> io::Result<bool> {
        Ok(false)
    }

    fn set_read_only(&self, path: &str) -> io::Result<bool> {
        let Ok(metadata) = std::fs::metadata(path) else {
            return Ok(false);
        };
        let mut permissions = metadata.permissions();
        permissions.set_readonly(true);
        Ok(std::fs::set_permissions(path, permissions).is_ok())
    }

    fn create_file_exclusively(&self, path: &str) -> io::Result<bool> {
        match std::fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn set_permission(
        &self,
        _path: &str,
        _access: i32,
        _enable: bool,
        _owner_only: bool,
    ) -> io::Result<bool> {
        Ok(false)
    }

    fn get_space(&self, _path: &str, _kind: i32) -> io::Result<i64> {
        Ok(0)
    }

    fn check_access(&self, path: &str, access: i32) -> io::Result<bool> {
        let Ok(metadata) = std::fs::metadata(path) else {
            return Ok(false);
        };
        if access == ACCESS_WRITE {
            return Ok(!metadata.permissions().readonly());
        }
        Ok(true)
    }
}
