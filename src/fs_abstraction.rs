//! Filesystem abstraction layer for testability
//!
//! The jail store and state file go through [`FileSystem`] so their error
//! paths can be exercised with `MockFileSystem`. Writes are atomic
//! (tempfile in the target directory, then rename).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
pub trait FileSystem: Send + Sync {
    /// Read file contents as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace `path` with `contents` atomically, applying `mode` to the new file.
    fn write_atomic(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()>;

    /// List regular files directly inside `dir`, sorted by path.
    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Create a directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_atomic(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let parent = path.parent().unwrap_or(Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(contents)?;
        temp.as_file().sync_all()?;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

static REAL_FS: RealFileSystem = RealFileSystem;

/// Shared production filesystem. Tests construct `MockFileSystem` instead.
pub fn real_fs() -> &'static RealFileSystem {
    &REAL_FS
}
