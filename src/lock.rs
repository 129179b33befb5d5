//! File-based locking for single-writer safety.
//!
//! Cross-platform (fs2) advisory locks:
//! - Exclusive: single writer.
//! - Shared: read-only opens.
//!
//! Lock file path: `<db file>.lock`. Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

fn lock_file_path(db_file: &Path) -> PathBuf {
    let mut name = db_file.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn open_lock_file(db_file: &Path) -> Result<(std::fs::File, PathBuf)> {
    let path = lock_file_path(db_file);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Ok((f, path))
}

/// Try to acquire a lock in the requested mode. Returns Err if already locked.
pub fn try_acquire_lock(db_file: &Path, mode: LockMode) -> Result<LockGuard> {
    let (file, path) = open_lock_file(db_file)?;
    match mode {
        LockMode::Shared => file
            .try_lock_shared()
            .with_context(|| format!("try_lock_shared failed: {}", path.display()))?,
        LockMode::Exclusive => file
            .try_lock_exclusive()
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?,
    }
    Ok(LockGuard { file, path, mode })
}

pub fn try_acquire_exclusive_lock(db_file: &Path) -> Result<LockGuard> {
    try_acquire_lock(db_file, LockMode::Exclusive)
}

pub fn try_acquire_shared_lock(db_file: &Path) -> Result<LockGuard> {
    try_acquire_lock(db_file, LockMode::Shared)
}
