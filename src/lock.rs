// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Advisory single-instance lock.
//!
//! Only one hoard process may mutate the managed root at a time. The lock is
//! a sentinel file in the temporary directory. It is advisory only, so a
//! crashed process leaves the sentinel behind and the user has to clear it by
//! hand through [`force_unlock`].

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Held advisory lock, released on drop.
#[derive(Debug)]
pub struct Lock {
    path: PathBuf,
}

impl Lock {
    /// Acquire lock at sentinel path.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Locked`] if another instance holds the lock.
    /// - Return [`LockError::Io`] if the sentinel cannot be created.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Locked { path });
            }
            Err(err) => return Err(LockError::Io { source: err, path }),
        };

        // INVARIANT: Sentinel content is informational only.
        let _ = writeln!(file, "{}", std::process::id());
        debug!("acquired lock at {:?}", path.display());

        Ok(Self { path })
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("released lock at {:?}", self.path.display()),
            Err(err) => warn!("failed to release lock at {:?}: {err}", self.path.display()),
        }
    }
}

/// Check if sentinel exists.
pub fn is_locked(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

/// Remove stale sentinel left behind by a crashed instance.
///
/// # Errors
///
/// - Return [`LockError::Io`] if the sentinel exists but cannot be removed.
pub fn force_unlock(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => {
            warn!("forcefully removed lock at {:?}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LockError::Io {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

/// Lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another instance is running, or a previous one crashed.
    #[error("another instance holds the lock at {:?}, use --force-unlock if it crashed", path.display())]
    Locked { path: PathBuf },

    /// Sentinel file could not be managed.
    #[error("failed to manage lock at {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = LockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_drop() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let sentinel = tmp.path().join("hoard-lock");

        let lock = Lock::acquire(&sentinel)?;
        assert!(is_locked(&sentinel));
        assert!(matches!(Lock::acquire(&sentinel), Err(LockError::Locked { .. })));

        drop(lock);
        assert!(!is_locked(&sentinel));
        let _lock = Lock::acquire(&sentinel)?;
        Ok(())
    }

    #[test]
    fn force_unlock_clears_stale_sentinel() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let sentinel = tmp.path().join("hoard-lock");
        std::fs::write(&sentinel, "1234")?;

        force_unlock(&sentinel)?;
        assert!(!is_locked(&sentinel));
        force_unlock(&sentinel)?;
        Ok(())
    }
}
