// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Managed root layout.
//!
//! Every location that hoard reads or writes is derived from a [`Layout`]. No
//! other component builds its own paths, which keeps tests able to sandbox
//! the whole tool inside a temporary directory.
//!
//! # Managed Root Layout
//!
//! The managed root defaults to `~/.hoard`. Each installed program lives in its
//! own directory at `bin/<program>`, next to the database file and the shell
//! files that the user's shell configuration sources:
//!
//! ```text
//! ~/.hoard/
//! ├── bin/
//! │   ├── foo/
//! │   └── bar/bar
//! ├── database
//! ├── .bashrc
//! └── .fishrc
//! ```

use crate::{
    path::{default_applications_dir, default_root_dir, NoWayHome},
    shell::ShellFile,
};

use std::{
    fs::{create_dir_all, remove_dir_all},
    io,
    path::{Path, PathBuf},
};

/// Fixed locations of everything hoard manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    applications: PathBuf,
    tmp: PathBuf,
}

impl Layout {
    /// Construct layout from explicit locations.
    pub fn new(
        root: impl Into<PathBuf>,
        applications: impl Into<PathBuf>,
        tmp: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            applications: applications.into(),
            tmp: tmp.into(),
        }
    }

    /// Construct default layout for current user.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn from_env() -> Result<Self, NoWayHome> {
        Ok(Self::new(
            default_root_dir()?,
            default_applications_dir()?,
            std::env::temp_dir(),
        ))
    }

    /// Managed root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every program directory.
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Directory of a program.
    pub fn program_dir(&self, name: &str) -> PathBuf {
        self.bin_dir().join(name)
    }

    /// Persisted database file.
    pub fn database(&self) -> PathBuf {
        self.root.join("database")
    }

    /// Shell file sourced by POSIX shells.
    pub fn bashrc(&self) -> ShellFile {
        ShellFile::new(self.root.join(".bashrc"))
    }

    /// Shell file sourced by fish.
    pub fn fishrc(&self) -> ShellFile {
        ShellFile::new(self.root.join(".fishrc"))
    }

    /// Every managed shell file.
    pub fn shell_files(&self) -> [ShellFile; 2] {
        [self.bashrc(), self.fishrc()]
    }

    /// Leftover version file from older releases.
    pub fn legacy_version_file(&self) -> PathBuf {
        self.root.join("version.json")
    }

    /// Directory holding desktop entries owned by hoard.
    pub fn applications_dir(&self) -> &Path {
        &self.applications
    }

    /// Directory that desktop entries lived in before they got their own.
    pub fn legacy_applications_dir(&self) -> PathBuf {
        self.applications
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.applications.clone())
    }

    /// Desktop entry file for identifier.
    pub fn desktop_file(&self, id: &str) -> PathBuf {
        self.applications.join(format!("{id}.desktop"))
    }

    /// Scratch directory for extraction and clones.
    pub fn scratch_dir(&self) -> PathBuf {
        self.tmp.join("hoard-temp")
    }

    /// Scratch directory for downloads.
    pub fn download_dir(&self) -> PathBuf {
        self.tmp.join("hoard-temp2")
    }

    /// Advisory lock sentinel.
    pub fn lock_file(&self) -> PathBuf {
        self.tmp.join("hoard-lock")
    }

    /// Recreate scratch directory as empty.
    ///
    /// # Errors
    ///
    /// - Return [`io::Error`] if the directory cannot be removed or created.
    pub fn fresh_scratch(&self) -> io::Result<PathBuf> {
        recreate_dir(self.scratch_dir())
    }

    /// Recreate download directory as empty.
    ///
    /// # Errors
    ///
    /// - Return [`io::Error`] if the directory cannot be removed or created.
    pub fn fresh_download(&self) -> io::Result<PathBuf> {
        recreate_dir(self.download_dir())
    }

    /// Remove both scratch directories, tolerating their absence.
    ///
    /// # Errors
    ///
    /// - Return [`io::Error`] if a directory exists but cannot be removed.
    pub fn clear_scratch(&self) -> io::Result<()> {
        remove_dir_if_exists(self.scratch_dir())?;
        remove_dir_if_exists(self.download_dir())
    }
}

fn recreate_dir(path: PathBuf) -> io::Result<PathBuf> {
    remove_dir_if_exists(&path)?;
    create_dir_all(&path)?;
    Ok(path)
}

pub(crate) fn remove_dir_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match remove_dir_all(path.as_ref()) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub(crate) fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match std::fs::remove_file(path.as_ref()) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
