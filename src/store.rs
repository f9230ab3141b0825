// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Program store management.
//!
//! Hoard groups installed programs into one place called the __store__. The
//! store is the managed root described by [`Layout`], the [`Registry`] that
//! records what is installed in it, and the tools needed to change it.
//!
//! Opening a store acquires the advisory lock, so at most one [`Store`] exists
//! per managed root at any time. The lock is released when the store is
//! dropped.
//!
//! Install, lifecycle, and update operations live in their own modules as
//! further `impl` blocks of [`Store`].

use crate::{
    config::{OptionKey, OptionValue},
    frontend::{Frontend, ProgressSpan},
    git::Git,
    layout::{remove_dir_if_exists, remove_file_if_exists, Layout},
    lock::{force_unlock, Lock, LockError},
    registry::{self, Loaded, Registry},
    syscall::Toolbox,
};

use std::{
    fs::create_dir_all,
    io,
    path::{Path, PathBuf},
    rc::Rc,
};
use tracing::{debug, info, instrument, warn};

/// How to open existing store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Remove stale lock before acquiring it.
    pub force_unlock: bool,

    /// Rebuild a broken database from disk instead of failing.
    pub repair: bool,

    /// Let external tools write to the terminal regardless of stored option.
    pub verbose: bool,
}

/// Managed root with its registry and collaborators.
#[derive(Debug)]
pub struct Store<F: Frontend> {
    pub(crate) layout: Layout,
    pub(crate) registry: Registry,
    pub(crate) toolbox: Toolbox,
    pub(crate) git: Git,
    pub(crate) frontend: Rc<F>,
    _lock: Lock,
}

impl<F: Frontend> Store<F> {
    /// Open existing store.
    ///
    /// Acquires the lock, loads the registry, and migrates it to the current
    /// schema.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Lock`] if another instance holds the lock.
    /// - Return [`StoreError::NotInitialized`] if the managed root is missing.
    /// - Return [`StoreError::DatabaseBroken`] if the database is broken and
    ///   repair was not requested.
    /// - Return [`StoreError::Registry`] if loading or migration fails.
    #[instrument(skip(layout, frontend), level = "debug")]
    pub fn open(layout: Layout, frontend: F, options: OpenOptions) -> Result<Self> {
        warn_if_root();
        let lock = acquire_lock(&layout, options.force_unlock)?;

        if !layout.root().is_dir() {
            return Err(StoreError::NotInitialized {
                path: layout.root().to_path_buf(),
            });
        }

        let registry = match Registry::load(&layout)? {
            Loaded::Ready(registry) => registry,
            Loaded::Corrupt if options.repair => Registry::repair_from_disk(&layout)?,
            Loaded::Corrupt => {
                return Err(StoreError::DatabaseBroken {
                    path: layout.database(),
                })
            }
        };

        Ok(Self::assemble(layout, registry, frontend, options.verbose, lock))
    }

    /// Create new store.
    ///
    /// Lays down the managed root with an empty bin root, empty shell files,
    /// the desktop directory, and a fresh registry.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Lock`] if another instance holds the lock.
    /// - Return [`StoreError::AlreadyInitialized`] if a database exists.
    /// - Return [`StoreError::Io`] if directories cannot be created.
    /// - Return [`StoreError::Registry`] if the database cannot be written.
    #[instrument(skip(layout, frontend), level = "debug")]
    pub fn create(layout: Layout, frontend: F, options: OpenOptions) -> Result<Self> {
        warn_if_root();
        let lock = acquire_lock(&layout, options.force_unlock)?;

        if layout.database().exists() {
            return Err(StoreError::AlreadyInitialized {
                path: layout.root().to_path_buf(),
            });
        }

        for dir in [layout.bin_dir().as_path(), layout.applications_dir()] {
            create_dir_all(dir).map_err(|err| StoreError::io(err, dir))?;
        }
        for shell_file in layout.shell_files() {
            shell_file.create()?;
        }

        let registry = Registry::create(&layout)?;
        info!("created store at {:?}", layout.root().display());

        Ok(Self::assemble(layout, registry, frontend, options.verbose, lock))
    }

    fn assemble(layout: Layout, registry: Registry, frontend: F, verbose: bool, lock: Lock) -> Self {
        let verbose = verbose || registry.database().options.flag(OptionKey::Verbose);
        let git = Git::new(frontend.progress_bar());
        Self {
            layout,
            registry,
            toolbox: Toolbox::new(verbose),
            git,
            frontend: Rc::new(frontend),
            _lock: lock,
        }
    }

    /// Remove everything hoard ever put on disk.
    ///
    /// Deletes every desktop file of every program, the managed root, and the
    /// scratch directories. The lock is released afterwards.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Io`] if something exists but cannot be removed.
    #[instrument(skip(self), level = "debug")]
    pub fn erase(self) -> Result<()> {
        let progress = self.progress();
        for record in self.registry.database().programs.values() {
            for id in &record.desktops {
                let path = self.layout.desktop_file(id);
                remove_file_if_exists(&path).map_err(|err| StoreError::io(err, &path))?;
            }
        }
        progress.report(30);

        let root = self.layout.root();
        remove_dir_if_exists(root).map_err(|err| StoreError::io(err, root))?;
        progress.report(80);

        self.layout
            .clear_scratch()
            .map_err(|err| StoreError::io(err, &self.layout.scratch_dir()))?;
        progress.finish();
        info!("erased store at {:?}", root.display());

        Ok(())
    }

    /// Rebuild registry from disk, backing up the current database.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Registry`] if repair fails.
    pub fn repair(&mut self) -> Result<()> {
        self.registry = Registry::repair_from_disk(&self.layout)?;
        Ok(())
    }

    /// Names of installed programs in sorted order.
    pub fn list_programs(&self) -> Vec<String> {
        self.registry.list_programs()
    }

    /// Read option.
    pub fn read_option(&self, key: OptionKey) -> OptionValue {
        self.registry.read_option(key)
    }

    /// Flip flag option, returning its new value.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Registry`] if the database cannot be written.
    pub fn flip_option(&mut self, key: OptionKey) -> Result<bool> {
        let flipped = self.registry.flip_option(key)?;
        if key == OptionKey::Verbose {
            self.toolbox = Toolbox::new(flipped);
        }

        Ok(flipped)
    }

    /// Set option.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Registry`] if the database cannot be written.
    pub fn set_option(&mut self, key: OptionKey, value: OptionValue) -> Result<()> {
        if key == OptionKey::Verbose {
            self.toolbox = Toolbox::new(value.as_flag());
        }
        self.registry.set_option(key, value)?;

        Ok(())
    }

    /// Managed root layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Program registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Frontend driving this store.
    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    /// Fresh progress span for a new operation.
    pub(crate) fn progress(&self) -> ProgressSpan<F> {
        ProgressSpan::new(Rc::clone(&self.frontend))
    }
}

fn acquire_lock(layout: &Layout, force: bool) -> Result<Lock> {
    let sentinel = layout.lock_file();
    if force {
        force_unlock(&sentinel)?;
    }
    if let Some(parent) = sentinel.parent() {
        create_dir_all(parent).map_err(|err| StoreError::io(err, parent))?;
    }

    Ok(Lock::acquire(sentinel)?)
}

fn warn_if_root() {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if std::fs::metadata("/proc/self").is_ok_and(|meta| meta.uid() == 0) {
            warn!("running as root, programs will be installed for the root user only");
            return;
        }
    }
    debug!("not running as root");
}

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Managed root does not exist yet.
    #[error("no store at {:?}, run init first", path.display())]
    NotInitialized { path: PathBuf },

    /// Store already exists.
    #[error("store at {:?} already exists", path.display())]
    AlreadyInitialized { path: PathBuf },

    /// Database is missing or unreadable and repair was not requested.
    #[error("database at {:?} is broken, run repair to rebuild it", path.display())]
    DatabaseBroken { path: PathBuf },

    #[error("failed to update database")]
    Registry(#[from] registry::Error),

    #[error(transparent)]
    Shell(#[from] crate::shell::Error),

    #[error("failed to manage {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

impl StoreError {
    fn io(source: io::Error, path: &Path) -> Self {
        Self::Io {
            source,
            path: path.to_path_buf(),
        }
    }
}

/// Friendly result alias :3
type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Quiet;
    use pretty_assertions::assert_eq;

    fn layout(tmp: &Path) -> Layout {
        Layout::new(tmp.join("root"), tmp.join("apps/hoard"), tmp.join("tmp"))
    }

    #[test]
    fn create_then_reopen() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = Store::create(layout(tmp.path()), Quiet, OpenOptions::default())?;
        assert!(store.layout().bashrc().path().exists());
        assert!(store.layout().fishrc().path().exists());
        assert!(store.layout().applications_dir().is_dir());
        assert!(matches!(
            Store::open(layout(tmp.path()), Quiet, OpenOptions::default()),
            Err(StoreError::Lock(LockError::Locked { .. }))
        ));
        drop(store);

        let store = Store::open(layout(tmp.path()), Quiet, OpenOptions::default())?;
        assert_eq!(store.list_programs(), Vec::<String>::new());
        Ok(())
    }

    #[test]
    fn open_without_init() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let result = Store::open(layout(tmp.path()), Quiet, OpenOptions::default());
        assert!(matches!(result, Err(StoreError::NotInitialized { .. })));
        Ok(())
    }

    #[test]
    fn broken_database_needs_repair() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        drop(Store::create(layout(tmp.path()), Quiet, OpenOptions::default())?);
        std::fs::write(layout(tmp.path()).database(), "][")?;

        let result = Store::open(layout(tmp.path()), Quiet, OpenOptions::default());
        assert!(matches!(result, Err(StoreError::DatabaseBroken { .. })));

        let options = OpenOptions {
            repair: true,
            ..Default::default()
        };
        let store = Store::open(layout(tmp.path()), Quiet, options)?;
        assert_eq!(store.list_programs(), Vec::<String>::new());
        Ok(())
    }

    #[test]
    fn force_unlock_recovers_stale_lock() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        drop(Store::create(layout(tmp.path()), Quiet, OpenOptions::default())?);
        std::fs::write(layout(tmp.path()).lock_file(), "stale")?;

        let options = OpenOptions {
            force_unlock: true,
            ..Default::default()
        };
        let _store = Store::open(layout(tmp.path()), Quiet, options)?;
        Ok(())
    }

    #[test]
    fn flip_verbose_reconfigures_toolbox() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::create(layout(tmp.path()), Quiet, OpenOptions::default())?;
        assert!(!store.toolbox.is_verbose());
        assert!(store.flip_option(OptionKey::Verbose)?);
        assert!(store.toolbox.is_verbose());
        Ok(())
    }

    #[test]
    fn erase_removes_root() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = Store::create(layout(tmp.path()), Quiet, OpenOptions::default())?;
        store.erase()?;
        assert!(!layout(tmp.path()).root().exists());
        assert!(!layout(tmp.path()).lock_file().exists());
        Ok(())
    }
}
