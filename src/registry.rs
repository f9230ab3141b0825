// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Program registry persistence.
//!
//! The __registry__ owns the in-memory [`Database`] and the file it lives in.
//! There is exactly one registry per process, built by loading from disk at
//! startup and handed explicitly to every operation that needs it.
//!
//! # Corruption
//!
//! A database that is missing or unreadable does not produce an error on
//! load. Instead, [`Registry::load`] reports [`Loaded::Corrupt`] so the caller
//! can decide between giving up and [`Registry::repair_from_disk`].
//!
//! # Persistence Failure
//!
//! Failing to write the database is fatal. The in-memory state would
//! otherwise drift away from disk. [`Error::Unwritable`] carries a dump of the
//! database so the binary can print it as a last resort before exiting.

pub mod migrate;

use crate::{
    config::{ConfigError, Database, InstallType, OptionKey, OptionValue, ProgramRecord},
    layout::Layout,
    shell::ShellFile,
};

use serde_json::Value;
use std::{
    fs::{read_dir, read_to_string, rename},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Result of loading the registry from disk.
#[derive(Debug)]
pub enum Loaded {
    /// Database loaded and migrated to the current schema.
    Ready(Registry),

    /// Database file is missing or cannot be decoded.
    Corrupt,
}

/// Persisted mapping of program names to their records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    path: PathBuf,
    database: Database,
}

impl Registry {
    /// Create fresh registry and persist it.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn create(layout: &Layout) -> Result<Self> {
        let registry = Self {
            path: layout.database(),
            database: Database::new(),
        };
        registry.save()?;

        Ok(registry)
    }

    /// Load registry from disk, applying pending migrations.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if the database exists but cannot be read.
    /// - Return [`Error::Migrate`] if a migration step fails.
    /// - Return [`Error::Unwritable`] if a migrated database cannot be written.
    #[instrument(skip(layout), level = "debug")]
    pub fn load(layout: &Layout) -> Result<Loaded> {
        let path = layout.database();
        let content = match read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("no database at {:?}", path.display());
                return Ok(Loaded::Corrupt);
            }
            Err(err) => return Err(Error::Read { source: err, path }),
        };

        let mut value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                warn!("database at {:?} is not valid JSON: {err}", path.display());
                return Ok(Loaded::Corrupt);
            }
        };

        if migrate::file_version(&value).is_err() {
            warn!("database at {:?} has no schema version", path.display());
            return Ok(Loaded::Corrupt);
        }

        let applied = migrate::run(&mut value, layout, |value| {
            write_atomic(&path, value_dump(value)?)
        })?;
        if applied > 0 {
            info!("applied {applied} database migrations");
        }

        // INVARIANT: Go through FromStr so listings get deduplicated.
        match value_dump(&value)?.parse::<Database>() {
            Ok(database) => {
                debug!("database loaded from {:?}", path.display());
                Ok(Loaded::Ready(Self { path, database }))
            }
            Err(err) => {
                warn!("database at {:?} cannot be decoded: {err}", path.display());
                Ok(Loaded::Corrupt)
            }
        }
    }

    /// Write database to disk atomically.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn save(&self) -> Result<()> {
        let dump = serde_json::to_string_pretty(&self.database).map_err(ConfigError::Serialize)?;
        write_atomic(&self.path, dump)?;
        debug!("database written to {:?}", self.path.display());

        Ok(())
    }

    /// Rebuild registry from traces left on disk.
    ///
    /// Re-discovers programs from the bin root, PATH and binlink records from
    /// the ownership tags of the shell files, and desktop entries from the
    /// names of the desktop files. Backs up the existing database file with a
    /// timestamped name before overwriting it.
    ///
    /// Update URLs and post-upgrade scripts leave no trace on disk, so they
    /// are lost for good.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Repair`] if the bin root or desktop directory cannot
    ///   be read, or if the old database cannot be backed up.
    /// - Return [`Error::Shell`] if a shell file exists but cannot be read.
    /// - Return [`Error::Unwritable`] if the new database cannot be written.
    #[instrument(skip(layout), level = "debug")]
    pub fn repair_from_disk(layout: &Layout) -> Result<Self> {
        info!("repair database from disk");
        let mut database = Database::new();

        let bin_dir = layout.bin_dir();
        for entry in read_dir(&bin_dir).map_err(|err| repair_error(err, &bin_dir))? {
            let entry = entry.map_err(|err| repair_error(err, &bin_dir))?;
            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let install_type = detect_install_type(&entry.path())?;
            debug!("rediscovered {name} as {install_type}");
            database
                .programs
                .insert(name, ProgramRecord::new(install_type));
        }

        for shell_file in layout.shell_files() {
            restore_shell_records(&mut database, &shell_file)?;
        }

        let applications = layout.applications_dir();
        if applications.is_dir() {
            for entry in read_dir(applications).map_err(|err| repair_error(err, applications))? {
                let path = entry.map_err(|err| repair_error(err, applications))?.path();
                if path.extension().is_none_or(|ext| ext != "desktop") {
                    continue;
                }
                let Some(id) = path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
                else {
                    continue;
                };
                match desktop_owner(&database, &id) {
                    Some(owner) => {
                        if let Some(record) = database.program_mut(&owner) {
                            record.add_desktop(id);
                        }
                    }
                    None => warn!("desktop file {id:?} belongs to no program"),
                }
            }
        }

        let old = layout.database();
        if old.exists() {
            let stamp = chrono::Local::now().format("%d-%m-%Y-%H-%M-%S");
            let backup = layout.root().join(format!("database-backup-{stamp}.bak"));
            info!("back up old database to {:?}", backup.display());
            rename(&old, &backup).map_err(|err| repair_error(err, &old))?;
        }

        let registry = Self { path: old, database };
        registry.save()?;
        info!("database repair complete");

        Ok(registry)
    }

    /// Current database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Mutable access to database.
    ///
    /// Caller is responsible for calling [`Registry::save`] afterwards.
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// Names of every registered program in sorted order.
    pub fn list_programs(&self) -> Vec<String> {
        self.database.programs.keys().cloned().collect()
    }

    /// Get record of program.
    pub fn program(&self, name: &str) -> Option<&ProgramRecord> {
        self.database.program(name)
    }

    /// Check if program is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.database.contains(name)
    }

    /// Read option, falling back to its default.
    pub fn read_option(&self, key: OptionKey) -> OptionValue {
        self.database.options.read(key)
    }

    /// Flip flag option and persist.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn flip_option(&mut self, key: OptionKey) -> Result<bool> {
        let flipped = self.database.options.flip(key);
        self.save()?;
        Ok(flipped)
    }

    /// Set option and persist.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn set_option(&mut self, key: OptionKey, value: OptionValue) -> Result<()> {
        self.database.options.set(key, value);
        self.save()
    }

    /// Apply change to program record, then persist.
    ///
    /// Returns `None` without touching disk if program is not registered.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn update_program<T>(
        &mut self,
        name: &str,
        change: impl FnOnce(&mut ProgramRecord) -> T,
    ) -> Result<Option<T>> {
        let Some(record) = self.database.program_mut(name) else {
            return Ok(None);
        };
        let output = change(record);
        self.save()?;

        Ok(Some(output))
    }

    /// Register program record, replacing any previous one, then persist.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn insert_program(&mut self, name: impl Into<String>, record: ProgramRecord) -> Result<()> {
        self.database.programs.insert(name.into(), record);
        self.save()
    }

    /// Remove program record, then persist.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn remove_program(&mut self, name: &str) -> Result<Option<ProgramRecord>> {
        let removed = self.database.programs.remove(name);
        self.save()?;
        Ok(removed)
    }

    /// Move record from old name to new name, then persist.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unwritable`] if the database cannot be written.
    pub fn rename_program(&mut self, old: &str, new: &str) -> Result<bool> {
        let Some(record) = self.database.programs.remove(old) else {
            return Ok(false);
        };
        self.database.programs.insert(new.into(), record);
        self.save()?;
        Ok(true)
    }
}

fn value_dump(value: &Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| ConfigError::Serialize(err).into())
}

fn write_atomic(path: &Path, dump: String) -> Result<()> {
    let unwritable = |err: io::Error| Error::Unwritable {
        source: err,
        path: path.to_path_buf(),
        dump: dump.clone(),
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(parent).map_err(unwritable)?;
    file.write_all(dump.as_bytes()).map_err(unwritable)?;
    file.persist(path).map_err(|err| unwritable(err.error))?;

    Ok(())
}

fn detect_install_type(dir: &Path) -> Result<InstallType> {
    let mut count = 0;
    for entry in read_dir(dir).map_err(|err| repair_error(err, dir))? {
        let entry = entry.map_err(|err| repair_error(err, dir))?;
        if entry.file_name() == ".git" {
            return Ok(InstallType::Git);
        }
        count += 1;
    }

    Ok(if count == 1 {
        InstallType::Single
    } else {
        InstallType::Default
    })
}

fn restore_shell_records(database: &mut Database, shell_file: &ShellFile) -> Result<()> {
    let lines = match shell_file.tagged_lines() {
        Ok(lines) => lines,
        Err(err) if err.is_not_found() => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    for (owner, line) in lines {
        let Some(record) = database.program_mut(&owner) else {
            warn!("shell line owned by unknown program {owner:?}");
            continue;
        };

        if line.starts_with("export PATH=$PATH") || line.starts_with("set PATH $PATH") {
            debug!("restore PATH of {owner}");
            record.has_path = true;
        } else if let Some(alias) = binlink_alias(&line) {
            debug!("restore binlink {alias} of {owner}");
            record.add_binlink(alias);
        }
    }

    Ok(())
}

fn binlink_alias(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("alias ") {
        return rest.split_once('=').map(|(alias, _)| alias);
    }

    line.strip_prefix("function ")
        .and_then(|rest| rest.split_once(';'))
        .map(|(alias, _)| alias)
}

// Desktop identifiers are `<file>-<program>`, and both halves may contain
// dashes. Prefer the longest registered program name that fits.
fn desktop_owner(database: &Database, id: &str) -> Option<String> {
    database
        .programs
        .keys()
        .filter(|program| {
            id.strip_suffix(program.as_str())
                .is_some_and(|rest| rest.len() > 1 && rest.ends_with('-'))
        })
        .max_by_key(|program| program.len())
        .cloned()
}

fn repair_error(err: io::Error, path: &Path) -> Error {
    Error::Repair {
        source: err,
        path: path.to_path_buf(),
    }
}

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database file exists but cannot be read.
    #[error("failed to read database at {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Database cannot be written. Fatal, carries dump of database.
    #[error("database at {:?} could not be written to", path.display())]
    Unwritable {
        #[source]
        source: io::Error,
        path: PathBuf,
        dump: String,
    },

    /// Schema migration failed.
    #[error(transparent)]
    Migrate(#[from] migrate::Error),

    /// Repair could not read traces from disk.
    #[error("failed to repair database from {:?}", path.display())]
    Repair {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Shell file could not be parsed during repair.
    #[error(transparent)]
    Shell(#[from] crate::shell::Error),

    /// Database could not be encoded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Dump of database that could not be written, if that is what happened.
    pub fn unwritable_dump(&self) -> Option<&str> {
        match self {
            Self::Unwritable { dump, .. } => Some(dump),
            _ => None,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};

    fn sandbox() -> anyhow::Result<(tempfile::TempDir, Layout)> {
        let tmp = tempfile::tempdir()?;
        let layout = Layout::new(
            tmp.path().join("root"),
            tmp.path().join("apps/hoard"),
            tmp.path().join("tmp"),
        );
        create_dir_all(layout.bin_dir())?;
        create_dir_all(layout.applications_dir())?;
        Ok((tmp, layout))
    }

    #[test]
    fn missing_or_garbage_database_is_corrupt() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        assert!(matches!(Registry::load(&layout)?, Loaded::Corrupt));

        write(layout.database(), "{ not json")?;
        assert!(matches!(Registry::load(&layout)?, Loaded::Corrupt));

        write(layout.database(), "{}")?;
        assert!(matches!(Registry::load(&layout)?, Loaded::Corrupt));
        Ok(())
    }

    #[test]
    fn create_then_load() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        let mut registry = Registry::create(&layout)?;
        registry.insert_program("tool", ProgramRecord::new(InstallType::Git))?;
        registry.flip_option(OptionKey::Verbose)?;

        let Loaded::Ready(loaded) = Registry::load(&layout)? else {
            panic!("fresh database must load");
        };
        assert_eq!(loaded, registry);
        assert_eq!(loaded.list_programs(), vec!["tool".to_string()]);
        assert!(loaded.read_option(OptionKey::Verbose).as_flag());
        Ok(())
    }

    #[test]
    fn old_schema_is_migrated_on_load() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        write(
            layout.database(),
            r#"{
                "options": {},
                "version": { "file_schema_version": 15, "program_schema_version": 1, "branch": "master" },
                "programs": {
                    "tool": { "git_installed": true, "desktops": [], "post_upgrade_script": null,
                              "update_url": null, "has_path": false, "binlinks": [] }
                }
            }"#,
        )?;

        let Loaded::Ready(registry) = Registry::load(&layout)? else {
            panic!("migrated database must load");
        };
        assert_eq!(
            registry.database().version.file_schema_version,
            crate::config::FILE_SCHEMA_VERSION
        );
        assert_eq!(
            registry.program("tool").map(|record| record.install_type),
            Some(InstallType::Git)
        );
        Ok(())
    }

    #[test]
    fn save_into_missing_directory_is_unwritable() {
        let registry = Registry {
            path: PathBuf::from("/definitely/not/here/database"),
            database: Database::new(),
        };
        let result = registry.save();
        assert!(result.as_ref().is_err_and(|err| err.unwritable_dump().is_some()));
    }

    #[test]
    fn repair_rebuilds_from_traces() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        create_dir_all(layout.program_dir("gitty/.git"))?;
        create_dir_all(layout.program_dir("single"))?;
        write(layout.program_dir("single").join("single"), "#!/bin/sh")?;
        create_dir_all(layout.program_dir("my-app"))?;
        write(layout.program_dir("my-app").join("a"), "")?;
        write(layout.program_dir("my-app").join("b"), "")?;
        write(
            layout.bashrc().path(),
            "\nexport PATH=$PATH:/r/bin/single # single\nalias go='cd /r/bin/my-app/ && ./a' # my-app\n",
        )?;
        write(layout.desktop_file("run.sh-my-app"), "[Desktop Entry]")?;
        write(layout.database(), "garbage")?;

        let registry = Registry::repair_from_disk(&layout)?;
        let programs = &registry.database().programs;
        assert_eq!(programs["gitty"].install_type, InstallType::Git);
        assert_eq!(programs["single"].install_type, InstallType::Single);
        assert!(programs["single"].has_path);
        assert_eq!(programs["my-app"].install_type, InstallType::Default);
        assert_eq!(programs["my-app"].binlinks, vec!["go".to_string()]);
        assert_eq!(programs["my-app"].desktops, vec!["run.sh-my-app".to_string()]);
        assert!(programs.values().all(|record| record.update_url.is_none()));

        let backups = read_dir(layout.root())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("database-backup-"))
            .count();
        assert_eq!(backups, 1);
        Ok(())
    }
}
