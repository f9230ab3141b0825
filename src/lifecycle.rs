// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lifecycle of installed programs.
//!
//! Everything that happens to a program between install and uninstall:
//! renaming it, exposing it through PATH and binlinks, and giving it desktop
//! entries. Each operation records what it did in the registry so it can be
//! undone later.
//!
//! None of these operations are transactional. A failure halfway through a
//! rename or uninstall is reported as [`LifecycleError::PartialState`], and
//! repairing the registry from disk is the way out.

use crate::{
    config::{InstallType, ProgramRecord},
    desktop::DesktopEntry,
    frontend::Frontend,
    install::move_path,
    layout::{remove_dir_if_exists, remove_file_if_exists},
    path::has_forbidden_chars,
    registry,
    shell::{self, LineMatch, ShellFile},
    store::Store,
};

use std::{
    fs::{create_dir_all, read_to_string, write},
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Outcome of adding shell integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    Added,
    AlreadyThere,
}

/// Outcome of removing shell integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    Removed,
    NoneExist,
}

/// Outcome of renaming a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renamed {
    Renamed,

    /// New name is taken, nothing changed.
    NameTaken,
}

/// Outcome of creating a desktop entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopCreated {
    Created,
    AlreadyExists,
}

impl<F: Frontend> Store<F> {
    /// Uninstall program.
    ///
    /// Shell lines and desktop files go first, then the program directory,
    /// then the record.
    ///
    /// # Errors
    ///
    /// - Return [`LifecycleError::NotInstalled`] if program is not registered.
    /// - Return [`LifecycleError::Shell`] if a shell file cannot be edited.
    /// - Return [`LifecycleError::PartialState`] if the program directory
    ///   cannot be removed after its shell lines already were.
    /// - Return [`LifecycleError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn uninstall(&mut self, name: &str) -> Result<()> {
        let record = self.record(name)?.clone();
        let progress = self.progress();

        self.detach(name, &record)?;
        progress.report(50);

        let dir = self.layout.program_dir(name);
        remove_dir_if_exists(&dir).map_err(|err| partial(name, "remove program directory", err))?;
        progress.report(80);

        self.registry.remove_program(name)?;
        progress.finish();
        info!("uninstalled {name}");

        Ok(())
    }

    /// Rename program.
    ///
    /// Steps run in a fixed order: desktop entries, registry key, PATH lines,
    /// binlink lines, ownership tags, program directory, and finally the inner
    /// file of single-file installs.
    ///
    /// # Errors
    ///
    /// - Return [`LifecycleError::NotInstalled`] if old is not registered.
    /// - Return [`LifecycleError::BadName`] if new has reserved characters.
    /// - Return [`LifecycleError::PartialState`] if a step fails after the
    ///   rename already started.
    /// - Return [`LifecycleError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn rename(&mut self, old: &str, new: &str) -> Result<Renamed> {
        let record = self.record(old)?.clone();
        if new.is_empty() || has_forbidden_chars(new) {
            return Err(LifecycleError::BadName(new.into()));
        }
        if old == new || self.registry.contains(new) || self.layout.program_dir(new).exists() {
            return Ok(Renamed::NameTaken);
        }

        let bin = self.layout.bin_dir();
        let bin = bin.display();
        let old_dir = format!("{bin}/{old}/");
        let new_dir = format!("{bin}/{new}/");

        let single = record.install_type == InstallType::Single;
        let mut desktops = Vec::with_capacity(record.desktops.len());
        for id in &record.desktops {
            let renamed = match id.strip_suffix(&format!("-{old}")) {
                Some(file) if single && file == old => format!("{new}-{new}"),
                Some(file) => format!("{file}-{new}"),
                None => id.clone(),
            };
            let mut rewrites = vec![(old_dir.clone(), new_dir.clone())];
            if single {
                rewrites.insert(0, (format!("{old_dir}{old}\n"), format!("{new_dir}{new}\n")));
            }
            self.rewrite_desktop(id, &renamed, &rewrites)
                .map_err(|err| partial(old, "rewrite desktop entries", err))?;
            desktops.push(renamed);
        }

        let database = self.registry.database_mut();
        if let Some(mut moved) = database.programs.remove(old) {
            moved.desktops = desktops;
            if single {
                for alias in &mut moved.binlinks {
                    if alias == old {
                        *alias = new.to_string();
                    }
                }
            }
            database.programs.insert(new.to_string(), moved);
        }
        self.registry.save()?;

        for shell_file in self.layout.shell_files() {
            rename_in_shell_file(&shell_file, old, new, &bin.to_string(), single)
                .map_err(|err| partial(new, "rewrite shell lines", err))?;
        }

        let from = self.layout.program_dir(old);
        let to = self.layout.program_dir(new);
        move_path(&from, &to).map_err(|err| partial(new, "move program directory", err))?;

        if single {
            let inner = to.join(old);
            if inner.exists() {
                move_path(&inner, &to.join(new))
                    .map_err(|err| partial(new, "rename single file", err))?;
            }
        }

        info!("renamed {old} to {new}");
        Ok(Renamed::Renamed)
    }

    /// Expose file of program as shell command.
    ///
    /// The command is named after the file, or its last path segment when the
    /// file sits in a subdirectory.
    ///
    /// # Errors
    ///
    /// - Return [`LifecycleError::NotInstalled`] if program is not registered.
    /// - Return [`LifecycleError::BadName`] if the alias has reserved characters.
    /// - Return [`LifecycleError::Shell`] if a shell file cannot be appended to.
    /// - Return [`LifecycleError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn add_binlink(&mut self, program: &str, file: &str) -> Result<Added> {
        let alias = binlink_alias(file);
        if self.record(program)?.binlinks.iter().any(|known| *known == alias) {
            return Ok(Added::AlreadyThere);
        }
        if alias.is_empty() || has_forbidden_chars(&alias) {
            return Err(LifecycleError::BadName(alias));
        }

        let dir = self.layout.program_dir(program);
        let dir = dir.display();
        self.layout
            .bashrc()
            .add_line(format!("\nalias {alias}='cd {dir}/ && ./{file}' # {program}"))?;
        self.layout
            .fishrc()
            .add_line(format!("\nfunction {alias};cd {dir}/;./{file};end # {program}"))?;

        self.registry
            .update_program(program, |record| record.add_binlink(alias.as_str()))?;
        debug!("binlinked {file} of {program} as {alias}");

        Ok(Added::Added)
    }

    /// Add program directory to PATH.
    ///
    /// # Errors
    ///
    /// - Return [`LifecycleError::NotInstalled`] if program is not registered.
    /// - Return [`LifecycleError::Shell`] if a shell file cannot be appended to.
    /// - Return [`LifecycleError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn pathify(&mut self, program: &str) -> Result<Added> {
        if self.record(program)?.has_path {
            return Ok(Added::AlreadyThere);
        }

        let dir = self.layout.program_dir(program);
        let dir = dir.display();
        self.layout
            .bashrc()
            .add_line(format!("\nexport PATH=$PATH:{dir} # {program}"))?;
        self.layout
            .fishrc()
            .add_line(format!("\nset PATH $PATH {dir} # {program}"))?;

        self.registry
            .update_program(program, |record| record.has_path = true)?;
        debug!("added {program} to PATH");

        Ok(Added::Added)
    }

    /// Remove PATH line and every binlink of program.
    ///
    /// # Errors
    ///
    /// - Return [`LifecycleError::NotInstalled`] if program is not registered.
    /// - Return [`LifecycleError::Shell`] if a shell file cannot be edited.
    /// - Return [`LifecycleError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn remove_paths_and_binlinks(&mut self, program: &str) -> Result<Removed> {
        let record = self.record(program)?;
        if !record.has_path && record.binlinks.is_empty() {
            return Ok(Removed::NoneExist);
        }

        for shell_file in self.layout.shell_files() {
            tolerate_missing(shell_file.remove_line(program, LineMatch::Owner))?;
        }

        self.registry.update_program(program, |record| {
            record.has_path = false;
            record.binlinks.clear();
        })?;
        debug!("removed PATH and binlinks of {program}");

        Ok(Removed::Removed)
    }

    /// Create desktop entry for file of program.
    ///
    /// # Errors
    ///
    /// - Return [`LifecycleError::NotInstalled`] if program is not registered.
    /// - Return [`LifecycleError::Io`] if the desktop file cannot be written.
    /// - Return [`LifecycleError::Registry`] if the database cannot be written.
    #[instrument(skip(self, entry), level = "debug")]
    pub fn create_desktop(&mut self, program: &str, entry: &DesktopEntry) -> Result<DesktopCreated> {
        self.record(program)?;
        let id = entry.id(program);
        let path = self.layout.desktop_file(&id);
        if path.exists() {
            return Ok(DesktopCreated::AlreadyExists);
        }

        let applications = self.layout.applications_dir();
        create_dir_all(applications).map_err(|err| io_error(err, applications))?;
        let content = entry.render(&self.layout.program_dir(program));
        write(&path, content).map_err(|err| io_error(err, &path))?;

        self.registry
            .update_program(program, |record| record.add_desktop(id.as_str()))?;
        info!("created desktop entry {id}");

        Ok(DesktopCreated::Created)
    }

    /// Remove desktop entry of program.
    ///
    /// A desktop file that is already gone only gets dropped from the record.
    ///
    /// # Errors
    ///
    /// - Return [`LifecycleError::NotInstalled`] if program is not registered.
    /// - Return [`LifecycleError::Io`] if the desktop file cannot be removed.
    /// - Return [`LifecycleError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn remove_desktop(&mut self, program: &str, id: &str) -> Result<()> {
        self.record(program)?;
        let path = self.layout.desktop_file(id);
        remove_file_if_exists(&path).map_err(|err| io_error(err, &path))?;

        self.registry
            .update_program(program, |record| record.desktops.retain(|known| known != id))?;
        info!("removed desktop entry {id}");

        Ok(())
    }

    /// Remove shell lines owned by program and the desktop files in record.
    ///
    /// Missing shell files and desktop files are fine. The record itself is
    /// left alone.
    pub(crate) fn detach(&self, name: &str, record: &ProgramRecord) -> Result<()> {
        for shell_file in self.layout.shell_files() {
            tolerate_missing(shell_file.remove_line(name, LineMatch::Owner))?;
        }

        for id in &record.desktops {
            let path = self.layout.desktop_file(id);
            if let Err(err) = remove_file_if_exists(&path) {
                warn!("failed to remove desktop file {:?}: {err}", path.display());
            }
        }

        Ok(())
    }

    pub(crate) fn record(&self, name: &str) -> Result<&ProgramRecord> {
        self.registry
            .program(name)
            .ok_or_else(|| LifecycleError::NotInstalled(name.into()))
    }

    fn rewrite_desktop(&self, id: &str, renamed: &str, rewrites: &[(String, String)]) -> io::Result<()> {
        let from = self.layout.desktop_file(id);
        let content = match read_to_string(&from) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("desktop file {:?} is missing", from.display());
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let content = rewrites
            .iter()
            .fold(content, |content, (from, to)| content.replace(from, to));
        let to = self.layout.desktop_file(renamed);
        write(&to, content)?;
        if to != from {
            remove_file_if_exists(&from)?;
        }

        Ok(())
    }
}

/// Alias of binlink to file.
pub fn binlink_alias(file: &str) -> String {
    file.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(file)
        .to_string()
}

fn rename_in_shell_file(
    shell_file: &ShellFile,
    old: &str,
    new: &str,
    bin: &str,
    single: bool,
) -> shell::Result<()> {
    tolerate_missing_shell(shell_file.edit(|lines| {
        lines.replace_owned(old, &format!("PATH=$PATH:{bin}/{old} "), &format!("PATH=$PATH:{bin}/{new} "));
        lines.replace_owned(old, &format!("set PATH $PATH {bin}/{old} "), &format!("set PATH $PATH {bin}/{new} "));
        lines.replace_owned(old, &format!("'cd {bin}/{old}/"), &format!("'cd {bin}/{new}/"));
        lines.replace_owned(old, &format!(";cd {bin}/{old}/;"), &format!(";cd {bin}/{new}/;"));
        if single {
            lines.replace_owned(old, &format!("./{old}'"), &format!("./{new}'"));
            lines.replace_owned(old, &format!("alias {old}="), &format!("alias {new}="));
            lines.replace_owned(old, &format!("./{old};end"), &format!("./{new};end"));
            lines.replace_owned(old, &format!("function {old};"), &format!("function {new};"));
        }
        lines.retag(old, new);
    }))
}

fn tolerate_missing(result: shell::Result<()>) -> Result<()> {
    Ok(tolerate_missing_shell(result)?)
}

fn tolerate_missing_shell(result: shell::Result<()>) -> shell::Result<()> {
    match result {
        Err(err) if err.is_not_found() => {
            debug!("{err}, nothing to change");
            Ok(())
        }
        other => other,
    }
}

fn partial(
    program: &str,
    step: &'static str,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> LifecycleError {
    LifecycleError::PartialState {
        program: program.into(),
        step,
        source: source.into(),
    }
}

fn io_error(source: io::Error, path: &Path) -> LifecycleError {
    LifecycleError::Io {
        source,
        path: path.to_path_buf(),
    }
}

/// Lifecycle error types.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Program is not registered.
    #[error("program {0:?} is not installed")]
    NotInstalled(String),

    /// Name contains characters reserved by shell file records.
    #[error("name {0:?} is empty or contains a space or '#'")]
    BadName(String),

    /// Operation stopped halfway and left the program partially changed.
    #[error("{program} was left partially changed, failed to {step}; run repair to recover")]
    PartialState {
        program: String,
        step: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Shell(#[from] shell::Error),

    #[error("failed to manage {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to update database")]
    Registry(#[from] registry::Error),
}

/// Friendly result alias :3
type Result<T, E = LifecycleError> = std::result::Result<T, E>;
