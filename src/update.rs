// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Program updates.
//!
//! A program updates in up to two steps. Git installs pull, and programs with
//! an update URL get their archive downloaded again and merged over the old
//! payload. Afterwards the post-upgrade script runs inside the program
//! directory, if one is configured. Progress is split evenly across whichever
//! steps apply.

use crate::{
    archive::ArchiveKind,
    config::{InstallType, OptionKey, ProgramRecord},
    frontend::{Frontend, ProgressSpan},
    git::{GitError, PullOutcome},
    install::{InstallError, InstallSource},
    path::{expand_path, extension},
    registry,
    store::Store,
    syscall::ToolError,
};

use std::{collections::BTreeMap, path::PathBuf};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Result of updating a single program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Program got updated.
    Success,

    /// Git checkout was already up to date.
    NoUpdate,

    /// Program has nothing to update from.
    DoesNotUpdate,
}

impl<F: Frontend> Store<F> {
    /// Update program.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::NotInstalled`] if program is not registered.
    /// - Return [`UpdateError::NoScript`] if the configured script vanished.
    ///   The script gets cleared from the record.
    /// - Return [`UpdateError::Pull`] if pulling the git checkout fails.
    /// - Return [`UpdateError::Install`] if re-downloading the archive fails.
    /// - Return [`UpdateError::ScriptFailed`] if the script fails.
    /// - Return [`UpdateError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn update(&mut self, name: &str) -> Result<UpdateStatus> {
        let progress = self.progress();
        let status = self.update_with(name, &progress)?;
        progress.finish();

        Ok(status)
    }

    /// Update every program that has something to update from.
    ///
    /// Programs updating from a URL are only touched when the
    /// `UpdateURLPrograms` option is set. Failures of single programs are
    /// collected instead of aborting the sweep, except for an unwritable
    /// database.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn update_all(&mut self) -> Result<BTreeMap<String, Result<UpdateStatus>>> {
        let programs = self.list_programs();
        let url_programs = self.registry.read_option(OptionKey::UpdateUrlPrograms).as_flag();
        let progress = self.progress();
        let mut statuses = BTreeMap::new();

        let count = programs.len().max(1);
        for (index, name) in programs.into_iter().enumerate() {
            let from = (index * 100 / count) as u8;
            let to = ((index + 1) * 100 / count) as u8;
            let span = progress.sub(from, to);

            let wanted = self
                .registry
                .program(&name)
                .is_some_and(|record| sweeps(record, url_programs));
            let status = if wanted {
                match self.update_with(&name, &span) {
                    Err(UpdateError::Registry(err)) => return Err(UpdateError::Registry(err)),
                    other => other,
                }
            } else {
                debug!("skip {name}, it does not update");
                Ok(UpdateStatus::DoesNotUpdate)
            };
            span.finish();
            statuses.insert(name, status);
        }
        progress.finish();

        Ok(statuses)
    }

    /// Set remote archive that program updates from.
    ///
    /// Archive kind is taken from the URL when not given.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::NotInstalled`] if program is not registered.
    /// - Return [`UpdateError::BadUrl`] if url is not a valid URL.
    /// - Return [`UpdateError::UnknownArchive`] if no archive kind is given and
    ///   the URL does not name a supported one.
    /// - Return [`UpdateError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn set_update_url(&mut self, name: &str, url: &str, kind: Option<ArchiveKind>) -> Result<()> {
        self.require(name)?;
        Url::parse(url).map_err(|_| UpdateError::BadUrl(url.into()))?;
        let kind = kind
            .or_else(|| ArchiveKind::from_extension(&extension(url)))
            .ok_or_else(|| UpdateError::UnknownArchive(url.into()))?;

        self.registry.update_program(name, |record| {
            record.update_url = Some(url.into());
            record.update_archive_type = Some(kind);
        })?;
        info!("{name} now updates from {url}");

        Ok(())
    }

    /// Stop program from updating through a URL.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::NotInstalled`] if program is not registered.
    /// - Return [`UpdateError::Registry`] if the database cannot be written.
    pub fn clear_update_url(&mut self, name: &str) -> Result<()> {
        self.require(name)?;
        self.registry.update_program(name, |record| {
            record.update_url = None;
            record.update_archive_type = None;
        })?;

        Ok(())
    }

    /// Set script to run after program updates.
    ///
    /// An empty path wipes the script. Returns the stored absolute path, or
    /// `None` after a wipe.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::NotInstalled`] if program is not registered.
    /// - Return [`UpdateError::BadPath`] if the script does not exist.
    /// - Return [`UpdateError::Registry`] if the database cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn set_post_upgrade_script(&mut self, name: &str, path: &str) -> Result<Option<PathBuf>> {
        self.require(name)?;
        if path.is_empty() {
            self.registry
                .update_program(name, |record| record.post_upgrade_script = None)?;
            info!("wiped post-upgrade script of {name}");
            return Ok(None);
        }

        let script = expand_path(path).map_err(|_| UpdateError::BadPath(path.into()))?;
        if !script.exists() {
            return Err(UpdateError::BadPath(path.into()));
        }

        let stored = script.display().to_string();
        self.registry
            .update_program(name, |record| record.post_upgrade_script = Some(stored))?;
        info!("{name} runs {:?} after updates", script.display());

        Ok(Some(script))
    }

    /// Force checkout of branch in git program.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::NotInstalled`] if program is not registered.
    /// - Return [`UpdateError::NotGit`] if program is not a git install.
    /// - Return [`UpdateError::Checkout`] if the checkout fails.
    #[instrument(skip(self), level = "debug")]
    pub fn change_git_branch(&mut self, name: &str, branch: &str) -> Result<()> {
        if self.require(name)?.install_type != InstallType::Git {
            return Err(UpdateError::NotGit(name.into()));
        }

        let dir = self.layout.program_dir(name);
        self.git
            .checkout(&dir, branch)
            .map_err(UpdateError::Checkout)?;

        Ok(())
    }

    fn update_with(&mut self, name: &str, progress: &ProgressSpan<F>) -> Result<UpdateStatus> {
        let record = self.require(name)?.clone();

        if let Some(script) = &record.post_upgrade_script {
            if !PathBuf::from(script).exists() {
                warn!("post-upgrade script {script:?} of {name} is gone, clearing it");
                self.registry
                    .update_program(name, |record| record.post_upgrade_script = None)?;
                return Err(UpdateError::NoScript(name.into()));
            }
        }

        if !record.is_updatable() {
            return Ok(UpdateStatus::DoesNotUpdate);
        }
        let fetches = record.install_type == InstallType::Git || record.update_url.is_some();
        let steps = u8::from(fetches) + u8::from(record.post_upgrade_script.is_some());
        let split = 100 / steps.max(1);

        if record.install_type == InstallType::Git {
            let dir = self.layout.program_dir(name);
            let outcome = self.git.pull(&dir).map_err(UpdateError::Pull)?;
            progress.report(split);
            if outcome == PullOutcome::UpToDate {
                return Ok(UpdateStatus::NoUpdate);
            }
        } else if let Some(url) = &record.update_url {
            let kind = record
                .update_archive_type
                .or_else(|| ArchiveKind::from_extension(&extension(url)))
                .unwrap_or(ArchiveKind::TarGz);
            let source = InstallSource::RemoteArchive {
                url: url.clone(),
                kind,
            };
            // INVARIANT: Updates keep everything the user configured.
            self.check_tools(&source)?;
            self.fetch_payload(source, name, true, &progress.sub(0, split))?;
        }

        if let Some(script) = &record.post_upgrade_script {
            let dir = self.layout.program_dir(name);
            debug!("run post-upgrade script {script:?}");
            self.toolbox
                .run(script, [""; 0], Some(&dir))
                .map_err(|source| UpdateError::ScriptFailed {
                    program: name.into(),
                    source,
                })?;
        }

        info!("updated {name}");
        Ok(UpdateStatus::Success)
    }

    fn require(&self, name: &str) -> Result<&ProgramRecord> {
        self.registry
            .program(name)
            .ok_or_else(|| UpdateError::NotInstalled(name.into()))
    }
}

fn sweeps(record: &ProgramRecord, url_programs: bool) -> bool {
    record.is_updatable() && (url_programs || record.update_url.is_none())
}

/// Update error types.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Program is not registered.
    #[error("program {0:?} is not installed")]
    NotInstalled(String),

    /// Program is not a git checkout.
    #[error("program {0:?} was not installed from git")]
    NotGit(String),

    /// Configured post-upgrade script no longer exists.
    #[error("post-upgrade script of {0:?} no longer exists and was cleared")]
    NoScript(String),

    /// Script path does not exist.
    #[error("script {0:?} does not exist")]
    BadPath(String),

    #[error("{0:?} is not a valid URL")]
    BadUrl(String),

    /// URL does not name a supported archive kind.
    #[error("cannot tell archive kind of {0:?}")]
    UnknownArchive(String),

    #[error("failed to pull git checkout")]
    Pull(#[source] GitError),

    #[error("failed to change git branch")]
    Checkout(#[source] GitError),

    /// Post-upgrade script exited unsuccessfully.
    #[error("post-upgrade script of {program:?} failed")]
    ScriptFailed {
        program: String,
        #[source]
        source: ToolError,
    },

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("failed to update database")]
    Registry(#[from] registry::Error),
}

/// Friendly result alias :3
type Result<T, E = UpdateError> = std::result::Result<T, E>;
