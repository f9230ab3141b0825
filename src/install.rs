// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Program installation.
//!
//! Installation always starts by classifying the input into an
//! [`InstallSource`]. Nothing touches the disk until classification, name
//! checks, collision handling, and tool checks have all passed. Registration
//! is the very last step, so a failed install never leaves a record behind.
//!
//! # Collisions
//!
//! Installing under a name that is already taken needs an explicit decision
//! from the caller:
//!
//! - `None` refuses with [`InstallError::AlreadyExists`] without side effects.
//! - `Some(false)` uninstalls the old program first, then installs fresh.
//! - `Some(true)` merges the new payload over the old one, with `rsync` when
//!   it is available and a plain recursive copy otherwise.
//!
//! Either way the record is replaced by a fresh one. The payload changed, so
//! shell lines and desktop entries of the old program are removed as well.
//!
//! Remote archives behind a `file://` URL are copied from disk instead of
//! downloaded.

use crate::{
    archive::ArchiveKind,
    config::{InstallType, ProgramRecord},
    frontend::{Frontend, ProgressSpan},
    git::GitError,
    layout::remove_dir_if_exists,
    lifecycle::LifecycleError,
    path::{expand_path, extension, has_forbidden_chars, name_from_archive_path, name_from_directory_path},
    registry,
    store::Store,
    syscall::ToolError,
};

use std::{
    ffi::OsString,
    fs::{copy, create_dir_all, read_dir, remove_dir_all, remove_file, rename},
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};
use url::Url;
use walkdir::WalkDir;

/// Where a program gets installed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// Local archive in a supported format.
    Archive { path: PathBuf, kind: ArchiveKind },

    /// Any other local file, installed as `bin/<name>/<name>`.
    SingleFile { path: PathBuf },

    /// Local directory, moved into the bin root.
    Directory { path: PathBuf },

    /// Remote git repository.
    Git { url: String },

    /// Archive behind a URL.
    RemoteArchive { url: String, kind: ArchiveKind },
}

impl InstallSource {
    /// Classify user input as install source.
    ///
    /// Inputs containing `://` are URLs, which must use the `http`, `https`,
    /// or `file` scheme and point at a git repository or supported archive.
    /// Everything else is a local path that must exist.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::BadSource`] if the input is neither.
    pub fn classify(input: &str) -> Result<Self> {
        let bad_source = || InstallError::BadSource(input.into());

        if input.contains("://") {
            let url = Url::parse(input).map_err(|_| bad_source())?;
            if !matches!(url.scheme(), "http" | "https" | "file") {
                return Err(bad_source());
            }

            let ext = extension(url.path().trim_end_matches('/'));
            if ext.eq_ignore_ascii_case(".git") {
                return Ok(Self::Git { url: input.into() });
            }

            return ArchiveKind::from_extension(&ext)
                .map(|kind| Self::RemoteArchive {
                    url: input.into(),
                    kind,
                })
                .ok_or_else(bad_source);
        }

        let path = expand_path(input).map_err(|_| bad_source())?;
        if path.is_dir() {
            return Ok(Self::Directory { path });
        }

        if path.is_file() {
            let ext = extension(&path.to_string_lossy());
            return Ok(match ArchiveKind::from_extension(&ext) {
                Some(kind) => Self::Archive { path, kind },
                None => Self::SingleFile { path },
            });
        }

        Err(bad_source())
    }

    /// Program name derived from source, if it can be trusted.
    ///
    /// Remote archives have none, since the last segment of a download URL
    /// says little about what it serves.
    pub fn derived_name(&self) -> Option<String> {
        match self {
            Self::Archive { path, .. } | Self::SingleFile { path } => {
                Some(name_from_archive_path(&path.to_string_lossy()))
            }
            Self::Directory { path } => Some(name_from_directory_path(&path.to_string_lossy())),
            Self::Git { url } => Some(name_from_archive_path(url.trim_end_matches('/'))),
            Self::RemoteArchive { .. } => None,
        }
    }

    /// Path or URL of source as given.
    pub fn location(&self) -> String {
        match self {
            Self::Archive { path, .. } | Self::SingleFile { path } | Self::Directory { path } => {
                path.to_string_lossy().into_owned()
            }
            Self::Git { url } | Self::RemoteArchive { url, .. } => url.clone(),
        }
    }

    /// Install type recorded for source.
    pub fn install_type(&self) -> InstallType {
        match self {
            Self::Git { .. } => InstallType::Git,
            Self::SingleFile { .. } => InstallType::Single,
            _ => InstallType::Default,
        }
    }
}

impl<F: Frontend> Store<F> {
    /// Install program from path or URL.
    ///
    /// Returns the name the program got registered under.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::BadSource`] if input cannot be classified.
    /// - Return [`InstallError::NeedsName`] if a remote archive has no name.
    /// - Return [`InstallError::BadName`] if the name has reserved characters.
    /// - Return [`InstallError::AlreadyExists`] on a collision with no decision.
    /// - Return [`InstallError::MissingTool`] if a required tool is absent.
    /// - Return any other [`InstallError`] if a step of the install fails.
    #[instrument(skip(self), level = "debug")]
    pub fn install(
        &mut self,
        input: &str,
        name: Option<&str>,
        overwrite: Option<bool>,
    ) -> Result<String> {
        let source = InstallSource::classify(input)?;
        let progress = self.progress();
        let name = self.install_source(source, name, overwrite, &progress)?;
        progress.finish();

        Ok(name)
    }

    fn install_source(
        &mut self,
        source: InstallSource,
        name: Option<&str>,
        overwrite: Option<bool>,
        progress: &ProgressSpan<F>,
    ) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => source
                .derived_name()
                .ok_or_else(|| InstallError::NeedsName(source.location()))?,
        };
        if name.is_empty() || has_forbidden_chars(&name) {
            return Err(InstallError::BadName(name));
        }

        let registered = self.registry.contains(&name);
        let dest = self.layout.program_dir(&name);
        let taken = registered || dest.exists();
        let merge = match (taken, overwrite) {
            (false, _) => false,
            (true, None) => return Err(InstallError::AlreadyExists(name)),
            (true, Some(decision)) => decision,
        };

        self.check_tools(&source)?;

        if taken && overwrite == Some(false) {
            info!("reinstall {name} from scratch");
            if registered {
                self.uninstall(&name)?;
            } else {
                remove_dir_if_exists(&dest).map_err(|err| transfer_error(err, &dest))?;
            }
        }
        progress.report(10);

        let install_type = source.install_type();
        let record = self.fetch_payload(source, &name, merge, &progress.sub(10, 90))?;

        // INVARIANT: A fresh record owns no shell lines or desktop files.
        if merge {
            if let Some(old) = self.registry.program(&name).cloned() {
                debug!("drop shell integration of replaced {name}");
                self.detach(&name, &old)?;
            }
        }

        self.registry.insert_program(name.as_str(), record)?;
        info!("installed {name} as {install_type} program");

        Ok(name)
    }

    /// Put payload of source into the bin root under name.
    ///
    /// Returns the fresh record for it. The registry is left alone.
    pub(crate) fn fetch_payload(
        &self,
        source: InstallSource,
        name: &str,
        merge: bool,
        progress: &ProgressSpan<F>,
    ) -> Result<ProgramRecord> {
        let dest = self.layout.program_dir(name);
        let mut record = ProgramRecord::new(source.install_type());
        match source {
            InstallSource::Archive { path, kind } => {
                self.install_archive(&path, kind, &dest, merge, progress)?;
            }
            InstallSource::SingleFile { path } => {
                self.install_single(&path, name, &dest)?;
            }
            InstallSource::Directory { path } => {
                self.install_directory(&path, &dest, merge)?;
            }
            InstallSource::Git { url } => {
                self.install_git(&url, name, &dest, merge, progress)?;
            }
            InstallSource::RemoteArchive { url, kind } => {
                self.install_remote(&url, kind, name, &dest, merge, progress)?;
                record.update_url = Some(url);
                record.update_archive_type = Some(kind);
            }
        }
        progress.finish();

        if let Err(err) = self.layout.clear_scratch() {
            warn!("failed to clear scratch directories: {err}");
        }

        Ok(record)
    }

    pub(crate) fn check_tools(&self, source: &InstallSource) -> Result<()> {
        let mut tools = Vec::new();
        match source {
            InstallSource::Archive { kind, .. } => tools.push(kind.extractor()),
            InstallSource::RemoteArchive { url, kind } => {
                if !is_file_url(url) {
                    tools.push("wget");
                }
                tools.push(kind.extractor());
            }
            _ => {}
        }

        if let Some(tool) = tools.into_iter().find(|tool| !self.toolbox.has(tool)) {
            return Err(InstallError::MissingTool(tool.into()));
        }

        Ok(())
    }

    fn install_archive(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        dest: &Path,
        merge: bool,
        progress: &ProgressSpan<F>,
    ) -> Result<()> {
        let scratch = self
            .layout
            .fresh_scratch()
            .map_err(|err| transfer_error(err, &self.layout.scratch_dir()))?;

        debug!("extract {:?} into {:?}", archive.display(), scratch.display());
        let args = kind.extract_args(archive, &scratch, self.toolbox.is_verbose());
        self.toolbox
            .run(kind.extractor(), args, None)
            .map_err(|err| tool_error(err, InstallError::ExtractionFailed))?;
        progress.report(60);

        let name = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let payload = payload_dir(&scratch, &name).map_err(|err| transfer_error(err, &scratch))?;
        self.place(&payload, dest, merge)
    }

    fn install_single(&self, file: &Path, name: &str, dest: &Path) -> Result<()> {
        create_dir_all(dest).map_err(|err| transfer_error(err, dest))?;
        let target = dest.join(name);
        if target.exists() {
            debug!("replace old single file {:?}", target.display());
            remove_file(&target).map_err(|err| transfer_error(err, &target))?;
        }

        move_path(file, &target).map_err(|err| transfer_error(err, file))?;
        mark_executable(&target).map_err(|err| transfer_error(err, &target))
    }

    fn install_directory(&self, dir: &Path, dest: &Path, merge: bool) -> Result<()> {
        self.place(dir, dest, merge)?;
        if merge && dir.exists() {
            remove_dir_all(dir).map_err(|err| transfer_error(err, dir))?;
        }

        Ok(())
    }

    fn install_git(
        &self,
        url: &str,
        name: &str,
        dest: &Path,
        merge: bool,
        progress: &ProgressSpan<F>,
    ) -> Result<()> {
        let clone_into = if merge {
            let scratch = self
                .layout
                .fresh_scratch()
                .map_err(|err| transfer_error(err, &self.layout.scratch_dir()))?;
            scratch.join(name)
        } else {
            dest.to_path_buf()
        };

        let fetch = progress.sub(0, 80);
        if let Err(err) = self.git.clone_repo(url, &clone_into, |percent| fetch.report(percent)) {
            // INVARIANT: Failed clones leave nothing behind in the bin root.
            if !merge {
                if let Err(err) = remove_dir_if_exists(&clone_into) {
                    warn!("failed to clean up after clone: {err}");
                }
            }
            return Err(InstallError::CloneFailed(err));
        }

        if merge {
            self.place(&clone_into, dest, true)?;
        }

        Ok(())
    }

    fn install_remote(
        &self,
        url: &str,
        kind: ArchiveKind,
        name: &str,
        dest: &Path,
        merge: bool,
        progress: &ProgressSpan<F>,
    ) -> Result<()> {
        let download = self
            .layout
            .fresh_download()
            .map_err(|err| transfer_error(err, &self.layout.download_dir()))?;
        let archive = download.join(format!("{name}{}", kind.extension()));

        if is_file_url(url) {
            let path = Url::parse(url)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| InstallError::BadSource(url.into()))?;
            debug!("copy {:?} to {:?}", path.display(), archive.display());
            copy(&path, &archive).map_err(|err| transfer_error(err, &path))?;
            return self.install_archive(&archive, kind, dest, merge, &progress.sub(50, 100));
        }

        info!("download {url}");
        let fetch = progress.sub(0, 50);
        let args: [OsString; 3] = ["-O".into(), archive.as_os_str().into(), url.into()];
        self.toolbox
            .run_with_progress("wget", args, Some(&download), |percent| fetch.report(percent))
            .map_err(|err| tool_error(err, InstallError::DownloadFailed))?;
        fetch.finish();

        self.install_archive(&archive, kind, dest, merge, &progress.sub(50, 100))
    }

    // Move payload into place, or merge it over what is already there.
    fn place(&self, payload: &Path, dest: &Path, merge: bool) -> Result<()> {
        if merge && dest.exists() && !self.toolbox.has("rsync") {
            debug!("copy {:?} over {:?}", payload.display(), dest.display());
            return copy_tree(payload, dest).map_err(|err| transfer_error(err, payload));
        }

        if merge && dest.exists() {
            debug!("merge {:?} into {:?}", payload.display(), dest.display());
            let mut source = payload.as_os_str().to_owned();
            source.push("/");
            let args = [OsString::from("-a"), source, dest.as_os_str().into()];
            self.toolbox
                .run("rsync", args, None)
                .map_err(|err| tool_error(err, InstallError::MergeFailed))?;
            return Ok(());
        }

        debug!("move {:?} to {:?}", payload.display(), dest.display());
        if let Some(parent) = dest.parent() {
            create_dir_all(parent).map_err(|err| transfer_error(err, parent))?;
        }
        move_path(payload, dest).map_err(|err| transfer_error(err, payload))
    }
}

fn is_file_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|url| url.scheme() == "file")
}

// Peel one wrapping directory off an extracted archive.
fn payload_dir(scratch: &Path, name: &str) -> io::Result<PathBuf> {
    let named = scratch.join(name);
    if !name.is_empty() && named.is_dir() {
        return Ok(named);
    }

    let entries = read_dir(scratch)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<Vec<_>>>()?;
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(scratch.to_path_buf()),
    }
}

/// Move file or directory, copying across file systems if needed.
pub(crate) fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    let Err(err) = rename(from, to) else {
        return Ok(());
    };
    if !from.exists() {
        return Err(err);
    }

    debug!("rename failed ({err}), fall back to copy");
    copy_tree(from, to)?;
    if from.is_dir() {
        remove_dir_all(from)
    } else {
        remove_file(from)
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_file() {
        copy(from, to)?;
        return Ok(());
    }

    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from).map_err(io::Error::other)?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            if target.symlink_metadata().is_ok() {
                remove_file(&target)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(std::fs::read_link(entry.path())?, &target)?;
        } else {
            copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

fn mark_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        std::fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

fn transfer_error(source: io::Error, path: &Path) -> InstallError {
    InstallError::TransferFailed {
        source,
        path: path.to_path_buf(),
    }
}

fn tool_error(err: ToolError, wrap: fn(ToolError) -> InstallError) -> InstallError {
    match err {
        ToolError::Missing(tool) => InstallError::MissingTool(tool),
        other => wrap(other),
    }
}

/// Install error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Input is not an existing path or supported URL.
    #[error("cannot install from {0:?}, not an existing path or supported URL")]
    BadSource(String),

    /// Name contains characters reserved by shell file records.
    #[error("program name {0:?} is empty or contains a space or '#'")]
    BadName(String),

    /// Name is taken and no overwrite decision was given.
    #[error("program {0:?} already exists")]
    AlreadyExists(String),

    /// Remote archive needs an explicit name.
    #[error("a name is required to install {0}")]
    NeedsName(String),

    /// Required external tool is not installed.
    #[error("required tool {0:?} is not installed")]
    MissingTool(String),

    #[error("failed to extract archive")]
    ExtractionFailed(#[source] ToolError),

    #[error("failed to download archive")]
    DownloadFailed(#[source] ToolError),

    #[error("failed to merge into existing program")]
    MergeFailed(#[source] ToolError),

    #[error("failed to clone repository")]
    CloneFailed(#[source] GitError),

    /// Moving or copying payload failed.
    #[error("failed to move files at {:?}", path.display())]
    TransferFailed {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Uninstall(#[from] LifecycleError),

    #[error("failed to register program")]
    Registry(#[from] registry::Error),
}

/// Friendly result alias :3
type Result<T, E = InstallError> = std::result::Result<T, E>;
