// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git operations on program checkouts.
//!
//! Git installs are plain clones of a remote repository placed into the bin
//! root. Updating one is a fast-forward pull of the branch it has checked out.
//! Everything goes through libgit2, so no `git` binary needs to be installed.
//!
//! If a remote requires credentials, the user gets prompted for them. Any
//! progress bar on screen is suspended while prompting.

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, FetchOptions, RemoteCallbacks, Repository,
};
use indicatif::ProgressBar;
use inquire::{Password, Text};
use std::{
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Outcome of pulling a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// New commits were fast-forwarded into the checkout.
    Updated,

    /// Checkout already matched its remote.
    UpToDate,
}

/// Git client with credential prompting.
#[derive(Debug, Clone)]
pub struct Git {
    prompter: IndicatifPrompter,
}

impl Git {
    /// Construct new git client that suspends bar whenever it prompts.
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            prompter: IndicatifPrompter::new(bar),
        }
    }

    /// Clone remote repository into destination.
    ///
    /// Reports object transfer progress as percentage through `on_progress`.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, url, dest, on_progress), level = "debug")]
    pub fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: impl FnMut(u8),
    ) -> Result<()> {
        info!("clone {url} into {:?}", dest.display());
        let authenticator = GitAuthenticator::default().set_prompter(self.prompter.clone());
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let total = progress.total_objects();
            if total > 0 && throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                let percent = progress.received_objects() * 100 / total;
                on_progress(percent.min(100) as u8);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        RepoBuilder::new().fetch_options(fo).clone(url, dest)?;
        on_progress(100);

        Ok(())
    }

    /// Pull checked out branch from `origin`, fast-forward only.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::DetachedHead`] if no branch is checked out.
    /// - Return [`GitError::Diverged`] if the branch cannot be fast-forwarded.
    /// - Return [`GitError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, path), level = "debug")]
    pub fn pull(&self, path: &Path) -> Result<PullOutcome> {
        let repository = Repository::open(path)?;
        let head = repository.head()?;
        if !head.is_branch() {
            return Err(GitError::DetachedHead(path.to_path_buf()));
        }
        let branch = head
            .shorthand()
            .ok_or_else(|| GitError::DetachedHead(path.to_path_buf()))?
            .to_string();

        let authenticator = GitAuthenticator::default().set_prompter(self.prompter.clone());
        let config = repository.config()?;
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);

        debug!("fetch {branch} from origin");
        repository
            .find_remote("origin")?
            .fetch(&[branch.as_str()], Some(&mut fo), None)?;

        let fetch_head = repository.find_reference("FETCH_HEAD")?;
        let incoming = repository.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repository.merge_analysis(&[&incoming])?;

        if analysis.is_up_to_date() {
            info!("{branch} is already up to date");
            return Ok(PullOutcome::UpToDate);
        }

        if !analysis.is_fast_forward() {
            return Err(GitError::Diverged { branch });
        }

        let refname = format!("refs/heads/{branch}");
        let mut reference = repository.find_reference(&refname)?;
        reference.set_target(incoming.id(), "hoard: fast-forward")?;
        repository.set_head(&refname)?;
        repository.checkout_head(Some(CheckoutBuilder::default().force()))?;
        info!("fast-forwarded {branch} to {}", incoming.id());

        Ok(PullOutcome::Updated)
    }

    /// Force checkout of branch.
    ///
    /// Local branches are preferred. A branch that only exists on `origin`
    /// gets a local branch created for it first.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if the branch does not exist or libgit2
    ///   operations fail.
    #[instrument(skip(self, path), level = "debug")]
    pub fn checkout(&self, path: &Path, branch: &str) -> Result<()> {
        let repository = Repository::open(path)?;
        let local = format!("refs/heads/{branch}");

        if repository.find_reference(&local).is_err() {
            let remote = repository.revparse_single(&format!("origin/{branch}"))?;
            let commit = remote.peel_to_commit()?;
            debug!("create local branch {branch} from origin");
            repository.branch(branch, &commit, false)?;
        }

        let target = repository.revparse_single(&local)?;
        repository.checkout_tree(&target, Some(CheckoutBuilder::default().force()))?;
        repository.set_head(&local)?;
        info!("checked out {branch}");

        Ok(())
    }
}

impl Default for Git {
    fn default() -> Self {
        Self::new(ProgressBar::hidden())
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Git error types.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Checkout has no branch to pull.
    #[error("checkout at {:?} is not on a branch", .0.display())]
    DetachedHead(PathBuf),

    /// Local branch has commits the remote does not.
    #[error("branch {branch:?} cannot be fast-forwarded")]
    Diverged { branch: String },

    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
type Result<T, E = GitError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{IndexAddOption, RepositoryInitOptions, Signature};
    use pretty_assertions::assert_eq;
    use std::fs::{read_to_string, write};

    fn commit_all(repository: &Repository, message: &str) -> anyhow::Result<()> {
        let mut index = repository.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = repository.find_tree(index.write_tree()?)?;
        let signature = Signature::now("John Doe", "john@doe.com")?;
        let parent = repository
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();
        repository.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        Ok(())
    }

    fn upstream(dir: &Path) -> anyhow::Result<Repository> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("master");
        let repository = Repository::init_opts(dir, &opts)?;
        write(dir.join("run.sh"), "echo one\n")?;
        commit_all(&repository, "first")?;
        Ok(repository)
    }

    #[test]
    fn clone_then_pull_fast_forwards() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let remote_dir = tmp.path().join("remote");
        let remote = upstream(&remote_dir)?;
        let url = format!("file://{}", remote_dir.display());
        let checkout = tmp.path().join("checkout");

        let git = Git::default();
        let mut seen = Vec::new();
        git.clone_repo(&url, &checkout, |percent| seen.push(percent))?;
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(git.pull(&checkout)?, PullOutcome::UpToDate);

        write(remote_dir.join("run.sh"), "echo two\n")?;
        commit_all(&remote, "second")?;
        assert_eq!(git.pull(&checkout)?, PullOutcome::Updated);
        assert_eq!(read_to_string(checkout.join("run.sh"))?, "echo two\n");
        Ok(())
    }

    #[test]
    fn checkout_remote_branch() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let remote_dir = tmp.path().join("remote");
        let remote = upstream(&remote_dir)?;
        let head = remote.head()?.peel_to_commit()?;
        remote.branch("beta", &head, false)?;
        remote.set_head("refs/heads/beta")?;
        write(remote_dir.join("beta.txt"), "beta\n")?;
        commit_all(&remote, "beta only")?;
        remote.set_head("refs/heads/master")?;

        let checkout = tmp.path().join("checkout");
        let git = Git::default();
        git.clone_repo(&format!("file://{}", remote_dir.display()), &checkout, |_| ())?;
        assert!(!checkout.join("beta.txt").exists());

        git.checkout(&checkout, "beta")?;
        assert!(checkout.join("beta.txt").exists());
        assert!(git.checkout(&checkout, "nope").is_err());
        Ok(())
    }
}
