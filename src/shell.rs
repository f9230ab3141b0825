// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shell file line management.
//!
//! Hoard wires programs into the user's shell through plain rc-style files in
//! the managed root, which the user's real shell configuration sources. Each
//! line that hoard generates ends with an __ownership tag__ of the form
//! `# <program>`, e.g.:
//!
//! ```text
//! export PATH=$PATH:/home/me/.hoard/bin/foo # foo
//! alias bar='cd /home/me/.hoard/bin/foo/ && ./bar' # foo
//! function bar;cd /home/me/.hoard/bin/foo/;./bar;end # foo
//! ```
//!
//! The tag is what lets us remove every line belonging to a program without
//! touching lines written by anyone else. This is also why program names may
//! never contain spaces or pound signs.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Way to match a line against a target string.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LineMatch {
    /// Line is split on whitespace, and matches if target is one of the words.
    #[default]
    Word,

    /// Same as [`LineMatch::Word`], but line must also carry a lone `#` word.
    PoundWord,

    /// Line matches if target is a substring of it.
    Fuzzy,

    /// Line matches if its ownership tag names target.
    Owner,
}

impl LineMatch {
    /// Check if a single line matches target under this mode.
    pub fn matches(&self, line: &str, target: &str) -> bool {
        let line = line.trim_end();
        match self {
            Self::Word => line.split_whitespace().any(|word| word == target),
            Self::PoundWord => {
                let words = line.split_whitespace().collect::<Vec<_>>();
                words.contains(&target) && words.contains(&"#")
            }
            Self::Fuzzy => line.contains(target),
            Self::Owner => owner_of(line) == Some(target),
        }
    }
}

impl FromStr for LineMatch {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "word" => Ok(Self::Word),
            "poundword" => Ok(Self::PoundWord),
            "fuzzy" => Ok(Self::Fuzzy),
            "owner" => Ok(Self::Owner),
            other => Err(Error::UnknownMode(other.into())),
        }
    }
}

/// Line-oriented text file that hoard writes shell integration into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellFile {
    path: PathBuf,
}

impl ShellFile {
    /// Construct handle to shell file at target path.
    ///
    /// Does not touch the file system.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create shell file as empty if it does not already exist.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Create`] if the file cannot be created.
    pub fn create(&self) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|err| Error::Create {
                source: err,
                path: self.path.clone(),
            })?;

        Ok(())
    }

    /// Path to shell file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append text verbatim.
    ///
    /// No deduplication happens here. Callers that need idempotence must check
    /// their own records before appending.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Write`] if the file is missing or cannot be written.
    pub fn add_line(&self, text: impl AsRef<str>) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| self.write_error(err))?;
        file.write_all(text.as_ref().as_bytes())
            .map_err(|err| self.write_error(err))?;

        Ok(())
    }

    /// Remove every line that matches target under given mode.
    ///
    /// Non-matching lines are kept in their original order.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if the file cannot be read.
    /// - Return [`Error::Write`] if the file cannot be rewritten.
    pub fn remove_line(&self, target: impl AsRef<str>, mode: LineMatch) -> Result<()> {
        self.edit(|lines| lines.remove_matching(target.as_ref(), mode))
    }

    /// Replace every occurrence of old with new across the whole file.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if the file cannot be read.
    /// - Return [`Error::Write`] if the file cannot be rewritten.
    pub fn replace(&self, old: impl AsRef<str>, new: impl AsRef<str>) -> Result<()> {
        self.edit(|lines| lines.replace(old.as_ref(), new.as_ref()))
    }

    /// Rewrite the ownership tag of every line owned by old to new.
    ///
    /// Only the trailing `# <old>` of a line is touched, so tags of other
    /// programs sharing a prefix with old are left alone.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if the file cannot be read.
    /// - Return [`Error::Write`] if the file cannot be rewritten.
    pub fn retag(&self, old: impl AsRef<str>, new: impl AsRef<str>) -> Result<()> {
        self.edit(|lines| lines.retag(old.as_ref(), new.as_ref()))
    }

    /// Check if any line matches target under given mode.
    ///
    /// [`LineMatch::PoundWord`] is accepted too, though callers normally use it
    /// for removal only.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if the file cannot be read.
    pub fn check_line(&self, target: impl AsRef<str>, mode: LineMatch) -> Result<bool> {
        Ok(self
            .read()?
            .lines()
            .any(|line| mode.matches(line, target.as_ref())))
    }

    /// List every line carrying an ownership tag as `(owner, line)` pairs.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if the file cannot be read.
    pub fn tagged_lines(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .read()?
            .lines()
            .filter_map(|line| owner_of(line).map(|owner| (owner.to_string(), line.to_string())))
            .collect())
    }

    /// Edit lines of shell file.
    ///
    /// Read current contents into [`LineEdit`] instance, let the editor
    /// change it, then write the results back if anything changed.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if the file cannot be read.
    /// - Return [`Error::Write`] if the file cannot be rewritten.
    pub fn edit<E>(&self, editor: E) -> Result<()>
    where
        E: FnOnce(&mut LineEdit),
    {
        let mut lines = LineEdit::from(self.read()?);
        editor(&mut lines);

        if !lines.changed {
            return Ok(());
        }

        write(&self.path, lines.to_string().as_bytes()).map_err(|err| self.write_error(err))?;

        Ok(())
    }

    fn read(&self) -> Result<String> {
        read_to_string(&self.path).map_err(|err| Error::Read {
            source: err,
            path: self.path.clone(),
        })
    }

    fn write_error(&self, err: std::io::Error) -> Error {
        Error::Write {
            source: err,
            path: self.path.clone(),
        }
    }
}

/// Get owner named by the ownership tag at the end of a line.
pub fn owner_of(line: &str) -> Option<&str> {
    let mut words = line.split_whitespace().rev();
    let owner = words.next()?;
    (words.next()? == "#").then_some(owner)
}

/// Shell file line editor.
///
/// # Invariant
///
/// - Line order is preserved.
/// - Lines keep their original terminators.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineEdit {
    lines: Vec<String>,
    changed: bool,
}

impl LineEdit {
    /// Remove lines matching target.
    pub fn remove_matching(&mut self, target: &str, mode: LineMatch) {
        let before = self.lines.len();
        self.lines.retain(|line| !mode.matches(line, target));
        if self.lines.len() != before {
            self.changed = true;
        }
    }

    /// Literal substring replacement on each line.
    pub fn replace(&mut self, old: &str, new: &str) {
        if old.is_empty() {
            return;
        }

        for line in &mut self.lines {
            if line.contains(old) {
                *line = line.replace(old, new);
                self.changed = true;
            }
        }
    }

    /// Literal substring replacement restricted to lines owned by owner.
    pub fn replace_owned(&mut self, owner: &str, old: &str, new: &str) {
        if old.is_empty() {
            return;
        }

        for line in &mut self.lines {
            if owner_of(line) == Some(owner) && line.contains(old) {
                *line = line.replace(old, new);
                self.changed = true;
            }
        }
    }

    /// Swap trailing ownership tag of old for new.
    pub fn retag(&mut self, old: &str, new: &str) {
        let old_tag = format!("# {old}");
        let new_tag = format!("# {new}");
        for line in &mut self.lines {
            let body = line.trim_end();
            if owner_of(body) == Some(old) && body.ends_with(&old_tag) {
                let ending = line[body.len()..].to_string();
                *line = format!("{}{new_tag}{ending}", &body[..body.len() - old_tag.len()]);
                self.changed = true;
            }
        }
    }
}

impl Display for LineEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            fmt.write_str(line)?;
        }

        Ok(())
    }
}

impl From<String> for LineEdit {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

impl From<&str> for LineEdit {
    fn from(content: &str) -> Self {
        let lines = content.split_inclusive('\n').map(str::to_owned).collect();

        Self {
            lines,
            changed: false,
        }
    }
}

/// Shell file management error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shell file cannot be created when missing.
    #[error("failed to create shell file at {:?}", path.display())]
    Create {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Shell file cannot be read from.
    #[error("failed to read from shell file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Shell file cannot be written to.
    #[error("failed to write to shell file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Unrecognized line matching mode.
    #[error("unknown line matching mode {0:?}")]
    UnknownMode(String),
}

impl Error {
    /// Check if error came from the shell file simply not existing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
