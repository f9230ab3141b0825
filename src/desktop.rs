// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Desktop menu entries.
//!
//! Each program can expose any number of its files in the desktop menu. Every
//! exposed file gets its own desktop entry file identified by
//! `<file>-<program>`.

use std::{fmt, path::Path};

/// Launcher for one file of an installed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    /// Display name in the menu.
    pub name: String,

    /// File inside program directory to launch.
    pub file: String,

    pub comment: Option<String>,
    pub icon: Option<String>,

    /// Run inside a terminal.
    pub terminal: bool,

    pub categories: Vec<String>,
}

impl DesktopEntry {
    /// Construct entry with no comment, icon, or categories.
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            comment: None,
            icon: None,
            terminal: false,
            categories: Vec::new(),
        }
    }

    /// Identifier of entry when owned by program.
    pub fn id(&self, program: &str) -> String {
        desktop_id(&self.file, program)
    }

    /// Categories as written to disk.
    ///
    /// Falls back to `Utility` when empty. Audio or video programs also get
    /// filed under `AudioVideo`.
    pub fn resolved_categories(&self) -> Vec<String> {
        let mut categories = self.categories.clone();
        let has = |categories: &[String], name: &str| categories.iter().any(|cat| cat == name);

        if (has(&categories, "Audio") || has(&categories, "Video"))
            && !has(&categories, "AudioVideo")
        {
            categories.push("AudioVideo".into());
        }

        if categories.is_empty() {
            categories.push("Utility".into());
        }

        categories
    }

    /// Render entry for program installed at directory.
    pub fn render(&self, program_dir: &Path) -> String {
        RenderedEntry {
            entry: self,
            program_dir,
        }
        .to_string()
    }
}

/// Identifier of desktop entry of file owned by program.
pub fn desktop_id(file: &str, program: &str) -> String {
    let file = file.rsplit('/').next().unwrap_or(file);
    format!("{file}-{program}")
}

struct RenderedEntry<'a> {
    entry: &'a DesktopEntry,
    program_dir: &'a Path,
}

impl fmt::Display for RenderedEntry<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = self.program_dir.display();
        writeln!(fmt, "[Desktop Entry]")?;
        writeln!(fmt, "Name={}", self.entry.name)?;
        if let Some(comment) = &self.entry.comment {
            writeln!(fmt, "Comment={comment}")?;
        }
        writeln!(fmt, "Path={dir}/")?;
        writeln!(fmt, "Exec={dir}/{}", self.entry.file)?;
        if let Some(icon) = &self.entry.icon {
            writeln!(fmt, "Icon={icon}")?;
        }
        writeln!(fmt, "Terminal={}", self.entry.terminal)?;
        writeln!(fmt, "Type=Application")?;
        writeln!(fmt, "Categories={};", self.entry.resolved_categories().join(";"))
    }
}
