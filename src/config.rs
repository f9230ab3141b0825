// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database layout.
//!
//! Specify the layout of the database that hoard persists, to simplify the
//! process of serialization and deserialization. File I/O is left to the
//! [`registry`](crate::registry) to figure out.
//!
//! # General Layout
//!
//! The database is a pretty-printed JSON object made up of three parts:
//! options, version, and programs. Options hold user preferences, version
//! tracks the schema of the file itself, and programs maps the name of each
//! installed program to everything hoard knows about it.

use crate::archive::ArchiveKind;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Current schema version of the database file.
pub const FILE_SCHEMA_VERSION: u32 = 20;

/// Current schema version of program records.
pub const PROGRAM_SCHEMA_VERSION: u32 = 1;

/// Root object of the persisted database.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Database {
    /// User preferences.
    #[serde(default)]
    pub options: Options,

    /// Schema tracking.
    pub version: SchemaVersion,

    /// Installed programs by name.
    #[serde(default)]
    pub programs: BTreeMap<String, ProgramRecord>,
}

impl Database {
    /// Construct fresh database at the current schema version.
    pub fn new() -> Self {
        let mut options = Options::default();
        for key in OptionKey::ALL {
            options.set(key, key.default_value());
        }

        Self {
            options,
            version: SchemaVersion::default(),
            programs: BTreeMap::new(),
        }
    }

    /// Get record of installed program.
    pub fn program(&self, name: &str) -> Option<&ProgramRecord> {
        self.programs.get(name)
    }

    /// Get mutable record of installed program.
    pub fn program_mut(&mut self, name: &str) -> Option<&mut ProgramRecord> {
        self.programs.get_mut(name)
    }

    /// Check if program is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }
}

impl FromStr for Database {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut database: Database = serde_json::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Desktop and binlink listings never hold duplicates.
        for record in database.programs.values_mut() {
            dedup_in_order(&mut record.desktops);
            dedup_in_order(&mut record.binlinks);
        }

        Ok(database)
    }
}

impl Display for Database {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_json::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Schema tracking of database file.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SchemaVersion {
    /// Only ever increases, one migration step at a time.
    pub file_schema_version: u32,

    /// Schema of program records.
    pub program_schema_version: u32,

    /// Release branch the user follows.
    pub branch: String,
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self {
            file_schema_version: FILE_SCHEMA_VERSION,
            program_schema_version: PROGRAM_SCHEMA_VERSION,
            branch: "master".into(),
        }
    }
}

/// How a program got installed.
///
/// Determines which branch uninstall, rename, and update logic take.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    /// Archive or directory.
    #[default]
    Default,

    /// Git checkout.
    Git,

    /// Single executable living at `bin/<name>/<name>`.
    Single,
}

impl Display for InstallType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Default => "default",
            Self::Git => "git",
            Self::Single => "single",
        })
    }
}

/// Everything hoard knows about an installed program.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProgramRecord {
    /// Kind of installation.
    pub install_type: InstallType,

    /// Script to run inside program directory after updates.
    #[serde(default)]
    pub post_upgrade_script: Option<String>,

    /// Desktop entry identifiers owned by program.
    #[serde(default)]
    pub desktops: Vec<String>,

    /// Remote archive to re-fetch on update.
    #[serde(default)]
    pub update_url: Option<String>,

    /// Kind of archive found at update URL.
    #[serde(default)]
    pub update_archive_type: Option<ArchiveKind>,

    /// Program directory has a PATH export line.
    #[serde(default)]
    pub has_path: bool,

    /// Alias names made for executables inside program directory.
    #[serde(default)]
    pub binlinks: Vec<String>,
}

impl ProgramRecord {
    /// Construct fresh record for given install type.
    pub fn new(install_type: InstallType) -> Self {
        Self {
            install_type,
            ..Default::default()
        }
    }

    /// Add desktop identifier unless already present.
    ///
    /// Returns false if the identifier was already owned.
    pub fn add_desktop(&mut self, id: impl Into<String>) -> bool {
        push_unique(&mut self.desktops, id.into())
    }

    /// Add binlink alias unless already present.
    ///
    /// Returns false if the alias was already recorded.
    pub fn add_binlink(&mut self, alias: impl Into<String>) -> bool {
        push_unique(&mut self.binlinks, alias.into())
    }

    /// Program has anything to update from.
    pub fn is_updatable(&self) -> bool {
        self.install_type == InstallType::Git
            || self.update_url.is_some()
            || self.post_upgrade_script.is_some()
    }
}

fn push_unique(list: &mut Vec<String>, item: String) -> bool {
    if list.contains(&item) {
        return false;
    }
    list.push(item);
    true
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut seen = Vec::with_capacity(list.len());
    list.retain(|item| push_unique(&mut seen, item.clone()));
}

/// Named user preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKey {
    Verbose,
    AutoInstall,
    SkipQuestions,
    UpdateUrlPrograms,
    PressEnterKey,
    WarnMissingDeps,
    ShellFile,
}

impl OptionKey {
    /// Every known option.
    pub const ALL: [OptionKey; 7] = [
        Self::Verbose,
        Self::AutoInstall,
        Self::SkipQuestions,
        Self::UpdateUrlPrograms,
        Self::PressEnterKey,
        Self::WarnMissingDeps,
        Self::ShellFile,
    ];

    /// Key as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verbose => "Verbose",
            Self::AutoInstall => "AutoInstall",
            Self::SkipQuestions => "SkipQuestions",
            Self::UpdateUrlPrograms => "UpdateURLPrograms",
            Self::PressEnterKey => "PressEnterKey",
            Self::WarnMissingDeps => "WarnMissingDeps",
            Self::ShellFile => "ShellFile",
        }
    }

    /// Value used when the option is absent.
    pub fn default_value(&self) -> OptionValue {
        match self {
            Self::Verbose | Self::AutoInstall | Self::SkipQuestions | Self::UpdateUrlPrograms => {
                OptionValue::Flag(false)
            }
            Self::PressEnterKey | Self::WarnMissingDeps => OptionValue::Flag(true),
            Self::ShellFile => OptionValue::Text(detect_shell_file().unwrap_or_default().into()),
        }
    }
}

impl Display for OptionKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for OptionKey {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(data))
            .ok_or_else(|| ConfigError::UnknownOption(data.into()))
    }
}

/// Value of a user preference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Text(String),
}

impl OptionValue {
    /// Interpret value as flag.
    ///
    /// Text counts as set when non-empty.
    pub fn as_flag(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Text(text) => !text.is_empty(),
        }
    }
}

impl Display for OptionValue {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Flag(flag) => write!(fmt, "{flag}"),
            Self::Text(text) => fmt.write_str(text),
        }
    }
}

impl FromStr for OptionValue {
    type Err = std::convert::Infallible;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(match data {
            "true" => Self::Flag(true),
            "false" => Self::Flag(false),
            text => Self::Text(text.into()),
        })
    }
}

/// User preferences.
///
/// # Invariant
///
/// - Absent keys resolve to their documented default, never to an error.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    /// Read option, falling back to its default.
    pub fn read(&self, key: OptionKey) -> OptionValue {
        self.0
            .get(key.as_str())
            .cloned()
            .unwrap_or_else(|| key.default_value())
    }

    /// Read option as flag.
    pub fn flag(&self, key: OptionKey) -> bool {
        self.read(key).as_flag()
    }

    /// Set option to value.
    pub fn set(&mut self, key: OptionKey, value: OptionValue) {
        self.0.insert(key.as_str().into(), value);
    }

    /// Flip flag option and return its new state.
    pub fn flip(&mut self, key: OptionKey) -> bool {
        let flipped = !self.flag(key);
        self.set(key, OptionValue::Flag(flipped));
        flipped
    }
}

/// Determine the rc file of the user's shell, relative to their home.
pub fn detect_shell_file() -> Option<&'static str> {
    let shell = std::env::var("SHELL").ok()?;
    if shell.contains("bash") {
        Some(".bashrc")
    } else if shell.contains("zsh") {
        Some(".zshrc")
    } else if shell.contains("fish") {
        Some(".config/fish/config.fish")
    } else {
        None
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize database.
    #[error("failed to deserialize database")]
    Deserialize(#[source] serde_json::Error),

    /// Failed to serialize database.
    #[error("failed to serialize database")]
    Serialize(#[source] serde_json::Error),

    /// Option key does not exist.
    #[error("unknown option {0:?}")]
    UnknownOption(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn deserialize_database() -> anyhow::Result<()> {
        let result: Database = indoc! {r#"
            {
                "options": { "Verbose": true, "ShellFile": ".zshrc" },
                "version": {
                    "file_schema_version": 20,
                    "program_schema_version": 1,
                    "branch": "master"
                },
                "programs": {
                    "package": {
                        "install_type": "single",
                        "desktops": ["package-package", "package-package"],
                        "update_url": "https://example.org/package.tar.xz",
                        "update_archive_type": ".tar.xz",
                        "has_path": true,
                        "binlinks": ["package"]
                    }
                }
            }
        "#}
        .parse()?;

        let record = result.program("package").cloned().unwrap_or_default();
        assert_eq!(record.install_type, InstallType::Single);
        assert_eq!(record.desktops, vec!["package-package".to_string()]);
        assert_eq!(record.update_archive_type, Some(ArchiveKind::TarXz));
        assert_eq!(record.post_upgrade_script, None);
        assert!(result.options.flag(OptionKey::Verbose));
        assert_eq!(
            result.options.read(OptionKey::ShellFile),
            OptionValue::Text(".zshrc".into())
        );

        Ok(())
    }

    #[test]
    fn serialize_database() {
        let mut database = Database {
            options: Options::default(),
            version: SchemaVersion::default(),
            programs: BTreeMap::new(),
        };
        database.options.set(OptionKey::Verbose, OptionValue::Flag(false));
        database
            .programs
            .insert("tool".into(), ProgramRecord::new(InstallType::Git));

        let expect = indoc! {r#"
            {
              "options": {
                "Verbose": false
              },
              "version": {
                "file_schema_version": 20,
                "program_schema_version": 1,
                "branch": "master"
              },
              "programs": {
                "tool": {
                  "install_type": "git",
                  "post_upgrade_script": null,
                  "desktops": [],
                  "update_url": null,
                  "update_archive_type": null,
                  "has_path": false,
                  "binlinks": []
                }
              }
            }"#};

        assert_eq!(database.to_string(), expect);
    }

    #[sealed_test(env = [("SHELL", "/usr/bin/fish")])]
    fn absent_options_use_defaults() {
        let options = Options::default();
        assert!(!options.flag(OptionKey::Verbose));
        assert!(!options.flag(OptionKey::UpdateUrlPrograms));
        assert!(options.flag(OptionKey::PressEnterKey));
        assert!(options.flag(OptionKey::WarnMissingDeps));
        assert_eq!(
            options.read(OptionKey::ShellFile),
            OptionValue::Text(".config/fish/config.fish".into())
        );
    }

    #[test]
    fn flip_options() {
        let mut options = Options::default();
        assert!(options.flip(OptionKey::Verbose));
        assert!(!options.flip(OptionKey::Verbose));
        assert!(!options.flip(OptionKey::PressEnterKey));
    }

    #[test]
    fn option_keys_parse_case_insensitively() {
        assert_eq!("verbose".parse::<OptionKey>().ok(), Some(OptionKey::Verbose));
        assert_eq!(
            "UpdateURLPrograms".parse::<OptionKey>().ok(),
            Some(OptionKey::UpdateUrlPrograms)
        );
        assert!("Mode".parse::<OptionKey>().is_err());
    }

    #[test]
    fn records_refuse_duplicates() {
        let mut record = ProgramRecord::new(InstallType::Default);
        assert!(record.add_binlink("run"));
        assert!(!record.add_binlink("run"));
        assert!(record.add_desktop("run-pkg"));
        assert!(!record.add_desktop("run-pkg"));
        assert_eq!(record.binlinks.len(), 1);
        assert_eq!(record.desktops.len(), 1);
    }
}
