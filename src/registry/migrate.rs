// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database schema migrations.
//!
//! Each [`Migration`] upgrades the raw JSON tree of the database by exactly
//! one file schema version. Migrations run on the raw tree instead of the
//! typed [`Database`](crate::config::Database), because older trees do not
//! decode into the current layout.
//!
//! # Invariant
//!
//! - Steps run in order, one per loop iteration, never skipped.
//! - The stored version is bumped and persisted after every step, so an
//!   interrupted migration resumes from the last completed step.

use crate::{config::FILE_SCHEMA_VERSION, layout::Layout};

use serde_json::{Map, Value};
use std::{fs::create_dir_all, path::PathBuf};
use tracing::{debug, info, instrument};

/// One schema upgrade step.
pub struct Migration {
    /// Version this step upgrades from.
    pub from: u32,

    /// What the step does.
    pub summary: &'static str,

    /// Transformation to apply.
    pub apply: fn(&mut Value, &Layout) -> Result<()>,
}

/// Every migration, in the order they must run.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        from: 11,
        summary: "add update_url to every program",
        apply: add_update_url,
    },
    Migration {
        from: 12,
        summary: "add has_path and binlinks to every program",
        apply: add_path_and_binlinks,
    },
    Migration {
        from: 13,
        summary: "add UpdateURLPrograms option",
        apply: add_update_url_programs_option,
    },
    Migration {
        from: 14,
        summary: "add PressEnterKey option",
        apply: add_press_enter_key_option,
    },
    Migration {
        from: 15,
        summary: "convert git_installed flag to install_type",
        apply: convert_install_type,
    },
    Migration {
        from: 16,
        summary: "add WarnMissingDeps option",
        apply: add_warn_missing_deps_option,
    },
    Migration {
        from: 17,
        summary: "move desktop files into their own directory",
        apply: relocate_desktop_files,
    },
    Migration {
        from: 18,
        summary: "delete legacy version file",
        apply: delete_legacy_version_file,
    },
    Migration {
        from: 19,
        summary: "add update_archive_type to every program",
        apply: add_update_archive_type,
    },
];

/// Read file schema version of raw database tree.
///
/// # Errors
///
/// - Return [`Error::Malformed`] if the version is missing or not a number.
pub fn file_version(value: &Value) -> Result<u32> {
    value
        .pointer("/version/file_schema_version")
        .and_then(Value::as_u64)
        .and_then(|version| u32::try_from(version).ok())
        .ok_or_else(|| Error::Malformed("missing file_schema_version".into()))
}

/// Apply every pending migration to raw database tree.
///
/// Calls `persist` after each completed step. Returns number of steps
/// applied, which is zero for a tree already at the current version.
///
/// # Errors
///
/// - Return [`Error::UnsupportedSchema`] if no step exists for a version.
/// - Return any error from a migration step or from `persist`.
#[instrument(skip(value, layout, persist), level = "debug")]
pub fn run<E>(
    value: &mut Value,
    layout: &Layout,
    mut persist: impl FnMut(&Value) -> std::result::Result<(), E>,
) -> std::result::Result<u32, E>
where
    E: From<Error>,
{
    let mut applied = 0;
    loop {
        let version = file_version(value)?;
        if version >= FILE_SCHEMA_VERSION {
            break;
        }

        let step = MIGRATIONS
            .iter()
            .find(|step| step.from == version)
            .ok_or(Error::UnsupportedSchema(version))?;
        info!(
            "upgrade database from schema {} to {}: {}",
            version,
            version + 1,
            step.summary
        );
        (step.apply)(value, layout)?;
        set_file_version(value, version + 1)?;
        persist(value)?;
        applied += 1;
    }

    Ok(applied)
}

fn set_file_version(value: &mut Value, version: u32) -> Result<()> {
    let slot = value
        .pointer_mut("/version/file_schema_version")
        .ok_or_else(|| Error::Malformed("missing file_schema_version".into()))?;
    *slot = Value::from(version);
    Ok(())
}

fn programs_mut(value: &mut Value) -> Result<impl Iterator<Item = &mut Map<String, Value>>> {
    let programs = value
        .get_mut("programs")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| Error::Malformed("missing programs".into()))?;

    Ok(programs.values_mut().filter_map(Value::as_object_mut))
}

fn options_mut(value: &mut Value) -> Result<&mut Map<String, Value>> {
    let root = value
        .as_object_mut()
        .ok_or_else(|| Error::Malformed("database is not an object".into()))?;

    root.entry("options")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| Error::Malformed("options is not an object".into()))
}

fn add_update_url(value: &mut Value, _: &Layout) -> Result<()> {
    for program in programs_mut(value)? {
        program.entry("update_url").or_insert(Value::Null);
    }
    Ok(())
}

fn add_path_and_binlinks(value: &mut Value, _: &Layout) -> Result<()> {
    for program in programs_mut(value)? {
        program.entry("has_path").or_insert(Value::Bool(false));
        program
            .entry("binlinks")
            .or_insert_with(|| Value::Array(Vec::new()));
    }
    Ok(())
}

fn add_update_url_programs_option(value: &mut Value, _: &Layout) -> Result<()> {
    options_mut(value)?.insert("UpdateURLPrograms".into(), Value::Bool(false));
    Ok(())
}

fn add_press_enter_key_option(value: &mut Value, _: &Layout) -> Result<()> {
    options_mut(value)?.insert("PressEnterKey".into(), Value::Bool(true));
    Ok(())
}

fn convert_install_type(value: &mut Value, _: &Layout) -> Result<()> {
    for program in programs_mut(value)? {
        match program.remove("git_installed") {
            Some(flag) => {
                let install_type = if flag.as_bool().unwrap_or(false) {
                    "git"
                } else {
                    "default"
                };
                program.insert("install_type".into(), Value::from(install_type));
            }
            None => {
                program
                    .entry("install_type")
                    .or_insert_with(|| Value::from("default"));
            }
        }
    }
    Ok(())
}

fn add_warn_missing_deps_option(value: &mut Value, _: &Layout) -> Result<()> {
    options_mut(value)?.insert("WarnMissingDeps".into(), Value::Bool(true));
    Ok(())
}

fn relocate_desktop_files(value: &mut Value, layout: &Layout) -> Result<()> {
    let target_dir = layout.applications_dir().to_path_buf();
    create_dir_all(&target_dir).map_err(|err| Error::Io {
        source: err,
        path: target_dir.clone(),
    })?;

    let legacy_dir = layout.legacy_applications_dir();
    let mut desktops = Vec::new();
    for program in programs_mut(value)? {
        if let Some(owned) = program.get("desktops").and_then(Value::as_array) {
            desktops.extend(owned.iter().filter_map(Value::as_str).map(str::to_owned));
        }
    }

    for desktop in desktops {
        let legacy = legacy_dir.join(format!("{desktop}.desktop"));
        let relocated = layout.desktop_file(&desktop);
        if legacy.exists() {
            debug!("move {} into {}", desktop, target_dir.display());
            std::fs::rename(&legacy, &relocated).map_err(|err| Error::Io {
                source: err,
                path: legacy.clone(),
            })?;
        } else if relocated.exists() {
            debug!("{desktop} already relocated");
        }
    }

    Ok(())
}

fn delete_legacy_version_file(_: &mut Value, layout: &Layout) -> Result<()> {
    let path = layout.legacy_version_file();
    crate::layout::remove_file_if_exists(&path).map_err(|err| Error::Io { source: err, path })
}

fn add_update_archive_type(value: &mut Value, _: &Layout) -> Result<()> {
    for program in programs_mut(value)? {
        program.entry("update_archive_type").or_insert(Value::Null);
    }
    Ok(())
}

/// Migration error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No migration step exists for stored schema version.
    #[error("database schema version {0} is too old to upgrade")]
    UnsupportedSchema(u32),

    /// Raw database tree lacks required structure.
    #[error("malformed database: {0}")]
    Malformed(String),

    /// File operation of a migration step failed.
    #[error("migration failed at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sandbox() -> anyhow::Result<(tempfile::TempDir, Layout)> {
        let tmp = tempfile::tempdir()?;
        let layout = Layout::new(
            tmp.path().join("root"),
            tmp.path().join("share/applications/hoard"),
            tmp.path().join("tmp"),
        );
        create_dir_all(layout.root())?;
        create_dir_all(layout.legacy_applications_dir())?;
        Ok((tmp, layout))
    }

    fn schema(version: u32, programs: Value) -> Value {
        json!({
            "options": { "Verbose": false },
            "version": {
                "file_schema_version": version,
                "program_schema_version": 1,
                "branch": "master"
            },
            "programs": programs
        })
    }

    fn apply_one(value: &mut Value, layout: &Layout) -> anyhow::Result<()> {
        let version = file_version(value)?;
        let step = MIGRATIONS
            .iter()
            .find(|step| step.from == version)
            .ok_or(Error::UnsupportedSchema(version))?;
        (step.apply)(value, layout)?;
        Ok(())
    }

    #[test]
    fn steps_are_contiguous() {
        for (index, step) in MIGRATIONS.iter().enumerate() {
            assert_eq!(step.from, MIGRATIONS[0].from + index as u32);
        }
        assert_eq!(MIGRATIONS.last().map(|step| step.from + 1), Some(FILE_SCHEMA_VERSION));
    }

    #[test]
    fn git_flag_becomes_install_type() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        let mut value = schema(
            15,
            json!({
                "a": { "git_installed": true },
                "b": { "git_installed": false }
            }),
        );

        apply_one(&mut value, &layout)?;
        assert_eq!(value["programs"]["a"], json!({ "install_type": "git" }));
        assert_eq!(value["programs"]["b"], json!({ "install_type": "default" }));
        Ok(())
    }

    #[test]
    fn desktop_relocation_skips_moved_files() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        let legacy = layout.legacy_applications_dir();
        std::fs::write(legacy.join("run-a.desktop"), "[Desktop Entry]")?;
        create_dir_all(layout.applications_dir())?;
        std::fs::write(layout.desktop_file("run-b"), "[Desktop Entry]")?;

        let mut value = schema(
            17,
            json!({
                "a": { "desktops": ["run-a"] },
                "b": { "desktops": ["run-b"] }
            }),
        );
        apply_one(&mut value, &layout)?;

        assert!(!legacy.join("run-a.desktop").exists());
        assert!(layout.desktop_file("run-a").exists());
        assert!(layout.desktop_file("run-b").exists());
        Ok(())
    }

    #[test]
    fn full_upgrade_persists_every_step() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        std::fs::write(layout.legacy_version_file(), "{}")?;
        let mut value = schema(
            11,
            json!({
                "tool": { "git_installed": true, "desktops": [], "post_upgrade_script": null }
            }),
        );

        let mut persisted = Vec::new();
        let applied = run::<Error>(&mut value, &layout, |value| {
            persisted.push(file_version(value)?);
            Ok(())
        })?;

        assert_eq!(applied, 9);
        assert_eq!(persisted, (12..=20).collect::<Vec<_>>());
        assert!(!layout.legacy_version_file().exists());
        assert_eq!(
            value["programs"]["tool"],
            json!({
                "install_type": "git",
                "desktops": [],
                "post_upgrade_script": null,
                "update_url": null,
                "has_path": false,
                "binlinks": [],
                "update_archive_type": null
            })
        );
        assert_eq!(value["options"]["UpdateURLPrograms"], json!(false));
        assert_eq!(value["options"]["PressEnterKey"], json!(true));
        assert_eq!(value["options"]["WarnMissingDeps"], json!(true));
        Ok(())
    }

    #[test]
    fn current_schema_is_left_alone() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        let mut value = schema(FILE_SCHEMA_VERSION, json!({}));
        let before = value.clone();

        let applied = run::<Error>(&mut value, &layout, |_| panic!("nothing to persist"))?;
        assert_eq!(applied, 0);
        assert_eq!(value, before);
        Ok(())
    }

    #[test]
    fn ancient_schema_is_unsupported() -> anyhow::Result<()> {
        let (_tmp, layout) = sandbox()?;
        let mut value = schema(3, json!({}));
        let result = run::<Error>(&mut value, &layout, |_| Ok(()));
        assert!(matches!(result, Err(Error::UnsupportedSchema(3))));
        Ok(())
    }
}
