// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{RepoFixture, Sandbox};

use anyhow::Result;
use hoard::{
    shell::LineMatch, Added, ArchiveKind, DesktopCreated, DesktopEntry, InstallError, InstallType,
    LifecycleError, OpenOptions, OptionKey, Quiet, Renamed, Store, StoreError, UpdateStatus,
};
use pretty_assertions::assert_eq;
use std::{
    fs::{read_to_string, remove_file, write},
    path::Path,
};

fn fresh_store(sandbox: &Sandbox) -> Result<Store<Quiet>> {
    Ok(Store::create(sandbox.layout(), Quiet, OpenOptions::default())?)
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[test]
fn install_archive_with_folder() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball(
        "pkg",
        true,
        &[("run.sh", "echo run\n"), ("share/data.txt", "data\n")],
    )?;

    let name = store.install(&archive.display().to_string(), None, None)?;
    assert_eq!(name, "pkg");

    let dir = sandbox.layout().program_dir("pkg");
    assert_eq!(read_to_string(dir.join("run.sh"))?, "echo run\n");
    assert!(dir.join("share/data.txt").is_file());

    let record = store.registry().program("pkg").cloned().unwrap_or_default();
    assert_eq!(record.install_type, InstallType::Default);
    assert!(!record.has_path);
    assert!(!sandbox.layout().scratch_dir().exists());
    Ok(())
}

#[test]
fn install_archive_without_folder() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("solo", false, &[("solo.sh", "echo solo\n")])?;

    store.install(&archive.display().to_string(), None, None)?;
    assert!(sandbox.layout().program_dir("solo").join("solo.sh").is_file());
    Ok(())
}

#[test]
fn pathify_is_visible_to_fuzzy_check() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo run\n")])?;
    store.install(&archive.display().to_string(), None, None)?;

    assert_eq!(store.pathify("pkg")?, Added::Added);
    assert_eq!(store.pathify("pkg")?, Added::AlreadyThere);

    let dir = sandbox.layout().program_dir("pkg").display().to_string();
    for shell_file in sandbox.layout().shell_files() {
        assert!(shell_file.check_line(&dir, LineMatch::Fuzzy)?);
        assert!(shell_file.check_line("pkg", LineMatch::Owner)?);
    }
    let bashrc = read_to_string(sandbox.layout().bashrc().path())?;
    assert_eq!(bashrc.matches("# pkg").count(), 1);
    Ok(())
}

#[test]
fn uninstall_twice_reports_not_installed() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo run\n")])?;
    store.install(&archive.display().to_string(), None, None)?;
    store.pathify("pkg")?;
    store.add_binlink("pkg", "run.sh")?;
    store.create_desktop("pkg", &DesktopEntry::new("Package", "run.sh"))?;

    store.uninstall("pkg")?;
    assert!(!sandbox.layout().program_dir("pkg").exists());
    assert!(!sandbox.layout().desktop_file("run.sh-pkg").exists());
    for shell_file in sandbox.layout().shell_files() {
        assert!(!shell_file.check_line("pkg", LineMatch::Owner)?);
    }
    assert_eq!(store.list_programs(), Vec::<String>::new());

    assert!(matches!(
        store.uninstall("pkg"),
        Err(LifecycleError::NotInstalled(_))
    ));
    Ok(())
}

#[test]
fn rename_moves_everything_or_nothing() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    for name in ["pkg", "other"] {
        let archive = sandbox.tarball(name, true, &[("run.sh", "echo run\n")])?;
        store.install(&archive.display().to_string(), None, None)?;
    }
    store.pathify("pkg")?;
    store.pathify("other")?;

    assert_eq!(store.rename("pkg", "other")?, Renamed::NameTaken);
    assert!(sandbox.layout().program_dir("pkg").exists());

    assert_eq!(store.rename("pkg", "tool")?, Renamed::Renamed);
    assert!(sandbox.layout().program_dir("tool").join("run.sh").is_file());
    assert!(!sandbox.layout().program_dir("pkg").exists());
    assert_eq!(store.list_programs(), vec!["other".to_string(), "tool".to_string()]);

    let bin = sandbox.layout().bin_dir().display().to_string();
    let bashrc = read_to_string(sandbox.layout().bashrc().path())?;
    assert!(bashrc.contains(&format!("export PATH=$PATH:{bin}/tool # tool")));
    assert!(bashrc.contains(&format!("export PATH=$PATH:{bin}/other # other")));
    assert!(!bashrc.contains("# pkg"));
    Ok(())
}

#[test]
fn collision_without_decision_changes_nothing() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo one\n")])?;
    let input = archive.display().to_string();
    store.install(&input, None, None)?;
    store.pathify("pkg")?;
    let before = store.registry().clone();

    assert!(matches!(
        store.install(&input, None, None),
        Err(InstallError::AlreadyExists(_))
    ));
    assert_eq!(store.registry(), &before);
    assert_eq!(
        read_to_string(sandbox.layout().program_dir("pkg").join("run.sh"))?,
        "echo one\n"
    );
    Ok(())
}

#[test]
fn reinstall_starts_from_scratch() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("old.sh", "echo old\n")])?;
    store.install(&archive.display().to_string(), None, None)?;
    store.pathify("pkg")?;

    remove_file(&archive)?;
    let archive = sandbox.tarball("pkg", true, &[("new.sh", "echo new\n")])?;
    store.install(&archive.display().to_string(), None, Some(false))?;

    let dir = sandbox.layout().program_dir("pkg");
    assert!(dir.join("new.sh").is_file());
    assert!(!dir.join("old.sh").exists());
    let record = store.registry().program("pkg").cloned().unwrap_or_default();
    assert!(!record.has_path);
    assert!(!sandbox.layout().bashrc().check_line("pkg", LineMatch::Owner)?);
    Ok(())
}

#[test]
fn repair_rebuilds_lost_database() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo run\n"), ("lib.sh", "\n")])?;
    store.install(&archive.display().to_string(), None, None)?;
    store.pathify("pkg")?;
    store.set_update_url("pkg", "https://example.org/pkg.tar.gz", None)?;
    drop(store);

    remove_file(sandbox.layout().database())?;
    assert!(matches!(
        Store::open(sandbox.layout(), Quiet, OpenOptions::default()),
        Err(StoreError::DatabaseBroken { .. })
    ));

    let options = OpenOptions {
        repair: true,
        ..Default::default()
    };
    let store = Store::open(sandbox.layout(), Quiet, options)?;
    let record = store.registry().program("pkg").cloned().unwrap_or_default();
    assert_eq!(record.install_type, InstallType::Default);
    assert!(record.has_path);
    assert_eq!(record.update_url, None);
    assert_eq!(record.post_upgrade_script, None);
    Ok(())
}

#[test]
fn git_install_then_update() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let upstream = RepoFixture::new(sandbox.path().join("tool.git"))?;
    upstream.stage_and_commit("run.sh", "echo one\n")?;

    let mut store = fresh_store(&sandbox)?;
    let name = store.install(&upstream.url(), None, None)?;
    assert_eq!(name, "tool");
    let record = store.registry().program("tool").cloned().unwrap_or_default();
    assert_eq!(record.install_type, InstallType::Git);

    assert_eq!(store.update("tool")?, UpdateStatus::NoUpdate);
    upstream.stage_and_commit("run.sh", "echo two\n")?;
    assert_eq!(store.update("tool")?, UpdateStatus::Success);
    assert_eq!(
        read_to_string(sandbox.layout().program_dir("tool").join("run.sh"))?,
        "echo two\n"
    );
    Ok(())
}

#[test]
fn store_survives_reopen() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo run\n")])?;
    store.install(&archive.display().to_string(), None, None)?;
    store.add_binlink("pkg", "run.sh")?;
    drop(store);

    let store = Store::open(sandbox.layout(), Quiet, OpenOptions::default())?;
    let record = store.registry().program("pkg").cloned().unwrap_or_default();
    assert_eq!(record.binlinks, vec!["run.sh".to_string()]);
    Ok(())
}

#[test]
fn remote_archive_remembers_update_url() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo run\n")])?;
    let url = file_url(&archive);

    assert!(matches!(
        store.install(&url, None, None),
        Err(InstallError::NeedsName(_))
    ));
    assert_eq!(store.install(&url, Some("pkg"), None)?, "pkg");

    let dir = sandbox.layout().program_dir("pkg");
    assert_eq!(read_to_string(dir.join("run.sh"))?, "echo run\n");
    assert!(archive.is_file());

    let record = store.registry().program("pkg").cloned().unwrap_or_default();
    assert_eq!(record.install_type, InstallType::Default);
    assert_eq!(record.update_url, Some(url));
    assert_eq!(record.update_archive_type, Some(ArchiveKind::TarGz));
    Ok(())
}

#[test]
fn update_refetches_and_keeps_configuration() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo one\n"), ("notes", "mine\n")])?;
    let url = file_url(&archive);
    store.install(&url, Some("pkg"), None)?;
    store.pathify("pkg")?;
    store.add_binlink("pkg", "run.sh")?;
    let before = store.registry().program("pkg").cloned();

    sandbox.tarball("pkg", true, &[("run.sh", "echo two\n"), ("new.sh", "echo new\n")])?;
    assert_eq!(store.update("pkg")?, UpdateStatus::Success);

    let dir = sandbox.layout().program_dir("pkg");
    assert_eq!(read_to_string(dir.join("run.sh"))?, "echo two\n");
    assert!(dir.join("new.sh").is_file());
    assert!(dir.join("notes").is_file());
    assert_eq!(store.registry().program("pkg").cloned(), before);

    for shell_file in sandbox.layout().shell_files() {
        assert!(shell_file.check_line("pkg", LineMatch::Owner)?);
    }
    assert_eq!(store.pathify("pkg")?, Added::AlreadyThere);
    Ok(())
}

#[test]
fn sweep_refetches_url_programs_when_asked() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("run.sh", "echo one\n")])?;
    store.install(&file_url(&archive), Some("pkg"), None)?;
    sandbox.tarball("pkg", true, &[("run.sh", "echo two\n")])?;

    let statuses = store.update_all()?;
    assert!(matches!(statuses["pkg"], Ok(UpdateStatus::DoesNotUpdate)));

    assert!(store.flip_option(OptionKey::UpdateUrlPrograms)?);
    let statuses = store.update_all()?;
    assert!(matches!(statuses["pkg"], Ok(UpdateStatus::Success)));
    assert_eq!(
        read_to_string(sandbox.layout().program_dir("pkg").join("run.sh"))?,
        "echo two\n"
    );
    Ok(())
}

#[test]
fn merge_reinstall_keeps_files_and_drops_integration() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let archive = sandbox.tarball("pkg", true, &[("old.sh", "echo old\n")])?;
    store.install(&archive.display().to_string(), None, None)?;
    store.pathify("pkg")?;
    store.create_desktop("pkg", &DesktopEntry::new("Package", "old.sh"))?;

    remove_file(&archive)?;
    let archive = sandbox.tarball("pkg", true, &[("new.sh", "echo new\n")])?;
    store.install(&archive.display().to_string(), None, Some(true))?;

    let dir = sandbox.layout().program_dir("pkg");
    assert!(dir.join("old.sh").is_file());
    assert!(dir.join("new.sh").is_file());
    assert!(!sandbox.layout().desktop_file("old.sh-pkg").exists());

    assert_eq!(store.pathify("pkg")?, Added::Added);
    let bashrc = read_to_string(sandbox.layout().bashrc().path())?;
    assert_eq!(bashrc.matches("# pkg").count(), 1);
    Ok(())
}

#[test]
fn merge_reinstall_of_single_file() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let mut store = fresh_store(&sandbox)?;
    let script = sandbox.path().join("hello.sh");
    write(&script, "echo one\n")?;
    store.install(&script.display().to_string(), None, None)?;
    store.pathify("hello")?;
    store.add_binlink("hello", "hello")?;
    store.create_desktop("hello", &DesktopEntry::new("Hello", "hello"))?;

    write(&script, "echo two\n")?;
    store.install(&script.display().to_string(), None, Some(true))?;
    assert_eq!(
        read_to_string(sandbox.layout().program_dir("hello").join("hello"))?,
        "echo two\n"
    );
    assert!(!sandbox.layout().desktop_file("hello-hello").exists());
    for shell_file in sandbox.layout().shell_files() {
        assert!(!shell_file.check_line("hello", LineMatch::Owner)?);
    }

    store.pathify("hello")?;
    let entry = DesktopEntry::new("Hello", "hello");
    assert_eq!(store.create_desktop("hello", &entry)?, DesktopCreated::Created);
    let bashrc = read_to_string(sandbox.layout().bashrc().path())?;
    assert_eq!(bashrc.matches("# hello").count(), 1);

    store.uninstall("hello")?;
    assert!(!sandbox.layout().desktop_file("hello-hello").exists());
    Ok(())
}
