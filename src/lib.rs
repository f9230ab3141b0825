// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Personal package manager for user-space programs.
//!
//! Hoard installs archives, directories, single executables, and git
//! repositories into a private managed root, then wires them into the user's
//! shell and desktop menu on request. Everything it does is recorded in a
//! persisted database, so every change can be undone or rebuilt later.
//!
//! # Managed Programs
//!
//! A __program__ is whatever lives in one directory under the bin root of the
//! managed root. Programs are addressed by name, and every shell line that
//! hoard writes for a program ends with an ownership tag naming it:
//!
//! ```text
//! export PATH=$PATH:/home/user/.hoard/bin/tool # tool
//! ```
//!
//! Removal by tag is how shell integration gets undone, which is why program
//! names may contain neither spaces nor pound signs.
//!
//! Start with [`Store::create`] or [`Store::open`]. Installs, lifecycle
//! operations, and updates are all methods of [`Store`].

pub mod archive;
pub mod config;
pub mod desktop;
pub mod frontend;
pub mod git;
pub mod install;
pub mod layout;
pub mod lifecycle;
pub mod lock;
pub mod path;
pub mod registry;
pub mod shell;
pub mod store;
pub mod syscall;
pub mod update;

pub use archive::ArchiveKind;
pub use config::{InstallType, OptionKey, OptionValue, ProgramRecord};
pub use desktop::DesktopEntry;
pub use frontend::{Frontend, Quiet, Terminal};
pub use install::{InstallError, InstallSource};
pub use layout::Layout;
pub use lifecycle::{Added, DesktopCreated, LifecycleError, Removed, Renamed};
pub use store::{OpenOptions, Store, StoreError};
pub use update::{UpdateError, UpdateStatus};
