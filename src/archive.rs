// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Supported archive kinds and the external extractors that unpack them.

use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    str::FromStr,
};

/// Archive kind recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ArchiveKind {
    #[serde(rename = ".tar.gz")]
    TarGz,

    #[serde(rename = ".tar.xz")]
    TarXz,

    #[serde(rename = ".zip")]
    Zip,

    #[serde(rename = ".7z")]
    SevenZip,

    #[serde(rename = ".rar")]
    Rar,
}

impl ArchiveKind {
    /// Every supported archive kind.
    pub const ALL: [ArchiveKind; 5] = [
        Self::TarGz,
        Self::TarXz,
        Self::Zip,
        Self::SevenZip,
        Self::Rar,
    ];

    /// Determine archive kind from extension as returned by
    /// [`extension`](crate::path::extension).
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension() == extension)
    }

    /// Extension including leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::TarGz => ".tar.gz",
            Self::TarXz => ".tar.xz",
            Self::Zip => ".zip",
            Self::SevenZip => ".7z",
            Self::Rar => ".rar",
        }
    }

    /// Name of binary that extracts this kind of archive.
    pub fn extractor(&self) -> &'static str {
        match self {
            Self::TarGz | Self::TarXz => "tar",
            Self::Zip => "unzip",
            Self::SevenZip => "7z",
            Self::Rar => "unrar",
        }
    }

    /// Arguments for extractor to unpack archive into destination.
    pub fn extract_args(&self, archive: &Path, dest: &Path, verbose: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match self {
            Self::TarGz | Self::TarXz => {
                args.push(if verbose { "-xvf" } else { "-xf" }.into());
                args.push(archive.into());
                args.push("-C".into());
                args.push(dest.into());
            }
            Self::Zip => {
                if !verbose {
                    args.push("-qq".into());
                }
                args.push(archive.into());
                args.push("-d".into());
                args.push(dest.into());
            }
            Self::SevenZip => {
                args.push("x".into());
                if !verbose {
                    args.extend(["-bb0", "-bso0", "-bd"].map(OsString::from));
                }
                args.push(archive.into());
                let mut out = OsString::from("-o");
                out.push(dest);
                args.push(out);
            }
            Self::Rar => {
                args.push("x".into());
                if !verbose {
                    args.push("-idcdpq".into());
                }
                args.push(archive.into());
                let mut out = dest.as_os_str().to_owned();
                out.push("/");
                args.push(out);
            }
        }

        args
    }
}

impl Display for ArchiveKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.extension())
    }
}

impl FromStr for ArchiveKind {
    type Err = UnsupportedArchive;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = if data.starts_with('.') {
            data.to_string()
        } else {
            format!(".{data}")
        };
        Self::from_extension(&data).ok_or(UnsupportedArchive(data))
    }
}

/// Archive extension is not one hoard can extract.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unsupported archive type {0:?}")]
pub struct UnsupportedArchive(pub String);
