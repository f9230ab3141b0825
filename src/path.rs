// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for the files and directories that
//! hoard manages, and derive program names from the archives, directories, and
//! URLs that the user hands us.
//!
//! # Program Names
//!
//! Every program gets an internal name that doubles as the name of its
//! directory in the bin root, and as the ownership tag of every shell line
//! generated for it. The name is derived from the last path component with
//! the recognized extension stripped off. Thus, "/some/dir/config.tar.gz" is
//! installed as "config".

use std::path::{Component, Path, PathBuf};

/// Extensions that span more than one dot, checked before anything else.
const MULTI_PART_EXTENSIONS: [&str; 2] = [".tar.gz", ".tar.xz"];

/// Four character extensions.
const SHORT_EXTENSIONS: [&str; 3] = [".zip", ".rar", ".git"];

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the managed root.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_root_dir() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".hoard"))
}

/// Determine default absolute path to the directory holding desktop entries.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/applications/hoard`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_applications_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("applications").join("hoard"))
        .ok_or(NoWayHome)
}

/// Get extension of a file name, URL, or path.
///
/// Recognizes ".7z", ".zip", ".rar", ".git", ".tar.gz", and ".tar.xz" case
/// insensitively. Anything else falls back to everything after the last dot,
/// or an empty string if there is no dot at all.
pub fn extension(path: &str) -> String {
    let lower = path.to_ascii_lowercase();

    if lower.ends_with(".7z") {
        return ".7z".into();
    }

    for ext in SHORT_EXTENSIONS.iter().chain(MULTI_PART_EXTENSIONS.iter()) {
        if lower.ends_with(ext) {
            return path[path.len() - ext.len()..].to_string();
        }
    }

    match path.rfind('.') {
        Some(index) => path[index..].to_string(),
        None => String::new(),
    }
}

/// Get internal program name from path to an archive, file, or URL.
///
/// Strips every directory component and the detected extension.
pub fn name_from_archive_path(path: &str) -> String {
    let file_name = match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    };
    let extension = extension(file_name);

    file_name[..file_name.len() - extension.len()].to_string()
}

/// Get internal program name from path to a directory.
///
/// Trailing slashes are ignored. The final path segment is treated as if it
/// carried a ".tar.gz" suffix, so dots inside a directory name survive.
pub fn name_from_directory_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    name_from_archive_path(&format!("{trimmed}.tar.gz"))
}

/// Check if name contains characters reserved by shell file records.
///
/// Spaces split shell lines into words, and pound signs start the ownership
/// tag. Either one in a program name would corrupt removal by tag.
pub fn has_forbidden_chars(name: &str) -> bool {
    name.contains(' ') || name.contains('#')
}

/// Expand path into absolute form.
///
/// Performs tilde and environment variable expansion, makes the path absolute
/// relative to the current working directory, and lexically resolves any "."
/// or ".." components. Symbolic links are left alone.
///
/// # Errors
///
/// - Return [`PathError::Expansion`] if an environment variable is undefined.
/// - Return [`PathError::CurrentDir`] if current working directory is
///   inaccessible.
pub fn expand_path(path: impl AsRef<str>) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(path.as_ref())?;
    let expanded = Path::new(expanded.as_ref());
    let absolute = if expanded.is_absolute() {
        expanded.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(PathError::CurrentDir)?
            .join(expanded)
    };

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }

    Ok(resolved)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Path expansion error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Shell expansion failed.
    #[error(transparent)]
    Expansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Current working directory cannot be determined.
    #[error("cannot determine current working directory")]
    CurrentDir(#[source] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case("weeeeee.zip", ".zip"; "zip")]
    #[test_case("asdf.tar.gz", ".tar.gz"; "tar gz")]
    #[test_case("aconfig.7z", ".7z"; "seven zip")]
    #[test_case("this_is_a_file.that.is.cool.tar.xz", ".tar.xz"; "tar xz with dots")]
    #[test_case("https://example.org/tool.git", ".git"; "git url")]
    #[test_case("LOUD.ZIP", ".ZIP"; "upper case")]
    #[test_case("script.sh", ".sh"; "fallback")]
    #[test_case("noext", ""; "no extension")]
    #[test]
    fn extension_detection(path: &str, expect: &str) {
        use pretty_assertions::assert_eq;
        assert_eq!(extension(path), expect);
    }

    #[test_case("/some/directory/config.tar.gz", "config"; "absolute")]
    #[test_case("~/i/was/home/but/now/im/here.zip", "here"; "tilde")]
    #[test_case("./tar/xz/files/are/pretty/cool.tar.xz", "cool"; "relative")]
    #[test_case("https://github.com/someone/tool.git", "tool"; "git url")]
    #[test_case("package.7z", "package"; "bare file")]
    #[test]
    fn archive_name_derivation(path: &str, expect: &str) {
        use pretty_assertions::assert_eq;
        assert_eq!(name_from_archive_path(path), expect);
    }

    #[test]
    fn archive_name_round_trip() {
        for ext in [".7z", ".zip", ".rar", ".git", ".tar.gz", ".tar.xz"] {
            let path = format!("/opt/stuff/program{ext}");
            assert_eq!(extension(&path), ext);
            assert_eq!(name_from_archive_path(&path), "program");
        }
    }

    #[test]
    fn directory_name_derivation() {
        assert_eq!(name_from_directory_path("/home/me/my.tool/"), "my.tool");
        assert_eq!(name_from_directory_path("relative/dir/"), "dir");
        assert_eq!(name_from_directory_path("plain"), "plain");
    }

    #[test]
    fn forbidden_chars() {
        assert!(!has_forbidden_chars("asdf"));
        assert!(has_forbidden_chars("asdf "));
        assert!(has_forbidden_chars("as#df"));
        for byte in 0x21u8..0x7f {
            let name = format!("a{}b", byte as char);
            assert_eq!(has_forbidden_chars(&name), byte == b'#');
        }
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn expand_path_resolves_tilde_and_dots() -> anyhow::Result<()> {
        assert_eq!(expand_path("~/a/./b/../c")?, PathBuf::from("/home/blah/a/c"));
        assert_eq!(expand_path("/x/y/..")?, PathBuf::from("/x"));
        Ok(())
    }
}
