// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External tool invocation.
//!
//! Hoard leans on existing binaries for extraction, downloads, and merging
//! directories. Every invocation goes through [`Toolbox`], which checks that
//! a tool exists before using it and decides whether its output gets shown.

use std::{
    collections::VecDeque,
    ffi::OsStr,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, instrument};

/// Runs external tools on behalf of hoard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Toolbox {
    verbose: bool,
}

impl Toolbox {
    /// Construct new toolbox.
    ///
    /// Verbose toolboxes let tools write straight to the terminal.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Check if tool output is shown.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Locate tool on `$PATH`.
    ///
    /// # Errors
    ///
    /// - Return [`ToolError::Missing`] if the tool cannot be found.
    pub fn require(&self, tool: &str) -> Result<PathBuf> {
        which::which(tool).map_err(|_| ToolError::Missing(tool.into()))
    }

    /// Check if tool is on `$PATH`.
    pub fn has(&self, tool: &str) -> bool {
        self.require(tool).is_ok()
    }

    /// Run tool to completion.
    ///
    /// Output is captured and returned unless the toolbox is verbose, in which
    /// case it goes to the terminal and an empty string is returned.
    ///
    /// # Errors
    ///
    /// - Return [`ToolError::Missing`] if the tool cannot be found.
    /// - Return [`ToolError::Spawn`] if the tool cannot be started.
    /// - Return [`ToolError::Failed`] if the tool exits unsuccessfully.
    #[instrument(skip(self, args), level = "debug")]
    pub fn run(
        &self,
        tool: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
        cwd: Option<&Path>,
    ) -> Result<String> {
        let mut command = self.command(tool, args, cwd)?;

        if self.verbose {
            let status = command.status().map_err(|err| ToolError::spawn(tool, err))?;
            if !status.success() {
                return Err(ToolError::Failed {
                    tool: tool.into(),
                    message: format!("exited with {status}"),
                });
            }
            return Ok(String::new());
        }

        let output = command.output().map_err(|err| ToolError::spawn(tool, err))?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
        let mut message = String::new();

        if !stdout.is_empty() {
            message.push_str(format!("stdout: {stdout}").as_str());
        }

        if !stderr.is_empty() {
            message.push_str(format!("stderr: {stderr}").as_str());
        }

        // INVARIANT: Chomp trailing newlines.
        let message = message
            .strip_suffix("\r\n")
            .or(message.strip_suffix('\n'))
            .map(ToString::to_string)
            .unwrap_or(message);

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: tool.into(),
                message,
            });
        }

        debug!("{tool} finished");
        Ok(message)
    }

    /// Run tool while reporting the percentages it prints.
    ///
    /// Every line the tool writes is scanned for a trailing percentage in the
    /// style of `wget`, which gets passed to `on_percent`. Verbose toolboxes
    /// pass output through untouched and never report progress.
    ///
    /// # Errors
    ///
    /// - Return [`ToolError::Missing`] if the tool cannot be found.
    /// - Return [`ToolError::Spawn`] if the tool cannot be started.
    /// - Return [`ToolError::Failed`] if the tool exits unsuccessfully.
    #[instrument(skip(self, args, on_percent), level = "debug")]
    pub fn run_with_progress(
        &self,
        tool: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
        cwd: Option<&Path>,
        mut on_percent: impl FnMut(u8),
    ) -> Result<()> {
        if self.verbose {
            return self.run(tool, args, cwd).map(|_| ());
        }

        let mut command = self.command(tool, args, cwd)?;
        let mut child = command
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ToolError::spawn(tool, err))?;

        // Keep the tail of the output around for error reporting.
        let mut tail = VecDeque::with_capacity(8);
        if let Some(stderr) = child.stderr.take() {
            for line in BufReader::new(stderr).split(b'\n').map_while(|line| line.ok()) {
                let line = String::from_utf8_lossy(&line).into_owned();
                if let Some(percent) = parse_percent(&line) {
                    on_percent(percent);
                }
                if tail.len() == 8 {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child.wait().map_err(|err| ToolError::spawn(tool, err))?;
        if !status.success() {
            let message = Vec::from(tail).join("\n");
            return Err(ToolError::Failed {
                tool: tool.into(),
                message,
            });
        }

        Ok(())
    }

    fn command(
        &self,
        tool: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
        cwd: Option<&Path>,
    ) -> Result<Command> {
        let bin = self.require(tool)?;
        let mut command = Command::new(bin);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        Ok(command)
    }
}

/// Extract percentage from progress line of a download tool.
///
/// Takes the (at most two digit) number right before the last `%` sign.
/// Zero is not a useful progress report and is treated as no report.
pub fn parse_percent(line: &str) -> Option<u8> {
    let index = line.rfind('%')?;
    let start = line[..index]
        .char_indices()
        .rev()
        .nth(1)
        .map_or(0, |(start, _)| start);
    let percent: u8 = line[start..index].trim().parse().ok()?;

    (percent > 0).then_some(percent)
}

/// External tool error types.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Tool is not installed.
    #[error("required tool {0:?} is not installed")]
    Missing(String),

    /// Tool could not be started.
    #[error("failed to run {tool:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        tool: String,
    },

    /// Tool ran but reported failure.
    #[error("command {tool:?} failed:\n{message}")]
    Failed { tool: String, message: String },
}

impl ToolError {
    fn spawn(tool: &str, source: std::io::Error) -> Self {
        Self::Spawn {
            source,
            tool: tool.into(),
        }
    }
}

/// Friendly result alias :3
type Result<T, E = ToolError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("     0K .......... .......... 45% 1.2M 1s", Some(45); "two digit")]
    #[test_case("   100K .......... .......... 7% 1.2M 1s", Some(7); "one digit")]
    #[test_case("  5000K .......... .......... 100% 9M=0.4s", None; "hundred reads as zero")]
    #[test_case("     0K .......... 0% 1.2M", None; "zero")]
    #[test_case("Resolving example.com... 93.184.216.34", None; "no percent")]
    #[test]
    fn parse_wget_percent(line: &str, expect: Option<u8>) {
        use pretty_assertions::assert_eq;
        assert_eq!(parse_percent(line), expect);
    }

    #[test]
    fn missing_tool_is_reported() {
        let toolbox = Toolbox::new(false);
        let result = toolbox.run("hoard-no-such-tool", ["--help"], None);
        assert!(matches!(result, Err(ToolError::Missing(tool)) if tool == "hoard-no-such-tool"));
    }

    #[test]
    fn captured_output_and_failure() -> anyhow::Result<()> {
        let toolbox = Toolbox::new(false);
        let output = toolbox.run("sh", ["-c", "echo hello"], None)?;
        assert_eq!(output, "stdout: hello");

        let result = toolbox.run("sh", ["-c", "echo nope >&2; exit 3"], None);
        assert!(matches!(result, Err(ToolError::Failed { message, .. }) if message == "stderr: nope"));
        Ok(())
    }

    #[test]
    fn progress_is_reported_per_line() -> anyhow::Result<()> {
        let toolbox = Toolbox::new(false);
        let mut seen = Vec::new();
        toolbox.run_with_progress(
            "sh",
            ["-c", "echo ' 10%' >&2; echo 'junk' >&2; echo '.. 55% 1M' >&2"],
            None,
            |percent| seen.push(percent),
        )?;
        assert_eq!(seen, vec![10, 55]);
        Ok(())
    }
}
