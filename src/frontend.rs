// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User-facing capabilities.
//!
//! Core operations never talk to the terminal directly. They ask questions,
//! make the user choose, and report progress through a [`Frontend`], and the
//! binary decides what that looks like.

use indicatif::{style::TemplateError, ProgressBar, ProgressStyle};
use inquire::{Select, Text};
use std::{cell::Cell, rc::Rc};
use tracing::debug;

/// Capabilities core operations need from whoever drives them.
pub trait Frontend {
    /// Ask free-form question.
    fn ask(&self, question: &str) -> String;

    /// Make user pick one of the options.
    fn choose(&self, question: &str, options: &[&str]) -> String;

    /// Show overall progress of current operation from 0 to 100.
    fn progress(&self, percent: u8);

    /// Progress bar that prompts from collaborators should suspend.
    fn progress_bar(&self) -> ProgressBar {
        ProgressBar::hidden()
    }

    /// Put away progress display before regular output.
    fn finish(&self) {}
}

/// Interactive terminal frontend.
#[derive(Debug, Clone)]
pub struct Terminal {
    bar: ProgressBar,
}

impl Terminal {
    /// Construct new terminal frontend.
    ///
    /// # Errors
    ///
    /// - Return [`TemplateError`] if progress bar style is invalid.
    pub fn new() -> Result<Self, TemplateError> {
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {pos:>3}%",
        )?
        .progress_chars("-Cco.");
        let bar = ProgressBar::new(100);
        bar.set_style(style);

        Ok(Self { bar })
    }

    /// Label what the progress bar is tracking.
    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }
}

impl Frontend for Terminal {
    fn ask(&self, question: &str) -> String {
        self.bar
            .suspend(|| Text::new(question).prompt())
            .unwrap_or_default()
    }

    fn choose(&self, question: &str, options: &[&str]) -> String {
        self.bar
            .suspend(|| Select::new(question, options.to_vec()).prompt())
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    fn progress(&self, percent: u8) {
        let percent = u64::from(percent.min(100));
        if percent > self.bar.position() {
            self.bar.set_position(percent);
        }
    }

    fn progress_bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Frontend that shows nothing and asks nothing.
///
/// Questions get an empty answer, and choices fall on the first option.
#[derive(Debug, Default, Clone, Copy)]
pub struct Quiet;

impl Frontend for Quiet {
    fn ask(&self, question: &str) -> String {
        debug!("quiet frontend skips question {question:?}");
        String::new()
    }

    fn choose(&self, question: &str, options: &[&str]) -> String {
        debug!("quiet frontend skips choice {question:?}");
        options.first().map(ToString::to_string).unwrap_or_default()
    }

    fn progress(&self, _percent: u8) {}
}

/// Slice of the overall progress range handed to one step of an operation.
///
/// Reports are mapped from the span's local 0 to 100 onto its slice of the
/// overall range. All spans derived from the same root share a high-water
/// mark, so reported progress never goes backwards.
pub struct ProgressSpan<F: Frontend + ?Sized> {
    frontend: Rc<F>,
    start: u8,
    end: u8,
    high: Rc<Cell<u8>>,
}

impl<F: Frontend + ?Sized> ProgressSpan<F> {
    /// Construct span covering the full range.
    pub fn new(frontend: Rc<F>) -> Self {
        Self {
            frontend,
            start: 0,
            end: 100,
            high: Rc::new(Cell::new(0)),
        }
    }

    /// Derive span covering `from` to `to` percent of this one.
    pub fn sub(&self, from: u8, to: u8) -> Self {
        Self {
            frontend: Rc::clone(&self.frontend),
            start: self.map(from),
            end: self.map(to.max(from)),
            high: Rc::clone(&self.high),
        }
    }

    /// Report progress within this span.
    pub fn report(&self, percent: u8) {
        let overall = self.map(percent);
        if overall > self.high.get() {
            self.high.set(overall);
            self.frontend.progress(overall);
        }
    }

    /// Report this span as done.
    pub fn finish(&self) {
        self.report(100);
    }

    fn map(&self, percent: u8) -> u8 {
        let width = u32::from(self.end - self.start);
        let offset = width * u32::from(percent.min(100)) / 100;
        self.start + offset as u8
    }
}

impl<F: Frontend + ?Sized> Clone for ProgressSpan<F> {
    fn clone(&self) -> Self {
        Self {
            frontend: Rc::clone(&self.frontend),
            start: self.start,
            end: self.end,
            high: Rc::clone(&self.high),
        }
    }
}

impl<F: Frontend + ?Sized> std::fmt::Debug for ProgressSpan<F> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("ProgressSpan")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("high", &self.high.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<u8>>);

    impl Frontend for Recorder {
        fn ask(&self, _question: &str) -> String {
            String::new()
        }

        fn choose(&self, _question: &str, options: &[&str]) -> String {
            options[0].to_string()
        }

        fn progress(&self, percent: u8) {
            self.0.borrow_mut().push(percent);
        }
    }

    #[test]
    fn sub_spans_map_onto_parent() {
        let recorder = Rc::new(Recorder::default());
        let root = ProgressSpan::new(Rc::clone(&recorder));
        let fetch = root.sub(10, 60);
        fetch.report(50);
        fetch.finish();
        root.sub(60, 100).sub(50, 100).report(0);
        root.finish();

        assert_eq!(*recorder.0.borrow(), vec![35, 60, 80, 100]);
    }

    #[test]
    fn progress_never_goes_backwards() {
        let recorder = Rc::new(Recorder::default());
        let root = ProgressSpan::new(Rc::clone(&recorder));
        root.report(70);
        root.sub(0, 50).finish();
        root.report(70);
        root.report(71);

        assert_eq!(*recorder.0.borrow(), vec![70, 71]);
    }

    #[test]
    fn quiet_picks_first_choice() {
        assert_eq!(Quiet.choose("pick", &["a", "b"]), "a");
        assert_eq!(Quiet.ask("name?"), "");
    }
}
