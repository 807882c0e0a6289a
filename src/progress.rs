// src/progress.rs

//! User-facing progress lines
//!
//! Sessions report what they do to the target ("Copying demo", "All changes
//! applied.") through a `Progress` implementation chosen by the CLI:
//! - `ConsoleProgress`: prints to stdout, with an indicatif bar for ticks
//! - `SilentProgress`: no-op for `--quiet` and tests

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use tracing::info;

pub trait Progress {
    /// A complete progress line
    fn message(&self, message: &str);

    /// One unit of work done within the current line
    fn tick(&self);

    /// End the current line of ticks
    fn finish_line(&self);
}

/// Progress printed to stdout; ticks show up as a growing row of dots
#[derive(Default)]
pub struct ConsoleProgress {
    line: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dots_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
    bar.set_style(
        ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar
}

impl Progress for ConsoleProgress {
    fn message(&self, message: &str) {
        self.finish_line();
        info!("{}", message);
        println!("{message}");
    }

    fn tick(&self) {
        let mut line = self.line.lock();
        let bar = line.get_or_insert_with(dots_bar);
        bar.inc(1);
        bar.set_message(".".repeat(bar.position() as usize));
    }

    fn finish_line(&self) {
        if let Some(bar) = self.line.lock().take() {
            bar.finish();
        }
    }
}

impl Drop for ConsoleProgress {
    fn drop(&mut self) {
        self.finish_line();
    }
}

/// Progress that goes nowhere
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl Progress for SilentProgress {
    fn message(&self, _message: &str) {}

    fn tick(&self) {}

    fn finish_line(&self) {}
}
