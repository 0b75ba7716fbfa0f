// Terminal progress reporting
// A stderr spinner fed by the status callbacks of the pipeline and engine

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::ingest::StatusFn;

const TICK: Duration = Duration::from_millis(100);

/// Spinner on stderr, hidden unless a person is watching
#[derive(Debug, Clone)]
pub struct Spinner {
    bar: ProgressBar,
}

impl Default for Spinner {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Spinner {
    #[inline]
    pub fn new() -> Self {
        if !console::user_attended_stderr() {
            return Self::hidden();
        }

        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner().with_style(style);
        bar.enable_steady_tick(TICK);
        Self { bar }
    }

    #[inline]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    #[inline]
    pub fn set_message(&self, message: &str) {
        debug!("status: {}", message);
        self.bar.set_message(message.to_string());
    }

    #[inline]
    pub fn message(&self) -> String {
        self.bar.message()
    }

    /// Status callback that updates this spinner
    #[inline]
    pub fn status_fn(&self) -> StatusFn {
        let spinner = self.clone();
        Arc::new(move |message: &str| spinner.set_message(message))
    }

    /// Hide the spinner while `f` writes to the terminal
    #[inline]
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bar.suspend(f)
    }

    #[inline]
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}
