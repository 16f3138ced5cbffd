//! Run progress on stderr.
//!
//! TTY: one spinner line per run, updated as responses arrive.
//! Non-TTY: hidden; the info log lines carry the progress instead.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Detects whether stderr is a terminal
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    pub fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Spinner line labelled `name`; a hidden bar off-TTY
    pub fn run_line(&self, name: &str) -> RunLine {
        if !self.is_tty {
            return RunLine(ProgressBar::hidden());
        }
        let pb = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {prefix:<12.cyan.bold} {wide_msg}") {
            pb.set_style(style);
        }
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        RunLine(pb)
    }

    /// Print above the spinner when one is active
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// For the log bridge
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedProgress = Arc<ProgressContext>;

/// Spinner for one scraper run
#[derive(Clone)]
pub struct RunLine(ProgressBar);

impl RunLine {
    pub fn update(&self, responses: usize, records: usize) {
        self.0.set_message(format!(
            "{} responses, {} records",
            fmt_num(responses),
            fmt_num(records)
        ));
    }

    pub fn finish(&self, summary: &str) {
        self.0.finish_with_message(summary.to_string());
    }
}

/// Thousands separators: 1234567 → "1,234,567"
pub fn fmt_num(n: usize) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.char_indices() {
        if i > 0 && (i + 3 - head) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
