//! Log setup for the CLI.
//!
//! On a terminal, log lines are printed above the run spinner and only
//! warnings show unless `--debug` is given. Elsewhere they go straight to
//! stderr at info level, since they are the only progress output.
//! `RUST_LOG` overrides either default.

use indicatif::MultiProgress;

use crate::progress::ProgressContext;

/// Filter used when `RUST_LOG` is unset
fn default_filter(is_tty: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if is_tty {
        "warn"
    } else {
        "info"
    }
}

/// `[LEVEL] message`, with the target prepended for other crates' records
fn render(record: &log::Record, color: bool) -> String {
    let (label, ansi) = match record.level() {
        log::Level::Error => ("ERROR", "31"),
        log::Level::Warn => ("WARN ", "33"),
        log::Level::Info => ("INFO ", "32"),
        log::Level::Debug => ("DEBUG", "36"),
        log::Level::Trace => ("TRACE", "35"),
    };
    let tag = if color {
        format!("\x1b[{ansi}m{label}\x1b[0m")
    } else {
        label.to_string()
    };
    let target = record.target();
    if target.starts_with("pageloop") {
        format!("[{tag}] {}", record.args())
    } else {
        format!("[{tag}] {target}: {}", record.args())
    }
}

struct SpinnerLogger {
    filter: env_logger::Logger,
    multi: MultiProgress,
}

impl log::Log for SpinnerLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.filter.enabled(record.metadata()) {
            let line = render(record, true);
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {}
}

/// Install the global logger; later calls are no-ops
pub fn init_logging(progress: &ProgressContext, debug: bool) {
    use std::io::Write;

    let env = env_logger::Env::default()
        .default_filter_or(default_filter(progress.is_tty(), debug));
    let mut builder = env_logger::Builder::from_env(env);

    if progress.is_tty() {
        let filter = builder.build();
        let max_level = filter.filter();
        let logger = SpinnerLogger {
            filter,
            multi: progress.multi().clone(),
        };
        if log::set_boxed_logger(Box::new(logger)).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        let _ = builder
            .format(|buf, record| writeln!(buf, "{}", render(record, false)))
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(target: &str, level: log::Level, color: bool) -> String {
        render(
            &log::Record::builder()
                .args(format_args!("3 requests"))
                .level(level)
                .target(target)
                .build(),
            color,
        )
    }

    #[test]
    fn terminal_runs_stay_quiet_unless_debugging() {
        assert_eq!(default_filter(true, false), "warn");
        assert_eq!(default_filter(false, false), "info");
        assert_eq!(default_filter(true, true), "debug");
        assert_eq!(default_filter(false, true), "debug");
    }

    #[test]
    fn own_records_omit_target() {
        assert_eq!(
            line("pageloop_core::scraper", log::Level::Warn, false),
            "[WARN ] 3 requests"
        );
    }

    #[test]
    fn foreign_records_name_their_target() {
        assert_eq!(
            line("reqwest::connect", log::Level::Debug, false),
            "[DEBUG] reqwest::connect: 3 requests"
        );
    }

    #[test]
    fn terminal_lines_are_colored() {
        let rendered = line("pageloop_cli", log::Level::Error, true);
        assert_eq!(rendered, "[\x1b[31mERROR\x1b[0m] 3 requests");
    }
}
