//! `pageloop check` - validate a job file, optionally against a saved page

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use pageloop_core::{fmt_num, FixtureDispatcher};

use super::print_summary;
use crate::config::Config;
use crate::job::Job;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the job file
    pub job: PathBuf,

    /// Serve this file as every response instead of touching the network
    #[arg(long)]
    pub sample: Option<PathBuf>,
}

pub fn run(args: CheckArgs, config: &Config) -> Result<()> {
    let job = Job::from_file(&args.job)?;
    let urls = job.urls.len();
    let scraper = job.into_scraper(config)?;
    scraper
        .validate()
        .with_context(|| format!("{} is not runnable", args.job.display()))?;

    let Some(sample) = args.sample else {
        print_summary(
            "Check",
            &[
                ("Job", args.job.display().to_string()),
                ("URL patterns", fmt_num(urls)),
                ("Status", "ok".to_string()),
            ],
        );
        return Ok(());
    };

    let body = std::fs::read_to_string(&sample)
        .with_context(|| format!("failed to read sample {}", sample.display()))?;
    let mut dispatcher = FixtureDispatcher::constant(sample_content_type(&sample), body);
    let (records, summary) = scraper.collect(&mut dispatcher)?;

    for record in records.iter().take(5) {
        println!("{}", serde_json::to_string(record)?);
    }
    print_summary(
        "Check",
        &[
            ("Job", args.job.display().to_string()),
            ("Sample", sample.display().to_string()),
            ("Requests", fmt_num(summary.requests_issued)),
            ("Records", fmt_num(records.len())),
            ("Failures", fmt_num(summary.failures.len())),
        ],
    );
    if let Some(failure) = summary.failures.first() {
        anyhow::bail!("sample did not extract cleanly: {}", failure.reason);
    }
    Ok(())
}

/// Content type from the sample's extension; unknown ones are sniffed
fn sample_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html",
        Some("xml") => "application/xml",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}
