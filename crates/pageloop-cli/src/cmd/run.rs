//! `pageloop run` - execute a job file against the live web

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Args;

use pageloop_core::{fmt_num, http_config, HttpDispatcher, Record, RunSummary, SharedProgress};

use super::print_summary;
use crate::config::Config;
use crate::job::Job;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job file
    pub job: PathBuf,

    /// Write JSON lines here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Queue every request of a pattern and send them concurrently
    #[arg(long = "async")]
    pub async_mode: bool,
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let job = Job::from_file(&args.job)?;
    let name = args
        .job
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());

    let out: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    let sink: Sink = Arc::new(Mutex::new(out));

    let line = progress.run_line(&name);
    let responses = Arc::new(AtomicUsize::new(0));
    let records = Arc::new(AtomicUsize::new(0));

    let mut scraper = job.into_scraper(config)?;
    if args.async_mode {
        scraper = scraper.async_mode(true);
    }
    let scraper = scraper.max_concurrency(http_config().max_concurrency).on_data({
        let sink = Arc::clone(&sink);
        let line = line.clone();
        let responses = Arc::clone(&responses);
        let records = Arc::clone(&records);
        move |batch, _response| {
            write_records(&sink, batch)?;
            let seen = responses.fetch_add(1, Ordering::Relaxed) + 1;
            let total = records.fetch_add(batch.len(), Ordering::Relaxed) + batch.len();
            line.update(seen, total);
            Ok(())
        }
    });

    log::info!("{name}: {} url pattern(s)", scraper.urls().len());
    let mut dispatcher = HttpDispatcher::new(scraper.scraper_options().max_concurrency);
    let summary = scraper.run(&mut dispatcher)?;

    sink.lock()
        .map_err(|_| anyhow::anyhow!("output writer poisoned"))?
        .flush()
        .context("failed to flush output")?;

    line.finish(&format!(
        "{} records from {} responses",
        fmt_num(summary.records_extracted),
        fmt_num(summary.responses_received)
    ));
    report(&summary, args.output.as_ref());

    if !summary.is_success() {
        anyhow::bail!(
            "{} of {} requests failed",
            summary.failures.len(),
            summary.requests_issued
        );
    }
    Ok(())
}

/// One JSON object per record, one record per line
fn write_records(sink: &Sink, records: &[Record]) -> Result<()> {
    let mut out = sink
        .lock()
        .map_err(|_| anyhow::anyhow!("output writer poisoned"))?;
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn report(summary: &RunSummary, output: Option<&PathBuf>) {
    for failure in &summary.failures {
        log::warn!(
            "failed: {} ({}){}",
            failure.url,
            failure.reason,
            failure
                .iteration_value
                .as_ref()
                .map(|v| format!(" at {v}"))
                .unwrap_or_default()
        );
    }
    let mut rows = vec![
        ("Requests", fmt_num(summary.requests_issued)),
        ("Responses", fmt_num(summary.responses_received)),
        ("Records", fmt_num(summary.records_extracted)),
        ("Failures", fmt_num(summary.failures.len())),
        ("Elapsed", format!("{:.1}s", summary.elapsed.as_secs_f64())),
    ];
    if let Some(path) = output {
        rows.push(("Output", path.display().to_string()));
    }
    print_summary("Run", &rows);
}
