//! pageloop - run declarative scraping jobs from the command line
//!
//! A job file names the URLs, the nodes that become records, the fields
//! of each record and how a request parameter is iterated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;
mod job;

use config::Config;

#[derive(Parser)]
#[command(name = "pageloop")]
#[command(about = "Declarative scraper for paginated and iterated web sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./pageloop.toml or ~/.config/pageloop/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Seconds a whole request may take
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum requests in flight during an async flush
    #[arg(long, global = true)]
    max_concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job file and write records as JSON lines
    Run(cmd::run::RunArgs),
    /// Validate a job file without network access
    Check(cmd::check::CheckArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = Arc::new(pageloop_core::ProgressContext::new());

    pageloop_core::init_logging(&progress, cli.debug);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    pageloop_core::set_http_config(pageloop_core::HttpConfig {
        connect_timeout: Duration::from_secs(config.http.connect_timeout),
        request_timeout: Duration::from_secs(cli.read_timeout.unwrap_or(config.http.read_timeout)),
        max_concurrency: cli
            .max_concurrency
            .unwrap_or(config.http.max_concurrency)
            .max(1),
    });

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Check(args) => cmd::check::run(args, &config),
        Command::Config => {
            use comfy_table::{
                modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table,
            };

            let http = pageloop_core::http_config();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Connect timeout",
                &format!("{}s", http.connect_timeout.as_secs()),
            ]);
            table.add_row(vec![
                "Read timeout",
                &format!("{}s", http.request_timeout.as_secs()),
            ]);
            table.add_row(vec!["Max concurrency", &http.max_concurrency.to_string()]);
            table.add_row(vec![
                "User-Agent",
                config
                    .http
                    .user_agent
                    .as_deref()
                    .unwrap_or(pageloop_core::scraper::DEFAULT_USER_AGENT),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
