use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use time::{Date, OffsetDateTime};
use time::macros::format_description;

use wikitana_core::crawl::{CrawlLimits, CrawlProgress, DegradedResolution, crawl};
use wikitana_core::page::Page;
use wikitana_core::tana::{RandomUids, convert};
use wikitana_core::wikipedia::{PageSource, WikipediaClient};

#[derive(Debug, Parser)]
#[command(
    name = "wikitana",
    version,
    about = "Crawl a Wikipedia article graph and convert it to a Tana Intermediate File"
)]
struct Cli {
    /// Title or slug of a Wikipedia page; today's featured article when omitted
    title: Vec<String>,
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Write the JSON document to this file instead of stdout"
    )]
    file: Option<PathBuf>,
    #[arg(short, long, default_value_t = 1, help = "Maximum crawl depth")]
    depth: u32,
    #[arg(
        short,
        long,
        default_value_t = 1000,
        help = "Maximum number of pages to crawl"
    )]
    size: usize,
    #[arg(short, long, default_value = "en", help = "Wikipedia language edition")]
    language: String,
    #[arg(
        long,
        value_name = "YYYY-MM-DD",
        help = "Date of the featured article (default today)"
    )]
    date: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if cli.size == 0 {
        bail!("--size must be at least 1");
    }

    // validated before any network activity
    let date = match &cli.date {
        Some(raw) => parse_feed_date(raw)?,
        None => OffsetDateTime::now_utc().date(),
    };

    let mut client = WikipediaClient::from_env(&cli.language)?;

    let title = if cli.title.is_empty() {
        match client.featured(date)? {
            Some(title) => title,
            None => bail!("could not get the featured article for {date}"),
        }
    } else {
        cli.title.join(" ")
    };

    let seed = resolve_seed(&mut client, &title)?;
    eprintln!("crawl \"{}\" ({})", seed.title, seed.id);

    let limits = CrawlLimits {
        max_depth: cli.depth,
        max_size: cli.size,
    };
    let mut progress = StderrProgress;
    let result = crawl(&mut client, seed, limits, &mut progress);

    eprintln!("convert {} pages to tana nodes", result.pages.len());
    let document = convert(&result, &mut RandomUids);
    let rendered = serde_json::to_string_pretty(&document)?;

    match &cli.file {
        Some(path) => {
            write_output(path, &rendered)?;
            eprintln!("wrote tana file to \"{}\"", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn resolve_seed(client: &mut WikipediaClient, title: &str) -> Result<Page> {
    let mut candidates = client.resolve(title)?;
    if candidates.is_empty() {
        bail!("couldn't find page \"{title}\"");
    }
    if candidates.len() > 1 {
        bail!("found {} pages for \"{title}\"", candidates.len());
    }
    Ok(candidates.remove(0))
}

fn parse_feed_date(raw: &str) -> Result<Date> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw.trim(), &format)
        .with_context(|| format!("invalid --date \"{raw}\" (expected YYYY-MM-DD)"))
}

fn write_output(path: &Path, rendered: &str) -> Result<()> {
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

struct StderrProgress;

impl CrawlProgress for StderrProgress {
    fn page_collected(&mut self, collected: usize, max_size: usize) {
        eprintln!("crawled pages: {collected}/{max_size}");
    }

    fn level_completed(&mut self, depth: u32, max_depth: u32) {
        eprintln!("crawl depth: {depth}/{max_depth}");
    }

    fn resolution_degraded(&mut self, title: &str, reason: DegradedResolution) {
        match reason {
            DegradedResolution::Missing => {
                eprintln!("warning: no page found for title \"{title}\"");
            }
            DegradedResolution::Ambiguous(count) => {
                eprintln!("warning: found {count} pages for title \"{title}\"");
            }
            DegradedResolution::FetchFailed => {
                eprintln!("warning: failed to fetch \"{title}\"");
            }
        }
    }
}
