//! CLI parsing and orchestration. Parses args, crawls one work or a batch of works, and maps errors
//! to exit codes.

use crate::config::{self, Config};
use crate::crawler::{CancellationToken, CrawlError, Crawler, Progress, RunOutcome, RunReport};
use crate::model::{self, Work, DEFAULT_CHAPTER_WORKERS, DEFAULT_PAGE_WORKERS};
use crate::scraper::{
    adapter_for, resolve_site, HttpClient, ScraperError, Site, DEFAULT_BACKOFF_SECS,
    DEFAULT_CACHE_CAPACITY,
};
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_OUTPUT_DIR: &str = "./output";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 3;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Crawl(#[from] CrawlError),

    #[error("{failed} of {total} works failed")]
    BatchFailed { failed: usize, total: usize },
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Crawl(CrawlError::Config(_)) => 1,
            CliRunError::Crawl(CrawlError::Persistence(_)) => 3,
            CliRunError::Scraper(_) | CliRunError::Crawl(_) | CliRunError::BatchFailed { .. } => 2,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "mangacrawl")]
#[command(about = "Download manga from Manganelo or MangaPanda, resuming where the last run stopped")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, timeout_secs, retry_count, retry_backoff_secs, chapter_workers, page_workers, fetch_cache_size) are read from ./mangacrawl.toml or $XDG_CONFIG_HOME/mangacrawl/config.toml. CLI flags override config."
)]
pub struct Args {
    /// Work URLs (Manganelo or MangaPanda manga pages).
    pub urls: Vec<String>,

    /// File listing one work URL per line. Blank lines are skipped.
    #[arg(short = 'f', long)]
    pub input: Option<PathBuf>,

    /// Base output directory. Each work goes into a sub-directory named after its title.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of chapter processing workers (default 3).
    #[arg(short = 'c', long)]
    pub chapter_workers: Option<usize>,

    /// Number of page download workers (default 5).
    #[arg(short = 'p', long)]
    pub page_workers: Option<usize>,

    /// Override site detection (manganelo or mangapanda).
    #[arg(long, value_parser = parse_site)]
    pub site: Option<Site>,

    /// Resume from this cache file instead of the one in the work's output directory. Single URL only.
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// More log output (-v info, -vv debug) and the full error chain on failure.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Effective settings after merging CLI flags over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub chapter_workers: usize,
    pub page_workers: usize,
    pub fetch_cache_size: usize,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub retry_backoff_secs: Vec<u64>,
    pub user_agent: Option<String>,
}

impl Settings {
    pub fn resolve(args: &Args, config: Option<&Config>) -> Self {
        Self {
            output_dir: args
                .output
                .clone()
                .or_else(|| config.and_then(|c| c.output_dir.clone()))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            chapter_workers: args
                .chapter_workers
                .or_else(|| config.and_then(|c| c.chapter_workers))
                .unwrap_or(DEFAULT_CHAPTER_WORKERS),
            page_workers: args
                .page_workers
                .or_else(|| config.and_then(|c| c.page_workers))
                .unwrap_or(DEFAULT_PAGE_WORKERS),
            fetch_cache_size: config
                .and_then(|c| c.fetch_cache_size)
                .unwrap_or(DEFAULT_CACHE_CAPACITY),
            timeout_secs: args
                .timeout
                .or_else(|| config.and_then(|c| c.timeout_secs))
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry_count: config
                .and_then(|c| c.retry_count)
                .unwrap_or(DEFAULT_RETRY_COUNT)
                .max(1),
            retry_backoff_secs: config
                .and_then(|c| c.retry_backoff_secs.clone())
                .unwrap_or_else(|| DEFAULT_BACKOFF_SECS.to_vec()),
            user_agent: args
                .user_agent
                .clone()
                .or_else(|| config.and_then(|c| c.user_agent.clone())),
        }
    }

    fn client(&self) -> Result<HttpClient, CliRunError> {
        let mut builder = HttpClient::builder()
            .timeout_secs(self.timeout_secs)
            .retry_count(self.retry_count)
            .retry_backoff_secs(self.retry_backoff_secs.clone());
        if let Some(ua) = &self.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        builder
            .build()
            .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
    }
}

fn parse_site(s: &str) -> Result<Site, String> {
    match s.to_lowercase().as_str() {
        "manganelo" | "nelo" => Ok(Site::Manganelo),
        "mangapanda" | "panda" => Ok(Site::MangaPanda),
        _ => Err(format!(
            "Invalid --site value: '{}'. Use 'manganelo' or 'mangapanda'.",
            s
        )),
    }
}

/// URLs from an input file: one per line, trimmed, trailing comma dropped, blanks skipped.
fn parse_url_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .map(|line| line.strip_suffix(',').unwrap_or(line).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_urls(args: &Args) -> Result<Vec<String>, CliRunError> {
    let mut urls: Vec<String> = args
        .urls
        .iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if let Some(path) = &args.input {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CliRunError::InvalidInput(format!(
                "Cannot read input file {}: {}",
                path.display(),
                e
            ))
        })?;
        urls.extend(parse_url_list(&contents));
    }
    if urls.is_empty() {
        return Err(CliRunError::InvalidInput(
            "No work URL given. Pass a URL or --input <file>.".to_string(),
        ));
    }
    if args.cache.is_some() && urls.len() > 1 {
        return Err(CliRunError::InvalidInput(
            "--cache can only be used with a single URL.".to_string(),
        ));
    }
    Ok(urls)
}

fn site_for(url: &str, override_site: Option<Site>) -> Result<Site, CliRunError> {
    resolve_site(url, override_site).map_err(|e| match &e {
        ScraperError::InvalidUrl { input, reason } => CliRunError::InvalidInput(format!(
            "Expected a manga URL. Example: https://manganelo.com/manga/... Invalid: {}: {}",
            input, reason
        )),
        ScraperError::UnrecognizedHost { host } => CliRunError::InvalidInput(format!(
            "Unsupported site: {}. Use --site manganelo or mangapanda to override, or provide a Manganelo / MangaPanda URL.",
            host
        )),
        _ => CliRunError::Scraper(e),
    })
}

fn crawl_one(
    args: &Args,
    settings: &Settings,
    client: &HttpClient,
    cancel: &CancellationToken,
    url: &str,
) -> Result<RunReport, CliRunError> {
    let site = site_for(url, args.site)?;
    tracing::info!(url, site = site.name(), "starting work");
    let work = Work::with_workers(
        url,
        &settings.output_dir,
        settings.chapter_workers,
        settings.page_workers,
    )
    .map_err(CrawlError::from)?;
    let progress = if args.quiet {
        Progress::hidden()
    } else {
        Progress::new()
    };
    let mut crawler = Crawler::new(work, adapter_for(site), client.clone())
        .with_fetch_cache_size(settings.fetch_cache_size)
        .with_progress(progress)
        .with_cancellation_token(cancel.clone());
    if let Some(path) = &args.cache {
        crawler = crawler.with_cache_file(path)?;
    }
    Ok(crawler.run()?)
}

fn summary_line(report: &RunReport) -> String {
    let title = report.title.as_deref().unwrap_or("work");
    let dir = report
        .output_dir
        .as_deref()
        .map(Path::display)
        .map(|d| d.to_string())
        .unwrap_or_default();
    let s = &report.stats;
    match report.outcome {
        RunOutcome::NoChapters => format!("{}: no chapters found.", title),
        RunOutcome::AlreadyComplete => format!(
            "{}: all {} chapters already downloaded in {}",
            title, report.chapters, dir
        ),
        RunOutcome::Completed | RunOutcome::Cancelled => format!(
            "{}{}: {} pages downloaded, {} skipped, {} failed; {} of {} chapters failed. Output: {}",
            title,
            if report.outcome == RunOutcome::Cancelled {
                " (cancelled)"
            } else {
                ""
            },
            s.pages_downloaded,
            s.pages_skipped,
            s.pages_failed,
            s.chapters_failed,
            s.chapters_total,
            dir
        ),
    }
}

/// Cancel `cancel` on Ctrl-C. Workers finish their in-flight requests and the cache is saved.
fn install_interrupt_handler(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if cancel.cancel() {
            eprintln!("Interrupted. Finishing in-flight downloads and saving progress, please wait...");
        }
    });
    if let Err(e) = installed {
        tracing::warn!(error = %e, "cannot install the Ctrl-C handler");
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let urls = collect_urls(args)?;
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let settings = Settings::resolve(args, config.as_ref());
    model::validate_worker_counts(settings.chapter_workers, settings.page_workers)
        .map_err(|e| CliRunError::InvalidInput(format!("Invalid worker count: {}", e)))?;
    let client = settings.client()?;

    let cancel = CancellationToken::new();
    install_interrupt_handler(&cancel);
    run_batch(args, &settings, &client, &cancel, &urls)
}

/// Crawl every URL in order. A failed work is reported and the next one is started; the batch
/// fails at the end if any work failed. No further work is started once `cancel` is set.
fn run_batch(
    args: &Args,
    settings: &Settings,
    client: &HttpClient,
    cancel: &CancellationToken,
    urls: &[String],
) -> Result<(), CliRunError> {
    let total = urls.len();
    let mut failed = 0;
    for (i, url) in urls.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(skipped = total - i, "batch stopped after cancellation");
            if total > 1 && !args.quiet {
                eprintln!("Cancelled: {} of {} works not started.", total - i, total);
            }
            break;
        }
        if total > 1 && !args.quiet {
            let msg = format!("----- Now downloading ({}/{}): {} -----", i + 1, total, url);
            eprintln!("{}", "-".repeat(msg.len()));
            eprintln!("{}", msg);
            eprintln!("{}", "-".repeat(msg.len()));
        }
        match crawl_one(args, settings, client, cancel, url) {
            Ok(report) => {
                if !args.quiet {
                    eprintln!("{}", summary_line(&report));
                }
            }
            Err(e) if total == 1 => return Err(e),
            Err(e) => {
                tracing::error!(url = %url, error = %e, "work failed");
                eprintln!("{}: {}", url, e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(CliRunError::BatchFailed { failed, total });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::ProgressSnapshot;
    use crate::model::ModelError;
    use crate::store::StoreError;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("mangacrawl").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn parse_site_values() {
        assert_eq!(parse_site("manganelo").unwrap(), Site::Manganelo);
        assert_eq!(parse_site("Nelo").unwrap(), Site::Manganelo);
        assert_eq!(parse_site("MangaPanda").unwrap(), Site::MangaPanda);
        assert!(parse_site("royalroad").is_err());
    }

    #[test]
    fn url_list_skips_blanks_and_trailing_commas() {
        let list = "https://manganelo.com/manga/a,\n\n  http://manga-panda.xyz/b  \n,\n";
        assert_eq!(
            parse_url_list(list),
            vec![
                "https://manganelo.com/manga/a".to_string(),
                "http://manga-panda.xyz/b".to_string()
            ]
        );
    }

    #[test]
    fn args_parse_short_flags() {
        let a = args(&[
            "https://manganelo.com/manga/a",
            "-o",
            "out",
            "-c",
            "2",
            "-p",
            "7",
            "-vv",
        ]);
        assert_eq!(a.urls, vec!["https://manganelo.com/manga/a".to_string()]);
        assert_eq!(a.output, Some(PathBuf::from("out")));
        assert_eq!(a.chapter_workers, Some(2));
        assert_eq!(a.page_workers, Some(7));
        assert_eq!(a.verbose, 2);
    }

    #[test]
    fn settings_cli_overrides_config() {
        let a = args(&["u", "-c", "1", "--timeout", "5"]);
        let config = Config {
            output_dir: Some(PathBuf::from("from-config")),
            chapter_workers: Some(9),
            page_workers: Some(2),
            timeout_secs: Some(99),
            fetch_cache_size: Some(8),
            ..Config::default()
        };
        let s = Settings::resolve(&a, Some(&config));
        assert_eq!(s.output_dir, PathBuf::from("from-config"));
        assert_eq!(s.chapter_workers, 1);
        assert_eq!(s.page_workers, 2);
        assert_eq!(s.timeout_secs, 5);
        assert_eq!(s.fetch_cache_size, 8);
    }

    #[test]
    fn settings_defaults() {
        let s = Settings::resolve(&args(&["u"]), None);
        assert_eq!(s.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(s.chapter_workers, 3);
        assert_eq!(s.page_workers, 5);
        assert_eq!(s.fetch_cache_size, 32);
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.retry_backoff_secs, vec![1, 2, 4]);
    }

    #[test]
    fn collect_urls_requires_one() {
        let result = collect_urls(&args(&[]));
        assert!(matches!(result, Err(CliRunError::InvalidInput(_))));
    }

    #[test]
    fn collect_urls_reads_input_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("urls.txt");
        std::fs::write(&list, "https://manganelo.com/manga/a,\nhttp://manga-panda.xyz/b\n")?;
        let a = args(&["https://manganelo.com/manga/c", "--input", list.to_str().unwrap()]);
        let urls = collect_urls(&a)?;
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[1], "https://manganelo.com/manga/a");
        Ok(())
    }

    #[test]
    fn cache_flag_rejects_batches() {
        let a = args(&["u1", "u2", "--cache", "c.json"]);
        assert!(matches!(
            collect_urls(&a),
            Err(CliRunError::InvalidInput(_))
        ));
    }

    #[test]
    fn unsupported_host_is_invalid_input() {
        let result = site_for("https://example.com/manga/x", None);
        match result {
            Err(CliRunError::InvalidInput(msg)) => assert!(msg.contains("Unsupported site")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            site_for("https://example.com/x", Some(Site::MangaPanda)).unwrap(),
            Site::MangaPanda
        );
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Crawl(CrawlError::Config(ModelError::EmptyField { field: "x" }))
                .exit_code(),
            1
        );
        assert_eq!(
            CliRunError::Scraper(ScraperError::UnrecognizedHost { host: "x".into() }).exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Crawl(CrawlError::Persistence(StoreError::PathUnset)).exit_code(),
            3
        );
        assert_eq!(
            CliRunError::BatchFailed {
                failed: 1,
                total: 2
            }
            .exit_code(),
            2
        );
    }

    #[test]
    fn summary_mentions_counts() {
        let report = RunReport {
            outcome: RunOutcome::Completed,
            title: Some("Berserk".into()),
            output_dir: Some(PathBuf::from("/out/Berserk")),
            chapters: 2,
            stats: ProgressSnapshot {
                chapters_total: 2,
                chapters_failed: 1,
                pages_downloaded: 3,
                ..ProgressSnapshot::default()
            },
        };
        let line = summary_line(&report);
        assert!(line.starts_with("Berserk: 3 pages downloaded"));
        assert!(line.contains("1 of 2 chapters failed"));
        assert!(line.ends_with("/out/Berserk"));
    }

    fn test_settings(out: &Path) -> Settings {
        Settings {
            output_dir: out.to_path_buf(),
            ..Settings::resolve(&args(&["u"]), None)
        }
    }

    #[test]
    fn cancelled_crawl_sends_no_requests() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let a = args(&["-q", "https://manganelo.com/manga/x"]);
        let settings = test_settings(dir.path());
        let client = settings.client()?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = crawl_one(&a, &settings, &client, &cancel, &a.urls[0])?;

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(std::fs::read_dir(dir.path())?.next().is_none());
        Ok(())
    }

    #[test]
    fn cancelled_batch_starts_no_further_work() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        // Unsupported hosts would each count as a failed work if they were started.
        let urls = vec![
            "https://example.com/a".to_string(),
            "https://example.com/b".to_string(),
        ];
        let a = args(&["-q"]);
        let settings = test_settings(dir.path());
        let client = settings.client()?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_batch(&a, &settings, &client, &cancel, &urls)?;
        Ok(())
    }
}
