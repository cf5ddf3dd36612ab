//! CLI command definitions for structforge.
//!
//! One subcommand per source runner; each subcommand carries the shared
//! collection flags plus its source-specific options and builds the
//! fully wired [`Runner`].

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use crate::collect::{self, RunConfig, Runner};
use crate::compile::music::HttpSheetClassifier;
use crate::compile::render::{PdfLatexRenderer, PdftoppmRasterizer};
use crate::compile::webpage::{ChromiumScreenshotter, ScreenshotOptions};
use crate::compile::{LatexCompiler, MusicCompiler, WebpageCompiler};
use crate::fetch::arxiv::OaiArxivApi;
use crate::fetch::github::GithubSearchConfig;
use crate::fetch::imslp::MediaWikiImslpApi;
use crate::fetch::{ArxivFetcher, GithubFetcher, ImslpFetcher};
use crate::filter::fetch::{AfterDateFetchFilter, DateFetchFilter, GithubFetchFilter};
use crate::filter::file::{RepoFilter, RepoFilterConfig};
use crate::filter::rendering::{NonTrivialRenderingFilter, NonTrivialRenderingFilterConfig};
use crate::filter::toxicity::{PerspectiveClient, ToxicityFilter};
use crate::filter::{FetchFilter, FileFilter, RenderingFilter};

/// Labeled image dataset collector.
#[derive(Parser)]
#[command(name = "structforge")]
#[command(about = "Fetch, filter, compile and collect rendered dataset instances")]
#[command(version)]
#[command(
    long_about = "structforge scrapes source artifacts (arXiv paper sources, GitHub Pages \
repositories, IMSLP scores), filters them at every stage, compiles them into rendered \
images plus extracted structure, and collects accepted instances until per-category \
quotas are met.\n\nExample:\n  structforge latex --subcategory cs --num-instances 100"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available runners.
#[derive(Subcommand)]
pub enum Commands {
    /// Collect rendered LaTeX sub-units (equations, tables, figures,
    /// algorithms, plots) from arXiv paper sources.
    Latex(LatexArgs),

    /// Collect webpage screenshots from small GitHub Pages repositories.
    Webpage(WebpageArgs),

    /// Collect per-system sheet-music crops from IMSLP score PDFs.
    Musicsheet(MusicsheetArgs),
}

/// Flags shared by every runner.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// The path to save the collected data to.
    #[arg(long, default_value = "./data")]
    pub destination_path: String,

    /// The path for temporary per-candidate files.
    #[arg(long, default_value = "./data/tmp")]
    pub tmp_path: String,

    /// Maximum seconds for one download, render or external call.
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Target number of instances per category.
    #[arg(long, default_value = "100")]
    pub num_instances: usize,

    /// Candidates requested from the source per batch.
    #[arg(long, default_value = "50")]
    pub num_instances_at_once: usize,

    /// Maximum candidates accepted per calendar date.
    #[arg(long, default_value = "40")]
    pub max_instances_per_date: usize,

    /// Earliest date to collect data from (YYYY-MM-DD). Defaults to one
    /// year ago.
    #[arg(long, value_parser = parse_date)]
    pub date_from: Option<DateTime<Utc>>,

    /// Latest date to collect data from (YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = parse_date)]
    pub date_to: Option<DateTime<Utc>>,

    /// Perspective API key for the toxicity filter; without it the
    /// filter is disabled.
    #[arg(long, env = "PERSPECTIVE_API_KEY", hide_env_values = true)]
    pub perspective_api_key: Option<String>,
}

impl CommonArgs {
    pub fn date_from(&self) -> DateTime<Utc> {
        self.date_from
            .unwrap_or_else(|| Utc::now() - chrono::Duration::days(365))
    }

    pub fn date_to(&self) -> DateTime<Utc> {
        self.date_to.unwrap_or_else(Utc::now)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            destination_path: self.destination_path.clone().into(),
            tmp_path: self.tmp_path.clone().into(),
            num_instances: self.num_instances,
            batch_size: self.num_instances_at_once,
            ..RunConfig::default()
        }
    }

    fn toxicity_filter(&self) -> Option<Box<dyn FileFilter>> {
        match self.perspective_api_key {
            Some(ref key) => Some(Box::new(ToxicityFilter::new(
                Box::new(PerspectiveClient::new(key.clone(), self.timeout())),
                0.5,
                0.3,
            ))),
            None => {
                warn!("PERSPECTIVE_API_KEY not set, toxicity filter disabled");
                None
            }
        }
    }
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{value}': {e}"))
        .and_then(|date| {
            date.and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| format!("invalid date '{value}'"))
        })
}

/// Arguments for the `latex` runner.
#[derive(Parser, Debug)]
pub struct LatexArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The arXiv set to scrape, e.g. `cs`, `econ`, `math`.
    #[arg(long)]
    pub subcategory: String,

    /// Maximum sub-units of one category taken from a single paper.
    #[arg(long, default_value = "3")]
    pub max_elt_per_category: usize,
}

/// Arguments for the `webpage` runner.
#[derive(Parser, Debug)]
pub struct WebpageArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The primary language of the repositories, as defined by GitHub.
    #[arg(long)]
    pub language: String,

    /// Local port for the Jekyll server.
    #[arg(long, default_value = "4000")]
    pub port: u16,

    /// Maximum repository size in kilobytes.
    #[arg(long, default_value = "1000")]
    pub max_size_kb: u32,

    /// GitHub API token.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Headless browser binary used for screenshots.
    #[arg(long, default_value = "chromium")]
    pub browser: String,
}

/// Arguments for the `musicsheet` runner.
#[derive(Parser, Debug)]
pub struct MusicsheetArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Endpoint of the sheet-music image classification service.
    #[arg(long, env = "SHEET_CLASSIFIER_URL")]
    pub classifier_url: String,
}

fn rendering_filter(max_background_percentage: f64) -> Box<dyn RenderingFilter> {
    Box::new(NonTrivialRenderingFilter::new(
        NonTrivialRenderingFilterConfig {
            max_background_percentage,
            ..NonTrivialRenderingFilterConfig::default()
        },
    ))
}

/// Build the arXiv/LaTeX runner.
pub fn latex_runner(args: &LatexArgs) -> Runner {
    let common = &args.common;
    let fetcher = ArxivFetcher::new(
        Box::new(OaiArxivApi::new(common.timeout())),
        args.subcategory.clone(),
        common.date_from(),
        common.date_to(),
        common.timeout(),
    );

    let fetch_filters: Vec<Box<dyn FetchFilter>> = vec![
        Box::new(AfterDateFetchFilter::new(common.date_from())),
        Box::new(DateFetchFilter::new(common.max_instances_per_date)),
    ];

    let file_filters: Vec<Box<dyn FileFilter>> =
        common.toxicity_filter().into_iter().collect();

    let compiler = LatexCompiler::new(
        Box::new(PdfLatexRenderer::new(common.timeout(), true)),
        LatexCompiler::default_categories(),
        args.max_elt_per_category,
        common.num_instances,
    );

    Runner {
        name: "latex".to_string(),
        fetcher: Box::new(fetcher),
        fetch_filters,
        file_filters,
        compiler: Box::new(compiler),
        rendering_filters: vec![rendering_filter(99.0)],
    }
}

/// Build the GitHub Pages/webpage runner.
pub fn webpage_runner(args: &WebpageArgs) -> Runner {
    let common = &args.common;
    let fetcher = GithubFetcher::new(
        args.github_token.clone(),
        GithubSearchConfig {
            language: Some(args.language.clone()),
            max_size_kb: args.max_size_kb,
        },
        common.date_from(),
        common.date_to(),
        common.timeout(),
    );

    let fetch_filters: Vec<Box<dyn FetchFilter>> = vec![
        Box::new(AfterDateFetchFilter::new(common.date_from())),
        Box::new(GithubFetchFilter::new()),
        Box::new(DateFetchFilter::new(common.max_instances_per_date)),
    ];

    let mut file_filters: Vec<Box<dyn FileFilter>> =
        vec![Box::new(RepoFilter::new(RepoFilterConfig::default()))];
    file_filters.extend(common.toxicity_filter());

    let compiler = WebpageCompiler::new(
        args.language.to_lowercase(),
        args.port,
        common.timeout(),
        Box::new(ChromiumScreenshotter::new(
            args.browser.clone(),
            ScreenshotOptions::default(),
            common.timeout(),
        )),
    );

    Runner {
        name: "webpage".to_string(),
        fetcher: Box::new(fetcher),
        fetch_filters,
        file_filters,
        compiler: Box::new(compiler),
        rendering_filters: vec![rendering_filter(95.0)],
    }
}

/// Build the IMSLP/music-sheet runner.
pub fn musicsheet_runner(args: &MusicsheetArgs) -> Runner {
    let common = &args.common;
    let fetcher = ImslpFetcher::new(
        Box::new(MediaWikiImslpApi::new(common.timeout())),
        common.date_from(),
        common.date_to(),
        common.timeout(),
    );

    let fetch_filters: Vec<Box<dyn FetchFilter>> = vec![
        Box::new(AfterDateFetchFilter::new(common.date_from())),
        Box::new(DateFetchFilter::new(common.max_instances_per_date)),
    ];

    let compiler = MusicCompiler::new(
        Box::new(PdftoppmRasterizer::new(common.timeout())),
        Box::new(HttpSheetClassifier::new(
            args.classifier_url.clone(),
            common.timeout(),
        )),
        true,
    );

    Runner {
        name: "musicsheet".to_string(),
        fetcher: Box::new(fetcher),
        fetch_filters,
        file_filters: Vec::new(),
        compiler: Box::new(compiler),
        rendering_filters: vec![rendering_filter(99.0)],
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Execute the selected runner to completion.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let (mut runner, config) = match &cli.command {
        Commands::Latex(args) => (latex_runner(args), args.common.run_config()),
        Commands::Webpage(args) => (webpage_runner(args), args.common.run_config()),
        Commands::Musicsheet(args) => (musicsheet_runner(args), args.common.run_config()),
    };

    let summary = collect::run(&mut runner, &config).await?;
    println!("Scraping complete!");
    println!(" - {} instances downloaded", summary.downloaded);
    println!(" - {} instances compiled", summary.compiled);
    println!(" - For each category:");
    for (category, count) in &summary.collected {
        println!("\t - {category}: {count} instances collected");
    }
    Ok(())
}
