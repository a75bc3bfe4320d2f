//! CLI binary for docsynth.
//!
//! A thin shim over the library crate: `generate` maps CLI flags to
//! `GeneratorConfig` / `CrawlConfig`, runs the crawl and the orchestrator,
//! and prints the run report. The hidden `worker` subcommand is the entry
//! point of every worker process the orchestrator launches.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsynth::worker::run_worker;
use docsynth::{
    crawl, AugmentationConfig, CrawlConfig, GenerationProgressCallback, GeneratorConfig,
    Orchestrator, ProgressCallback, RunReport, StyleConfig, WorkerManifest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a crawl counter, then one bar over worker processes.
struct CliProgressCallback {
    bar: ProgressBar,
    failed_workers: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed_workers: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, prefix: &'static str, unit: &str, total: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.reset_elapsed();
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_crawl_progress(&self, found: usize, limit: usize) {
        if self.bar.length() != Some(limit as u64) {
            self.activate_bar("Crawling", "urls", limit);
        }
        self.bar.set_position(found as u64);
    }

    fn on_workers_started(&self, workers: usize, total_urls: usize) {
        self.activate_bar("Generating", "workers", workers);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_urls} URLs across {workers} worker processes…"))
        ));
    }

    fn on_worker_finished(&self, index: usize, success: bool) {
        if success {
            self.bar
                .println(format!("  {} Worker {index:>2} finished", green("✓")));
        } else {
            self.failed_workers.fetch_add(1, Ordering::SeqCst);
            self.bar
                .println(format!("  {} Worker {index:>2} failed", red("✗")));
        }
        self.bar.inc(1);
    }

    fn on_merge_complete(&self, merged: usize, invalid: usize) {
        self.bar.finish_and_clear();
        let failed = self.failed_workers.load(Ordering::SeqCst);
        eprintln!(
            "{} {} images merged  {}",
            if failed == 0 && invalid == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&merged.to_string()),
            dim(&format!("({invalid} invalid, {failed} workers failed)")),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # 100 Russian Wikipedia articles, one worker
  docsynth generate --out-dir dataset

  # Four workers, eight service ports, English and Russian
  docsynth generate --out-dir dataset --num-processes 4 \
      --ports 2000,2001,2002,2003,2004,2005,2006,2007 \
      --languages en,ru --start-page https://en.wikipedia.org/wiki/Main_Page

  # Skip crawling, custom style, debug overlays
  docsynth generate --urls-file urls.txt --style-config docx_config.json --debug

PORTS:
  Worker i of k uses ports[i] for the conversion service RPC and ports[k + i]
  for its office instance, so at least 2 × num-processes ports are needed.

OUTPUT:
  <out-dir>/image_<n>.png           clean, augmented page (image-size²)
  <out-dir>/image_<n>.png.json      {"words": [...], "bboxes": [[x, y, w, h], ...]}
  <out-dir>/image_<n>_colored.png   tagged page with boxes outlined (--debug)

ENVIRONMENT VARIABLES:
  RUST_LOG          Log filter, inherited by worker processes
  PDFIUM_LIB_PATH   Path to libpdfium (default: ./ then the system library)
"#;

/// Generate document images with word-level bounding boxes.
#[derive(Parser, Debug)]
#[command(
    name = "docsynth",
    version,
    about = "Generate document images with word-level bounding boxes",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl Wikipedia and generate a dataset.
    Generate(GenerateArgs),

    /// Run one worker process (launched by `generate`).
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Dataset output directory.
    #[arg(short, long, env = "DOCSYNTH_OUT_DIR", default_value = "output")]
    out_dir: PathBuf,

    /// Delete the output directory before generating.
    #[arg(long, env = "DOCSYNTH_REMOVE_EXISTING_DIR")]
    remove_existing_dir: bool,

    /// Side length of the square output images.
    #[arg(long, env = "DOCSYNTH_IMAGE_SIZE", default_value_t = 244)]
    image_size: u32,

    /// Page the crawl starts from.
    #[arg(
        long,
        env = "DOCSYNTH_START_PAGE",
        default_value = "https://ru.wikipedia.org/wiki/%D0%97%D0%B0%D0%B3%D0%BB%D0%B0%D0%B2%D0%BD%D0%B0%D1%8F_%D1%81%D1%82%D1%80%D0%B0%D0%BD%D0%B8%D1%86%D0%B0"
    )]
    start_page: String,

    /// Wikipedia language codes to accept (comma separated).
    #[arg(long, env = "DOCSYNTH_LANGUAGES", value_delimiter = ',', default_value = "ru")]
    languages: Vec<String>,

    /// Number of URLs to collect, start page included.
    #[arg(long, env = "DOCSYNTH_MAX_URLS", default_value_t = 100)]
    max_urls: usize,

    /// Read URLs from this file (one per line) instead of crawling.
    #[arg(long, env = "DOCSYNTH_URLS_FILE")]
    urls_file: Option<PathBuf>,

    /// Number of worker processes.
    #[arg(short = 'p', long, env = "DOCSYNTH_NUM_PROCESSES", default_value_t = 1)]
    num_processes: usize,

    /// Concurrent jobs per worker process.
    #[arg(short = 't', long, env = "DOCSYNTH_MAX_THREADS", default_value_t = 8)]
    max_threads: usize,

    /// Conversion service ports (comma separated, 2 × num-processes).
    #[arg(long, env = "DOCSYNTH_PORTS", value_delimiter = ',', default_value = "2000,2001")]
    ports: Vec<u16>,

    /// JSON file with the document style distribution.
    #[arg(long, env = "DOCSYNTH_STYLE_CONFIG")]
    style_config: Option<PathBuf>,

    /// Also write the tagged render with detected boxes outlined.
    #[arg(long, env = "DOCSYNTH_DEBUG")]
    debug: bool,

    /// Seed for style sampling and augmentation.
    #[arg(long, env = "DOCSYNTH_SEED")]
    seed: Option<u64>,

    /// Write clean renders without augmentation.
    #[arg(long, env = "DOCSYNTH_NO_AUGMENT")]
    no_augment: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCSYNTH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSYNTH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSYNTH_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => generate(args).await,
        Command::Worker { manifest } => worker(&manifest).await,
    }
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn worker(manifest_path: &Path) -> Result<()> {
    init_logging("info");
    let manifest = WorkerManifest::read(manifest_path).context("Failed to read worker manifest")?;
    let index = manifest.worker_index;
    run_worker(manifest)
        .await
        .with_context(|| format!("Worker {index} failed"))?;
    Ok(())
}

async fn generate(args: GenerateArgs) -> Result<()> {
    // ── Logging setup ────────────────────────────────────────────────────
    // Workers inherit the same filter, so with the progress bar active only
    // errors reach the terminal.
    let show_progress = !args.quiet && !args.no_progress;
    let filter = if args.verbose {
        "debug"
    } else if args.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    init_logging(filter);
    let worker_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string());

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };

    let config = build_config(&args)?;

    // ── URLs ─────────────────────────────────────────────────────────────
    let urls = match &args.urls_file {
        Some(path) => read_urls_file(path)?,
        None => {
            let crawl_config = CrawlConfig {
                start_page: args.start_page.clone(),
                languages: args.languages.clone(),
                max_urls: args.max_urls,
                ..CrawlConfig::default()
            };
            crawl(&crawl_config, progress.as_ref())
                .await
                .context("Crawl failed")?
        }
    };
    if urls.is_empty() {
        anyhow::bail!("No URLs to process");
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let mut orchestrator = Orchestrator::new(config).with_log_filter(worker_filter);
    if let Some(cb) = progress {
        orchestrator = orchestrator.with_progress(cb);
    }
    let report = orchestrator.run(urls).await.context("Generation failed")?;

    if !args.quiet {
        print_report(&report, &args.out_dir);
    }
    Ok(())
}

/// Map CLI args to `GeneratorConfig`.
fn build_config(args: &GenerateArgs) -> Result<GeneratorConfig> {
    let style = match &args.style_config {
        Some(path) => StyleConfig::from_file(path).context("Failed to load style config")?,
        None => StyleConfig::default(),
    };
    let augmentation = if args.no_augment {
        AugmentationConfig::disabled()
    } else {
        AugmentationConfig::default()
    };

    let mut builder = GeneratorConfig::builder()
        .out_dir(&args.out_dir)
        .remove_existing_dir(args.remove_existing_dir)
        .debug(args.debug)
        .image_size(args.image_size)
        .num_processes(args.num_processes)
        .max_threads(args.max_threads)
        .ports(args.ports.clone())
        .style(style)
        .augmentation(augmentation);
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    builder.build().context("Invalid configuration")
}

/// One URL per line; blank lines and `#` comments are ignored.
fn read_urls_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list from {:?}", path))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn print_report(report: &RunReport, out_dir: &Path) {
    eprintln!(
        "{}  {} images  →  {}",
        if report.workers_failed == 0 && report.jobs_failed == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        bold(&report.images_merged.to_string()),
        bold(&out_dir.display().to_string()),
    );
    eprintln!(
        "   {} URLs: {} ok / {} failed  —  {} invalid pairs, {} workers failed",
        report.urls,
        report.jobs_succeeded,
        report.jobs_failed,
        report.invalid_pairs,
        report.workers_failed,
    );
    eprintln!(
        "   {}",
        dim(&format!(
            "{:.1}s elapsed  ·  {:.3} urls/s  ·  {:.3} images/s  ·  {:.2} s/url  ·  {:.2} s/image  ·  {:.2} images/url",
            report.elapsed.as_secs_f64(),
            report.urls_per_sec(),
            report.images_per_sec(),
            report.secs_per_url(),
            report.secs_per_image(),
            report.images_per_url(),
        ))
    );
}
