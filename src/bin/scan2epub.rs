//! CLI binary for scan2epub.
//!
//! A thin shim over the library crate that maps CLI flags onto
//! `PipelineConfig`, runs the pipeline and prints the outcome.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scan2epub::report::human_size;
use scan2epub::{
    GsutilStore, LocalStore, Pipeline, PipelineConfig, PipelineProgressCallback, PipelineReport,
    ProcessRunner, ProgressCallback, SharedStore, StageKind, StageOutcome,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One spinner for the running stage plus a status line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("fingerprinting input…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_pipeline_start(&self, stem: &str, total_stages: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing '{stem}' ({total_stages} stages)"))
        ));
    }

    fn on_stage_start(&self, stage: StageKind, index: usize, total_stages: usize) {
        self.bar.set_prefix(format!("[{index}/{total_stages}]"));
        self.bar.set_message(stage.to_string());
        self.bar.reset_elapsed();
    }

    fn on_stage_skipped(&self, stage: StageKind, reason: &str) {
        self.bar.println(format!(
            "  {} {:<10} {}",
            dim("↷"),
            stage.as_str(),
            dim(&format!("skipped: {reason}"))
        ));
    }

    fn on_stage_complete(&self, stage: StageKind, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<10} {}",
            green("✓"),
            stage.as_str(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0))
        ));
    }

    fn on_stage_error(&self, stage: StageKind, error: &str) {
        self.bar.println(format!("  {} {:<10} {}", red("✗"), stage.as_str(), red(error)));
        self.bar.finish_and_clear();
    }

    fn on_pipeline_complete(&self, _ran: usize, _skipped: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Standard OCR
  scan2epub scans/book.pdf

  # Enhanced OCR (page breaks, language hints)
  scan2epub --enhanced scans/book.pdf

  # Reuse OCR output uploaded under another name
  scan2epub --stem vol1 scans/Volume-One-final.pdf

  # Offline run against a local directory instead of the bucket
  scan2epub --local-store ./bucket scans/book.pdf

  # Machine-readable report
  scan2epub --json --no-progress scans/book.pdf > report.json

STAGES:
  upload → ocr → merge → download → cleanup → format → structure → package

  upload is skipped when <INPUT_PREFIX>/<stem>.pdf already exists.
  ocr and merge are skipped when merged text from an earlier run of the same
  file (same SHA-256) or the same stem is still in the bucket.

CONFIGURATION (.env):
  GOOGLE_CLOUD_PROJECT_ID   Cloud project (required)
  INPUT_PREFIX              gs://bucket/input (required)
  OUTPUT_PREFIX             gs://bucket/docai-output (required)
  DATE_PREFIX               YYYY-MM-DD partition for fresh runs (default: today)
  LANGUAGE_HINTS            Comma list (default: en,fr,it,la)
  OUTPUT_DIR                Where the EPUB lands (default: output)
  *_COMMAND                 Override a stage command, e.g.
                            CLEANUP_COMMAND=python3 clean.py {input} {output}

EXIT CODES:
  0  EPUB written (or --help / --version)
  1  bad arguments, missing configuration, or a failed stage
"#;

/// Resumable scanned-PDF to EPUB pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "scan2epub",
    version,
    about = "Turn a scanned PDF into an EPUB via cloud OCR, resuming from earlier OCR output",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Scanned PDF to process.
    pdf: PathBuf,

    /// Use the enhanced OCR script (page breaks and language hints).
    #[arg(long, env = "SCAN2EPUB_ENHANCED")]
    enhanced: bool,

    /// Logical volume name; defaults to the file name without `.pdf`.
    #[arg(long)]
    stem: Option<String>,

    /// Env file with the pipeline configuration.
    #[arg(long, env = "SCAN2EPUB_CONFIG", default_value = ".env")]
    config: PathBuf,

    /// Directory for the final EPUB (overrides OUTPUT_DIR).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Serve object-store URIs from this local directory instead of gsutil.
    #[arg(long, env = "SCAN2EPUB_LOCAL_STORE")]
    local_store: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "SCAN2EPUB_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if parse_error_exits_ok(e.kind()) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters, so library INFO logs
    // are muted while it is visible.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", red("✘"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&cli, show_progress)) {
        Ok(report) => {
            print_summary(&cli, &report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {:#}", red("✘"), e);
            ExitCode::FAILURE
        }
    }
}

/// `--help` and `--version` surface as clap errors but are successful exits.
fn parse_error_exits_ok(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

async fn run(cli: &Cli, show_progress: bool) -> Result<PipelineReport> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress)?;

    let store: SharedStore = match cli.local_store {
        Some(ref root) => Arc::new(LocalStore::new(root)),
        None => Arc::new(GsutilStore::new()),
    };

    let pipeline = Pipeline::new(config, store, Arc::new(ProcessRunner));
    pipeline.run(&cli.pdf).await.context("Pipeline failed")
}

/// Map CLI args onto the env-file configuration.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::from_env_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?
        .enhanced(cli.enhanced);

    if let Some(ref stem) = cli.stem {
        builder = builder.stem(stem);
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(cli: &Cli, report: &PipelineReport) {
    if cli.json {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} failed to serialise report: {e}", red("✘")),
        }
        return;
    }
    if cli.quiet {
        return;
    }

    let skipped: Vec<&str> = report
        .stages
        .iter()
        .filter(|r| matches!(r.outcome, StageOutcome::Skipped { .. }))
        .map(|r| r.stage.as_str())
        .collect();
    eprintln!(
        "{}  {}  {}  {}ms",
        green("✔"),
        bold(&report.artifact.display().to_string()),
        dim(&human_size(report.artifact_bytes)),
        report.total_duration_ms,
    );
    eprintln!(
        "   {} ran  /  {} skipped{}",
        report.ran_count(),
        report.skipped_count(),
        if skipped.is_empty() {
            String::new()
        } else {
            dim(&format!("  ({})", skipped.join(", ")))
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan2epub::PipelineError;

    fn parse_exit_ok(args: &[&str]) -> bool {
        match Cli::try_parse_from(args) {
            Ok(_) => true,
            Err(e) => parse_error_exits_ok(e.kind()),
        }
    }

    #[test]
    fn help_and_version_exit_zero_bad_args_exit_one() {
        assert!(parse_exit_ok(&["scan2epub", "--help"]));
        assert!(parse_exit_ok(&["scan2epub", "--version"]));
        assert!(!parse_exit_ok(&["scan2epub"]));
        assert!(!parse_exit_ok(&["scan2epub", "--bogus", "book.pdf"]));
        assert!(parse_exit_ok(&["scan2epub", "book.pdf"]));
    }

    fn cli_with_config(config: &std::path::Path) -> Cli {
        let config = config.to_string_lossy().into_owned();
        Cli::try_parse_from(["scan2epub", "--config", config.as_str(), "book.pdf"]).unwrap()
    }

    #[test]
    fn missing_config_file_fails_with_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with_config(&dir.path().join("absent.env"));

        let err = build_config(&cli, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ConfigNotFound { .. })
        ));
        assert!(format!("{err:#}").contains("absent.env"));
    }

    #[test]
    fn config_without_output_prefix_fails_with_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "GOOGLE_CLOUD_PROJECT_ID=proj\nINPUT_PREFIX=gs://b/in\n").unwrap();
        let cli = cli_with_config(&path);

        let err = build_config(&cli, None).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingConfigKey { key, .. }) => assert_eq!(key, "OUTPUT_PREFIX"),
            other => panic!("expected MissingConfigKey, got {other:?}"),
        }
    }

    #[test]
    fn cli_overrides_land_in_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "GOOGLE_CLOUD_PROJECT_ID=proj\nINPUT_PREFIX=gs://b/in\nOUTPUT_PREFIX=gs://b/out\n",
        )
        .unwrap();
        let config = path.to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "scan2epub",
            "--config",
            config.as_str(),
            "--enhanced",
            "--stem",
            "vol1",
            "book.pdf",
        ])
        .unwrap();

        let cfg = build_config(&cli, None).unwrap();
        assert!(cfg.enhanced);
        assert_eq!(cfg.stem.as_deref(), Some("vol1"));
    }
}
