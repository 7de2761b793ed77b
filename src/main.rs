mod cli;
mod config;
mod detect;
mod diff;
mod enumerate;
mod hasher;
mod proof;
mod report;
mod snapshot;
mod store;
mod util;

use anyhow::Context;
use cli::{Cli, Command, LogLevel};
use config::TrackerConfig;
use detect::{CommitStatus, DetectOptions, Detection, detect_changes, scan};
use proof::{ProofDocument, generate_proof, verify_proof};
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use store::{STATE_DIR, StateOrigin};
use tracing::{Event, Level, Subscriber, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

const CONFIG_FILE: &str = "config.toml";

struct ProofExitCode;

impl ProofExitCode {
    /// Exit code used when status finds changes or verify finds discrepancies.
    fn status_unclean() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used when a proof cannot be compared at all.
    fn cannot_verify() -> ExitCode {
        ExitCode::from(2)
    }

    /// Exit code used for other errors (I/O errors, invalid arguments, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_level);

    // Change working directory if -C was specified
    if let Some(directory) = &cli.directory
        && let Err(e) = std::env::set_current_dir(directory)
    {
        error!(
            "Failed to change directory to {}: {}",
            directory.display(),
            e
        );
        return ProofExitCode::any_error();
    }

    match run(cli) {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err:#}");
            ProofExitCode::any_error()
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let root = std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .context("Cannot determine project root")?;
    let config = load_config(&root, cli.config.as_deref(), cli.detector.as_deref())?;

    match cli.command {
        Command::Status { diff } => handle_status(&root, &config, diff),
        Command::Update {
            fingerprint,
            dry_run,
        } => handle_update(&root, &config, fingerprint, dry_run),
        Command::Prove { output, label } => handle_prove(&root, &config, output, label),
        Command::Verify { proof } => handle_verify(&root, &config, &proof),
    }
}

fn load_config(
    root: &Path,
    explicit: Option<&Path>,
    detector: Option<&str>,
) -> anyhow::Result<TrackerConfig> {
    let config = match explicit {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("Cannot load configuration {}", path.display()))?,
        None => {
            let default_path = root.join(STATE_DIR).join(CONFIG_FILE);
            if default_path.is_file() {
                TrackerConfig::load(&default_path).with_context(|| {
                    format!("Cannot load configuration {}", default_path.display())
                })?
            } else {
                TrackerConfig::default()
            }
        }
    };

    Ok(match detector {
        Some(id) => config.with_detector_id(id)?,
        None => config,
    })
}

fn handle_status(root: &Path, config: &TrackerConfig, diff: bool) -> anyhow::Result<ExitCode> {
    let options = DetectOptions {
        commit: false,
        dry_run: false,
        fingerprint: None,
    };
    let detection = detect_changes(root, config, options)?;
    log_detection_notes(&detection, config);

    if detection.changes.is_empty() {
        info!("No changes for detector {}", config.detector_id);
        return Ok(ExitCode::SUCCESS);
    }

    report::print_changes(&detection.changes, diff);

    println!();
    println!("Fingerprint: {}", detection.fingerprint);

    info!(
        "Run 'treeproof update --fingerprint {}' to accept these changes.",
        detection.fingerprint
    );

    Ok(ProofExitCode::status_unclean())
}

fn handle_update(
    root: &Path,
    config: &TrackerConfig,
    fingerprint: Option<String>,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    let options = DetectOptions {
        commit: true,
        dry_run,
        fingerprint,
    };
    let detection = detect_changes(root, config, options)?;
    log_detection_notes(&detection, config);

    report::print_changes(&detection.changes, false);

    match detection.commit {
        CommitStatus::Committed => {
            info!(
                "Recorded {} files ({} changes) for detector {}",
                detection.snapshot.files.len(),
                detection.changes.len(),
                config.detector_id
            );
            Ok(ExitCode::SUCCESS)
        }
        CommitStatus::DryRun => {
            info!("DRY RUN - no state was written");
            Ok(ExitCode::SUCCESS)
        }
        CommitStatus::Failed(e) => {
            error!("New state was not saved, the next run will report these changes again: {e}");
            Ok(ProofExitCode::any_error())
        }
        CommitStatus::NotRequested => Ok(ExitCode::SUCCESS),
    }
}

fn log_detection_notes(detection: &Detection, config: &TrackerConfig) {
    if detection.previous_origin != StateOrigin::Stored {
        info!(
            "No usable state for detector {}, every file is reported as added",
            config.detector_id
        );
    }
    if !detection.skipped.is_empty() {
        warn!(
            "{} files could not be hashed and are left out of this comparison",
            detection.skipped.len()
        );
    }
}

fn handle_prove(
    root: &Path,
    config: &TrackerConfig,
    output: Option<PathBuf>,
    label: Option<String>,
) -> anyhow::Result<ExitCode> {
    let exclude = output.as_deref().map(|path| resolve_in_root(root, path));
    let build = scan(root, config, exclude.as_deref())?;
    if build.warning_count() > 0 {
        warn!(
            "{} files could not be hashed and are missing from the proof",
            build.warning_count()
        );
    }

    let label = label.unwrap_or_else(|| default_label(root));
    let proof = generate_proof(&build.snapshot, &label);

    match output {
        Some(path) => {
            proof.save(&path)?;
            info!(
                "Wrote proof for {} files to {}",
                proof.file_count,
                path.display()
            );
        }
        None => print!("{}", proof.to_toml()?),
    }

    Ok(ExitCode::SUCCESS)
}

fn handle_verify(root: &Path, config: &TrackerConfig, path: &Path) -> anyhow::Result<ExitCode> {
    let proof = match ProofDocument::load(path) {
        Ok(proof) => proof,
        Err(e) => {
            error!("Cannot verify {}: {e}", path.display());
            return Ok(ProofExitCode::cannot_verify());
        }
    };

    // Select and hash files the way the proof was generated.
    let proof_config = TrackerConfig {
        detector_id: proof.detector_id.clone(),
        hash_algorithm: proof.config.hash_algorithm,
        normalize_line_endings: proof.config.normalize_line_endings,
        watch_patterns: proof.config.watch_patterns.clone(),
        ignore_patterns: proof.config.ignore_patterns.clone(),
        max_parallelism: config.max_parallelism,
    };
    let proof_path = resolve_in_root(root, path);
    let build = scan(root, &proof_config, Some(proof_path.as_path()))?;

    let verification = match verify_proof(&proof, &build.snapshot) {
        Ok(verification) => verification,
        Err(e) => {
            error!("Cannot verify {}: {e}", path.display());
            return Ok(ProofExitCode::cannot_verify());
        }
    };

    if verification.verified {
        info!(
            "Verification successful: {} files match {}",
            proof.file_count,
            path.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    report::print_discrepancies(&verification.discrepancies);

    error!(
        "Verification failed: {} discrepancies against {}",
        verification.discrepancies.len(),
        path.display()
    );
    Ok(ProofExitCode::status_unclean())
}

/// Absolute form of a user supplied path, for comparing against listed files.
fn resolve_in_root(root: &Path, path: &Path) -> PathBuf {
    let joined = root.join(path);
    joined.canonicalize().unwrap_or(joined)
}

fn default_label(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

fn filter_directive(verbose: u8, log_level: Option<LogLevel>) -> Option<&'static str> {
    match (log_level, verbose) {
        (Some(level), _) => Some(level.as_str()),
        (None, 0) => None,
        (None, 1) => Some("info"),
        (None, _) => Some("debug"),
    }
}

fn init_tracing(verbose: u8, log_level: Option<LogLevel>) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter { stderr_is_terminal };

    let filter = match filter_directive(verbose, log_level) {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::TRACE => write!(writer, "🔬 ")?,
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
            }
        } else {
            match *event.metadata().level() {
                Level::TRACE => writer.write_str("TRACE: ")?,
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
