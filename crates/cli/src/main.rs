//! Binary entry point for the subtitle translator.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use subrelay_core::archive::{archive_entries, output_name, write_zip};
use subrelay_core::encoding::decode;
use subrelay_core::translate::google::GoogleTranslator;
use subrelay_core::{
    srt, CancelToken, EngineConfig, FileStatus, FileTranslationResult, Pipeline, Progress,
    SourceDocument,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line options for the binary.
#[derive(Parser)]
#[command(version, about = "Translate SRT subtitle files through a rate-limited provider")]
struct Cli {
    /// Only print statistics for the inputs, without translating.
    #[arg(long)]
    inspect: bool,

    /// Enable verbose debug and trace logs.
    #[arg(long)]
    debug: bool,

    /// TOML file with engine settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target language code sent to the provider.
    #[arg(long)]
    target: Option<String>,

    /// Suffix for output file names, e.g. `vietnamese` in `movie_vietnamese.srt`.
    #[arg(long)]
    tag: Option<String>,

    /// Number of distinct lines per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of rate-limited request slots.
    #[arg(long)]
    slots: Option<usize>,

    /// Stop starting new batches and files after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Directory for translated files; defaults to next to each input.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Write all translated files into this zip archive instead.
    #[arg(long)]
    zip: Option<PathBuf>,

    /// Write a JSON summary of every file's outcome here.
    #[arg(long)]
    report: Option<PathBuf>,

    /// SRT files to process.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

/// Forwards engine progress to the log.
struct LogProgress;

impl Progress for LogProgress {
    fn status(&self, message: &str) {
        info!("{message}");
    }

    fn overall(&self, fraction: f64, message: &str) {
        info!("[{:>3.0}%] {message}", fraction * 100.0);
    }
}

/// One line of the JSON report.
#[derive(Serialize)]
struct ReportLine<'a> {
    filename: &'a str,
    status: FileStatus,
    subtitle_count: usize,
    translated: usize,
    fallbacks: usize,
    error: Option<&'a str>,
}

/// Application entry point which parses CLI args and performs actions.
/// This function should initialize logging and delegate to the core library.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::default()
            .add_directive("subrelay=trace".parse()?)
            .add_directive("subrelay_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("subrelay=info".parse()?)
            .add_directive("subrelay_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    let documents = read_documents(&cli.inputs)?;
    if cli.inspect {
        inspect(&documents);
        return Ok(());
    }

    let cancel = match cli.timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing the current batch");
            on_interrupt.cancel();
        }
    });

    let translator = GoogleTranslator::new()?;
    let pipeline = Pipeline::new(translator, &config, cancel);
    let started = Instant::now();
    let results = pipeline.translate_collection(&documents, &LogProgress).await;
    let elapsed = started.elapsed();

    if let Some(path) = &cli.zip {
        let entries = archive_entries(&results, &config.language_tag);
        let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        write_zip(&entries, file)?;
        info!("wrote {} files to {}", entries.len(), path.display());
    } else {
        for path in write_outputs(&cli.inputs, &results, &config.language_tag, cli.out_dir.as_deref())? {
            info!("wrote {}", path.display());
        }
    }
    if let Some(path) = &cli.report {
        write_report(path, &results)?;
    }
    summarize(&results, elapsed);
    Ok(())
}

/// Start from the config file (or defaults) and apply flag overrides.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(target) = &cli.target {
        config.target_language = target.clone();
    }
    if let Some(tag) = &cli.tag {
        config.language_tag = tag.clone();
    }
    if let Some(size) = cli.batch_size {
        config.dispatch.batch_size = size;
    }
    if let Some(slots) = cli.slots {
        config.limiter.slots = slots;
    }
    config.validate()?;
    Ok(config)
}

/// Read and decode every input, keeping only the file name as document name.
fn read_documents(inputs: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    inputs
        .iter()
        .map(|path| {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let (content, encoding) = decode(&bytes);
            tracing::debug!("{} decoded as {:?}", path.display(), encoding);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(SourceDocument::new(name, content))
        })
        .collect()
}

/// Log line count, duration and character count for each document.
fn inspect(documents: &[SourceDocument]) {
    for doc in documents {
        match srt::parse(&doc.content) {
            Ok(parsed) => {
                let stats = parsed.stats();
                info!(
                    "{}: {} lines, {}, {} characters",
                    doc.name,
                    stats.entries,
                    format_duration(stats.duration),
                    stats.characters
                );
            }
            Err(err) => warn!("{}: {}", doc.name, err),
        }
    }
}

/// Write each successful result as `{stem}_{tag}.srt`, either into `out_dir`
/// or next to its input. `inputs` and `results` are in the same order.
fn write_outputs(
    inputs: &[PathBuf],
    results: &[FileTranslationResult],
    tag: &str,
    out_dir: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (input, result) in inputs.iter().zip(results) {
        let Some(content) = result.content.as_deref().filter(|_| result.is_success()) else {
            continue;
        };
        let name = output_name(&result.filename, tag);
        let path = match out_dir {
            Some(dir) => dir.join(name),
            None => input.with_file_name(name),
        };
        fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn write_report(path: &Path, results: &[FileTranslationResult]) -> Result<()> {
    let lines: Vec<ReportLine> = results
        .iter()
        .map(|r| ReportLine {
            filename: &r.filename,
            status: r.status,
            subtitle_count: r.subtitle_count,
            translated: r.translated,
            fallbacks: r.fallbacks.len(),
            error: r.error.as_deref(),
        })
        .collect();
    fs::write(path, serde_json::to_string_pretty(&lines)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Log success and error counts together with throughput.
fn summarize(results: &[FileTranslationResult], elapsed: Duration) {
    let succeeded: Vec<&FileTranslationResult> = results.iter().filter(|r| r.is_success()).collect();
    let lines: usize = succeeded.iter().map(|r| r.subtitle_count).sum();
    let secs = elapsed.as_secs_f64();
    let per_minute = if secs > 0.0 { lines as f64 * 60.0 / secs } else { 0.0 };
    info!(
        "{}/{} files translated in {:.1}s ({:.0} lines/minute)",
        succeeded.len(),
        results.len(),
        secs,
        per_minute
    );
    for failed in results.iter().filter(|r| !r.is_success()) {
        warn!(
            "{}: {}",
            failed.filename,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Format a duration as `H:MM:SS`.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
