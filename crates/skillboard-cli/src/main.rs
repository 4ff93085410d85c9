use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use skillboard_client::{HttpUpstream, SOURCE_NAMES, SourceProfile};
use skillboard_core::config::Preset;
use skillboard_core::identifier::identifiers_from_csv;
use skillboard_core::models::{BatchReport, FetchResult};
use skillboard_core::orchestrator::{BatchProgress, BulkFetchOrchestrator, TracingBatchReporter};

#[derive(Parser)]
#[command(name = "skillboard", version, about = "Bulk coding-profile fetcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one profile and print it as JSON
    Fetch {
        /// Upstream source (codechef, leetcode, github, codeforces)
        #[arg(short, long)]
        source: String,

        /// Username, handle or repo slug
        #[arg(short, long)]
        username: String,
    },

    /// Fetch every identifier in the first column of a CSV file
    Bulk {
        /// Upstream source (codechef, leetcode, github, codeforces)
        #[arg(short, long)]
        source: String,

        /// CSV file whose first column holds the identifiers
        #[arg(short, long)]
        file: PathBuf,

        /// Throughput preset (conservative, balanced, aggressive, testing)
        #[arg(short, long, env = "SKILLBOARD_PRESET")]
        preset: Option<Preset>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Write results here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the known sources and their configured endpoints
    Sources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("skillboard=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch { source, username } => {
            let orchestrator = build_orchestrator(&source, None)?;
            cmd_fetch(&orchestrator, &username).await?;
        }
        Commands::Bulk {
            source,
            file,
            preset,
            format,
            output,
        } => {
            let orchestrator = build_orchestrator(&source, preset)?;
            cmd_bulk(&orchestrator, &file, format, output.as_deref()).await?;
        }
        Commands::Sources => cmd_sources()?,
    }

    Ok(())
}

fn resolve_source(name: &str) -> Result<SourceProfile> {
    SourceProfile::by_name(name).with_context(|| {
        format!(
            "Unknown source '{name}'. Available: {}",
            SOURCE_NAMES.join(", ")
        )
    })
}

fn build_orchestrator(
    source: &str,
    preset: Option<Preset>,
) -> Result<BulkFetchOrchestrator<HttpUpstream>> {
    let profile = resolve_source(source)?;
    let mut config = profile
        .orchestrator_config()
        .map_err(|e| anyhow::anyhow!(e))?;
    if let Some(preset) = preset {
        tracing::info!(%preset, "Applying preset");
        config = config.with_preset(preset);
    }

    let upstream = profile
        .upstream(config.request_timeout)
        .map_err(|e| anyhow::anyhow!(e))?;
    BulkFetchOrchestrator::new(upstream, config).map_err(|e| anyhow::anyhow!(e))
}

async fn cmd_fetch(orchestrator: &BulkFetchOrchestrator<HttpUpstream>, username: &str) -> Result<()> {
    let result = orchestrator
        .fetch_one(username)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        anyhow::bail!("Fetch failed for '{}'", result.identifier());
    }
    Ok(())
}

#[derive(Serialize)]
struct BulkOutput<'a> {
    report: &'a BatchReport,
    results: &'a [FetchResult],
}

async fn cmd_bulk(
    orchestrator: &BulkFetchOrchestrator<HttpUpstream>,
    file: &Path,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let raw = read_identifiers(file)?;
    tracing::info!(rows = raw.len(), file = %file.display(), "Loaded identifiers");

    // Ctrl-C stops new attempts; identifiers not yet tried come back as cancelled.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling remaining identifiers");
            on_interrupt.cancel();
        }
    });

    let progress = BatchProgress::new();
    let outcome = orchestrator
        .fetch_batch_with_progress(&raw, &progress, &TracingBatchReporter, cancel)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    match format {
        OutputFormat::Json => {
            let body = BulkOutput {
                report: &outcome.report,
                results: &outcome.results,
            };
            serde_json::to_writer_pretty(&mut writer, &body)?;
            writeln!(writer)?;
        }
        OutputFormat::Csv => write_csv_summary(&outcome.results, &mut writer)?,
    }
    writer.flush()?;

    Ok(())
}

fn read_identifiers(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    identifiers_from_csv(file).map_err(|e| anyhow::anyhow!(e))
}

/// One row per identifier: `identifier,status,reason,message`.
fn write_csv_summary<W: Write>(results: &[FetchResult], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["identifier", "status", "reason", "message"])?;

    for result in results {
        match result {
            FetchResult::Success { identifier, .. } => {
                csv_writer.write_record([identifier.as_str(), "success", "", ""])?;
            }
            FetchResult::Failure {
                identifier,
                reason,
                message,
            } => {
                csv_writer.write_record([
                    identifier.as_str(),
                    "error",
                    reason.as_str(),
                    message.as_str(),
                ])?;
            }
        }
    }

    csv_writer.flush()?;
    Ok(())
}

fn cmd_sources() -> Result<()> {
    for profile in SourceProfile::all() {
        let config = profile
            .orchestrator_config()
            .map_err(|e| anyhow::anyhow!(e))?;
        println!("{}", profile.name);
        for endpoint in &config.endpoints {
            println!("  {endpoint}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use skillboard_core::error::AppError;

    use super::*;

    #[test]
    fn test_read_identifiers_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "handle,name").unwrap();
        writeln!(file, "tourist,Gennady").unwrap();
        writeln!(file, " Petr ,Petr").unwrap();

        let raw = read_identifiers(file.path()).unwrap();
        assert_eq!(raw, vec!["handle", "tourist", "Petr"]);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = read_identifiers(Path::new("/nonexistent/handles.csv")).unwrap_err();
        assert!(err.to_string().contains("handles.csv"));
    }

    #[test]
    fn test_csv_summary_rows() {
        let results = vec![
            FetchResult::success("alice", serde_json::json!({"rating": 1500})),
            FetchResult::failure("ghost", &AppError::NotFound("user not found".into())),
        ];
        let mut out = Vec::new();
        write_csv_summary(&results, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "identifier,status,reason,message");
        assert_eq!(lines[1], "alice,success,,");
        assert_eq!(lines[2], "ghost,error,not_found,Not found: user not found");
    }

    #[test]
    fn test_unknown_source_lists_alternatives() {
        let err = resolve_source("topcoder").unwrap_err();
        assert!(err.to_string().contains("codeforces"));
    }

    #[test]
    fn test_cli_parses_bulk_arguments() {
        let cli = Cli::try_parse_from([
            "skillboard",
            "bulk",
            "--source",
            "codechef",
            "--file",
            "handles.csv",
            "--preset",
            "conservative",
            "--format",
            "csv",
        ])
        .unwrap();

        match cli.command {
            Commands::Bulk {
                source,
                preset,
                format,
                ..
            } => {
                assert_eq!(source, "codechef");
                assert_eq!(preset, Some(Preset::Conservative));
                assert_eq!(format, OutputFormat::Csv);
            }
            _ => panic!("expected bulk command"),
        }
    }
}
