//! bidctl: run bid comparisons, level baselines and build training data
//! from the command line.

mod config;
mod snapshot;

use anyhow::{bail, Context, Result};
use bid_comparison::leveling::validate_baseline;
use bid_comparison::{
    level, score_batch, validate_jsonl, AnalysisRequest, BidDocument, ComparisonPipeline,
    ComparisonResult, ContractorBid, DocumentStatus, DocumentStore, ExportConfig,
    ExportManager, ItemBaseline, LevelingReport, MemoryStore, ModerationStatus, OpenAI,
    PipelineConfig, TracingMetrics, TrainingContribution,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::Config;
use crate::snapshot::{BaselineEdit, Snapshot};

#[derive(Parser)]
#[command(name = "bidctl")]
#[command(about = "Subcontractor bid comparison CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare every bid text file in a directory
    Analyze {
        /// Directory of .txt/.md bid texts, one file per contractor
        dir: PathBuf,

        /// Trade being compared (drywall, electrical, ...)
        #[arg(short, long)]
        trade: String,

        /// Where to write the comparison snapshot
        #[arg(short, long, default_value = "comparison.json")]
        snapshot: PathBuf,

        /// Documents extracted in parallel (overrides BID_EXTRACTION_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Set or clear baseline quantities on a snapshot and re-level
    Level {
        snapshot: PathBuf,

        /// key=contractor:quantity[:unit]
        #[arg(long = "set")]
        set: Vec<BaselineEdit>,

        /// Item key whose baseline to remove
        #[arg(long = "clear")]
        clear: Vec<String>,
    },

    /// Score corrections for training quality
    Score { contributions: PathBuf },

    /// Export approved, high-quality corrections as JSONL
    Export {
        contributions: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value_t = 0.8)]
        min_score: f64,

        #[arg(long, default_value_t = 1000)]
        max_examples: usize,

        /// Only these trades
        #[arg(long = "trade")]
        trades: Vec<String>,

        /// Embed id, trade, type and score in each line
        #[arg(long)]
        metadata: bool,
    },

    /// Check a JSONL training file
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            dir,
            trade,
            snapshot,
            concurrency,
        } => cmd_analyze(&dir, &trade, &snapshot, concurrency).await,
        Commands::Level {
            snapshot,
            set,
            clear,
        } => cmd_level(&snapshot, &set, &clear),
        Commands::Score { contributions } => cmd_score(&contributions),
        Commands::Export {
            contributions,
            output,
            min_score,
            max_examples,
            trades,
            metadata,
        } => {
            let config = ExportConfig::default()
                .with_min_quality(min_score)
                .with_max_examples(max_examples)
                .with_trades(trades)
                .with_metadata(metadata);
            cmd_export(&contributions, &output, &config).await
        }
        Commands::Validate { file } => cmd_validate(&file),
    }
}

// ============================================================================
// Analyze
// ============================================================================

/// Bid texts in `dir`, sorted by file name.
fn read_bid_files(dir: &Path) -> Result<Vec<(String, String, String)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !matches!(ext, "txt" | "md") {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push((name, ext.to_string(), text));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

async fn cmd_analyze(
    dir: &Path,
    trade: &str,
    snapshot_path: &Path,
    concurrency: Option<usize>,
) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    let files = read_bid_files(dir)?;
    if files.is_empty() {
        bail!("No .txt or .md bid files in {}", dir.display());
    }

    let project_id = Uuid::new_v4();
    let store = MemoryStore::new();
    for (name, ext, text) in files {
        store.insert_document(
            BidDocument::new(project_id, name)
                .with_text(text)
                .with_file_type(ext),
        );
    }

    // A missing key surfaces as a precondition failure before any document is touched
    let mut openai = OpenAI::new(config.openai_api_key.clone().unwrap_or_default())
        .with_model(&config.openai_model);
    if let Some(url) = &config.openai_base_url {
        openai = openai.with_base_url(url);
    }

    let pipeline_config = PipelineConfig::default()
        .with_model(&config.openai_model)
        .with_concurrency(concurrency.unwrap_or(config.extraction_concurrency));
    let pipeline = ComparisonPipeline::new(store, openai)
        .with_config(pipeline_config)
        .with_metrics(TracingMetrics);

    let result = pipeline
        .run(&AnalysisRequest::new(project_id, trade))
        .await
        .context("Comparison failed")?;

    let store = pipeline.into_store();
    let mut bids = Vec::new();
    for document in store.list_documents(project_id).await? {
        if document.status != DocumentStatus::Processed {
            println!(
                "{} {}: {}",
                "✗".red(),
                document.contractor_name,
                document.error_message.as_deref().unwrap_or("failed")
            );
            continue;
        }
        bids.push(ContractorBid {
            contractor_id: document.contractor_id(),
            items: store.list_items(document.id).await?,
            contractor_name: document.contractor_name,
        });
    }

    print_result(&result);

    let snapshot = Snapshot {
        project_id,
        trade_type: trade.to_string(),
        result,
        bids,
        baselines: Default::default(),
    };
    snapshot.save(snapshot_path)?;
    println!("\nSnapshot written to {}", snapshot_path.display());

    Ok(())
}

fn print_result(result: &ComparisonResult) {
    println!("\n{}", "Bid comparison".bold());
    println!(
        "  {} items, {} common, {} scope gaps, match rate {:.0}%",
        result.total_items,
        result.common_items_count,
        result.scope_gaps_count,
        result.match_rate * 100.0
    );

    let recommendation = result.recommendation.as_ref();
    for summary in &result.contractors {
        let estimate = recommendation.and_then(|r| r.price_analysis.estimate_for(summary.contractor_id));
        let marker = if recommendation.and_then(|r| r.recommended_contractor_id)
            == Some(summary.contractor_id)
        {
            "★".bright_green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {} {:<28} base ${:>12.2}  true cost ${:>12.2}  {} exclusions, {} gaps",
            marker,
            summary.contractor_name,
            summary.base_bid,
            estimate.map(|e| e.estimated_true_cost).unwrap_or(summary.base_bid),
            summary.exclusions_count,
            summary.scope_gaps_count
        );
    }

    if let Some(r) = recommendation {
        println!(
            "\n{} {} ({:?} confidence)",
            "Recommended:".bold(),
            r.recommended_contractor_name.as_deref().unwrap_or("none"),
            r.confidence
        );
        println!("  {}", r.reasoning);
        for warning in &r.warnings {
            println!("  {} {}", "!".yellow(), warning.message);
        }
    }
}

// ============================================================================
// Level
// ============================================================================

fn cmd_level(path: &Path, set: &[BaselineEdit], clear: &[String]) -> Result<()> {
    let mut snapshot = Snapshot::load(path)?;
    let edited = !set.is_empty() || !clear.is_empty();

    for key in clear {
        if snapshot.baselines.remove(key).is_none() {
            println!("{} no baseline for '{}'", "·".dimmed(), key);
        }
    }
    for edit in set {
        let quantity = validate_baseline(&edit.item_key, Some(edit.quantity))?;
        let contractor_id = snapshot.contractor_id(&edit.contractor)?;
        let mut baseline = ItemBaseline::new(&edit.item_key, contractor_id, quantity);
        baseline.unit = edit.unit.clone();
        snapshot.baselines.insert(baseline);
    }

    let report = level(&snapshot.bids, &snapshot.baselines);
    print_leveling(&snapshot, &report);

    if edited {
        let version = snapshot.baselines.version() + 1;
        snapshot.baselines = snapshot.baselines.clone().with_version(version);
        snapshot.save(path)?;
    }
    Ok(())
}

fn print_leveling(snapshot: &Snapshot, report: &LevelingReport) {
    println!("{}", "Leveled totals".bold());
    for baseline in snapshot.baselines.iter() {
        println!(
            "  baseline {} = {} {}",
            baseline.item_key,
            baseline.quantity,
            baseline.unit.as_deref().unwrap_or("")
        );
    }
    for totals in &report.totals {
        let change = format!("{:+.1}%", totals.percent_difference);
        println!(
            "  {:<28} as bid ${:>12.2}  leveled ${:>12.2}  {}",
            totals.contractor_name,
            totals.as_bid_total,
            totals.leveled_total,
            if totals.difference.abs() < 0.005 {
                change.normal()
            } else {
                change.yellow()
            }
        );
    }
    if report.ranking_changed {
        println!("{}", "Leveling changed the contractor ranking".bright_yellow());
    }
}

// ============================================================================
// Training data
// ============================================================================

fn load_contributions(path: &Path) -> Result<Vec<TrainingContribution>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn cmd_score(path: &Path) -> Result<()> {
    let contributions = load_contributions(path)?;
    let scores = score_batch(&contributions);

    for contribution in &contributions {
        let Some(quality) = scores.get(&contribution.id) else {
            continue;
        };
        let score = format!("{:.2}", quality.score);
        println!(
            "{} {:<15} {} {}",
            if quality.is_high_quality {
                score.green()
            } else {
                score.red()
            },
            contribution.correction_type.as_str(),
            contribution.trade_type,
            contribution.id.to_string().dimmed()
        );
        for note in &quality.notes {
            println!("      {}", note.dimmed());
        }
    }

    let high = scores.values().filter(|q| q.is_high_quality).count();
    println!("\n{}/{} high quality", high, contributions.len());
    Ok(())
}

async fn cmd_export(path: &Path, output: &Path, config: &ExportConfig) -> Result<()> {
    let contributions = load_contributions(path)?;
    let pending = contributions
        .iter()
        .filter(|c| c.moderation_status != ModerationStatus::Approved)
        .count();
    if pending > 0 {
        tracing::warn!(skipped = pending, "Skipping corrections that are not approved");
    }

    let store = MemoryStore::new();
    for contribution in contributions {
        store.insert_contribution(contribution);
    }

    let export = ExportManager::new(store)
        .export(config)
        .await
        .context("Export failed")?;
    fs::write(output, &export.jsonl)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let stats = &export.stats;
    println!(
        "{} {} examples written to {} (mean quality {:.2})",
        "✓".green(),
        stats.total_examples,
        output.display(),
        stats.average_quality_score
    );
    for (trade, count) in &stats.by_trade {
        println!("  trade {:<20} {}", trade, count);
    }
    for (kind, count) in &stats.by_correction_type {
        println!("  type  {:<20} {}", kind, count);
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let check = validate_jsonl(&text);

    for error in &check.errors {
        println!("{} {}", "✗".red(), error);
    }
    if !check.valid {
        bail!(
            "{} is invalid: {} problems in {} examples",
            path.display(),
            check.errors.len(),
            check.total_examples
        );
    }

    println!("{} {} examples valid", "✓".green(), check.total_examples);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bid_files_skips_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("crown.txt"), "Crown bid").unwrap();
        fs::write(dir.path().join("acme.md"), "Acme bid").unwrap();
        fs::write(dir.path().join("notes.pdf"), "binary").unwrap();

        let files = read_bid_files(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.0.as_str()).collect();
        assert_eq!(names, vec!["acme", "crown"]);
        assert_eq!(files[0].1, "md");
    }

    #[test]
    fn test_cli_parses_level_edits() {
        let cli = Cli::try_parse_from([
            "bidctl",
            "level",
            "snap.json",
            "--set",
            "Hang board=Acme:1000:SF",
            "--clear",
            "Tape",
        ])
        .unwrap();
        match cli.command {
            Commands::Level { set, clear, .. } => {
                assert_eq!(set.len(), 1);
                assert_eq!(set[0].quantity, 1000.0);
                assert_eq!(clear, vec!["Tape".to_string()]);
            }
            _ => panic!("expected level"),
        }
    }
}
