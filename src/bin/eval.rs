//! Evaluation CLI: run every method over every judged control and report P@5, R@10, MRR.

use clap::Parser;
use evidence_eval::eval::{EvalReport, MetricSummary, Thresholds};
use evidence_eval::{Config, Pipeline};
use std::path::PathBuf;

/// Evaluate keyword, embedding and hybrid evidence retrieval.
#[derive(Parser, Debug)]
#[command(name = "eval")]
struct Args {
    /// Config file (default: $EVIDENCE_EVAL_CONFIG or ./config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the full JSON report to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also print one line per control and method.
    #[arg(long)]
    verbose: bool,
}

fn format_metric(summary: &MetricSummary) -> String {
    match summary.mean {
        Some(mean) => format!("{:.3} ({})", mean, summary.defined),
        None => "n/a".to_string(),
    }
}

fn format_exclusions(summary: &MetricSummary) -> String {
    if summary.exclusions.is_empty() {
        return "-".to_string();
    }
    summary
        .exclusions
        .iter()
        .map(|(kind, count)| format!("{}={}", kind, count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_report(report: &EvalReport, verbose: bool) {
    if verbose {
        for record in &report.records {
            println!(
                "  {:<12} {:<9} P@5={:<8} R@10={:<8} RR={}",
                record.control_id,
                record.method.as_str(),
                fmt_value(record.precision_at_5.value()),
                fmt_value(record.recall_at_10.value()),
                fmt_value(record.mrr.value()),
            );
        }
        for unavailable in &report.unavailable {
            println!(
                "  {:<12} {:<9} excluded: {}",
                unavailable.control_id,
                unavailable.method.as_str(),
                unavailable.reason
            );
        }
        println!();
    }

    println!("=== Evaluation Results ({} controls) ===", report.controls);
    if !report.unjudged.is_empty() {
        println!(
            "Not scored (no relevance judgment): {} controls",
            report.unjudged.len()
        );
    }
    if let Some(model) = &report.embedding_model {
        println!("Embedding model: {}", model);
    }
    println!(
        "{:<10} {:<14} {:<14} {:<14} {}",
        "method", "P@5", "R@10", "MRR", "excluded (P@5 / R@10 / MRR)"
    );
    for summary in report.summaries.values() {
        println!(
            "{:<10} {:<14} {:<14} {:<14} {} / {} / {}",
            summary.method.as_str(),
            format_metric(&summary.precision_at_5),
            format_metric(&summary.recall_at_10),
            format_metric(&summary.mrr),
            format_exclusions(&summary.precision_at_5),
            format_exclusions(&summary.recall_at_10),
            format_exclusions(&summary.mrr),
        );
    }
}

fn fmt_value(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "excl".to_string())
}

fn print_thresholds(thresholds: &Thresholds, failures: &[String]) {
    if failures.is_empty() {
        println!(
            "\nAll metrics pass (P@5 >= {}, R@10 >= {}, MRR >= {}).",
            fmt_threshold(thresholds.min_precision),
            fmt_threshold(thresholds.min_recall),
            fmt_threshold(thresholds.min_mrr)
        );
    } else {
        println!("\nMetrics below threshold:");
        for failure in failures {
            println!("  {}", failure);
        }
    }
}

fn fmt_threshold(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.log_level()),
    )
    .init();

    let pipeline = Pipeline::from_config(&config).await?;
    let harness = pipeline.harness()?;

    log::info!(
        "Evaluating {} controls ({} chunks) with methods {:?}",
        pipeline.corpus.control_count(),
        pipeline.corpus.len(),
        harness.methods()
    );

    let report = harness.run().await?;
    print_report(&report, args.verbose);

    if let Some((hits, misses)) = pipeline.cache_stats() {
        log::info!("Embedding cache: {} hits, {} misses", hits, misses);
    }

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
        println!("\nReport written to {}", path.display());
    }

    let thresholds = config.eval.thresholds;
    let failures = report.check(&thresholds);
    if thresholds == Thresholds::default() {
        return Ok(());
    }
    print_thresholds(&thresholds, &failures);
    if !failures.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}
