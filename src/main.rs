use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evidence_eval::db::{migrate, Db};
use evidence_eval::retrieval::Method;
use evidence_eval::{Config, Dataset, Pipeline};
use std::path::PathBuf;

/// SOC 2 evidence retrieval harness.
#[derive(Parser, Debug)]
#[command(name = "evidence-eval", version)]
struct Cli {
    /// Config file (default: $EVIDENCE_EVAL_CONFIG or ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the dataset, run the integrity checks and print corpus statistics.
    Verify,
    /// Print one control's ranked evidence for a method.
    Rank {
        control: String,
        #[arg(long, default_value = "hybrid")]
        method: Method,
        /// Number of entries to print (all when omitted).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Copy the configured dataset into a SQLite evidence store.
    Import { db: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.log_level()),
    )
    .init();

    match cli.command.unwrap_or(Command::Verify) {
        Command::Verify => run_verify(&config).await,
        Command::Rank {
            control,
            method,
            limit,
        } => run_rank(&config, &control, method, limit).await,
        Command::Import { db } => run_import(&config, db).await,
    }
}

/// Validate the dataset and print what the harness would evaluate
async fn run_verify(config: &Config) -> Result<()> {
    log::info!("Starting evidence-eval v{}", env!("CARGO_PKG_VERSION"));

    let dataset = Dataset::load(&config.corpus).await?;
    let (corpus, labels) = dataset
        .into_stores()
        .context("Evidence dataset failed validation")?;

    let empty_pools = corpus.controls().filter(|c| corpus.pool(&c.id).is_empty()).count();
    let unjudged = corpus
        .controls()
        .filter(|c| labels.judgment(&c.id).is_none())
        .count();
    let no_relevant = labels
        .judgments()
        .filter(|j| j.relevant_chunk_ids.is_empty())
        .count();
    let relevant_total: usize = labels.judgments().map(|j| j.relevant_chunk_ids.len()).sum();

    println!("✓ Dataset integrity: OK");
    println!("Controls:               {}", corpus.control_count());
    println!("Evidence chunks:        {}", corpus.len());
    println!("Controls without chunks: {}", empty_pools);
    println!("Judged controls:        {}", labels.len());
    println!("Unjudged controls:      {}", unjudged);
    println!("Judged, none relevant:  {}", no_relevant);
    println!("Relevant labels:        {}", relevant_total);
    println!("Methods configured:     {:?}", config.eval.methods);

    Ok(())
}

async fn run_rank(config: &Config, control_id: &str, method: Method, limit: Option<usize>) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let control = pipeline
        .corpus
        .control(control_id)
        .with_context(|| format!("Unknown control: {}", control_id))?;
    let retriever = pipeline.retriever(method)?;
    let ranked = retriever.rank(control, pipeline.corpus.pool(control_id)).await?;
    let relevant = pipeline.labels.judgment(control_id);

    println!("Control: {} ({})", control.id, method);
    println!("Query:   \"{}\"\n", control.query_text());

    if ranked.is_empty() {
        println!("No evidence chunks for this control.");
        return Ok(());
    }

    for entry in ranked.entries.iter().take(limit.unwrap_or(usize::MAX)) {
        let marker = match relevant {
            Some(j) if j.is_relevant(&entry.chunk_id) => "*",
            _ => " ",
        };
        println!("{} #{:<3} {:<24} score: {:.4}", marker, entry.rank, entry.chunk_id, entry.score);
    }
    if relevant.is_some() {
        println!("\n* = labelled relevant");
    }

    Ok(())
}

async fn run_import(config: &Config, db_path: PathBuf) -> Result<()> {
    let dataset = Dataset::load(&config.corpus).await?;
    dataset
        .clone()
        .into_stores()
        .context("Refusing to import a dataset that fails validation")?;

    let db = Db::new(&db_path);
    dataset.write_sqlite(&db).await?;

    let applied = db
        .with_connection(|conn| migrate::get_applied_migrations(conn))
        .await?;
    log::info!("Schema migrations applied: {:?}", applied);
    println!(
        "Imported {} controls, {} chunks, {} labels into {}",
        dataset.controls.len(),
        dataset.chunks.len(),
        dataset.labels.len(),
        db_path.display()
    );
    Ok(())
}
