use std::collections::HashSet;
use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tenderflow_core::{
    clean_text, summarize, CatalogItem, EvaluationConfig, Pipeline, PipelineRun,
    RfpTicket, SpecNormalizer, TicketStatus,
};
use tenderflow_index::{load_records, HistoryRecord, JsonlWriter, RunSummaryRecord};
use tenderflow_store::{EmbeddingClient, HistoricalPrice, SqliteStore, SqliteVectorIndex};

const DEFAULT_CONFIG: &str = "tenderflow.toml";
const DEFAULT_DB: &str = "tenderflow.sqlite";

#[derive(Parser, Debug)]
#[command(name = "tenderflow", version, about = "Tender evaluation pipeline")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite store; falls back to $TENDERFLOW_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Skip the vector backend and match with rules only.
    #[arg(long = "no-vector", global = true, action = ArgAction::SetTrue)]
    no_vector: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init,
    ImportCatalog {
        input: PathBuf,
        #[arg(long = "no-embed", action = ArgAction::SetTrue)]
        no_embed: bool,
    },
    ImportHistory {
        input: PathBuf,
    },
    Extract {
        input: PathBuf,
        #[arg(long = "rfp-id", default_value = "adhoc")]
        rfp_id: String,
    },
    Match {
        input: PathBuf,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
    },
    Evaluate {
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Batch {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 4)]
        jobs: usize,
    },
    Report,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AppConfig {
    #[serde(flatten)]
    evaluation: EvaluationConfig,
    #[serde(default)]
    vector: VectorDefaults,
}

#[derive(Debug, Deserialize, Serialize)]
struct VectorDefaults {
    #[serde(default = "default_true")]
    enabled: bool,
}

impl Default for VectorDefaults {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let file_config = load_config(&config_path)?;
    file_config
        .evaluation
        .validate()
        .map_err(|e| anyhow!("{}: {e}", config_path.display()))?;
    let db_path = resolve_db_path(cli.db.clone());
    let use_vector = !cli.no_vector && file_config.vector.enabled;

    match cli.command {
        Commands::Init => {
            SqliteStore::open(&db_path)?;
            println!("[tenderflow] Initialized store at {}", db_path.display());
        }
        Commands::ImportCatalog { input, no_embed } => {
            let items: Vec<CatalogItem> = load_records(&input)?;
            validate_catalog(&items)?;
            let store = SqliteStore::open(&db_path)?;
            let embedder = if no_embed {
                None
            } else {
                Some(EmbeddingClient::from_env()?)
            };
            let count = store.upsert_products(&items, embedder.as_ref())?;
            println!(
                "[tenderflow] Imported {} products into {} (embeddings: {})",
                count,
                db_path.display(),
                embedder.as_ref().map(|e| e.provider().as_str()).unwrap_or("none")
            );
        }
        Commands::ImportHistory { input } => {
            let records: Vec<HistoryRecord> = load_records(&input)?;
            let prices: Vec<HistoricalPrice> = records
                .into_iter()
                .filter(|record| {
                    let keep = record.unit_price.is_finite() && record.unit_price > 0.0;
                    if !keep {
                        warn!(sku = %record.sku, price = record.unit_price, "skipping invalid historical price");
                    }
                    keep
                })
                .map(|record| HistoricalPrice {
                    sku: record.sku,
                    unit_price: record.unit_price,
                    awarded_at: record.awarded_at,
                    rfp_id: record.rfp_id,
                })
                .collect();
            let store = SqliteStore::open(&db_path)?;
            let count = store.add_prices(&prices)?;
            println!("[tenderflow] Imported {} historical prices", count);
        }
        Commands::Extract { input, rfp_id } => {
            let text = read_scope(&input)?;
            let spec = SpecNormalizer::new().extract(&rfp_id, &text);
            println!("{}", serde_json::to_string_pretty(&spec)?);
        }
        Commands::Match { input, top_k } => {
            let store = SqliteStore::open(&db_path)?;
            let pipeline = build_pipeline(&store, &file_config, use_vector);
            let text = read_scope(&input)?;
            let rfp_id = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "adhoc".to_string());
            let spec = pipeline.normalizer().extract(&rfp_id, &text);
            let catalog = store.products()?;
            let top_k = top_k.unwrap_or(pipeline.config().matching.top_k);
            let outcome = pipeline.matcher().match_products(&spec, &catalog, top_k);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Evaluate { input, out } => {
            let contents = fs::read_to_string(&input)
                .with_context(|| format!("failed to read ticket {}", input.display()))?;
            let ticket: RfpTicket = serde_json::from_str(&contents)
                .map_err(|e| anyhow!("invalid ticket {}: {e}", input.display()))?;
            let store = SqliteStore::open(&db_path)?;
            let pipeline = build_pipeline(&store, &file_config, use_vector);
            let run = pipeline.run(&prepare_ticket(ticket));
            let json = serde_json::to_string_pretty(&run)?;
            match out {
                Some(path) => {
                    fs::write(&path, &json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    print_run_summary(&run);
                }
                None => println!("{json}"),
            }
            if let Some(failure) = &run.failure {
                bail!(
                    "ticket {} failed during {}: {}",
                    run.rfp_id,
                    failure.stage.as_str(),
                    failure.message
                );
            }
        }
        Commands::Batch { input, out, jobs } => {
            let tickets: Vec<RfpTicket> = load_records(&input)?;
            if tickets.is_empty() {
                return Err(anyhow!("no tickets found in {}", input.display()));
            }
            let store = SqliteStore::open(&db_path)?;
            let pipeline = build_pipeline(&store, &file_config, use_vector);
            let runs = run_batch(&pipeline, tickets, jobs)?;
            let file = File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            let mut writer = JsonlWriter::new(BufWriter::new(file));
            for run in &runs {
                writer.write_record(&RunSummaryRecord::from(run))?;
            }
            writer.flush()?;
            let failed = runs
                .iter()
                .filter(|r| r.status == TicketStatus::Failed)
                .count();
            println!(
                "[tenderflow] Evaluated {} tickets ({} failed) -> {}",
                runs.len(),
                failed,
                out.display()
            );
        }
        Commands::Report => {
            let store = SqliteStore::open(&db_path)?;
            let runs = store.list_runs()?;
            let report = summarize(&runs);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| env::var("TENDERFLOW_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB))
}

fn build_pipeline(store: &SqliteStore, config: &AppConfig, use_vector: bool) -> Pipeline {
    let shared = Arc::new(store.clone());
    let pipeline = Pipeline::new(
        config.evaluation.clone(),
        shared.clone(),
        shared.clone(),
        shared,
    );
    if !use_vector {
        return pipeline;
    }
    info!("vector matching requested");
    // A misconfigured embedder surfaces at the availability check as a rule fallback.
    let index = SqliteVectorIndex::from_env(store.clone());
    pipeline.with_vector_index(Arc::new(index))
}

fn run_batch(pipeline: &Pipeline, tickets: Vec<RfpTicket>, jobs: usize) -> Result<Vec<PipelineRun>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()?;
    let tickets: Vec<RfpTicket> = tickets.into_iter().map(prepare_ticket).collect();
    Ok(pool.install(|| tickets.par_iter().map(|ticket| pipeline.run(ticket)).collect()))
}

fn prepare_ticket(mut ticket: RfpTicket) -> RfpTicket {
    ticket.scope = clean_text(&ticket.scope);
    ticket
}

fn read_scope(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read scope {}", path.display()))?;
    Ok(clean_text(&raw))
}

fn validate_catalog(items: &[CatalogItem]) -> Result<()> {
    let mut seen = HashSet::new();
    for (idx, item) in items.iter().enumerate() {
        if item.sku.trim().is_empty() {
            bail!("catalog item #{} has an empty sku", idx + 1);
        }
        if !seen.insert(item.sku.as_str()) {
            bail!("duplicate sku {} in catalog", item.sku);
        }
    }
    Ok(())
}

fn print_run_summary(run: &PipelineRun) {
    let summary = RunSummaryRecord::from(run);
    let mut out = std::io::stdout().lock();
    let _ = writeln!(
        out,
        "[tenderflow] {} -> {} ({})",
        summary.rfp_id,
        summary.recommendation.as_deref().unwrap_or("-"),
        summary.status
    );
    if let (Some(sku), Some(total)) = (&summary.recommended_sku, summary.total) {
        let _ = writeln!(
            out,
            "  recommended {} total {:.2} {}",
            sku,
            total,
            summary.currency.as_deref().unwrap_or("")
        );
    }
    for issue in &summary.issues {
        let _ = writeln!(out, "  issue: {issue}");
    }
}
