//! `ingest-batch`: run one batch through the ingestion pipeline.
//!
//! Reads a JSON array of records, runs it against the in-memory stores (or
//! PostgreSQL with the `postgres` feature) and prints the result as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use matchday_ingest::{
    Batch, DataType, IngestionPipeline, InMemoryRelationalStore, InMemoryVectorStore,
    PipelineConfig, Record, RelationalStore, Strategy,
};

#[derive(Debug, Parser)]
#[command(name = "ingest-batch", about = "Validate, normalize and persist one batch of soccer records")]
struct Args {
    /// JSON file holding an array of records
    #[arg(long)]
    input: PathBuf,

    /// Entity type of the batch (player, team, stadium, schedule or any label)
    #[arg(long)]
    data_type: String,

    /// Sink: rule (relational) or policy (vector)
    #[arg(long, default_value = "rule")]
    strategy: Strategy,

    /// JSON object of table name to records, preloaded into the relational store
    #[arg(long)]
    seed: Option<PathBuf>,

    /// TOML pipeline configuration; MATCHDAY_* variables override it
    #[arg(long, env = "MATCHDAY_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL URL; the in-memory relational store is used when absent
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn seed_store(store: &InMemoryRelationalStore, path: &Path) -> Result<usize> {
    let tables: BTreeMap<String, Vec<Record>> = read_json(path)?;
    let mut seeded = 0;
    for (table, rows) in tables {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.get("id").and_then(serde_json::Value::as_i64) else {
                bail!("seed row in '{table}' has no integer id");
            };
            keyed.push((id, row));
        }
        seeded += keyed.len();
        store.seed(&table, keyed);
    }
    Ok(seeded)
}

#[cfg(feature = "postgres")]
async fn postgres_store(args: &Args) -> Result<Option<matchday_ingest::PostgresRelationalStore>> {
    let Some(url) = args.database_url.as_deref() else {
        return Ok(None);
    };
    if args.seed.is_some() {
        bail!("--seed only applies to the in-memory store");
    }
    let store = matchday_ingest::PostgresRelationalStore::connect(url, 4)?;
    store.ensure_schema().await?;
    Ok(Some(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = load_config(args.config.as_deref())?;
    let records: Vec<Record> = read_json(&args.input)?;
    let data_type = DataType::parse(&args.data_type);

    let memory = InMemoryRelationalStore::new();
    if let Some(seed) = args.seed.as_deref() {
        let seeded = seed_store(&memory, seed)?;
        info!(seeded, "relational store preloaded");
    }
    let vectors = InMemoryVectorStore::new();

    #[cfg(feature = "postgres")]
    let postgres = postgres_store(&args).await?;
    #[cfg(feature = "postgres")]
    let relational: &dyn RelationalStore = match postgres.as_ref() {
        Some(store) => store,
        None => &memory,
    };
    #[cfg(not(feature = "postgres"))]
    let relational: &dyn RelationalStore = &memory;

    info!(
        records = records.len(),
        %data_type,
        strategy = %args.strategy,
        "starting ingestion"
    );
    let pipeline = IngestionPipeline::new(config, relational, &vectors)?;
    let state = pipeline
        .run(Batch::new(records, data_type, args.strategy))
        .await;

    let result = state
        .into_result()
        .context("pipeline finished without a result")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
