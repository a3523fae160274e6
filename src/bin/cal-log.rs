#![forbid(unsafe_code)]

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cal_log_harness::embedding_cache::{CachedEmbedder, SqliteEmbeddingCache};
use cal_log_harness::estimator::{LabelToken, UncertaintyEstimator};
use cal_log_harness::feedback::FeedbackItem;
use cal_log_harness::ranker::{build_report, render_report_markdown, RankRequest, RankReportOptions};
use cal_log_harness::session::SessionStore;
use cal_log_harness::simulation::{run_simulation, AnnotatorKind, SimulationConfig};
use cal_log_harness::{CalLogService, Embedder, EngineConfig, HashingEmbedder, JsonlTraceSink, TraceSink};

#[derive(Parser)]
#[command(name = "cal-log", version, about = "Cost-aware active learning ranker")]
struct Cli {
    /// Engine config (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank a batch of tasks from a JSON request
    Rank {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Also write a markdown report
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        state: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
        /// Append a JSONL audit line per call
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        embed_cache: Option<PathBuf>,
    },
    /// Record one annotator's feedback and persist the updated state
    Feedback {
        #[arg(long)]
        annotator: String,
        /// JSON array of {text, label?, elapsed_seconds?}
        #[arg(long)]
        items: PathBuf,
        /// Write the result here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        state: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        embed_cache: Option<PathBuf>,
    },
    /// Train an estimator artifact from a labelled JSONL corpus
    Pretrain {
        /// One {text, label} object per line
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Print persisted session state
    State {
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Compare ranking strategies against a simulated annotator
    Simulate {
        /// One JSON line per strategy
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "honest")]
        annotator: AnnotatorKind,
        #[arg(long, default_value_t = 10)]
        rounds: usize,
        #[arg(long, default_value_t = 5)]
        batch_size: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Prune the embedding cache to its most recently used rows
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_rows: usize,
    },
}

#[derive(serde::Deserialize)]
struct LabelledRow {
    text: String,
    label: LabelToken,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Rank {
            request,
            out,
            report,
            state,
            model,
            trace,
            embed_cache,
        } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            apply_overrides(&mut cfg, state, model, embed_cache, trace);
            let req: RankRequest = read_json(&request)?;

            let (service, trace_worker) = open_service(cfg)?;
            let resp = service.rank_tasks(&req).await;
            write_json(&out, &resp)?;
            drop(service);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }

            if let Some(report_path) = report {
                let report = build_report(&req, &resp, &RankReportOptions::default());
                std::fs::write(report_path, render_report_markdown(&report))?;
            }
        }
        Commands::Feedback {
            annotator,
            items,
            out,
            state,
            model,
            trace,
            embed_cache,
        } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            apply_overrides(&mut cfg, state, model, embed_cache, trace);
            let items: Vec<FeedbackItem> = read_json(&items)?;

            let (service, trace_worker) = open_service(cfg)?;
            let result = service.record_feedback(&annotator, &items).await;
            service.shutdown();
            drop(service);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }

            match out {
                Some(path) => write_json(&path, &result)?,
                None => println!("{}", serde_json::to_string_pretty(&result)?),
            }
        }
        Commands::Pretrain { data, out, epochs } => {
            let cfg = load_config(cli.config.as_deref())?;
            let rows = read_jsonl::<LabelledRow>(&data)?;
            let texts: Vec<String> = rows.iter().map(|r| r.text.clone()).collect();
            let labels: Vec<LabelToken> = rows.into_iter().map(|r| r.label).collect();

            let embedder = HashingEmbedder::from_config(&cfg.embedder);
            let embeddings = embedder.embed(&texts).await?;
            let mut estimator = UncertaintyEstimator::new(cfg.estimator.clone());
            let outcome = estimator.train(
                &embeddings,
                &labels,
                epochs.unwrap_or(cfg.estimator.default_epochs),
            );
            if estimator.save_artifact(&out)? {
                eprintln!("estimator artifact written to {}", out.display());
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::State { state } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            if let Some(path) = state {
                cfg.state_path = path;
            }
            let store = SessionStore::new(&cfg.state_path);
            let session = store.load()?.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Commands::Simulate {
            out,
            annotator,
            rounds,
            batch_size,
            seed,
        } => {
            if batch_size == 0 {
                return Err("--batch-size must be >= 1".into());
            }
            let sim = SimulationConfig {
                annotator,
                rounds,
                batch_size,
                seed,
                ..SimulationConfig::default()
            };
            let report = run_simulation(&sim);
            let mut file = std::fs::File::create(&out)?;
            for result in &report.results {
                writeln!(file, "{}", serde_json::to_string(result)?)?;
                println!(
                    "{:<16} tasks {:>3}  cost {:>8.1}s  accuracy {:.3}",
                    result.strategy.as_str(),
                    result.tasks_annotated,
                    result.total_cost_seconds,
                    result.accuracy
                );
            }
        }
        Commands::CachePrune { db, max_rows } => {
            if max_rows == 0 {
                return Err("--max-rows must be >= 1".into());
            }
            let path = db.unwrap_or_else(SqliteEmbeddingCache::default_path);
            let cache = SqliteEmbeddingCache::new(path)?;
            let stats = cache.prune(max_rows).await?;
            println!("pruned {} rows; {} rows remain", stats.deleted, stats.remaining);
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn,cal_log_harness=info"),
        1 => EnvFilter::new("warn,cal_log_harness=debug"),
        _ => EnvFilter::new("warn,cal_log_harness=trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let cfg = match path {
        Some(p) => EngineConfig::load(p)?,
        None => EngineConfig::default(),
    };
    Ok(cfg.apply_env())
}

fn apply_overrides(
    cfg: &mut EngineConfig,
    state: Option<PathBuf>,
    model: Option<PathBuf>,
    embed_cache: Option<PathBuf>,
    trace: Option<PathBuf>,
) {
    if let Some(p) = state {
        cfg.state_path = p;
    }
    if model.is_some() {
        cfg.model_path = model;
    }
    if embed_cache.is_some() {
        cfg.embedding_cache_path = embed_cache;
    }
    if trace.is_some() {
        cfg.trace_path = trace;
    }
}

type Service = CalLogService<Arc<dyn Embedder>>;

fn open_service(
    cfg: EngineConfig,
) -> Result<(Service, Option<cal_log_harness::TraceWorker>), Box<dyn std::error::Error>> {
    let base = HashingEmbedder::from_config(&cfg.embedder);
    let embedder: Arc<dyn Embedder> = match &cfg.embedding_cache_path {
        Some(path) => {
            let cache = SqliteEmbeddingCache::new(path)?;
            Arc::new(CachedEmbedder::new(base, Arc::new(cache)))
        }
        None => Arc::new(base),
    };

    let trace = match &cfg.trace_path {
        Some(path) => Some(JsonlTraceSink::new(path)?),
        None => None,
    };
    let mut service = CalLogService::open(cfg, embedder)?;
    let worker = match trace {
        Some((sink, worker)) => {
            let sink: Arc<dyn TraceSink> = Arc::new(sink);
            service = service.with_trace(sink);
            Some(worker)
        }
        None => None,
    };
    Ok((service, worker))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)?;
    let mut out = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| format!("{}:{}: {e}", path.display(), lineno + 1))?;
        out.push(row);
    }
    Ok(out)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
