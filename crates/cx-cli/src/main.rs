mod config;
mod scripted;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cx_core::collapse::strategy_input;
use cx_core::tokenizer::extract_keywords;
use cx_core::{
    CandidateAnswer, CognitiveCore, Collaborators, CollapseEngine, CycleOutcome, FlushOutcome,
    HashingEmbedder, HeuristicTokenCounter, Message, MetadataValue, PromptRequest, QueryFilters,
    Session, StrategyDecider, SuperpositionRegistry, TelemetrySink, TracingTelemetry,
};
use cx_store::MemoryStore;

use crate::config::CxConfig;
use crate::scripted::{ScriptedCore, load_candidates, load_transcript, strategy_from};
use crate::telemetry::JsonlTelemetry;

const DB_FILE: &str = "memory.db";

#[derive(Parser)]
#[command(name = "cx", about = "Cortex context engine CLI")]
struct Cli {
    /// Config file (default: <data dir>/cx.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the prompt assembled for a transcript
    Context {
        /// JSON array of {speaker, text, timestamp?}
        transcript: PathBuf,

        /// Ephemeral context for this prompt
        #[arg(long)]
        context: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Run one full cycle with prepared core answers
    Process {
        /// JSON array of {speaker, text, timestamp?}
        transcript: PathBuf,

        /// JSON array of {origin, text, emotional_weight, narrative_coherence, contradiction_score}
        #[arg(long)]
        cores: PathBuf,

        #[arg(long)]
        context: Option<String>,

        /// JSON strategy decision; without it the fallback rule applies
        #[arg(long)]
        strategy: Option<PathBuf>,

        /// Seed for probabilistic sampling
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Collapse a candidates file without building a prompt
    Collapse {
        candidates: PathBuf,

        #[arg(long)]
        strategy: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Query long-term memory
    Recall {
        text: String,

        /// Number of results (default: retrieval_top_k from config)
        #[arg(long)]
        top_k: Option<usize>,

        /// Only records of this kind (utterances, answer)
        #[arg(long)]
        kind: Option<String>,
    },

    /// Show store statistics
    Stats,

    /// Forget the saved session (dedup, buffers, patterns, history)
    Reset,
}

fn data_dir() -> PathBuf {
    std::env::var("CX_DATA_DIR")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".cortex")
}

fn open_store(data_dir: &Path) -> Result<MemoryStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    MemoryStore::open(&data_dir.join(DB_FILE)).context("failed to open memory store")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = data_dir();
    let config = CxConfig::load(cli.config.as_deref(), &data_dir)?;

    match &cli.command {
        Commands::Context {
            transcript,
            context,
            json,
        } => cmd_context(&config, &data_dir, transcript, context.as_deref(), *json).await,
        Commands::Process {
            transcript,
            cores,
            context,
            strategy,
            seed,
            json,
        } => {
            cmd_process(
                &config,
                &data_dir,
                transcript,
                cores,
                context.as_deref(),
                strategy.as_deref(),
                *seed,
                *json,
            )
            .await
        }
        Commands::Collapse {
            candidates,
            strategy,
            seed,
            json,
        } => cmd_collapse(&config, candidates, strategy.as_deref(), *seed, *json).await,
        Commands::Recall { text, top_k, kind } => {
            cmd_recall(&config, &data_dir, text, *top_k, kind.as_deref())
        }
        Commands::Stats => cmd_stats(&config, &data_dir),
        Commands::Reset => cmd_reset(&data_dir),
    }
}

fn telemetry_sink(config: &CxConfig, data_dir: &Path) -> Result<Arc<dyn TelemetrySink>> {
    match &config.telemetry_path {
        Some(path) => {
            let path = if path.is_relative() {
                data_dir.join(path)
            } else {
                path.clone()
            };
            Ok(Arc::new(JsonlTelemetry::open(&path)?))
        }
        None => Ok(Arc::new(TracingTelemetry)),
    }
}

fn engine(config: &CxConfig, seed: Option<u64>) -> CollapseEngine {
    match seed {
        Some(seed) => CollapseEngine::with_seed(config.collapse.clone(), seed),
        None => CollapseEngine::new(config.collapse.clone()),
    }
}

/// Session over the on-disk store, resumed from the last saved state.
async fn open_session(
    config: &CxConfig,
    data_dir: &Path,
    cores: Vec<Arc<dyn CognitiveCore>>,
    strategy: Arc<dyn StrategyDecider>,
    seed: Option<u64>,
) -> Result<(Session, Arc<MemoryStore>)> {
    let store = Arc::new(open_store(data_dir)?);
    let collaborators = Collaborators {
        embedder: Arc::new(HashingEmbedder::new(config.embedding_dims)),
        memory: store.clone(),
        token_counter: Arc::new(HeuristicTokenCounter),
        strategy,
        telemetry: telemetry_sink(config, data_dir)?,
        cores,
    };
    let session = Session::with_engine(
        config.session_config(),
        collaborators,
        engine(config, seed),
    );
    if let Some(snapshot) = store.load_session().context("failed to load session state")? {
        tracing::debug!(
            sent_lines = snapshot.sent_lines.len(),
            history = snapshot.history.len(),
            "resuming saved session"
        );
        session.restore(snapshot).await;
    }
    Ok((session, store))
}

async fn save_session(session: &Session, store: &MemoryStore) -> Result<()> {
    store
        .save_session(&session.snapshot().await)
        .context("failed to save session state")
}

fn print_messages(messages: &[Message]) {
    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("[{}]", message.role.as_str());
        println!("{}", message.content);
    }
}

async fn cmd_context(
    config: &CxConfig,
    data_dir: &Path,
    transcript: &Path,
    context: Option<&str>,
    json: bool,
) -> Result<()> {
    let utterances = load_transcript(transcript)?;
    let (session, store) =
        open_session(config, data_dir, Vec::new(), strategy_from(None)?, None).await?;
    let built = session
        .build_prompt(PromptRequest {
            utterances,
            ephemeral_context: context.map(str::to_string),
        })
        .await
        .context("failed to build prompt")?;
    save_session(&session, &store).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&built.messages)?);
    } else {
        print_messages(&built.messages);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_process(
    config: &CxConfig,
    data_dir: &Path,
    transcript: &Path,
    cores: &Path,
    context: Option<&str>,
    strategy: Option<&Path>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    let utterances = load_transcript(transcript)?;
    let cores: Vec<Arc<dyn CognitiveCore>> = load_candidates(cores)?
        .into_iter()
        .map(|spec| Arc::new(ScriptedCore::new(spec)) as Arc<dyn CognitiveCore>)
        .collect();
    let (session, store) =
        open_session(config, data_dir, cores, strategy_from(strategy)?, seed).await?;

    let outcome = session
        .process(PromptRequest {
            utterances,
            ephemeral_context: context.map(str::to_string),
        })
        .await
        .context("cycle failed")?;
    save_session(&session, &store).await?;

    if let Some(err) = &outcome.persistence_error {
        eprintln!("warning: memory not persisted: {err}");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &CycleOutcome) {
    let decision = &outcome.decision;
    println!("answer:     {}", outcome.answer);
    println!(
        "selected:   {} ({}, temperature {:.2})",
        decision.selected.origin,
        if decision.deterministic {
            "deterministic"
        } else {
            "probabilistic"
        },
        decision.temperature
    );
    println!("reason:     {}", decision.justification);
    for pattern in &outcome.patterns {
        println!("pattern:    {pattern}");
    }
    let flush = match outcome.flush {
        Some(FlushOutcome::Flushed { records }) => format!("flushed {records} records"),
        Some(FlushOutcome::AnswerOnly) => "answer only".to_string(),
        Some(FlushOutcome::Skipped) => "skipped".to_string(),
        None => "failed".to_string(),
    };
    println!("memory:     {flush}");
}

async fn cmd_collapse(
    config: &CxConfig,
    candidates: &Path,
    strategy: Option<&Path>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    let specs = load_candidates(candidates)?;
    let embedder = HashingEmbedder::new(config.embedding_dims);

    let mut registry = SuperpositionRegistry::new();
    for spec in specs {
        let embedding = embedder.embed_text(&spec.text);
        let origin = spec.origin.clone();
        let candidate = CandidateAnswer::new(
            spec.origin,
            spec.text,
            embedding,
            spec.emotional_weight,
            spec.narrative_coherence,
            spec.contradiction_score,
        );
        if !registry.register(candidate) {
            eprintln!("skipped near-duplicate candidate from '{origin}'");
        }
    }

    let strategy = strategy_from(strategy)?;
    let input = strategy_input(&registry, "");
    let (decision, _) = CollapseEngine::resolve_strategy(strategy.as_ref(), &input, &[]).await;
    let collapsed = engine(config, seed)
        .collapse(&registry, &decision)
        .context("collapse failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&collapsed)?);
    } else {
        println!("selected:   {}", collapsed.selected.origin);
        println!("answer:     {}", collapsed.selected.text);
        println!(
            "mode:       {} (temperature {:.2})",
            if collapsed.deterministic {
                "deterministic"
            } else {
                "probabilistic"
            },
            collapsed.temperature
        );
        println!("reason:     {}", collapsed.justification);
    }
    Ok(())
}

fn cmd_recall(
    config: &CxConfig,
    data_dir: &Path,
    text: &str,
    top_k: Option<usize>,
    kind: Option<&str>,
) -> Result<()> {
    let store = open_store(data_dir)?;
    let vector = HashingEmbedder::new(config.embedding_dims).embed_text(text);
    let keywords = extract_keywords(text);
    let filters = kind.map(|k| {
        let mut f = QueryFilters::new();
        f.insert("kind".to_string(), MetadataValue::from(k));
        f
    });

    let hits = store
        .search(
            &vector,
            top_k.unwrap_or(config.retrieval_top_k),
            &keywords,
            filters.as_ref(),
        )
        .context("failed to query memory")?;

    if hits.is_empty() {
        println!("(no memories found)");
        return Ok(());
    }
    for hit in hits {
        let kind = match hit.metadata.get("kind") {
            Some(MetadataValue::Text(k)) => k.as_str(),
            _ => "unknown",
        };
        println!("{:.3}  [{kind}] {}", hit.score, hit.content);
    }
    Ok(())
}

fn cmd_stats(config: &CxConfig, data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir)?;
    let stats = store.stats().context("failed to read store stats")?;
    let db_path = data_dir.join(DB_FILE);
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    let pending: usize = store
        .load_session()
        .context("failed to load session state")?
        .map(|s| s.writer.buffers.values().map(|b| b.pending_texts.len()).sum())
        .unwrap_or(0);

    println!("primary:    {}", config.primary_speaker);
    println!("memories:   {}", stats.total);
    for (kind, n) in &stats.by_kind {
        println!("  {kind}: {n}");
    }
    println!("pending:    {pending}");
    println!("db_path:    {}", db_path.display());
    println!("db_size:    {:.1}MB", db_size as f64 / (1024.0 * 1024.0));
    Ok(())
}

fn cmd_reset(data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir)?;
    if store.clear_session().context("failed to clear session state")? {
        println!("session state cleared");
    } else {
        println!("no saved session");
    }
    Ok(())
}
