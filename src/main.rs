use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use codeseek_core::{
    FusionKind, IndexStatus, ModelRegistry, ModelSpec, OutputFormat, RerankRegistry, SearchMode,
    SearchResult, SeekConfig, SeekError,
};
use codeseek_engine::embedding::build_embedder;
use codeseek_engine::fusion::FusionStrategy;
use codeseek_engine::lifecycle::{EngineContext, IndexEvent, IndexManager, IndexMode, IndexReport};
use codeseek_engine::rerank::build_reranker;
use codeseek_engine::search::{SearchEngine, SearchQuery};
use codeseek_engine::store::IndexStore;

#[derive(Parser)]
#[command(
    name = "codeseek",
    version,
    about = "Local hybrid code search",
    long_about = "codeseek finds code by exact text and by meaning.\n\n\
                   Lexical search needs no index. Semantic and hybrid search build a local\n\
                   index under .codeseek/ on first use and keep it in sync with the tree.\n\n\
                   Examples:\n  \
                     codeseek search parse_config --mode lexical   Exact matches only\n  \
                     codeseek search 'retry with backoff'          Hybrid search (default)\n  \
                     codeseek index                                Index changed files\n  \
                     codeseek index --full                         Rebuild from scratch\n  \
                     codeseek status --verify                      Check index health\n  \
                     codeseek switch-model bge-small               Re-embed with another model"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Repository root (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Path to configuration file (default: <path>/.codeseek.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Embedding model alias (default: the index's model, then [index] model)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text   Human-readable summaries (default)\n  \
                         json   A single JSON document with camelCase keys\n  \
                         jsonl  One JSON record per line"
    )]
    format: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the index up to date with the working tree
    #[command(long_about = "Bring the index up to date with the working tree.\n\n\
        Only new, modified and deleted files are processed. Ctrl-C stops between\n\
        file commits; the next run picks up whatever was left.\n\n\
        Examples:\n  codeseek index\n  codeseek index --full")]
    Index {
        /// Discard the index and rebuild every file
        #[arg(long)]
        full: bool,
    },
    /// Search the repository
    #[command(long_about = "Search the repository.\n\n\
        lexical   literal or regex matches over the working tree, no index needed\n\
        semantic  embedding similarity against the index\n\
        hybrid    both, fused with reciprocal rank fusion (default)\n\n\
        Examples:\n  codeseek search 'fn main' --mode lexical\n  \
        codeseek search 'open a database connection' --threshold 0.3\n  \
        codeseek search TODO --scope src --top-k 50\n  \
        codeseek search 'parse the manifest' --rerank --rerank-model bge")]
    Search {
        /// Pattern or natural-language query
        query: String,

        /// Retrieval mode (default from [search] mode)
        #[arg(long)]
        mode: Option<SearchMode>,

        /// Treat the query as a regular expression in the lexical channel
        #[arg(long)]
        regex: bool,

        /// Case-insensitive lexical matching
        #[arg(long, short = 'i')]
        ignore_case: bool,

        /// Minimum cosine similarity for semantic hits
        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum results (0 for all)
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict results to these paths (relative to the root)
        #[arg(long)]
        scope: Vec<PathBuf>,

        /// Search files excluded by ignore files
        #[arg(long)]
        no_ignore: bool,

        /// Search hidden files and directories
        #[arg(long)]
        hidden: bool,

        /// Hybrid fusion formula
        #[arg(long)]
        fusion: Option<FusionKind>,

        /// Reorder the leading results with a reranking model
        #[arg(long)]
        rerank: bool,

        /// Reranking model alias (default from [search] rerank_model)
        #[arg(long)]
        rerank_model: Option<String>,
    },
    /// Show index state, size and model
    Status {
        /// Check the index for structural corruption
        #[arg(long)]
        verify: bool,
    },
    /// Delete the index
    Clean,
    /// Rebuild the index with another embedding model
    #[command(long_about = "Rebuild the index with another embedding model.\n\n\
        Every stored vector is discarded and every file re-embedded.\n\n\
        Examples:\n  codeseek switch-model hash-256\n  codeseek switch-model nomic-v1.5")]
    SwitchModel {
        /// Alias or full name of the new model
        model: String,
    },
    /// Add or refresh specific files in the index
    Add {
        /// Files to index; missing files are dropped from the index
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List known embedding models
    Models {
        /// List reranking models instead
        #[arg(long)]
        rerank: bool,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env("CODESEEK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!("codeseek v{version} - local hybrid code search\n");
    println!("Quick start:");
    println!("  codeseek search <query>        Hybrid search from the current directory");
    println!("  codeseek index                 Build or refresh the index");
    println!("  codeseek status                Show index state\n");
    println!("Run `codeseek --help` for every command.");
}

fn load_config(cli: &Cli, root: &Path) -> Result<SeekConfig> {
    let config = match &cli.config {
        Some(path) => SeekConfig::from_file(path)?,
        None => SeekConfig::discover(root)?,
    };
    config.validate()?;
    Ok(config)
}

/// `--model`, then the model recorded in the index, then `[index] model`.
fn active_model(
    requested: Option<&str>,
    root: &Path,
    config: &SeekConfig,
    registry: &ModelRegistry,
) -> Result<ModelSpec, SeekError> {
    if let Some(alias) = requested {
        return registry.resolve(Some(alias));
    }
    if IndexStore::exists(root) {
        match IndexStore::open(root).and_then(|store| store.model()) {
            Ok(Some((id, _))) => return registry.resolve(Some(&id)),
            Ok(None) => {}
            Err(e) if e.needs_rebuild() => {
                tracing::debug!(error = %e, "ignoring unreadable index while picking a model");
            }
            Err(e) => return Err(e),
        }
    }
    registry.resolve(Some(&config.index.model))
}

fn open_manager(
    root: &Path,
    model: ModelSpec,
    config: &SeekConfig,
) -> Result<IndexManager, SeekError> {
    let embedder = build_embedder(&model, &config.embedding)?;
    IndexManager::open(EngineContext::from_config(root, model, config), embedder)
}

fn with_progress_bar(manager: IndexManager, format: OutputFormat) -> (IndexManager, Option<indicatif::ProgressBar>) {
    if format != OutputFormat::Text || !std::io::stderr().is_terminal() {
        return (manager, None);
    }

    let pb = indicatif::ProgressBar::new(0);
    pb.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(120));

    let bar = pb.clone();
    let manager = manager.with_progress(Arc::new(move |event: &IndexEvent| match event {
        IndexEvent::Planned { stale, removed } => bar.set_length((stale + removed) as u64),
        IndexEvent::FileIndexed { path, .. } | IndexEvent::FileRemoved { path } => {
            bar.set_message(path.clone());
            bar.inc(1);
        }
    }));
    (manager, Some(pb))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current file...");
            token.cancel();
        }
    });
    cancel
}

fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Jsonl => serde_json::to_string(value),
        _ => serde_json::to_string_pretty(value),
    }
    .into_diagnostic()?;
    println!("{text}");
    Ok(())
}

fn print_report(report: &IndexReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!(
                "Indexed {} files ({} chunks), removed {}, unchanged {} in {} ms",
                report.files_indexed,
                report.chunks_written,
                report.files_removed,
                report.files_unchanged,
                report.elapsed_ms,
            );
            println!(
                "Embeddings: {} computed, {} reused",
                report.embeddings_computed, report.cache_hits
            );
            if report.fallbacks > 0 {
                println!("{} files fell back to line windows", report.fallbacks);
            }
            if report.cancelled {
                println!("Cancelled: remaining files are still stale");
            }
            Ok(())
        }
        _ => print_json(report, format),
    }
}

fn print_results(results: &[SearchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            for r in results {
                let rerank = r
                    .rerank_score
                    .map(|s| format!(", rerank: {s:.4}"))
                    .unwrap_or_default();
                println!(
                    "{}. {}:{}-{} (score: {:.4}{rerank})",
                    r.rank,
                    r.file_path.display(),
                    r.span.start_line,
                    r.span.end_line,
                    r.score,
                );
                let preview: String = r
                    .snippet
                    .lines()
                    .map(|l| format!("   {l}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                println!("{preview}\n");
            }
            Ok(())
        }
        OutputFormat::Json => print_json(&results, format),
        OutputFormat::Jsonl => {
            for r in results {
                print_json(r, format)?;
            }
            Ok(())
        }
    }
}

fn print_status(status: &IndexStatus, verified: Option<bool>, root: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Index:        {}", IndexStore::index_path(root).display());
            println!("State:        {}", status.state);
            println!("Model:        {}", status.model_id.as_deref().unwrap_or("-"));
            if let Some(dims) = status.dimensions {
                println!("Dimensions:   {dims}");
            }
            println!("Files:        {}", status.file_count);
            println!("Chunks:       {}", status.chunk_count);
            println!("Size:         {} bytes", status.index_size_bytes);
            if let Some(created) = &status.created_at {
                println!("Created:      {created}");
            }
            if let Some(updated) = &status.last_update {
                println!("Last update:  {updated}");
            }
            if verified == Some(true) {
                println!("Verified:     ok");
            }
            Ok(())
        }
        _ => {
            let mut value = serde_json::to_value(status).into_diagnostic()?;
            if let (Some(verified), Some(map)) = (verified, value.as_object_mut()) {
                map.insert("verified".into(), serde_json::Value::Bool(verified));
            }
            print_json(&value, format)
        }
    }
}

fn print_rerank_models(registry: &RerankRegistry, active: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for spec in registry.models() {
                let marker = if spec.id == active { "*" } else { " " };
                println!(
                    "{marker} {:<8} {:<7} {:<38} {}",
                    spec.id,
                    spec.provider.to_string(),
                    spec.name,
                    spec.description
                );
            }
            Ok(())
        }
        OutputFormat::Json => print_json(&registry.models().collect::<Vec<_>>(), format),
        OutputFormat::Jsonl => {
            for spec in registry.models() {
                print_json(spec, format)?;
            }
            Ok(())
        }
    }
}

fn print_models(registry: &ModelRegistry, active: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for spec in registry.models() {
                let marker = if spec.id == active { "*" } else { " " };
                println!(
                    "{marker} {:<14} {:>4} dims {:>5} tokens  {:<5} {}",
                    spec.id,
                    spec.dimensions,
                    spec.max_tokens,
                    spec.provider.to_string(),
                    spec.description
                );
            }
            Ok(())
        }
        OutputFormat::Json => print_json(&registry.models().collect::<Vec<_>>(), format),
        OutputFormat::Jsonl => {
            for spec in registry.models() {
                print_json(spec, format)?;
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(command) = &cli.command else {
        print_welcome();
        return Ok(());
    };

    let root = std::fs::canonicalize(&cli.path)
        .into_diagnostic()
        .wrap_err_with(|| format!("repository root {} is not accessible", cli.path.display()))?;
    let config = load_config(&cli, &root)?;
    let registry = config.registry()?;
    let format = cli.format;

    match command {
        Command::Index { full } => {
            let model = active_model(cli.model.as_deref(), &root, &config, &registry)?;
            let manager = match open_manager(&root, model.clone(), &config) {
                Err(SeekError::IndexCorruption(reason)) if *full => {
                    tracing::warn!(%reason, "discarding corrupted index before rebuild");
                    IndexStore::clean(&root)?;
                    open_manager(&root, model, &config)?
                }
                other => other?,
            };
            let (manager, bar) = with_progress_bar(manager, format);
            let mode = if *full {
                IndexMode::Full
            } else {
                IndexMode::Incremental
            };

            let cancel = cancel_on_ctrl_c();
            let result = manager.index(mode, &cancel).await;
            if let Some(pb) = bar {
                pb.finish_and_clear();
            }
            print_report(&result?, format)?;
        }
        Command::Search {
            query,
            mode,
            regex,
            ignore_case,
            threshold,
            top_k,
            scope,
            no_ignore,
            hidden,
            fusion,
            rerank,
            rerank_model,
        } => {
            let mut search_config = config.search.clone();
            if let Some(fusion) = fusion {
                search_config.fusion = *fusion;
            }
            let mut request = SearchQuery::from_config(query.clone(), &search_config);
            request.mode = mode.unwrap_or(search_config.mode);
            request.regex = *regex;
            request.case_insensitive = *ignore_case;
            request.threshold = threshold.unwrap_or(search_config.threshold);
            request.top_k = top_k.unwrap_or(search_config.top_k);
            request.scope = scope.clone();
            request.no_ignore = *no_ignore;
            request.hidden = *hidden;
            request.fusion = FusionStrategy::from_config(&search_config);
            request.rerank = *rerank || rerank_model.is_some() || search_config.rerank;

            let model = active_model(cli.model.as_deref(), &root, &config, &registry)?;
            let manager = open_manager(&root, model, &config)?;
            let (manager, bar) = if request.mode.uses_index() {
                with_progress_bar(manager, format)
            } else {
                (manager, None)
            };

            let mut engine = SearchEngine::new(Arc::new(manager));
            if request.rerank {
                let alias = rerank_model.as_deref().unwrap_or(&search_config.rerank_model);
                let spec = RerankRegistry::default().resolve(Some(alias))?;
                engine = engine.with_reranker(build_reranker(&spec, &config.embedding)?);
            }
            let cancel = cancel_on_ctrl_c();
            let results = engine.search_with_cancel(&request, &cancel).await;
            if let Some(pb) = bar {
                pb.finish_and_clear();
            }
            print_results(&results?, format)?;
        }
        Command::Status { verify } => {
            let model = active_model(cli.model.as_deref(), &root, &config, &registry)?;
            let manager = open_manager(&root, model, &config)?;
            let status = manager.status()?;
            let verified = match (*verify, manager.store()) {
                (true, Some(store)) => {
                    store.verify()?;
                    Some(true)
                }
                _ => None,
            };
            print_status(&status, verified, &root, format)?;
        }
        Command::Clean => {
            let removed = IndexStore::clean(&root)?;
            match format {
                OutputFormat::Text if removed => {
                    println!("Removed {}", IndexStore::index_dir(&root).display())
                }
                OutputFormat::Text => println!("No index at {}", root.display()),
                _ => print_json(&serde_json::json!({ "removed": removed }), format)?,
            }
        }
        Command::SwitchModel { model: target } => {
            let current = active_model(cli.model.as_deref(), &root, &config, &registry)?;
            let target = registry.resolve(Some(target.as_str()))?;
            let embedder = build_embedder(&target, &config.embedding)?;

            let manager = open_manager(&root, current.clone(), &config)?;
            let (mut manager, bar) = with_progress_bar(manager, format);
            let cancel = cancel_on_ctrl_c();
            let result = manager.switch_model(target.clone(), embedder, &cancel).await;
            if let Some(pb) = bar {
                pb.finish_and_clear();
            }
            let report = result?;
            if format == OutputFormat::Text {
                println!("Switched index from '{}' to '{}'", current.id, target.id);
            }
            print_report(&report, format)?;
        }
        Command::Add { paths } => {
            let model = active_model(cli.model.as_deref(), &root, &config, &registry)?;
            let manager = open_manager(&root, model, &config)?;
            let cwd = std::env::current_dir().into_diagnostic()?;

            let mut updates = Vec::with_capacity(paths.len());
            for path in paths {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    cwd.join(path)
                };
                let target = if absolute.starts_with(&root) {
                    absolute
                } else {
                    path.clone()
                };
                updates.push(manager.update_file(&target).await?);
            }

            match format {
                OutputFormat::Text => {
                    for update in &updates {
                        println!("{}", describe_update(update));
                    }
                }
                OutputFormat::Json => print_json(&updates, format)?,
                OutputFormat::Jsonl => {
                    for update in &updates {
                        print_json(update, format)?;
                    }
                }
            }
        }
        Command::Models { rerank: true } => {
            let rerankers = RerankRegistry::default();
            let active = rerankers.resolve(Some(&config.search.rerank_model))?;
            print_rerank_models(&rerankers, &active.id, format)?;
        }
        Command::Models { rerank: false } => {
            let active = active_model(cli.model.as_deref(), &root, &config, &registry)?;
            print_models(&registry, &active.id, format)?;
        }
    }

    Ok(())
}

fn describe_update(update: &codeseek_engine::lifecycle::FileUpdate) -> String {
    use codeseek_engine::lifecycle::FileUpdate;
    match update {
        FileUpdate::Indexed { path, chunks } => format!("indexed   {path} ({chunks} chunks)"),
        FileUpdate::Unchanged { path } => format!("unchanged {path}"),
        FileUpdate::Removed { path } => format!("removed   {path}"),
        FileUpdate::Skipped { path } => format!("skipped   {path} (ignored or not indexable)"),
    }
}
