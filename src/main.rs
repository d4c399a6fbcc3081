mod walker;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use trawl_core::{OutputFormat, SearchRequest, SearchResponse, TrawlConfig, TrawlError};
use trawl_index::{embedding, BatchReport, IndexCoordinator};

#[derive(Parser)]
#[command(
    name = "trawl",
    version,
    about = "Hybrid semantic + keyword code search",
    long_about = "trawl indexes a source tree twice, as embedding vectors in an HNSW graph and as\n\
                   BM25 postings, and answers queries by fusing both rankings.\n\n\
                   Examples:\n  \
                     trawl init                         Create a .trawl.toml config file\n  \
                     trawl index --path .               Index (or incrementally update) a repository\n  \
                     trawl search 'retry with backoff'  Hybrid search\n  \
                     trawl search 'parse' --alpha 0     Keyword-only search\n  \
                     trawl status                       Show index statistics"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .trawl.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Embedding provider override ("voyage", "openai" or "hash")
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose output (debug logging unless RUST_LOG is set)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Index a repository, updating only files that changed
    #[command(long_about = "Index a repository, updating only files that changed.\n\n\
        Walks the tree respecting .gitignore, re-embeds changed files, drops files that\n\
        disappeared, and writes the index to .trawl/ under the repository root.\n\n\
        Examples:\n  trawl index\n  trawl index --path ../other-repo\n  trawl index --rebuild")]
    Index {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Start from an empty index if the stored one is corrupt
        #[arg(long)]
        rebuild: bool,
    },
    /// Search the index
    #[command(long_about = "Search the index with a natural language or keyword query.\n\n\
        --alpha weighs the semantic ranking against the keyword ranking: 1 is\n\
        vectors only, 0 is keywords only.\n\n\
        Examples:\n  trawl search 'open the database'\n  trawl search 'Config' --alpha 0.2 --limit 5\n  trawl search 'handler' --file 'src/**/*.rs' --offset 10")]
    Search {
        /// Search query
        query: String,

        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Maximum results to return (default: search.top_k)
        #[arg(long)]
        limit: Option<usize>,

        /// Number of results to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Vector weight in [0, 1] (default: search.alpha)
        #[arg(long)]
        alpha: Option<f64>,

        /// Only return chunks from files matching this glob (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Show index statistics
    Status {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Drop index entries that no longer belong to any file
    Repair {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Create a default .trawl.toml
    Init,
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1mtrawl\x1b[0m v{version} — hybrid code search\n");
        println!("Quick start:");
        println!("  \x1b[36mtrawl init\x1b[0m               Create a .trawl.toml config file");
        println!("  \x1b[36mtrawl index\x1b[0m              Index the current repository");
        println!("  \x1b[36mtrawl search 'query'\x1b[0m     Search it\n");
    } else {
        println!("trawl v{version} — hybrid code search\n");
        println!("Quick start:");
        println!("  trawl init               Create a .trawl.toml config file");
        println!("  trawl index              Index the current repository");
        println!("  trawl search 'query'     Search it\n");
    }

    println!("Run 'trawl <command> --help' for details.");
}

const DEFAULT_CONFIG: &str = r#"# trawl configuration

[index]
# dir = ".trawl"
# m = 16
# ef_construction = 200
# ef_search = 64

[search]
# alpha = 0.5
# top_k = 10
# rrf_k = 60
# vector_candidates = 1000

[embedding]
# provider = "voyage"        # "voyage", "openai" or "hash" (offline)
# model = "voyage-code-3"
# dimensions = 1024
# timeout_secs = 30
# cache_capacity = 100

[chunking]
# max_lines = 40
# overlap = 5
"#;

fn load_config(cli: &Cli, root: &Path) -> Result<TrawlConfig> {
    let mut config = match &cli.config {
        Some(path) => TrawlConfig::from_file(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("loading {}", path.display()))?,
        None => {
            let default_path = root.join(".trawl.toml");
            if default_path.exists() {
                TrawlConfig::from_file(&default_path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("loading {}", default_path.display()))?
            } else {
                TrawlConfig::default()
            }
        }
    };
    if let Some(provider) = &cli.provider {
        config.embedding.provider = provider.clone();
    }
    config.validate().into_diagnostic()?;
    tracing::debug!(
        provider = %config.embedding.provider,
        model = %config.embedding.model,
        "configuration loaded"
    );
    Ok(config)
}

fn index_dir(root: &Path, config: &TrawlConfig) -> PathBuf {
    if config.index.dir.is_absolute() {
        config.index.dir.clone()
    } else {
        root.join(&config.index.dir)
    }
}

fn open_coordinator(root: &Path, config: &TrawlConfig, rebuild: bool) -> Result<IndexCoordinator> {
    let key_var = match config.embedding.provider.as_str() {
        "openai" => Some("OPENAI_API_KEY"),
        "voyage" => Some("VOYAGE_API_KEY"),
        _ => None,
    };
    if let Some(var) = key_var {
        if config.embedding.api_key.is_none()
            && std::env::var("TRAWL_EMBEDDING_API_KEY").is_err()
            && std::env::var(var).is_err()
        {
            miette::bail!(miette::miette!(
                help = "Set {var}, add api_key under [embedding] in .trawl.toml, or pass --provider hash",
                "No API key configured for embedding provider '{}'",
                config.embedding.provider
            ));
        }
    }

    let embedder = embedding::from_config(&config.embedding).into_diagnostic()?;
    let dir = index_dir(root, config);
    let opened = if rebuild {
        IndexCoordinator::open_or_rebuild(&dir, embedder, config.clone())
    } else {
        IndexCoordinator::open(&dir, embedder, config.clone())
    };
    match opened {
        Ok(coordinator) => Ok(coordinator),
        Err(e @ TrawlError::CorruptIndex(_)) => Err(miette::miette!(
            help = "Run `trawl index --rebuild` to start from an empty index",
            "{e}"
        )),
        Err(e) => Err::<IndexCoordinator, _>(e)
            .into_diagnostic()
            .wrap_err_with(|| format!("opening index at {}", dir.display())),
    }
}

fn print_batch(report: &BatchReport, format: OutputFormat) -> Result<()> {
    let failed: Vec<serde_json::Value> = report
        .failed
        .iter()
        .map(|(path, e)| serde_json::json!({ "path": path, "error": e.to_string() }))
        .collect();
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "indexed": report.indexed,
                "unchanged": report.unchanged,
                "superseded": report.superseded,
                "removed": report.removed,
                "failed": failed,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("# Index Update\n");
            println!("| Indexed | Unchanged | Removed | Failed |");
            println!("|---------|-----------|---------|--------|");
            println!(
                "| {} | {} | {} | {} |",
                report.indexed,
                report.unchanged,
                report.removed,
                report.failed.len()
            );
            for (path, e) in &report.failed {
                println!("- `{}`: {e}", path.display());
            }
        }
        OutputFormat::Text => {
            println!(
                "Indexed {} files, {} unchanged, {} removed, {} failed",
                report.indexed,
                report.unchanged,
                report.removed,
                report.failed.len()
            );
            for (path, e) in &report.failed {
                eprintln!("  {}: {e}", path.display());
            }
        }
    }
    Ok(())
}

fn print_search(response: &SearchResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            if response.hits.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            println!("# Search Results\n");
            for (i, hit) in response.hits.iter().enumerate() {
                let chunk = &hit.chunk;
                println!(
                    "## {}. `{}:{}–{}` (score: {:.4})\n\n```{}\n{}\n```\n",
                    response.offset + i + 1,
                    chunk.file_path.display(),
                    chunk.start_line,
                    chunk.end_line,
                    hit.fused_score,
                    chunk.language,
                    chunk.content,
                );
            }
        }
        OutputFormat::Text => {
            if response.hits.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            for (i, hit) in response.hits.iter().enumerate() {
                let chunk = &hit.chunk;
                println!(
                    "{}. {}:{}–{} (score: {:.4})",
                    response.offset + i + 1,
                    chunk.file_path.display(),
                    chunk.start_line,
                    chunk.end_line,
                    hit.fused_score,
                );
                let preview: String = chunk
                    .content
                    .lines()
                    .take(3)
                    .map(|l| format!("   {l}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                println!("{preview}\n");
            }
            println!(
                "Showing {}–{} of {}",
                (response.offset + 1).min(response.total),
                response.offset + response.hits.len(),
                response.total
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    match &cli.command {
        None => {
            print_welcome(use_color);
        }
        Some(Command::Index { path, rebuild }) => {
            let config = load_config(&cli, path)?;
            let coordinator = open_coordinator(path, &config, *rebuild)?;

            eprintln!("Scanning {} ...", path.display());
            let files = walker::walk_repo(path).into_diagnostic()?;

            let progress = if std::io::stderr().is_terminal() {
                let pb = indicatif::ProgressBar::new(files.len() as u64);
                pb.set_style(
                    indicatif::ProgressStyle::with_template(
                        "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}",
                    )
                    .into_diagnostic()?,
                );
                Some(pb)
            } else {
                None
            };

            let report = coordinator
                .sync(&files, |file| {
                    if let Some(pb) = &progress {
                        pb.set_message(file.path.display().to_string());
                        pb.inc(1);
                    }
                })
                .await
                .into_diagnostic()?;
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }

            coordinator.close().await.into_diagnostic()?;
            print_batch(&report, cli.format)?;
        }
        Some(Command::Search {
            query,
            path,
            limit,
            offset,
            alpha,
            files,
        }) => {
            let config = load_config(&cli, path)?;
            let request = SearchRequest::new(query.clone())
                .with_page(*offset, limit.unwrap_or(config.search.top_k))
                .with_alpha(alpha.unwrap_or(config.search.alpha))
                .with_file_patterns(files.clone());

            let coordinator = open_coordinator(path, &config, false)?;
            let response = coordinator.search(&request).await.into_diagnostic()?;
            coordinator.close().await.into_diagnostic()?;
            print_search(&response, cli.format)?;
        }
        Some(Command::Status { path }) => {
            let config = load_config(&cli, path)?;
            let coordinator = open_coordinator(path, &config, false)?;
            let stats = coordinator.stats();
            let dir = index_dir(path, &config);
            coordinator.close().await.into_diagnostic()?;

            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
                }
                OutputFormat::Markdown => {
                    println!("# Index Status\n");
                    println!("| Files | Chunks | Vectors | Terms | Layers | Mean degree | Model |");
                    println!("|-------|--------|---------|-------|--------|-------------|-------|");
                    let (layers, degree) = stats
                        .graph
                        .as_ref()
                        .map_or(("-".to_string(), "-".to_string()), |g| {
                            (g.layers.to_string(), format!("{:.1}", g.mean_degree))
                        });
                    println!(
                        "| {} | {} | {} | {} | {layers} | {degree} | `{}` |",
                        stats.files, stats.chunks, stats.vectors, stats.vocabulary, stats.model
                    );
                }
                OutputFormat::Text => {
                    println!("Index:      {}", dir.display());
                    println!("Files:      {}", stats.files);
                    println!("Chunks:     {}", stats.chunks);
                    println!("Vectors:    {}", stats.vectors);
                    println!("Terms:      {}", stats.vocabulary);
                    if let Some(graph) = &stats.graph {
                        println!(
                            "Graph:      {} layers, mean degree {:.1} (max {})",
                            graph.layers, graph.mean_degree, graph.max_degree
                        );
                    }
                    match stats.dimension {
                        Some(d) => println!("Model:      {} ({d} dimensions)", stats.model),
                        None => println!("Model:      {}", stats.model),
                    }
                }
            }
        }
        Some(Command::Repair { path }) => {
            let config = load_config(&cli, path)?;
            let coordinator = open_coordinator(path, &config, false)?;
            let report = coordinator.repair().await;
            coordinator.close().await.into_diagnostic()?;

            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
                }
                OutputFormat::Markdown | OutputFormat::Text => {
                    println!(
                        "Removed {} orphaned entries, dropped {} incomplete file records",
                        report.orphans_removed, report.records_dropped
                    );
                    if report.records_dropped > 0 {
                        println!("Run 'trawl index' to reindex the dropped files.");
                    }
                }
            }
        }
        Some(Command::Init) => {
            let path = Path::new(".trawl.toml");
            if path.exists() {
                miette::bail!(".trawl.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .trawl.toml with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "trawl", &mut std::io::stdout());
        }
    }

    Ok(())
}
