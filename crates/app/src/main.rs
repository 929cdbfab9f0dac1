use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use scanshelf_core::{
    discover_pdf_files, find_duplicate_digests, ArchiveConfig, ArchiveIndex, BatchStatus,
    CancellationToken, HttpEntityExtractor, HttpOcrEngine, IndexState, Ingestor,
    NerEndpointConfig, OcrEndpointConfig, SearchQuery, WorkerPool,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "scanshelf", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the sharded archive.
    #[arg(long, env = "SCANSHELF_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// Directory of the full-text index.
    #[arg(long, env = "SCANSHELF_INDEX_DIR")]
    index_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// OCR every PDF under a folder and move new ones into the archive.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: PathBuf,

        /// Number of documents processed in parallel.
        #[arg(long)]
        workers: Option<usize>,

        /// Documents per shard folder.
        #[arg(long)]
        shard_capacity: Option<usize>,

        /// HTTP OCR endpoint used instead of local tesseract.
        #[arg(long, env = "LLM_OCR_ENDPOINT")]
        ocr_endpoint: Option<String>,

        /// Bearer token for the OCR endpoint.
        #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
        ocr_api_key: Option<String>,

        /// Named-entity endpoint; entities are skipped when unset.
        #[arg(long, env = "NER_ENDPOINT")]
        ner_endpoint: Option<String>,

        /// Bearer token for the named-entity endpoint.
        #[arg(long, env = "NER_API_KEY", hide_env_values = true)]
        ner_api_key: Option<String>,
    },
    /// Rebuild index entries for every archived record not yet indexed.
    Index,
    /// Add keywords, entities and titles to archived records missing them.
    Enrich {
        /// Named-entity endpoint; entities are left empty when unset.
        #[arg(long, env = "NER_ENDPOINT")]
        ner_endpoint: Option<String>,

        /// Bearer token for the named-entity endpoint.
        #[arg(long, env = "NER_API_KEY", hide_env_values = true)]
        ner_api_key: Option<String>,
    },
    /// List archived records that share a content digest.
    Duplicates,
    /// Search the index.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of documents to return.
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Match documents containing any term instead of all terms.
        #[arg(long, default_value_t = false)]
        any: bool,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<ArchiveConfig> {
    let mut config = match &cli.config {
        Some(path) => ArchiveConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => ArchiveConfig::default(),
    };

    if let Some(archive_dir) = &cli.archive_dir {
        config.archive_dir = archive_dir.clone();
    }
    if let Some(index_dir) = &cli.index_dir {
        config.index_dir = index_dir.clone();
    }

    Ok(config)
}

fn open_index(config: &ArchiveConfig) -> anyhow::Result<ArchiveIndex> {
    let index = ArchiveIndex::open_or_repair(&config.index_dir)
        .with_context(|| format!("opening index {}", config.index_dir.display()))?;

    if index.state() == IndexState::Reset {
        warn!(
            index = %config.index_dir.display(),
            "index was corrupt and has been recreated; run `scanshelf index` to refill it"
        );
    }

    Ok(index)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

/// PDFs already inside the archive are never treated as inbox files.
fn inbox_files(folder: &Path, archive_dir: &Path) -> Vec<PathBuf> {
    let archive_dir = archive_dir
        .canonicalize()
        .unwrap_or_else(|_| archive_dir.to_path_buf());

    discover_pdf_files(folder)
        .into_iter()
        .filter(|file| {
            file.canonicalize()
                .map(|resolved| !resolved.starts_with(&archive_dir))
                .unwrap_or(true)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        archive = %config.archive_dir.display(),
        index = %config.index_dir.display(),
        "scanshelf boot"
    );

    match cli.command {
        Command::Ingest {
            folder,
            workers,
            shard_capacity,
            ocr_endpoint,
            ocr_api_key,
            ner_endpoint,
            ner_api_key,
        } => {
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(shard_capacity) = shard_capacity {
                config.shard_capacity = shard_capacity;
            }

            let files = inbox_files(&folder, &config.archive_dir);
            if files.is_empty() {
                println!("no PDFs found under {}", folder.display());
                return Ok(());
            }

            let index = Arc::new(open_index(&config)?);
            let pool = WorkerPool::new(config.workers);
            let mut ingestor = Ingestor::new(config, index)?;

            if let Some(endpoint) = non_blank(ocr_endpoint) {
                info!(endpoint = %endpoint, "using HTTP OCR");
                ingestor = ingestor.with_ocr(HttpOcrEngine::new(OcrEndpointConfig {
                    endpoint,
                    api_key: non_blank(ocr_api_key),
                }));
            }
            if let Some(endpoint) = non_blank(ner_endpoint) {
                info!(endpoint = %endpoint, "using HTTP entity extraction");
                ingestor = ingestor.with_entities(HttpEntityExtractor::new(NerEndpointConfig {
                    endpoint,
                    api_key: non_blank(ner_api_key),
                }));
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing running documents");
                    on_signal.cancel();
                }
            });

            let report = pool
                .run(files, Arc::new(ingestor), cancel, |progress| {
                    let percent = (progress.fraction() * 100.0).round() as u64;
                    info!(
                        completed = progress.completed,
                        total = progress.total,
                        percent,
                        "progress"
                    );
                })
                .await;

            for failure in &report.failures {
                warn!(path = %failure.path.display(), reason = %failure.reason, "skipped pdf");
            }

            println!(
                "{} archived, {} duplicates, {} failed of {} at {}",
                report.archived,
                report.duplicates,
                report.failures.len(),
                report.total,
                Utc::now().to_rfc3339()
            );

            match report.status {
                BatchStatus::Completed => {}
                BatchStatus::Cancelled => println!("cancelled before all files were processed"),
                BatchStatus::Aborted { reason } => anyhow::bail!("batch aborted: {reason}"),
            }
        }
        Command::Index => {
            let index = open_index(&config)?;
            let report = index
                .index_archive(&config.archive_dir, |done, total| {
                    if done % 100 == 0 || done == total {
                        info!(done, total, "indexing records");
                    }
                })
                .with_context(|| format!("indexing {}", config.archive_dir.display()))?;

            println!(
                "{} indexed, {} skipped, {} failed at {}",
                report.indexed,
                report.skipped,
                report.failed,
                Utc::now().to_rfc3339()
            );
        }
        Command::Enrich {
            ner_endpoint,
            ner_api_key,
        } => {
            let index = Arc::new(open_index(&config)?);
            let root = config.archive_dir.clone();
            let mut ingestor = Ingestor::new(config, index)?;
            if let Some(endpoint) = non_blank(ner_endpoint) {
                info!(endpoint = %endpoint, "using HTTP entity extraction");
                ingestor = ingestor.with_entities(HttpEntityExtractor::new(NerEndpointConfig {
                    endpoint,
                    api_key: non_blank(ner_api_key),
                }));
            }

            // Entity requests use a blocking HTTP client.
            let report = tokio::task::spawn_blocking(move || {
                ingestor.enrich_archive(&root, |done, total| {
                    if done % 100 == 0 || done == total {
                        info!(done, total, "enriching records");
                    }
                })
            })
            .await?;

            println!(
                "{} enriched, {} already complete, {} failed at {}",
                report.enriched,
                report.complete,
                report.failed,
                Utc::now().to_rfc3339()
            );
        }
        Command::Duplicates => {
            let groups = find_duplicate_digests(&config.archive_dir);
            if groups.is_empty() {
                println!("no duplicate digests under {}", config.archive_dir.display());
            }

            for group in &groups {
                println!("{}", group.digest);
                if let Some(kept) = group.kept() {
                    println!("  keep {}", kept.display());
                }
                for redundant in group.redundant() {
                    println!("  dup  {}", redundant.display());
                }
            }
        }
        Command::Search { query, limit, any } => {
            let index = open_index(&config)?;
            let search_query = SearchQuery {
                text: query,
                limit,
                match_any: any,
            };

            let hits = index.search(&search_query)?;
            println!("query: {}", search_query.text);
            if hits.is_empty() {
                println!("no results");
            }

            for hit in hits {
                println!("[{:.4}] {} (page {})", hit.score, hit.title, hit.page);
                println!("  pdf={}", hit.pdf_path);
                if let Some(image) = &hit.image_path {
                    println!("  image={image}");
                }
                println!("  {}", hit.excerpt);
            }
        }
    }

    Ok(())
}
