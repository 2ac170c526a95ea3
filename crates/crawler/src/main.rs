//! Citeforge command-line interface
//!
//! Subcommands:
//! 1. `paper` - fetch and print one paper's metadata
//! 2. `source` - download a paper's typesetting source
//! 3. `latex` - fetch metadata together with TeX content
//! 4. `search` - free-text search
//! 5. `keywords` - keywords of one paper
//! 6. `graph` - build and persist a citation graph

use anyhow::Context;
use citeforge_common::{
    config::AppConfig, metrics::register_metrics, storage::JsonStorage, telemetry::init_tracing,
    VERSION,
};
use citeforge_crawler::{
    format::format_for_learning, graph::TraversalSettings, ArxivClient, PaperProcessor,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "citeforge", version, about = "arXiv metadata and citation graph crawler")]
struct Cli {
    /// Configuration file (defaults to the layered config/ directory)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch metadata for a paper and print it as Markdown
    Paper { id: String },
    /// Download and unpack a paper's typesetting source
    Source { id: String },
    /// Fetch metadata together with the paper's TeX content
    Latex { id: String },
    /// Search papers by free text
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Print the top keywords of a paper
    Keywords {
        id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Build a citation graph from seed papers
    Graph {
        #[arg(long = "seed", required = true)]
        seeds: Vec<String>,
        #[arg(long)]
        depth: Option<u32>,
        /// Storage name for the persisted node, edge and error records
        #[arg(long, default_value = "citation_graph")]
        name: String,
        /// Also write the whole graph as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    init_tracing(&config.observability);
    register_metrics();
    info!("Starting Citeforge v{}", VERSION);

    let client = Arc::new(ArxivClient::from_config(&config).context("failed to build HTTP client")?);
    let storage = Arc::new(JsonStorage::new(&config.storage.data_dir));
    let processor = PaperProcessor::new(
        client.clone(),
        client,
        storage,
        TraversalSettings::from_config(&config),
        config.crawler.keyword_limit,
    );

    match cli.command {
        Command::Paper { id } => {
            let paper = processor.fetch_paper(&id).await?;
            println!("{}", format_for_learning(&paper));
        }
        Command::Source { id } => {
            let bundle = processor.download_source(&id).await?;
            println!(
                "{} files, main document: {}",
                bundle.files.len(),
                bundle.main_document.as_deref().unwrap_or("none")
            );
            for (path, bytes) in &bundle.files {
                println!("  {} ({} bytes)", path, bytes.len());
            }
        }
        Command::Latex { id } => {
            let combined = processor.fetch_paper_with_latex(&id).await?;
            println!("{}", format_for_learning(&combined.metadata));
            if combined.has_source_files {
                println!("{}", combined.latex_content);
            } else {
                warn!("No TeX source available");
            }
        }
        Command::Search { query, limit } => {
            for paper in processor.search(&query, limit).await? {
                println!("{}  {}", paper.id, paper.title);
            }
        }
        Command::Keywords { id, limit } => {
            for keyword in processor.keywords(&id, limit).await? {
                println!("{:>6.1}  {}", keyword.score, keyword.term);
            }
        }
        Command::Graph {
            seeds,
            depth,
            name,
            output,
        } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling traversal");
                    on_signal.cancel();
                }
            });

            let depth = depth.unwrap_or(config.crawler.default_max_depth);
            let graph = processor
                .build_graph(&seeds, depth, &name, &cancel)
                .await
                .map_err(|e| {
                    error!(error = %e, "Graph build failed");
                    e
                })?;

            println!(
                "{} nodes, {} edges, {} errors, {} unresolved references",
                graph.nodes().len(),
                graph.edges().len(),
                graph.errors().len(),
                graph.annotations().len()
            );
            for failure in graph.errors() {
                println!("  {} [{}] {}", failure.id, failure.kind, failure.reason);
            }

            if let Some(path) = output {
                let json = serde_json::to_vec_pretty(&graph)?;
                tokio::fs::write(&path, json)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "Graph written");
            }
        }
    }

    Ok(())
}
