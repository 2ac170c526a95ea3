//! Paper processor
//!
//! Orchestrates fetching, extraction and persistence for the command surface:
//! single-paper lookups, source downloads, search, keywords, and graph builds.

use crate::errors::CrawlerError;
use crate::graph::{CitationGraph, GraphBuilder, TraversalSettings};
use crate::identifier::{normalize, PaperId};
use crate::keywords::{extract_keywords, Keyword};
use crate::metadata::{MetadataFetcher, PaperMetadata};
use crate::source::{SourceBundle, SourceRetriever};
use chrono::Utc;
use citeforge_common::retry::{retry_transient, RetryPolicy};
use citeforge_common::storage::{keys, Record, Storage};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Metadata together with the paper's TeX content
#[derive(Debug, Clone, Serialize)]
pub struct CombinedPaper {
    pub metadata: PaperMetadata,
    /// Concatenated TeX files, empty when no source is available
    pub latex_content: String,
    pub has_source_files: bool,
}

/// Paper processor
pub struct PaperProcessor {
    metadata: Arc<dyn MetadataFetcher>,
    sources: Arc<dyn SourceRetriever>,
    storage: Arc<dyn Storage>,
    builder: GraphBuilder,
    retry: RetryPolicy,
    keyword_limit: usize,
}

impl PaperProcessor {
    pub fn new(
        metadata: Arc<dyn MetadataFetcher>,
        sources: Arc<dyn SourceRetriever>,
        storage: Arc<dyn Storage>,
        settings: TraversalSettings,
        keyword_limit: usize,
    ) -> Self {
        let retry = settings.retry.clone();
        Self {
            builder: GraphBuilder::new(metadata.clone(), sources.clone(), settings),
            metadata,
            sources,
            storage,
            retry,
            keyword_limit,
        }
    }

    /// Fetch metadata for one paper and persist it
    #[instrument(skip(self))]
    pub async fn fetch_paper(&self, raw_id: &str) -> Result<PaperMetadata, CrawlerError> {
        let id = normalize(raw_id)?;
        let paper = self.lookup(&id).await?;

        // Persist the paper and add it to the aggregate set
        let mut record = paper.to_record();
        record.insert("fetched_at".into(), json!(Utc::now().to_rfc3339()));
        self.storage.save(&[record.clone()], &keys::paper(id.as_str())).await?;
        self.storage.append(&[record], &keys::all_papers()).await?;

        info!(paper_id = %id, title = %paper.title, "Paper fetched");
        Ok(paper)
    }

    /// Download and unpack the source of one paper and persist it
    #[instrument(skip(self))]
    pub async fn download_source(&self, raw_id: &str) -> Result<SourceBundle, CrawlerError> {
        let id = normalize(raw_id)?;
        let bundle = retry_transient(&self.retry, || self.sources.retrieve(&id)).await?;

        let mut record = bundle.to_record();
        record.insert("fetched_at".into(), json!(Utc::now().to_rfc3339()));
        self.storage.save(&[record], &keys::source(id.as_str())).await?;

        info!(
            paper_id = %id,
            files = bundle.files.len(),
            main_document = ?bundle.main_document,
            "Source downloaded"
        );
        Ok(bundle)
    }

    /// Fetch metadata and TeX content together.
    ///
    /// A paper without retrievable source still yields metadata; transport
    /// failures are returned.
    #[instrument(skip(self))]
    pub async fn fetch_paper_with_latex(&self, raw_id: &str) -> Result<CombinedPaper, CrawlerError> {
        let id = normalize(raw_id)?;

        let (metadata, source) = tokio::join!(
            self.fetch_paper(id.as_str()),
            self.download_source(id.as_str())
        );
        let metadata = metadata?;

        let latex_content = match source {
            Ok(bundle) => bundle.latex_content(),
            Err(e @ CrawlerError::SourceUnavailable { .. }) => {
                warn!(paper_id = %id, error = %e, "Continuing without source");
                String::new()
            }
            Err(e) => return Err(e),
        };

        let combined = CombinedPaper {
            has_source_files: !latex_content.is_empty(),
            latex_content,
            metadata,
        };

        let mut record = combined.metadata.to_record();
        record.insert("latex_content".into(), json!(combined.latex_content));
        record.insert("has_source_files".into(), json!(combined.has_source_files));
        record.insert("fetched_at".into(), json!(Utc::now().to_rfc3339()));
        self.storage.save(&[record], &keys::combined(id.as_str())).await?;

        Ok(combined)
    }

    /// Free-text search; results are persisted under a timestamped key
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<PaperMetadata>, CrawlerError> {
        let papers = retry_transient(&self.retry, || self.metadata.search(query, limit)).await?;

        if !papers.is_empty() {
            let records: Vec<Record> = papers
                .iter()
                .map(|p| {
                    let mut record = p.to_record();
                    record.insert("query".into(), json!(query));
                    record
                })
                .collect();
            let key = keys::search(query, Utc::now().timestamp());
            self.storage.save(&records, &key).await?;
        }

        info!(results = papers.len(), "Search complete");
        Ok(papers)
    }

    /// Keywords of one paper's title and abstract
    pub async fn keywords(&self, raw_id: &str, limit: Option<usize>) -> Result<Vec<Keyword>, CrawlerError> {
        let id = normalize(raw_id)?;
        let paper = self.lookup(&id).await?;
        Ok(extract_keywords(&paper, limit.unwrap_or(self.keyword_limit)))
    }

    /// Build a citation graph and persist its nodes, edges and errors under `name`
    #[instrument(skip(self, seeds, cancel), fields(seeds = seeds.len()))]
    pub async fn build_graph(
        &self,
        seeds: &[String],
        max_depth: u32,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<CitationGraph, CrawlerError> {
        let graph = self.builder.build_with_cancel(seeds, max_depth, cancel).await?;

        let node_records: Vec<Record> = graph
            .nodes()
            .iter()
            .map(|node| {
                let keywords = node
                    .metadata
                    .as_ref()
                    .map(|m| extract_keywords(m, self.keyword_limit))
                    .unwrap_or_default();
                node.to_record(&keywords)
            })
            .collect();

        self.storage.save(&node_records, &keys::graph_nodes(name)).await?;
        self.storage.save(&graph.edge_records(), &keys::graph_edges(name)).await?;
        self.storage.save(&graph.error_records(), &keys::graph_errors(name)).await?;

        debug!(name = %name, "Graph persisted");
        Ok(graph)
    }

    async fn lookup(&self, id: &PaperId) -> Result<PaperMetadata, CrawlerError> {
        retry_transient(&self.retry, || self.metadata.fetch(id)).await
    }
}
