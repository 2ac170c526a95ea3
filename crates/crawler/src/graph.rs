//! Citation graph construction
//!
//! Breadth-first traversal from seed identifiers:
//! - Each level is processed concurrently, bounded by `max_concurrency`
//! - Per paper, metadata and source retrieval run concurrently
//! - An identifier is fetched at most once per build, at its shallowest depth
//! - Per-paper failures are recorded in the graph and never abort the build
//!
//! A single task owns the graph and the visited set; workers only return
//! results, so no locking is involved.

use crate::errors::CrawlerError;
use crate::identifier::{normalize, PaperId};
use crate::keywords::Keyword;
use crate::metadata::{MetadataFetcher, PaperMetadata};
use crate::references::{extract_references, Reference};
use crate::source::SourceRetriever;
use citeforge_common::config::AppConfig;
use citeforge_common::metrics::record_graph;
use citeforge_common::retry::{retry_transient, RetryPolicy};
use citeforge_common::storage::Record;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A paper in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: PaperId,
    /// Absent when metadata retrieval failed
    pub metadata: Option<PaperMetadata>,
    /// Depth at which the paper was first reached
    pub depth: u32,
}

impl GraphNode {
    /// Storage record, optionally enriched with keywords
    pub fn to_record(&self, keywords: &[Keyword]) -> Record {
        let mut record = match &self.metadata {
            Some(metadata) => metadata.to_record(),
            None => {
                let mut record = Record::new();
                record.insert("arxiv_id".into(), json!(self.id.as_str()));
                record
            }
        };
        record.insert("depth".into(), json!(self.depth));
        record.insert("has_metadata".into(), json!(self.metadata.is_some()));
        record.insert(
            "keywords".into(),
            Value::Array(keywords.iter().map(|k| json!(k.term)).collect()),
        );
        record
    }
}

/// `source` cites `target`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: PaperId,
    pub target: PaperId,
}

/// A per-paper failure recorded during traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphError {
    /// Normalized identifier, or the raw input when normalization failed
    pub id: String,
    pub kind: String,
    pub reason: String,
}

impl GraphError {
    fn new(id: impl Into<String>, error: &CrawlerError) -> Self {
        Self {
            id: id.into(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

/// A reference of a fetched paper that could not be resolved to an identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAnnotation {
    pub source: PaperId,
    pub reference: Reference,
}

/// Result of a traversal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationGraph {
    pub run_id: Option<Uuid>,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    errors: Vec<GraphError>,
    annotations: Vec<ReferenceAnnotation>,
}

impl CitationGraph {
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn errors(&self) -> &[GraphError] {
        &self.errors
    }

    pub fn annotations(&self) -> &[ReferenceAnnotation] {
        &self.annotations
    }

    pub fn node(&self, id: &PaperId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Identifiers of every node
    pub fn node_ids(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|n| n.id.to_string()).collect()
    }

    /// Every edge as a `(source, target)` pair
    pub fn edge_pairs(&self) -> BTreeSet<(String, String)> {
        self.edges
            .iter()
            .map(|e| (e.source.to_string(), e.target.to_string()))
            .collect()
    }

    /// Papers cited by `id`
    pub fn references_of(&self, id: &PaperId) -> Vec<&PaperId> {
        self.edges
            .iter()
            .filter(|e| &e.source == id)
            .map(|e| &e.target)
            .collect()
    }

    /// Papers in the graph citing `id`
    pub fn citations_of(&self, id: &PaperId) -> Vec<&PaperId> {
        self.edges
            .iter()
            .filter(|e| &e.target == id)
            .map(|e| &e.source)
            .collect()
    }

    /// Edge records for persistence
    pub fn edge_records(&self) -> Vec<Record> {
        self.edges
            .iter()
            .map(|e| {
                let mut record = Record::new();
                record.insert("source".into(), json!(e.source.as_str()));
                record.insert("target".into(), json!(e.target.as_str()));
                record
            })
            .collect()
    }

    /// Error records for persistence
    pub fn error_records(&self) -> Vec<Record> {
        self.errors
            .iter()
            .map(|e| {
                let mut record = Record::new();
                record.insert("id".into(), json!(e.id));
                record.insert("kind".into(), json!(e.kind));
                record.insert("reason".into(), json!(e.reason));
                record
            })
            .collect()
    }
}

/// Traversal limits and resilience settings
#[derive(Debug, Clone)]
pub struct TraversalSettings {
    /// Papers processed concurrently within one level
    pub max_concurrency: usize,
    /// Largest accepted `max_depth`
    pub max_depth_limit: u32,
    /// Upper bound of a single remote call
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl TraversalSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.crawler.max_concurrency.max(1),
            max_depth_limit: config.crawler.max_depth_limit,
            request_timeout: config.request_timeout(),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// What a worker learned about one paper
struct PaperOutcome {
    id: PaperId,
    depth: u32,
    metadata: Result<PaperMetadata, CrawlerError>,
    /// `None` when the paper sits at the depth bound and is not expanded
    references: Option<Result<Vec<Reference>, CrawlerError>>,
}

/// Owner-side traversal state
#[derive(Default)]
struct Traversal {
    graph: CitationGraph,
    visited: HashSet<PaperId>,
    edges: HashSet<GraphEdge>,
}

/// Builds citation graphs from injected metadata and source providers
pub struct GraphBuilder {
    metadata: Arc<dyn MetadataFetcher>,
    sources: Arc<dyn SourceRetriever>,
    settings: TraversalSettings,
}

impl GraphBuilder {
    pub fn new(
        metadata: Arc<dyn MetadataFetcher>,
        sources: Arc<dyn SourceRetriever>,
        settings: TraversalSettings,
    ) -> Self {
        Self {
            metadata,
            sources,
            settings,
        }
    }

    /// Build the graph reachable from `seeds` within `max_depth` citation hops
    pub async fn build<S: AsRef<str>>(
        &self,
        seeds: &[S],
        max_depth: u32,
    ) -> Result<CitationGraph, CrawlerError> {
        self.build_with_cancel(seeds, max_depth, &CancellationToken::new())
            .await
    }

    /// Build the graph, stopping with `Cancelled` once `cancel` fires.
    ///
    /// In-flight requests are dropped on cancellation and no partial graph is
    /// returned.
    #[instrument(skip(self, seeds, cancel), fields(seeds = seeds.len()))]
    pub async fn build_with_cancel<S: AsRef<str>>(
        &self,
        seeds: &[S],
        max_depth: u32,
        cancel: &CancellationToken,
    ) -> Result<CitationGraph, CrawlerError> {
        if seeds.is_empty() {
            return Err(CrawlerError::InvalidInput("seed list is empty".to_string()));
        }
        if max_depth > self.settings.max_depth_limit {
            return Err(CrawlerError::InvalidInput(format!(
                "max_depth {} exceeds the limit of {}",
                max_depth, self.settings.max_depth_limit
            )));
        }

        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let mut state = Traversal::default();
        state.graph.run_id = Some(run_id);

        let mut frontier: Vec<PaperId> = Vec::new();
        for seed in seeds {
            let raw = seed.as_ref();
            match normalize(raw) {
                Ok(id) if !frontier.contains(&id) => frontier.push(id),
                Ok(_) => {}
                Err(e) => {
                    warn!(seed = %raw, error = %e, "Rejecting seed");
                    state.graph.errors.push(GraphError::new(raw, &e));
                }
            }
        }

        info!(run_id = %run_id, valid_seeds = frontier.len(), "Starting traversal");

        let mut depth = 0u32;
        while !frontier.is_empty() {
            if cancel.is_cancelled() {
                return Err(CrawlerError::Cancelled);
            }

            let expand = depth < max_depth;
            let level: Vec<PaperId> = frontier
                .drain(..)
                .filter(|id| state.visited.insert(id.clone()))
                .collect();

            debug!(depth = depth, papers = level.len(), expand = expand, "Processing level");

            let mut outcomes = std::pin::pin!(stream::iter(level)
                .map(move |id| self.process(id, depth, expand))
                .buffer_unordered(self.settings.max_concurrency.max(1)));

            let mut next: Vec<PaperId> = Vec::new();
            loop {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        warn!(run_id = %run_id, depth = depth, "Traversal cancelled");
                        return Err(CrawlerError::Cancelled);
                    }
                    outcome = outcomes.next() => match outcome {
                        Some(outcome) => outcome,
                        None => break,
                    },
                };
                state.absorb(outcome, &mut next);
            }

            frontier = next;
            depth += 1;
        }

        let mut graph = state.into_graph();
        graph.nodes.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));

        record_graph(graph.nodes.len(), graph.edges.len(), graph.errors.len());
        info!(
            run_id = %run_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            errors = graph.errors.len(),
            unresolved = graph.annotations.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Traversal complete"
        );

        Ok(graph)
    }

    /// Fetch everything needed for one paper
    async fn process(&self, id: PaperId, depth: u32, expand: bool) -> PaperOutcome {
        let references = async {
            if expand {
                Some(self.fetch_references(&id).await)
            } else {
                None
            }
        };
        let (metadata, references) = tokio::join!(self.fetch_metadata(&id), references);

        PaperOutcome {
            id,
            depth,
            metadata,
            references,
        }
    }

    async fn fetch_metadata(&self, id: &PaperId) -> Result<PaperMetadata, CrawlerError> {
        retry_transient(&self.settings.retry, || {
            self.bounded(id, self.metadata.fetch(id))
        })
        .await
    }

    async fn fetch_references(&self, id: &PaperId) -> Result<Vec<Reference>, CrawlerError> {
        let bundle = retry_transient(&self.settings.retry, || {
            self.bounded(id, self.sources.retrieve(id))
        })
        .await?;

        tokio::task::spawn_blocking(move || extract_references(&bundle))
            .await
            .map_err(|e| CrawlerError::Parse {
                context: format!("references of {}", id),
                message: e.to_string(),
            })
    }

    /// Apply the per-call timeout, reporting expiry as a transport failure
    async fn bounded<T>(
        &self,
        id: &PaperId,
        call: impl Future<Output = Result<T, CrawlerError>>,
    ) -> Result<T, CrawlerError> {
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CrawlerError::Transport {
                id: id.to_string(),
                message: format!("timed out after {:?}", self.settings.request_timeout),
            }),
        }
    }
}

impl Traversal {
    /// Fold one worker result into the graph and queue newly discovered papers
    fn absorb(&mut self, outcome: PaperOutcome, next: &mut Vec<PaperId>) {
        let PaperOutcome {
            id,
            depth,
            metadata,
            references,
        } = outcome;

        let metadata = match metadata {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(paper_id = %id, error = %e, "Metadata unavailable");
                self.graph.errors.push(GraphError::new(id.as_str(), &e));
                None
            }
        };

        match references {
            Some(Ok(references)) => {
                for reference in references {
                    let Some(target) = reference.resolve() else {
                        self.graph.annotations.push(ReferenceAnnotation {
                            source: id.clone(),
                            reference,
                        });
                        continue;
                    };
                    if target == id {
                        continue;
                    }

                    let edge = GraphEdge {
                        source: id.clone(),
                        target: target.clone(),
                    };
                    if self.edges.insert(edge.clone()) {
                        self.graph.edges.push(edge);
                    }
                    if !self.visited.contains(&target) && !next.contains(&target) {
                        next.push(target);
                    }
                }
            }
            Some(Err(e)) => {
                warn!(paper_id = %id, error = %e, "References unavailable");
                self.graph.errors.push(GraphError::new(id.as_str(), &e));
            }
            None => {}
        }

        self.graph.nodes.push(GraphNode {
            id,
            metadata,
            depth,
        });
    }

    fn into_graph(mut self) -> CitationGraph {
        self.graph.edges.sort();
        self.graph
    }
}
