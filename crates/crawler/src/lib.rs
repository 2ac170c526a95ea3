//! Citeforge Crawler
//!
//! Builds citation networks from arXiv papers:
//! - Identifier normalization (modern and legacy syntaxes, URLs)
//! - Metadata retrieval from the arXiv Atom API
//! - Typesetting-source download and in-memory unpacking
//! - Bibliography extraction and reference resolution
//! - Keyword extraction
//! - Breadth-first citation graph construction

pub mod client;
pub mod errors;
pub mod format;
pub mod graph;
pub mod identifier;
pub mod keywords;
pub mod metadata;
pub mod processor;
pub mod references;
pub mod source;

pub use client::ArxivClient;
pub use errors::CrawlerError;
pub use graph::{CitationGraph, GraphBuilder, GraphEdge, GraphError, GraphNode, TraversalSettings};
pub use identifier::{normalize, PaperId};
pub use metadata::{MetadataFetcher, PaperMetadata};
pub use processor::PaperProcessor;
pub use references::Reference;
pub use source::{SourceBundle, SourceRetriever};
