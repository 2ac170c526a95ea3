//! Bibliographic metadata retrieval
//!
//! Queries the arXiv Atom API and maps feed entries to [`PaperMetadata`].
//! Remote "not found" and malformed feeds are content errors
//! (`MetadataNotFound`); connection failures, timeouts, throttling and 5xx
//! responses are `Transport` errors and may be retried by the caller.

use crate::client::ArxivClient;
use crate::errors::CrawlerError;
use crate::identifier::{normalize, PaperId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use citeforge_common::http::status_error;
use citeforge_common::metrics::FetchMetrics;
use citeforge_common::storage::Record;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};

/// Structured bibliographic metadata for one paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub id: PaperId,
    pub title: String,
    /// Authors in byline order
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub categories: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub links: PaperLinks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperLinks {
    pub abstract_url: String,
    pub pdf_url: String,
    pub source_url: String,
}

impl PaperMetadata {
    /// Flatten into a storage record
    pub fn to_record(&self) -> Record {
        let value = json!({
            "arxiv_id": self.id.as_str(),
            "title": self.title,
            "authors": self.authors,
            "abstract": self.abstract_text,
            "categories": self.categories,
            "primary_category": self.primary_category,
            "published": self.published.map(|d| d.to_rfc3339()),
            "updated": self.updated.map(|d| d.to_rfc3339()),
            "arxiv_url": self.links.abstract_url,
            "pdf_link": self.links.pdf_url,
            "source_link": self.links.source_url,
            "comment": self.comment,
            "journal_ref": self.journal_ref,
            "doi": self.doi,
        });

        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }
}

/// Source of paper metadata
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch metadata for one paper; every call goes to the remote service
    async fn fetch(&self, id: &PaperId) -> Result<PaperMetadata, CrawlerError>;

    /// Free-text search, most relevant first
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PaperMetadata>, CrawlerError> {
        let _ = (query, limit);
        Err(CrawlerError::InvalidInput(
            "search is not supported by this metadata source".to_string(),
        ))
    }
}

#[async_trait]
impl MetadataFetcher for ArxivClient {
    #[instrument(skip(self), fields(paper_id = %id))]
    async fn fetch(&self, id: &PaperId) -> Result<PaperMetadata, CrawlerError> {
        let metrics = FetchMetrics::start("metadata");
        let query = [("id_list", id.to_string()), ("max_results", "1".to_string())];

        let result = self.query_feed(id.as_str(), &query).await.and_then(|xml| {
            let entries = parse_feed(&xml).map_err(|reason| CrawlerError::MetadataNotFound {
                id: id.to_string(),
                reason: format!("malformed response: {}", reason),
            })?;
            select_entry(id, entries, self)
        });

        metrics.finish(match &result {
            Ok(_) => "ok",
            Err(CrawlerError::Transport { .. }) => "transport_error",
            Err(_) => "not_found",
        });

        if let Ok(paper) = &result {
            debug!(
                title = %paper.title,
                authors = paper.authors.len(),
                "Metadata fetched"
            );
        }
        result
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PaperMetadata>, CrawlerError> {
        if query.trim().is_empty() {
            return Err(CrawlerError::InvalidInput("empty search query".to_string()));
        }

        let params = [
            ("search_query", format!("all:{}", query.trim())),
            ("start", "0".to_string()),
            ("max_results", limit.to_string()),
            ("sortBy", "relevance".to_string()),
            ("sortOrder", "descending".to_string()),
        ];

        let xml = self.query_feed(query, &params).await?;
        let entries = parse_feed(&xml).map_err(|message| CrawlerError::Parse {
            context: "search response".to_string(),
            message,
        })?;

        let papers: Vec<PaperMetadata> = entries
            .into_iter()
            .filter(|e| !e.is_error())
            .filter_map(|entry| match normalize(&entry.id) {
                Ok(id) => Some(entry.into_metadata(id, self)),
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "Skipping search result with unusable id");
                    None
                }
            })
            .take(limit)
            .collect();

        debug!(results = papers.len(), "Search complete");
        Ok(papers)
    }
}

impl ArxivClient {
    async fn query_feed(&self, subject: &str, query: &[(&str, String)]) -> Result<String, CrawlerError> {
        let response = self
            .get(&self.config.api_url, query)
            .await
            .map_err(|e| CrawlerError::transport(subject, &e))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CrawlerError::transport(
                subject,
                &status_error(status, &self.config.api_url),
            ));
        }
        if !status.is_success() {
            return Err(CrawlerError::MetadataNotFound {
                id: subject.to_string(),
                reason: format!("metadata API returned {}", status),
            });
        }

        response.text().await.map_err(|e| CrawlerError::Transport {
            id: subject.to_string(),
            message: format!("failed to read response body: {}", e),
        })
    }
}

/// Links configured on the client, used to fill in links absent from the feed
pub(crate) trait LinkDefaults {
    fn default_abs_url(&self, id: &PaperId) -> String;
    fn default_pdf_url(&self, id: &PaperId) -> String;
    fn default_source_url(&self, id: &PaperId) -> String;
}

impl LinkDefaults for ArxivClient {
    fn default_abs_url(&self, id: &PaperId) -> String {
        self.abs_url(id)
    }
    fn default_pdf_url(&self, id: &PaperId) -> String {
        self.pdf_url(id)
    }
    fn default_source_url(&self, id: &PaperId) -> String {
        self.source_url(id)
    }
}

/// Choose the entry answering a lookup by id
fn select_entry(
    id: &PaperId,
    entries: Vec<AtomEntry>,
    links: &impl LinkDefaults,
) -> Result<PaperMetadata, CrawlerError> {
    let not_found = |reason: &str| CrawlerError::MetadataNotFound {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if let Some(error) = entries.iter().find(|e| e.is_error()) {
        return Err(not_found(&format!("API error: {}", error.summary)));
    }

    let entry = entries
        .into_iter()
        .find(|e| !e.is_empty())
        .ok_or_else(|| not_found("no entry in response"))?;

    Ok(entry.into_metadata(id.clone(), links))
}

/// One `<entry>` of an Atom feed, before validation
#[derive(Debug, Default, Clone)]
pub(crate) struct AtomEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub abs_link: Option<String>,
    pub pdf_link: Option<String>,
    pub comment: Option<String>,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
}

impl AtomEntry {
    /// arXiv reports lookup failures as an entry whose id points at the errors page
    fn is_error(&self) -> bool {
        self.id.contains("/api/errors")
    }

    fn is_empty(&self) -> bool {
        self.title.is_empty() && self.authors.is_empty() && self.summary.is_empty()
    }

    fn into_metadata(self, id: PaperId, links: &impl LinkDefaults) -> PaperMetadata {
        PaperMetadata {
            title: normalize_ws(&self.title),
            authors: self.authors,
            abstract_text: normalize_ws(&self.summary),
            categories: self.categories.into_iter().collect(),
            primary_category: self.primary_category,
            published: self.published.as_deref().and_then(parse_timestamp),
            updated: self.updated.as_deref().and_then(parse_timestamp),
            links: PaperLinks {
                abstract_url: self.abs_link.unwrap_or_else(|| links.default_abs_url(&id)),
                pdf_url: self.pdf_link.unwrap_or_else(|| links.default_pdf_url(&id)),
                source_url: links.default_source_url(&id),
            },
            comment: self.comment.map(|c| normalize_ws(&c)),
            journal_ref: self.journal_ref.map(|j| normalize_ws(&j)),
            doi: self.doi,
            id,
        }
    }
}

/// Parse every `<entry>` in an Atom feed.
///
/// Unknown elements are ignored and optional elements may be missing.
pub(crate) fn parse_feed(xml: &str) -> Result<Vec<AtomEntry>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    let mut in_author = false;
    let mut text = String::new();
    let mut saw_feed = false;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"feed" => saw_feed = true,
                    b"entry" => current = Some(AtomEntry::default()),
                    b"author" => in_author = true,
                    _ => {
                        if let Some(entry) = current.as_mut() {
                            apply_attributes(entry, &e);
                        }
                    }
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    apply_attributes(entry, &e);
                }
            }
            Ok(Event::Text(t)) => {
                let decoded = t.unescape().map_err(|e| e.to_string())?;
                text.push_str(&decoded);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            entries.push(entry);
                        }
                    }
                    b"author" => in_author = false,
                    other => {
                        if let Some(entry) = current.as_mut() {
                            apply_text(entry, other, text.trim(), in_author);
                        }
                    }
                }
                text.clear();
            }
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {}",
                    reader.error_position(),
                    e
                ))
            }
        }
    }

    if !saw_feed {
        return Err("response is not an Atom feed".to_string());
    }

    Ok(entries)
}

fn apply_text(entry: &mut AtomEntry, element: &[u8], value: &str, in_author: bool) {
    if value.is_empty() {
        return;
    }
    let value = value.to_string();
    match element {
        b"name" if in_author => entry.authors.push(normalize_ws(&value)),
        b"id" => entry.id = value,
        b"title" => entry.title = value,
        b"summary" => entry.summary = value,
        b"published" => entry.published = Some(value),
        b"updated" => entry.updated = Some(value),
        b"comment" => entry.comment = Some(value),
        b"journal_ref" => entry.journal_ref = Some(value),
        b"doi" => entry.doi = Some(value),
        _ => {}
    }
}

fn apply_attributes(entry: &mut AtomEntry, element: &BytesStart<'_>) {
    match element.local_name().as_ref() {
        b"category" => {
            if let Some(term) = attribute(element, b"term") {
                if !entry.categories.contains(&term) {
                    entry.categories.push(term);
                }
            }
        }
        b"primary_category" => {
            entry.primary_category = attribute(element, b"term");
        }
        b"link" => {
            let href = attribute(element, b"href");
            let rel = attribute(element, b"rel");
            let title = attribute(element, b"title");
            let mime = attribute(element, b"type");

            if title.as_deref() == Some("pdf") || mime.as_deref() == Some("application/pdf") {
                entry.pdf_link = href;
            } else if rel.as_deref() == Some("alternate") {
                entry.abs_link = href;
            }
        }
        _ => {}
    }
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: id_list=2103.00020</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2103.00020v1</id>
    <updated>2021-02-26T17:04:03Z</updated>
    <published>2021-02-26T17:04:03Z</published>
    <title>Learning Transferable Visual Models From
      Natural Language Supervision</title>
    <summary>  State-of-the-art computer vision systems are trained to predict
      a fixed set of predetermined object categories.</summary>
    <author><name>Alec Radford</name></author>
    <author><name>Jong Wook Kim</name><arxiv:affiliation>OpenAI</arxiv:affiliation></author>
    <arxiv:comment>48 pages</arxiv:comment>
    <link href="http://arxiv.org/abs/2103.00020v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2103.00020v1" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.CV" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CV" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    const ERROR_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_9999.99999</id>
    <title>Error</title>
    <summary>incorrect id format for 9999.99999</summary>
  </entry>
</feed>"#;

    struct TestLinks;

    impl LinkDefaults for TestLinks {
        fn default_abs_url(&self, id: &PaperId) -> String {
            format!("https://arxiv.org/abs/{}", id)
        }
        fn default_pdf_url(&self, id: &PaperId) -> String {
            format!("https://arxiv.org/pdf/{}", id)
        }
        fn default_source_url(&self, id: &PaperId) -> String {
            format!("https://arxiv.org/e-print/{}", id)
        }
    }

    #[test]
    fn test_parse_feed_entry() {
        let entries = parse_feed(SAMPLE_FEED).unwrap();
        assert_eq!(entries.len(), 1);

        let id = normalize("2103.00020").unwrap();
        let paper = select_entry(&id, entries, &TestLinks).unwrap();

        assert_eq!(
            paper.title,
            "Learning Transferable Visual Models From Natural Language Supervision"
        );
        assert_eq!(paper.authors, vec!["Alec Radford", "Jong Wook Kim"]);
        assert!(paper.abstract_text.starts_with("State-of-the-art computer vision"));
        assert!(paper.categories.contains("cs.LG"));
        assert_eq!(paper.primary_category.as_deref(), Some("cs.CV"));
        assert_eq!(paper.comment.as_deref(), Some("48 pages"));
        assert_eq!(paper.links.pdf_url, "http://arxiv.org/pdf/2103.00020v1");
        assert_eq!(paper.links.source_url, "https://arxiv.org/e-print/2103.00020");
        assert!(paper.published.is_some());
        assert!(paper.doi.is_none());
    }

    #[test]
    fn test_error_entry_is_not_found() {
        let entries = parse_feed(ERROR_FEED).unwrap();
        let id = normalize("2103.00020").unwrap();
        let err = select_entry(&id, entries, &TestLinks).unwrap_err();
        assert_eq!(err.kind(), "metadata_not_found");
    }

    #[test]
    fn test_empty_feed_is_not_found() {
        let entries = parse_feed(r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#).unwrap();
        let id = normalize("2103.00020").unwrap();
        assert!(matches!(
            select_entry(&id, entries, &TestLinks),
            Err(CrawlerError::MetadataNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_feed() {
        assert!(parse_feed("<html><body>Service Unavailable</body></html>").is_err());
        assert!(parse_feed("<feed><entry><title>x</entry></feed>").is_err());
    }

    #[test]
    fn test_missing_optional_fields_tolerated() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
            <entry><id>http://arxiv.org/abs/hep-th/9901001v1</id><title>Old paper</title></entry>
        </feed>"#;
        let id = normalize("hep-th/9901001").unwrap();
        let paper = select_entry(&id, parse_feed(xml).unwrap(), &TestLinks).unwrap();

        assert_eq!(paper.title, "Old paper");
        assert!(paper.authors.is_empty());
        assert!(paper.published.is_none());
        assert_eq!(paper.links.abstract_url, "https://arxiv.org/abs/hep-th/9901001");
    }

    #[test]
    fn test_to_record_columns() {
        let id = normalize("2103.00020").unwrap();
        let paper = select_entry(&id, parse_feed(SAMPLE_FEED).unwrap(), &TestLinks).unwrap();
        let record = paper.to_record();

        assert_eq!(record["arxiv_id"], json!("2103.00020"));
        assert_eq!(record["doi"], Value::Null);
        assert_eq!(record["categories"], json!(["cs.CV", "cs.LG"]));
    }
}
