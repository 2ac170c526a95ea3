//! Typesetting-source retrieval
//!
//! Downloads the e-print payload for a paper and unpacks it in memory.
//! A payload may be:
//! - a gzip-compressed tar archive (multi-file submissions)
//! - a gzip-compressed single file (single-file submissions)
//! - an uncompressed tar or single file
//!
//! PDF-only submissions, empty payloads and oversized payloads are reported
//! as `SourceUnavailable`.

use crate::client::ArxivClient;
use crate::errors::CrawlerError;
use crate::identifier::PaperId;
use async_trait::async_trait;
use citeforge_common::http::status_error;
use citeforge_common::metrics::FetchMetrics;
use citeforge_common::storage::{keys, Record};
use flate2::read::GzDecoder;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use tracing::{debug, instrument, warn};

/// Extensions treated as text when decoding a bundle
const TEXT_EXTENSIONS: &[&str] = &[
    "tex", "ltx", "latex", "bib", "bbl", "sty", "cls", "bst", "clo", "txt",
];

/// Unpacked typesetting source of one paper
#[derive(Debug, Clone, Serialize)]
pub struct SourceBundle {
    pub id: PaperId,
    /// Raw bytes of every regular file, keyed by relative path
    #[serde(skip)]
    pub files: BTreeMap<String, Vec<u8>>,
    /// Decoded contents of the text files
    pub texts: BTreeMap<String, String>,
    /// Path of the document that carries the document class declaration
    pub main_document: Option<String>,
}

impl SourceBundle {
    /// Build a bundle from in-memory files and detect its main document
    pub fn from_files(id: PaperId, files: BTreeMap<String, Vec<u8>>) -> Self {
        let texts = files
            .iter()
            .filter(|(path, bytes)| is_text_file(path, bytes))
            .map(|(path, bytes)| (path.clone(), String::from_utf8_lossy(bytes).into_owned()))
            .collect();

        let mut bundle = Self {
            id,
            files,
            texts,
            main_document: None,
        };
        bundle.main_document = bundle.detect_main_document();
        bundle
    }

    /// Whether the bundle holds any files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All TeX files concatenated, each preceded by a `% File:` marker line
    pub fn latex_content(&self) -> String {
        let mut content = String::new();
        for (path, text) in &self.texts {
            if !has_extension(path, &["tex", "ltx", "latex"]) {
                continue;
            }
            content.push_str(&format!("% File: {}\n", path));
            content.push_str(text);
            content.push_str("\n\n");
        }
        content
    }

    /// Storage record describing the bundle
    pub fn to_record(&self) -> Record {
        let files: serde_json::Map<String, Value> = self
            .files
            .iter()
            .map(|(path, bytes)| {
                let value = match self.texts.get(path) {
                    Some(text) => Value::String(text.clone()),
                    None => json!({ "binary_bytes": bytes.len() }),
                };
                (path.clone(), value)
            })
            .collect();

        let mut record = Record::new();
        record.insert("arxiv_id".into(), json!(self.id.as_str()));
        record.insert("main_document".into(), json!(self.main_document));
        record.insert("latex_content".into(), json!(self.latex_content()));
        record.insert("source_files".into(), Value::Object(files));
        record
    }

    /// Pick the main document.
    ///
    /// A file named after the paper wins; otherwise the TeX file declaring a
    /// document class, preferring one with a document body and a shallow path.
    fn detect_main_document(&self) -> Option<String> {
        let stem = keys::sanitize(self.id.as_str());
        let candidates: Vec<(&String, &String)> = self
            .texts
            .iter()
            .filter(|(path, _)| has_extension(path, &["tex", "ltx", "latex"]))
            .collect();

        if let Some((path, _)) = candidates.iter().find(|(path, text)| {
            file_stem(path) == stem && declares_document(text)
        }) {
            return Some(path.to_string());
        }

        candidates
            .iter()
            .filter(|(_, text)| declares_document(text))
            .min_by_key(|(path, text)| {
                (
                    !text.contains("\\begin{document}"),
                    path.matches('/').count(),
                    path.to_string(),
                )
            })
            .map(|(path, _)| path.to_string())
    }
}

fn declares_document(text: &str) -> bool {
    text.contains("\\documentclass") || text.contains("\\documentstyle")
}

fn file_stem(path: &str) -> &str {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn is_text_file(path: &str, bytes: &[u8]) -> bool {
    if has_extension(path, TEXT_EXTENSIONS) {
        return true;
    }
    Path::new(path).extension().is_none() && !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

/// Source of typesetting bundles
#[async_trait]
pub trait SourceRetriever: Send + Sync {
    /// Download and unpack the source of one paper
    async fn retrieve(&self, id: &PaperId) -> Result<SourceBundle, CrawlerError>;
}

#[async_trait]
impl SourceRetriever for ArxivClient {
    #[instrument(skip(self), fields(paper_id = %id))]
    async fn retrieve(&self, id: &PaperId) -> Result<SourceBundle, CrawlerError> {
        let metrics = FetchMetrics::start("source");
        let result = self.download_and_unpack(id).await;

        metrics.finish(match &result {
            Ok(_) => "ok",
            Err(CrawlerError::Transport { .. }) => "transport_error",
            Err(_) => "unavailable",
        });
        result
    }
}

impl ArxivClient {
    async fn download_and_unpack(&self, id: &PaperId) -> Result<SourceBundle, CrawlerError> {
        let url = self.source_url(id);
        let limit = self.config.max_source_bytes;
        let unavailable = |reason: String| CrawlerError::SourceUnavailable {
            id: id.to_string(),
            reason,
        };

        let response = self
            .get(&url, &[])
            .await
            .map_err(|e| CrawlerError::transport(id.as_str(), &e))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CrawlerError::transport(id.as_str(), &status_error(status, &url)));
        }
        if !status.is_success() {
            return Err(unavailable(format!("source endpoint returned {}", status)));
        }

        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(unavailable(format!(
                    "payload of {} bytes exceeds limit of {} bytes",
                    length, limit
                )));
            }
        }

        let payload = response.bytes().await.map_err(|e| CrawlerError::Transport {
            id: id.to_string(),
            message: format!("failed to read source payload: {}", e),
        })?;

        debug!(bytes = payload.len(), "Source payload downloaded");

        let owned_id = id.clone();
        tokio::task::spawn_blocking(move || unpack_payload(&owned_id, &payload, limit))
            .await
            .map_err(|e| unavailable(format!("extraction task failed: {}", e)))?
    }
}

/// Unpack a downloaded e-print payload into a bundle
pub fn unpack_payload(id: &PaperId, payload: &[u8], limit: usize) -> Result<SourceBundle, CrawlerError> {
    let unavailable = |reason: String| CrawlerError::SourceUnavailable {
        id: id.to_string(),
        reason,
    };

    if payload.is_empty() {
        return Err(unavailable("empty payload".to_string()));
    }
    if payload.len() > limit {
        return Err(unavailable(format!(
            "payload of {} bytes exceeds limit of {} bytes",
            payload.len(),
            limit
        )));
    }

    let data = if payload.starts_with(&[0x1f, 0x8b]) {
        gunzip(payload, limit).map_err(unavailable)?
    } else {
        payload.to_vec()
    };

    if data.is_empty() {
        return Err(unavailable("empty payload".to_string()));
    }
    if data.starts_with(b"%PDF") {
        return Err(unavailable("only a PDF is available, no typesetting source".to_string()));
    }

    let files = if is_tar(&data) {
        untar(&data, limit).map_err(unavailable)?
    } else {
        let name = if data.contains(&0) {
            keys::sanitize(id.as_str())
        } else {
            format!("{}.tex", keys::sanitize(id.as_str()))
        };
        BTreeMap::from([(name, data)])
    };

    if files.is_empty() {
        return Err(unavailable("archive contains no files".to_string()));
    }

    let bundle = SourceBundle::from_files(id.clone(), files);
    debug!(
        files = bundle.files.len(),
        main_document = ?bundle.main_document,
        "Source unpacked"
    );
    Ok(bundle)
}

fn gunzip(payload: &[u8], limit: usize) -> Result<Vec<u8>, String> {
    let mut decoded = Vec::new();
    GzDecoder::new(payload)
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|e| format!("corrupt gzip payload: {}", e))?;

    if decoded.len() > limit {
        return Err(format!("decompressed payload exceeds limit of {} bytes", limit));
    }
    Ok(decoded)
}

/// POSIX and GNU tar headers carry the `ustar` magic at offset 257
fn is_tar(data: &[u8]) -> bool {
    data.len() >= 512 && data.get(257..262) == Some(b"ustar".as_slice())
}

fn untar(data: &[u8], limit: usize) -> Result<BTreeMap<String, Vec<u8>>, String> {
    let mut archive = tar::Archive::new(Cursor::new(data));
    let entries = archive
        .entries()
        .map_err(|e| format!("corrupt archive: {}", e))?;

    let mut files = BTreeMap::new();
    let mut total = 0usize;

    for entry in entries {
        let mut entry = entry.map_err(|e| format!("corrupt archive entry: {}", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| format!("unreadable entry path: {}", e))?
            .into_owned();
        let Some(relative) = safe_relative_path(&path) else {
            warn!(path = %path.display(), "Skipping archive entry with unsafe path");
            continue;
        };

        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| format!("failed to read {}: {}", relative, e))?;

        total += content.len();
        if total > limit {
            return Err(format!("unpacked archive exceeds limit of {} bytes", limit));
        }
        files.insert(relative, content);
    }

    Ok(files)
}

/// Relative path with `/` separators, or `None` if it could escape the bundle
fn safe_relative_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identifier::normalize;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        gzip(&tar_bytes)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    const LIMIT: usize = 1024 * 1024;

    #[test]
    fn test_unpack_tar_gz() {
        let id = normalize("2103.00020").unwrap();
        let payload = tar_gz(&[
            ("sections/intro.tex", "\\section{Intro}"),
            ("paper.tex", "\\documentclass{article}\n\\begin{document}\\input{sections/intro}\\end{document}"),
            ("refs.bib", "@article{a, title={A}}"),
        ]);

        let bundle = unpack_payload(&id, &payload, LIMIT).unwrap();
        assert_eq!(bundle.files.len(), 3);
        assert_eq!(bundle.main_document.as_deref(), Some("paper.tex"));
        assert!(bundle.texts.contains_key("refs.bib"));

        let latex = bundle.latex_content();
        assert!(latex.contains("% File: paper.tex"));
        assert!(latex.contains("% File: sections/intro.tex"));
        assert!(!latex.contains("@article"));
    }

    #[test]
    fn test_unpack_single_gzipped_file() {
        let id = normalize("hep-th/9901001").unwrap();
        let payload = gzip(b"\\documentstyle{article}\n\\begin{document}Hi\\end{document}");

        let bundle = unpack_payload(&id, &payload, LIMIT).unwrap();
        assert_eq!(bundle.files.len(), 1);
        assert_eq!(bundle.main_document.as_deref(), Some("hep-th_9901001.tex"));
    }

    #[test]
    fn test_pdf_only_is_unavailable() {
        let id = normalize("2103.00020").unwrap();
        let err = unpack_payload(&id, b"%PDF-1.5 binary", LIMIT).unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");
    }

    #[test]
    fn test_empty_and_oversized_payloads() {
        let id = normalize("2103.00020").unwrap();
        assert!(matches!(
            unpack_payload(&id, b"", LIMIT),
            Err(CrawlerError::SourceUnavailable { .. })
        ));

        let big = gzip(&vec![b'a'; 4096]);
        assert!(matches!(
            unpack_payload(&id, &big, 1024),
            Err(CrawlerError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_main_document_prefers_body() {
        let id = normalize("2103.00020").unwrap();
        let files = BTreeMap::from([
            ("a_macros.tex".to_string(), b"\\documentclass{standalone}".to_vec()),
            (
                "z_main.tex".to_string(),
                b"\\documentclass{article}\\begin{document}x\\end{document}".to_vec(),
            ),
            ("fig.png".to_string(), vec![0x89, b'P', b'N', b'G', 0]),
        ]);

        let bundle = SourceBundle::from_files(id, files);
        assert_eq!(bundle.main_document.as_deref(), Some("z_main.tex"));
        assert!(!bundle.texts.contains_key("fig.png"));
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(
            safe_relative_path(Path::new("./figs/a.tex")).as_deref(),
            Some("figs/a.tex")
        );
        assert!(safe_relative_path(Path::new("../etc/passwd")).is_none());
        assert!(safe_relative_path(Path::new("/etc/passwd")).is_none());
    }
}
