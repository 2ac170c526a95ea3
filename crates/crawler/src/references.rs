//! Bibliography extraction
//!
//! Reads references from a [`SourceBundle`]:
//! - structured BibTeX entries from `.bib` files and `filecontents` blocks
//! - raw `\bibitem` entries from TeX and `.bbl` files
//!
//! Structured entries come first (in path order), then raw entries. A citation
//! key seen twice keeps its first occurrence. Malformed BibTeX entries are
//! logged and skipped.

use crate::errors::CrawlerError;
use crate::identifier::{find_in_text, normalize, PaperId};
use crate::source::SourceBundle;
use biblatex::{Bibliography, ChunksExt, Entry};
use citeforge_common::metrics::record_references;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Structured fields searched for embedded identifiers, in priority order
const RESOLVABLE_FIELDS: &[&str] = &[
    "arxiv", "arxivid", "url", "doi", "journal", "journaltitle", "volume", "note", "howpublished",
    "booktitle",
];

/// Files whose bodies may hold `\bibitem` lists
const BIBITEM_EXTENSIONS: &[&str] = &["tex", "ltx", "latex", "bbl"];

/// One bibliography entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum Reference {
    /// A BibTeX entry with lower-cased field names
    Structured {
        key: String,
        entry_type: String,
        fields: BTreeMap<String, String>,
    },
    /// A typeset `\bibitem` body with markup removed
    Raw { key: Option<String>, text: String },
}

impl Reference {
    /// Citation key, when the entry has one
    pub fn key(&self) -> Option<&str> {
        match self {
            Reference::Structured { key, .. } => Some(key),
            Reference::Raw { key, .. } => key.as_deref(),
        }
    }

    /// Every paper identifier the entry mentions, most authoritative first
    pub fn candidate_ids(&self) -> Vec<PaperId> {
        match self {
            Reference::Structured { fields, .. } => {
                let mut ids = Vec::new();

                let arxiv_eprint = fields
                    .get("archiveprefix")
                    .or_else(|| fields.get("eprinttype"))
                    .map(|archive| archive.to_ascii_lowercase().contains("arxiv"))
                    .unwrap_or(true);
                if arxiv_eprint {
                    if let Some(id) = fields.get("eprint").and_then(|e| normalize(e).ok()) {
                        ids.push(id);
                    }
                }

                for field in RESOLVABLE_FIELDS {
                    let Some(value) = fields.get(*field) else { continue };
                    for id in find_in_text(value) {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
                ids
            }
            Reference::Raw { text, .. } => find_in_text(text),
        }
    }

    /// The paper this entry cites, if it can be identified
    pub fn resolve(&self) -> Option<PaperId> {
        self.candidate_ids().into_iter().next()
    }

    /// Human-readable one-line rendering
    pub fn display_text(&self) -> String {
        match self {
            Reference::Raw { text, .. } => text.clone(),
            Reference::Structured { key, fields, .. } => {
                let parts: Vec<&str> = ["author", "title", "journal", "booktitle", "year"]
                    .iter()
                    .filter_map(|f| fields.get(*f).map(String::as_str))
                    .collect();
                if parts.is_empty() {
                    key.clone()
                } else {
                    parts.join(". ")
                }
            }
        }
    }
}

/// Extract every reference from a source bundle
pub fn extract_references(bundle: &SourceBundle) -> Vec<Reference> {
    let mut structured = Vec::new();
    let mut raw = Vec::new();

    for (path, text) in &bundle.texts {
        let extension = extension(path);

        if extension.as_deref() == Some("bib") {
            structured.extend(parse_bib_logged(text, path));
            continue;
        }

        for block in filecontents_blocks(text) {
            structured.extend(parse_bib_logged(block, path));
        }

        let scan_items = match extension.as_deref() {
            Some(ext) => BIBITEM_EXTENSIONS.contains(&ext),
            None => true,
        };
        if scan_items {
            raw.extend(parse_bibitems(text));
        }
    }

    let references = dedupe_by_key(structured.into_iter().chain(raw));
    record_references(references.len());
    debug!(
        paper_id = %bundle.id,
        references = references.len(),
        "References extracted"
    );
    references
}

fn parse_bib_logged(text: &str, path: &str) -> Vec<Reference> {
    let (references, errors) = parse_bibtex(text, path);
    for error in errors {
        warn!(error = %error, "Skipping malformed bibliography entry");
    }
    references
}

fn dedupe_by_key(references: impl Iterator<Item = Reference>) -> Vec<Reference> {
    let mut seen = HashSet::new();
    references
        .filter(|r| match r.key() {
            Some(key) => seen.insert(key.to_string()),
            None => true,
        })
        .collect()
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Bodies of `filecontents` environments that look like BibTeX
fn filecontents_blocks(text: &str) -> Vec<&str> {
    const BEGIN: &str = "\\begin{filecontents";
    const END: &str = "\\end{filecontents";

    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(BEGIN) {
        let after = &rest[start + BEGIN.len()..];
        let Some(line_end) = after.find('\n') else { break };
        let body = &after[line_end + 1..];
        let Some(end) = body.find(END) else { break };

        let block = &body[..end];
        if block.contains('@') {
            blocks.push(block);
        }
        rest = &body[end + END.len()..];
    }
    blocks
}

/// Parse BibTeX text into structured references.
///
/// Each entry is parsed on its own so one malformed entry does not hide the
/// rest. Returns the entries that parsed and one error per malformed entry.
pub fn parse_bibtex(text: &str, context: &str) -> (Vec<Reference>, Vec<CrawlerError>) {
    let segments = entry_segments(text);
    let mut references = Vec::new();
    let mut errors = Vec::new();

    // @string abbreviations are visible to every entry
    let mut strings = String::new();
    for &(start, segment) in &segments {
        if segment_type(segment) != "string" {
            continue;
        }
        let candidate = format!("{}{}\n", strings, segment);
        match Bibliography::parse(&candidate) {
            Ok(_) => strings = candidate,
            Err(e) => errors.push(bib_error(context, start, e.to_string())),
        }
    }

    for &(start, segment) in &segments {
        match segment_type(segment).as_str() {
            "string" | "comment" | "preamble" => continue,
            "" => {
                errors.push(bib_error(context, start, "missing entry type".to_string()));
                continue;
            }
            _ => {}
        }

        match Bibliography::parse(&format!("{}{}", strings, segment)) {
            Ok(bibliography) => references.extend(bibliography.iter().map(structured)),
            Err(e) => errors.push(bib_error(context, start, e.to_string())),
        }
    }

    (references, errors)
}

fn bib_error(context: &str, start: usize, message: String) -> CrawlerError {
    CrawlerError::Parse {
        context: format!("{} at byte {}", context, start),
        message,
    }
}

fn structured(entry: &Entry) -> Reference {
    let fields = entry
        .fields
        .iter()
        .map(|(name, chunks)| {
            let name = name.to_ascii_lowercase();
            let value = clean_field(&name, &chunks.format_verbatim());
            (name, value)
        })
        .collect();

    Reference::Structured {
        key: entry.key.clone(),
        entry_type: entry.entry_type.to_string().to_ascii_lowercase(),
        fields,
    }
}

/// Split BibTeX text at every `@` that starts a line
fn entry_segments(text: &str) -> Vec<(usize, &str)> {
    let mut starts = Vec::new();
    let mut line_start = true;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'\n' => line_start = true,
            b'@' if line_start => {
                starts.push(i);
                line_start = false;
            }
            b' ' | b'\t' | b'\r' => {}
            _ => line_start = false,
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(text.len());
            (start, &text[start..end])
        })
        .collect()
}

/// Lower-cased entry type following the leading `@`
fn segment_type(segment: &str) -> String {
    segment[1..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn clean_field(name: &str, value: &str) -> String {
    match name {
        "url" | "doi" | "eprint" | "arxiv" | "arxivid" | "archiveprefix" => value
            .chars()
            .filter(|c| *c != '{' && *c != '}')
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(""),
        _ => strip_markup(value),
    }
}

/// Parse `\bibitem` entries; each body runs to the next item or the end of the bibliography
pub fn parse_bibitems(text: &str) -> Vec<Reference> {
    const ITEM: &str = "\\bibitem";

    let text = strip_comments(text);
    let starts: Vec<usize> = text
        .match_indices(ITEM)
        .map(|(i, _)| i)
        .filter(|i| {
            !text[i + ITEM.len()..]
                .chars()
                .next()
                .map(|c| c.is_ascii_alphabetic())
                .unwrap_or(false)
        })
        .collect();

    let mut references = Vec::new();
    for (n, start) in starts.iter().enumerate() {
        let limit = starts.get(n + 1).copied().unwrap_or(text.len());
        let mut segment = &text[start + ITEM.len()..limit];
        for terminator in ["\\end{thebibliography}", "\\end{document}"] {
            if let Some(end) = segment.find(terminator) {
                segment = &segment[..end];
            }
        }

        let (key, body) = split_item_head(segment);
        let body = strip_markup(body);
        if body.is_empty() {
            continue;
        }
        references.push(Reference::Raw { key, text: body });
    }
    references
}

/// Split `[label]{key} body` into the key and the body
fn split_item_head(segment: &str) -> (Option<String>, &str) {
    let mut rest = segment.trim_start();

    if rest.starts_with('[') {
        match closing_index(rest, b'[', b']') {
            Some(end) => rest = rest[end + 1..].trim_start(),
            None => return (None, rest),
        }
    }

    if rest.starts_with('{') {
        if let Some(end) = closing_index(rest, b'{', b'}') {
            let key = rest[1..end].trim().to_string();
            let body = &rest[end + 1..];
            return ((!key.is_empty()).then_some(key), body);
        }
    }

    (None, rest)
}

/// Index of the delimiter closing the one at index 0
fn closing_index(s: &str, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate() {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Drop TeX comments (an unescaped `%` to the end of its line)
pub fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| {
            let bytes = line.as_bytes();
            let cut = (0..bytes.len())
                .find(|&i| bytes[i] == b'%' && (i == 0 || bytes[i - 1] != b'\\'))
                .unwrap_or(bytes.len());
            &line[..cut]
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reduce TeX markup to plain text with collapsed whitespace
pub fn strip_markup(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let Some(&next) = chars.get(i + 1) else { break };
                if next.is_ascii_alphabetic() {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end].is_ascii_alphabetic() {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    i = end;
                    // \bibinfo{field}{value} keeps only the value
                    if name == "bibinfo" || name == "bibfield" {
                        i = skip_group(&chars, i);
                    }
                    continue;
                }
                match next {
                    '&' | '%' | '_' | '$' | '#' | '{' | '}' => out.push(next),
                    '\\' | ',' | ';' | ' ' | '!' => out.push(' '),
                    _ => {}
                }
                i += 2;
            }
            '~' => {
                out.push(' ');
                i += 1;
            }
            '{' | '}' | '$' => i += 1,
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn skip_group(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if chars.get(i) != Some(&'{') {
        return i;
    }
    let mut depth = 0usize;
    while i < chars.len() {
        match chars[i] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::normalize;

    const BIB: &str = r#"
@string{nips = "Advances in Neural Information Processing Systems"}

@inproceedings{vaswani2017attention,
  title     = {Attention is All you {N}eed},
  author    = "Vaswani, Ashish and Shazeer, Noam",
  booktitle = nips # " 30",
  year      = 2017,
  eprint    = {1706.03762},
  archivePrefix = {arXiv}
}

@article{broken,
  title = {Missing close brace
  year = 2020

@article{radford2021clip,
  title = {Learning Transferable Visual Models},
  journal = {CoRR},
  volume = {abs/2103.00020}
}

@comment{ ignored @article{x, title={y}} }
"#;

    #[test]
    fn test_parse_bibtex_entries() {
        let (refs, errors) = parse_bibtex(BIB, "refs.bib");

        let keys: Vec<_> = refs.iter().filter_map(|r| r.key()).collect();
        assert_eq!(keys, vec!["vaswani2017attention", "radford2021clip"]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), "parse_error");

        let Reference::Structured { entry_type, fields, .. } = &refs[0] else {
            panic!("expected structured entry");
        };
        assert_eq!(entry_type, "inproceedings");
        assert_eq!(fields["title"], "Attention is All you Need");
        assert_eq!(fields["author"], "Vaswani, Ashish and Shazeer, Noam");
        assert_eq!(
            fields["booktitle"],
            "Advances in Neural Information Processing Systems 30"
        );
        assert_eq!(fields["year"], "2017");
        assert_eq!(fields["archiveprefix"], "arXiv");
    }

    #[test]
    fn test_structured_resolution() {
        let (refs, _) = parse_bibtex(BIB, "refs.bib");
        assert_eq!(refs[0].resolve(), Some(normalize("1706.03762").unwrap()));
        assert_eq!(refs[1].resolve(), Some(normalize("2103.00020").unwrap()));
    }

    #[test]
    fn test_non_arxiv_eprint_ignored() {
        let (refs, _) = parse_bibtex(
            "@misc{h, eprint = {1706.03762}, archiveprefix = {HAL}}",
            "x.bib",
        );
        assert_eq!(refs.len(), 1);
        assert!(refs[0].resolve().is_none());
    }

    #[test]
    fn test_parse_bibitems() {
        let tex = r#"
\begin{thebibliography}{10}
\bibitem[Vaswani et~al.(2017)]{vaswani}
A.~Vaswani et al.
\newblock {\em Attention is all you need}.
\newblock arXiv preprint arXiv:1706.03762, 2017.
% \bibitem{commented} should not appear
\bibitem{knuth} D.~E. Knuth. \emph{The \TeX book}. Addison-Wesley, 1984.
\end{thebibliography}
\end{document}
"#;
        let refs = parse_bibitems(tex);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].key(), Some("vaswani"));
        assert_eq!(
            refs[0].display_text(),
            "A. Vaswani et al. Attention is all you need. arXiv preprint arXiv:1706.03762, 2017."
        );
        assert_eq!(refs[0].resolve().unwrap().as_str(), "1706.03762");

        assert_eq!(refs[1].key(), Some("knuth"));
        assert_eq!(
            refs[1].display_text(),
            "D. E. Knuth. The book. Addison-Wesley, 1984."
        );
        assert!(refs[1].resolve().is_none());
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("Erd\\H{o}s and R\\'{e}nyi"), "Erdos and Renyi");
        assert_eq!(strip_markup("Smith \\& Jones, 50\\% off"), "Smith & Jones, 50% off");
        assert_eq!(
            strip_markup("\\bibinfo{author}{J. Doe}, \\bibinfo{title}{Graphs}"),
            "J. Doe, Graphs"
        );
        assert_eq!(strip_markup("\\url{https://arxiv.org/abs/2103.00020}"), "https://arxiv.org/abs/2103.00020");
    }

    #[test]
    fn test_extract_references_order_and_dedupe() {
        let id = normalize("2201.00001").unwrap();
        let files = BTreeMap::from([
            (
                "main.tex".to_string(),
                b"\\documentclass{article}\\begin{document}\n\\begin{thebibliography}{9}\n\\bibitem{vaswani2017attention} dup\n\\bibitem{other} See arXiv:2103.00020\n\\end{thebibliography}\n\\end{document}".to_vec(),
            ),
            ("main.bbl".to_string(), b"\\bibitem{other} duplicate of tex entry".to_vec()),
            ("refs.bib".to_string(), BIB.as_bytes().to_vec()),
            ("style.bst".to_string(), b"\"\\bibitem{\" write$".to_vec()),
        ]);
        let bundle = SourceBundle::from_files(id, files);

        let refs = extract_references(&bundle);
        let keys: Vec<_> = refs.iter().map(|r| r.key().unwrap_or("-")).collect();
        // main.bbl sorts before main.tex, so its `other` wins
        assert_eq!(keys, vec!["vaswani2017attention", "radford2021clip", "other"]);
        assert!(matches!(refs[0], Reference::Structured { .. }));
        assert_eq!(refs[2].display_text(), "duplicate of tex entry");
    }

    #[test]
    fn test_filecontents_block() {
        let tex = "\\begin{filecontents*}{refs.bib}\n@misc{a, url = {https://arxiv.org/abs/hep-th/9901001}}\n\\end{filecontents*}\n";
        let id = normalize("2201.00001").unwrap();
        let bundle = SourceBundle::from_files(
            id,
            BTreeMap::from([("paper.tex".to_string(), tex.as_bytes().to_vec())]),
        );

        let refs = extract_references(&bundle);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resolve().unwrap().as_str(), "hep-th/9901001");
    }
}
