//! Paper identifier normalization
//!
//! Accepts bare identifiers, `arXiv:` prefixed identifiers, and abstract/PDF
//! URLs. Two historical syntaxes are valid:
//! - modern `YYMM.NNNN` / `YYMM.NNNNN` (e.g. `2103.00020`)
//! - legacy `archive(.subject)/YYMMNNN` (e.g. `hep-th/9901001`, `math.GT/0309136`)

use crate::errors::CrawlerError;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static MODERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<core>\d{4}\.\d{4,5})(?:v(?P<v>\d+))?$").expect("valid modern id pattern")
});

static LEGACY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<core>[a-z]+(?:-[a-z]+)*(?:\.[A-Za-z]+(?:-[a-z]+)*)?/\d{7})(?:v(?P<v>\d+))?$")
        .expect("valid legacy id pattern")
});

/// Identifier mentions inside free text (citations, URLs, DOIs)
static EMBEDDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:arxiv\.org/(?:abs|pdf)/|10\.48550/arxiv\.|\babs/|\barxiv(?:\s+preprint)?(?:\s+arxiv)?\s*[:\s]\s*)(?P<id>[a-z]+(?:-[a-z]+)*(?:\.[a-z]+(?:-[a-z]+)*)?/\d{7}|\d{4}\.\d{4,5})(?:v\d+)?\b",
    )
    .expect("valid embedded id pattern")
});

/// Canonical paper identifier, used as the key for deduplication and storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaperId(String);

impl PaperId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PaperId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for PaperId {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

/// Normalize a raw identifier or URL, dropping any version suffix
pub fn normalize(input: &str) -> Result<PaperId, CrawlerError> {
    normalize_with(input, false)
}

/// Normalize a raw identifier or URL.
///
/// With `keep_version` a trailing `vN` is preserved; otherwise it is removed.
pub fn normalize_with(input: &str, keep_version: bool) -> Result<PaperId, CrawlerError> {
    let invalid = |reason: &str| CrawlerError::InvalidIdentifier {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let mut s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty identifier"));
    }

    if let Some(rest) = strip_prefix_ignore_case(s, "arxiv:") {
        s = rest.trim_start();
    }

    let candidate = if looks_like_url(s) {
        identifier_from_url(s).ok_or_else(|| invalid("URL does not contain a paper identifier"))?
    } else {
        s.trim_matches('/').to_string()
    };

    let candidate = strip_suffix_ignore_case(&candidate, ".pdf")
        .unwrap_or(&candidate)
        .to_string();

    let caps = MODERN_RE
        .captures(&candidate)
        .or_else(|| LEGACY_RE.captures(&candidate))
        .ok_or_else(|| invalid("matches neither the modern nor the legacy identifier syntax"))?;

    let core = caps.name("core").map(|m| m.as_str()).unwrap_or_default();
    if !has_valid_month(core) {
        return Err(invalid("identifier month is out of range"));
    }

    let id = match caps.name("v") {
        Some(version) if keep_version => format!("{}v{}", core, version.as_str()),
        _ => core.to_string(),
    };

    Ok(PaperId(id))
}

/// Find every identifier mentioned in free text, in order of appearance, without duplicates
pub fn find_in_text(text: &str) -> Vec<PaperId> {
    let mut found: Vec<PaperId> = Vec::new();
    for caps in EMBEDDED_RE.captures_iter(text) {
        let Some(m) = caps.name("id") else { continue };
        if let Ok(id) = normalize(m.as_str()) {
            if !found.contains(&id) {
                found.push(id);
            }
        }
    }
    found
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    let tail = s.get(cut..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..cut])
}

fn looks_like_url(s: &str) -> bool {
    s.contains("://") || s.to_ascii_lowercase().starts_with("arxiv.org/")
}

/// Take the identifier portion of an arXiv URL: the last path segment, or the
/// last two when they form a legacy identifier
fn identifier_from_url(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme.split_once('/').map(|(_, p)| p)?;
    let path = path.split(['?', '#']).next().unwrap_or(path);

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = *segments.last()?;

    if segments.len() >= 2 {
        let legacy = format!("{}/{}", segments[segments.len() - 2], last);
        let legacy_bare = strip_suffix_ignore_case(&legacy, ".pdf").unwrap_or(&legacy);
        if LEGACY_RE.is_match(legacy_bare) {
            return Some(legacy);
        }
    }

    Some(last.to_string())
}

/// The two digits after the year must be a calendar month
fn has_valid_month(core: &str) -> bool {
    let digits = core.rsplit('/').next().unwrap_or(core);
    digits
        .get(2..4)
        .and_then(|mm| mm.parse::<u32>().ok())
        .map(|mm| (1..=12).contains(&mm))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_identifiers() {
        assert_eq!(normalize("2103.00020").unwrap().as_str(), "2103.00020");
        assert_eq!(normalize("0704.0001").unwrap().as_str(), "0704.0001");
        assert_eq!(normalize("hep-th/9901001").unwrap().as_str(), "hep-th/9901001");
        assert_eq!(normalize("math.GT/0309136").unwrap().as_str(), "math.GT/0309136");
        assert_eq!(normalize("  arXiv:2103.00020 ").unwrap().as_str(), "2103.00020");
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            normalize("https://arxiv.org/abs/2103.00020").unwrap().as_str(),
            "2103.00020"
        );
        assert_eq!(
            normalize("https://arxiv.org/pdf/2103.00020v2.pdf").unwrap().as_str(),
            "2103.00020"
        );
        assert_eq!(normalize("2103.00020.PDF").unwrap().as_str(), "2103.00020");
        assert_eq!(
            normalize("https://arxiv.org/pdf/hep-th/9901001v2.Pdf").unwrap().as_str(),
            "hep-th/9901001"
        );
        assert_eq!(
            normalize("http://export.arxiv.org/abs/hep-th/9901001v3?context=hep-th")
                .unwrap()
                .as_str(),
            "hep-th/9901001"
        );
        assert_eq!(
            normalize("arxiv.org/abs/1706.03762#section").unwrap().as_str(),
            "1706.03762"
        );
    }

    #[test]
    fn test_version_handling() {
        assert_eq!(normalize("2103.00020v3").unwrap().as_str(), "2103.00020");
        assert_eq!(
            normalize_with("2103.00020v3", true).unwrap().as_str(),
            "2103.00020v3"
        );
        assert_eq!(
            normalize_with("https://arxiv.org/pdf/cond-mat/0102536v1.pdf", true)
                .unwrap()
                .as_str(),
            "cond-mat/0102536v1"
        );
    }

    #[test]
    fn test_invalid_identifiers() {
        for input in ["", "not-an-id", "21030.0002", "2113.00020", "https://arxiv.org/list/cs.AI", "12345"] {
            let err = normalize(input).unwrap_err();
            assert_eq!(err.kind(), "invalid_identifier", "input {input:?}");
        }
    }

    #[test]
    fn test_idempotence() {
        let inputs = [
            "2103.00020",
            "2103.00020v2",
            "arXiv:1706.03762",
            "https://arxiv.org/abs/hep-th/9901001v2",
            "https://arxiv.org/pdf/2103.00020.pdf",
            "math.GT/0309136",
        ];
        for input in inputs {
            let once = normalize(input).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            assert_eq!(once, twice);

            let pinned = normalize_with(input, true).unwrap();
            assert_eq!(normalize_with(pinned.as_str(), true).unwrap(), pinned);
        }
    }

    #[test]
    fn test_find_in_text() {
        let text = "A. Vaswani et al. Attention is all you need. arXiv preprint arXiv:1706.03762v5, 2017. \
                    See also https://arxiv.org/abs/hep-th/9901001 and CoRR abs/2103.00020.";
        let ids: Vec<String> = find_in_text(text).iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["1706.03762", "hep-th/9901001", "2103.00020"]);
    }

    #[test]
    fn test_find_in_text_ignores_plain_numbers() {
        assert!(find_in_text("Journal of Things 12, pp. 1234.5678 (1999)").is_empty());
        assert_eq!(
            find_in_text("doi:10.48550/arXiv.2103.00020")[0].as_str(),
            "2103.00020"
        );
    }

    #[test]
    fn test_find_in_text_rejects_truncated_digit_runs() {
        assert!(find_in_text("Report arXiv:2103.000201, 2021").is_empty());
        assert!(find_in_text("see https://arxiv.org/abs/1706.0376299").is_empty());
        assert_eq!(
            find_in_text("arXiv:2103.00020v2. Next")[0].as_str(),
            "2103.00020"
        );
    }
}
