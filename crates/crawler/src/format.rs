//! Markdown rendering of paper metadata

use crate::metadata::PaperMetadata;
use std::fmt::Write;

/// Render a paper as a Markdown study sheet
pub fn format_for_learning(paper: &PaperMetadata) -> String {
    let published = paper
        .published
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let categories: Vec<&str> = paper.categories.iter().map(String::as_str).collect();

    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", paper.title);
    let _ = writeln!(out, "**Authors:** {}\n", paper.authors.join(", "));
    let _ = writeln!(out, "**Published:** {}\n", published);
    let _ = writeln!(out, "**Categories:** {}\n", categories.join(", "));
    let _ = writeln!(out, "## Abstract\n{}\n", paper.abstract_text);
    let _ = writeln!(out, "**Links:**");
    let _ = writeln!(out, "- [ArXiv Page]({})", paper.links.abstract_url);
    let _ = writeln!(out, "- [PDF Download]({})", paper.links.pdf_url);

    let optional = [
        ("Comments", &paper.comment),
        ("Journal Reference", &paper.journal_ref),
        ("DOI", &paper.doi),
    ];
    for (label, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            let _ = writeln!(out, "\n**{}:** {}", label, value);
        }
    }

    out
}
