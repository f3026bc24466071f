//! HTML title and main-text extraction
//!
//! Used when a summarize request arrives with only a URL: the fetched
//! page is reduced to a title and readable text. An empty extraction
//! falls back to the raw HTML so the summarizer still has something to
//! work with.

use scraper::{Html, Selector};
use tracing::warn;

use crate::sse::strip_control_chars;

/// Result of reducing an HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    /// `<title>` text, if present and non-empty
    pub title: Option<String>,
    /// Readable text, or the raw HTML when extraction found nothing
    pub text: String,
    /// `true` when the raw-HTML fallback was taken
    pub raw_fallback: bool,
}

/// Reduce an HTML document to title + main text.
#[must_use]
pub fn extract_article(html: &str) -> ExtractedContent {
    let title = extract_title(html);
    let text = extract_main_text(html);

    if text.trim().is_empty() {
        warn!("content extraction produced no text, falling back to raw html");
        return ExtractedContent {
            title,
            text: strip_control_chars(html),
            raw_fallback: true,
        };
    }

    ExtractedContent {
        title,
        text,
        raw_fallback: false,
    }
}

/// `<title>` contents, trimmed.
#[must_use]
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!title.is_empty()).then_some(title)
}

/// Paragraph text joined with blank lines; falls back to full body text
/// when the document has no `<p>` elements.
#[must_use]
pub fn extract_main_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let paragraph = match Selector::parse("p") {
        Ok(s) => s,
        Err(_) => return String::new(),
    };
    let paragraphs: Vec<String> = document
        .select(&paragraph)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if !paragraphs.is_empty() {
        return strip_control_chars(&paragraphs.join("\n\n"));
    }

    let body = match Selector::parse("body") {
        Ok(s) => s,
        Err(_) => return String::new(),
    };
    document
        .select(&body)
        .next()
        .map(|b| {
            let text: String = b
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            strip_control_chars(&text)
        })
        .unwrap_or_default()
}
