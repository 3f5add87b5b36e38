//! Markdown rendering and markup stripping.
//!
//! Documents are stored as Markdown, indexed as HTML, and answers pulled
//! from index excerpts are shown as plain text. Rendering uses
//! `pulldown-cmark` with no extensions; stripping parses the HTML with
//! `scraper` and keeps only text nodes.

use pulldown_cmark::{html, Options, Parser};
use scraper::Html;

/// Render Markdown to HTML.
pub fn render_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::empty());
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Drop all markup from an HTML fragment, keeping its text.
pub fn strip_markup(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.trim().to_string()
}

/// Parse and re-serialize an HTML fragment (balances tags, escapes text).
pub fn normalize_html(html: &str) -> String {
    Html::parse_fragment(html).root_element().inner_html()
}

/// Markdown in, plain text out.
pub fn markdown_to_text(markdown: &str) -> String {
    strip_markup(&render_html(markdown))
}

/// Render Markdown to HTML re-serialized through the parser.
pub fn render_normalized_html(markdown: &str) -> String {
    normalize_html(&render_html(markdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_heading_and_emphasis() {
        let html = render_html("# Title\n\nSome *emphasis* here.");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>emphasis</em>"));
    }

    #[test]
    fn test_plain_text_has_no_markup_characters() {
        let text = markdown_to_text("# Refund Policy\n\n**Refunds** take *five* days.\n\n## Notes");
        assert!(!text.contains('#'));
        assert!(!text.contains('*'));
        assert!(text.contains("Refund Policy"));
        assert!(text.contains("Refunds take five days."));
    }

    #[test]
    fn test_excerpt_strip_is_trimmed() {
        assert_eq!(
            markdown_to_text("**Refunds** are processed in 5 days."),
            "Refunds are processed in 5 days."
        );
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(markdown_to_text("just words"), "just words");
        assert_eq!(markdown_to_text(""), "");
    }

    #[test]
    fn test_render_normalizes_html() {
        let html = render_normalized_html("Hello & <b>bold");
        assert!(html.contains("&amp;"));
        assert!(html.contains("</b>"));
        assert_eq!(strip_markup(&html), "Hello & bold");
    }
}
