//! Mustache template for the LilyPond document frame
//!
//! The template owns the fixed parts of the file: the version line, the
//! language switch, the header block and the spacing between scores. Score
//! bodies are rendered by the exporter and inserted verbatim.

use crate::error::Result;
use serde::Serialize;

const DOCUMENT_TEMPLATE: &str = include_str!("templates/document.ly.mustache");

/// One `field = "value"` line of the header; `value` is already quoted
#[derive(Debug, Clone, Serialize)]
pub struct HeaderField {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBlock {
    pub text: String,
}

/// Context data for template rendering
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    /// LilyPond version (e.g., "2.24.0")
    pub version: String,

    pub has_language: bool,

    /// Note-name language; only written when not the default
    pub language: String,

    pub has_header: bool,
    pub header: Vec<HeaderField>,

    pub scores: Vec<ScoreBlock>,
}

impl TemplateContext {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            has_language: false,
            language: String::new(),
            has_header: false,
            header: Vec::new(),
            scores: Vec::new(),
        }
    }

    pub fn language(mut self, language: Option<&str>) -> Self {
        self.has_language = language.is_some();
        self.language = language.unwrap_or_default().to_string();
        self
    }

    pub fn header_field(mut self, key: &'static str, value: String) -> Self {
        self.header.push(HeaderField { key, value });
        self.has_header = true;
        self
    }

    pub fn score(mut self, text: String) -> Self {
        self.scores.push(ScoreBlock { text });
        self
    }
}

/// Render the LilyPond document frame
pub fn render_lilypond(context: &TemplateContext) -> Result<String> {
    let template = mustache::compile_str(DOCUMENT_TEMPLATE)?;
    Ok(template.render_to_string(context)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_minimal() {
        let context = TemplateContext::new("2.24.0").score("{ c4 }".to_string());
        let rendered = render_lilypond(&context).unwrap();
        assert!(rendered.starts_with("\\version \"2.24.0\""));
        assert!(rendered.contains("{ c4 }"));
        assert!(!rendered.contains("\\language"));
        assert!(!rendered.contains("\\header"));
    }

    #[test]
    fn test_render_header_unescaped() {
        let context = TemplateContext::new("2.24.0")
            .language(Some("english"))
            .header_field("title", "\"Fish & <Chips>\"".to_string());
        let rendered = render_lilypond(&context).unwrap();
        assert!(rendered.contains("\\language \"english\""));
        assert!(rendered.contains("title = \"Fish & <Chips>\""));
    }
}
