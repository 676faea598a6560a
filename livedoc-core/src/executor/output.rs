//! Turning raw chunk output into displayable results.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use livedoc_types::OutputFormat;
use pulldown_cmark::{html, Options, Parser};

/// Renders markdown produced by a chunk into HTML
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// CommonMark rendering with the usual GitHub extensions
#[derive(Debug, Clone)]
pub struct PulldownMarkdown {
    options: Options,
}

impl PulldownMarkdown {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
        Self { options }
    }
}

impl Default for PulldownMarkdown {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer for PulldownMarkdown {
    fn render(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, self.options);
        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

/// Displayable result for a chunk's output
pub fn render_output(
    format: OutputFormat,
    plain: &str,
    raw: &[u8],
    markdown: &dyn MarkdownRenderer,
) -> String {
    match format {
        OutputFormat::Html => plain.to_string(),
        OutputFormat::Png => png_tag(raw),
        OutputFormat::Markdown => markdown.render(plain),
        OutputFormat::None => String::new(),
        OutputFormat::Text => preformatted(plain),
    }
}

/// Text written into the document when a chunk modifies its source
pub fn source_output(format: OutputFormat, plain: &str, raw: &[u8]) -> String {
    match format {
        OutputFormat::Html | OutputFormat::Markdown => plain.trim_end().to_string(),
        OutputFormat::Png => png_tag(raw),
        OutputFormat::None => String::new(),
        OutputFormat::Text => format!("```\n{}\n```", plain.trim_end()),
    }
}

pub fn preformatted(text: &str) -> String {
    format!(r#"<pre class="language-text">{}</pre>"#, html_escape(text))
}

/// Preformatted block reporting a failed run
pub fn error_block(message: &str) -> String {
    format!(
        r#"<pre class="language-text error">{}</pre>"#,
        html_escape(message)
    )
}

fn png_tag(raw: &[u8]) -> String {
    format!(r#"<img src="data:image/png;base64,{}">"#, STANDARD.encode(raw))
}

pub(crate) fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
