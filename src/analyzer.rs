use anyhow::{Context as _, Result};
use html5ever::tendril::TendrilSink;
use html5ever::{Attribute, LocalName, parse_document};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use porter_stemmer::stem;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

static STOP_WORDS: OnceLock<Arc<HashSet<String>>> = OnceLock::new();

/// English stop words shipped with the `stop-words` crate.
pub fn default_stop_words() -> Arc<HashSet<String>> {
    STOP_WORDS
        .get_or_init(|| {
            Arc::new(
                stop_words::get(stop_words::LANGUAGE::English)
                    .into_iter()
                    .map(|x| x.to_string().to_lowercase())
                    .collect(),
            )
        })
        .clone()
}

/// Reads a stop-word list with one word per line. Blank lines are ignored.
pub fn load_stop_words(path: &Path) -> Result<Arc<HashSet<String>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read stop words from {}", path.display()))?;
    Ok(Arc::new(
        raw.lines()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect(),
    ))
}

#[derive(Clone, Default, Debug)]
pub struct ExtractedText {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Copy)]
pub enum Context {
    Title,
    Body,
}

/// A character filter receives the original text as a stream of characters and can transform the stream by adding,
/// removing, or changing characters, e.g. to strip HTML elements like <b> from the stream.
pub trait CharacterFilter: Send + Sync {
    fn filter(&self, text: String) -> String;
}

/// Extracts readable text from an HTML document.
///
/// Script, style and noscript contents are dropped, as is any element whose
/// `class` or `id` marks it as page chrome (navigation, cookie banners, ...).
#[derive(Debug, Default)]
pub struct HTMLTagFilter;

impl HTMLTagFilter {
    pub fn get_dom(html: &str) -> Result<RcDom> {
        parse_document(RcDom::default(), Default::default())
            .from_utf8()
            .read_from(&mut std::io::Cursor::new(html))
            .context("failed to parse html")
    }

    /// Parses `html` and returns its title and body text.
    pub fn extract(html: &str) -> Result<ExtractedText> {
        let dom = Self::get_dom(html)?;
        let mut out = ExtractedText::default();
        Self::walk_html(&dom.document, Context::Body, &mut out);
        Ok(out)
    }

    pub fn has_boilerplate_class_or_id(attrs: &RefCell<Vec<Attribute>>) -> bool {
        attrs
            .borrow()
            .iter()
            .filter(|attr| matches!(&*attr.name.local, "class" | "id"))
            .any(|attr| {
                let v = attr.value.to_lowercase();
                [
                    "nav", "menu", "sidebar", "footer", "cookie", "banner", "promo", "ads",
                ]
                .iter()
                .any(|marker| v.split(|c: char| !c.is_alphanumeric()).any(|part| part == *marker))
            })
    }

    pub fn is_block_like(local: &LocalName) -> bool {
        matches!(
            &**local,
            "p" | "div"
                | "section"
                | "article"
                | "li"
                | "ul"
                | "ol"
                | "header"
                | "footer"
                | "br"
                | "tr"
                | "table"
        )
    }

    pub fn walk_html(handle: &Handle, ctx: Context, out: &mut ExtractedText) {
        let node = handle;
        match &node.data {
            NodeData::Text { contents } => {
                let s = contents.borrow();
                let s = s.trim();
                if s.is_empty() {
                    return;
                }

                match ctx {
                    Context::Title => {
                        if !out.title.is_empty() {
                            out.title.push(' ');
                        }
                        out.title.push_str(s);
                    }
                    Context::Body => Self::push_body(out, s),
                }
            }
            NodeData::Element { name, attrs, .. } => {
                let local = &name.local;

                if matches!(&**local, "script" | "style" | "noscript" | "template") {
                    return;
                }

                if Self::has_boilerplate_class_or_id(attrs) {
                    return;
                }

                let new_ctx = if &**local == "title" {
                    Context::Title
                } else {
                    ctx
                };

                if new_ctx == Context::Body && Self::is_block_like(local) && !out.body.is_empty()
                {
                    out.body.push('\n');
                }

                for child in node.children.borrow().iter() {
                    Self::walk_html(child, new_ctx, out);
                }
            }
            _ => {
                for child in node.children.borrow().iter() {
                    Self::walk_html(child, ctx, out);
                }
            }
        }
    }

    fn push_body(out: &mut ExtractedText, s: &str) {
        if !out.body.is_empty() && !out.body.ends_with([' ', '\n']) {
            out.body.push(' ');
        }
        out.body.push_str(s);
    }
}

impl CharacterFilter for HTMLTagFilter {
    fn filter(&self, html: String) -> String {
        match Self::extract(&html) {
            Ok(out) => out.body,
            Err(e) => {
                log::warn!("falling back to raw text, {:#}", e);
                html
            }
        }
    }
}

/// A tokenizer receives a stream of characters, breaks it up into individual tokens (usually individual words),
/// and outputs a stream of tokens.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: String) -> Vec<String>;
}

/// Splits on every character that is not alphanumeric or `_`, so
/// "Hong Kong's" becomes [Hong, Kong, s].
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: String) -> Vec<String> {
        text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_string())
            .collect()
    }
}

/// A token filter receives the token stream and may add, remove, or change tokens.
pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken>;
}

pub struct LowerCaseTokenFilter;

impl TokenFilter for LowerCaseTokenFilter {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken> {
        tokens
            .into_iter()
            .map(|mut t| {
                t.term = t.term.to_lowercase();
                t
            })
            .collect()
    }
}

pub struct StopWordTokenFilter {
    stop_words: Arc<HashSet<String>>,
}

impl StopWordTokenFilter {
    pub fn new(stop_words: Arc<HashSet<String>>) -> Self {
        Self { stop_words }
    }
}

impl Default for StopWordTokenFilter {
    fn default() -> Self {
        Self::new(default_stop_words())
    }
}

impl TokenFilter for StopWordTokenFilter {
    fn filter(&self, mut tokens: Vec<TextToken>) -> Vec<TextToken> {
        tokens.retain(|w| !self.stop_words.contains(&w.term));
        tokens
    }
}

pub struct PorterStemmerTokenFilter;

impl TokenFilter for PorterStemmerTokenFilter {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken> {
        tokens
            .into_iter()
            .map(|mut w| {
                w.term = stem(&w.term);
                w
            })
            .collect::<Vec<TextToken>>()
    }
}

/// Pure text analysis pipeline - no async, no DB, just text transformations
pub struct TextAnalyzer {
    char_filters: Vec<Box<dyn CharacterFilter>>,
    tokenizer: Box<dyn Tokenizer>,
    token_filters: Vec<Box<dyn TokenFilter>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextToken {
    pub term: String,
    /// Index in the token stream before any filter ran.
    pub pos: usize,
}

impl std::ops::Deref for TextToken {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.term
    }
}

impl TextAnalyzer {
    pub fn new(
        char_filters: Vec<Box<dyn CharacterFilter>>,
        tokenizer: Box<dyn Tokenizer>,
        token_filters: Vec<Box<dyn TokenFilter>>,
    ) -> Self {
        Self {
            char_filters,
            tokenizer,
            token_filters,
        }
    }

    /// The pipeline shared by the indexer and the query engine:
    /// word split, lowercase, stop words, Porter stem.
    pub fn standard(stop_words: Arc<HashSet<String>>) -> Self {
        Self::new(
            vec![],
            Box::new(WordTokenizer),
            vec![
                Box::new(LowerCaseTokenFilter),
                Box::new(StopWordTokenFilter::new(stop_words)),
                Box::new(PorterStemmerTokenFilter),
            ],
        )
    }

    pub fn char_filter(&self, mut content: String) -> String {
        for filter in self.char_filters.iter() {
            content = filter.filter(content);
        }
        content
    }

    pub fn tokenize(&self, content: String) -> Vec<TextToken> {
        self.tokenizer
            .tokenize(content)
            .into_iter()
            .enumerate()
            .map(|(pos, term)| TextToken { term, pos })
            .collect()
    }

    pub fn token_filter(&self, mut tokens: Vec<TextToken>) -> Vec<TextToken> {
        for filter in self.token_filters.iter() {
            tokens = filter.filter(tokens);
        }
        tokens
    }

    /// Analyzes raw content and returns a list of tokens
    pub fn analyze(&self, raw_content: &str) -> Vec<TextToken> {
        let content = self.char_filter(raw_content.to_string());
        let tokens = self.tokenize(content);
        self.token_filter(tokens)
            .into_iter()
            .filter(|t| !t.term.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_tokens(terms: &[&str]) -> Vec<TextToken> {
        terms
            .iter()
            .enumerate()
            .map(|(pos, term)| TextToken {
                term: (*term).to_string(),
                pos,
            })
            .collect()
    }

    fn terms(tokens: Vec<TextToken>) -> Vec<String> {
        tokens.into_iter().map(|t| t.term).collect()
    }

    #[test]
    fn test_html_tag_filter_extracted_content() {
        let html = r#"<html><head><title>New World Order</title></head><body><h1>Hello World</h1><p>This is a test</p>
            <h1>New Heading</h1>
            <p>Some other content</p>
            <script>alert('Hello World')</script>
            <a href="https://www.google.com">Link to Google</a>
            </body></html>"#;
        let out = HTMLTagFilter::extract(html).unwrap();
        assert_eq!("New World Order", &out.title);
        assert!(out.body.starts_with("Hello World"));
        assert!(out.body.contains("New Heading"));
        assert!(out.body.contains("This is a test"));
        assert!(out.body.contains("Link to Google"));
        assert!(!out.body.contains("alert"));
        assert!(!out.body.contains("New World Order"));
    }

    #[test]
    fn test_boilerplate_only_checks_class_and_id() {
        let html = r#"<body>
            <div class="main-nav">Home About</div>
            <a href="/menu">Lunch options</a>
            <p id="intro">Welcome</p>
        </body>"#;
        let out = HTMLTagFilter::extract(html).unwrap();
        assert!(!out.body.contains("Home About"));
        assert!(out.body.contains("Lunch options"));
        assert!(out.body.contains("Welcome"));
    }

    #[test]
    fn test_word_tokenizer_splits_on_punctuation() {
        let tokens = WordTokenizer.tokenize("Hong Kong's rust-lang, v2!".to_string());
        assert_eq!(tokens, vec!["Hong", "Kong", "s", "rust", "lang", "v2"]);
    }

    #[test]
    fn test_stop_word_filter_with_custom_list() {
        let words: HashSet<String> = ["the", "of"].iter().map(|s| s.to_string()).collect();
        let filter = StopWordTokenFilter::new(Arc::new(words));
        let result = terms(filter.filter(mk_tokens(&["the", "art", "of", "war"])));
        assert_eq!(result, vec!["art", "war"]);
    }

    #[test]
    fn test_positions_survive_filtering() {
        let words: HashSet<String> = ["the", "of"].iter().map(|s| s.to_string()).collect();
        let analyzer = TextAnalyzer::standard(Arc::new(words));
        let tokens = analyzer.analyze("The Art of War");
        assert_eq!(
            tokens,
            vec![
                TextToken { term: "art".into(), pos: 1 },
                TextToken { term: "war".into(), pos: 3 },
            ]
        );
    }
}
