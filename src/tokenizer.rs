//! String tokenizers
//!
//! Tokenizers turn a string into a list of tokens, keeping duplicates and input order.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Splits on Unicode whitespace
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid word regex"));

/// Runs of word characters; punctuation and whitespace are dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer {
    lowercase: bool,
}

impl WordTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        WORD.find_iter(text)
            .map(|m| {
                if self.lowercase {
                    m.as_str().to_lowercase()
                } else {
                    m.as_str().to_string()
                }
            })
            .collect()
    }
}

/// Character n-grams
///
/// With padding, `n - 1` padding characters are added on both ends so that every character
/// starts and ends a gram. Without padding, input shorter than `n` yields no tokens.
#[derive(Debug, Clone, Copy)]
pub struct NGramTokenizer {
    n: usize,
    padding: Option<char>,
}

impl NGramTokenizer {
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(Error::parameter("n-gram size must be at least 1"));
        }
        Ok(Self { n, padding: None })
    }

    pub fn padding(mut self, padding: char) -> Self {
        self.padding = Some(padding);
        self
    }
}

impl Tokenizer for NGramTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut chars: Vec<char> = Vec::with_capacity(text.len() + 2 * self.n);
        if let Some(pad) = self.padding {
            chars.extend(std::iter::repeat(pad).take(self.n - 1));
        }
        chars.extend(text.chars());
        if let Some(pad) = self.padding {
            chars.extend(std::iter::repeat(pad).take(self.n - 1));
        }
        if text.is_empty() || chars.len() < self.n {
            return Vec::new();
        }
        chars
            .windows(self.n)
            .map(|gram| gram.iter().collect())
            .collect()
    }
}

/// What the heuristic tokenizer does with HTML tags and entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HtmlPolicy {
    /// Drop them.
    Skip,
    /// Merge adjacent tags and entities into one token.
    Group,
    /// One token per tag or entity.
    #[default]
    Retain,
}

static HEURISTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?P<tag></?[A-Za-z][^<>]*>)
      | (?P<entity>&(?:[A-Za-z][A-Za-z0-9]*|\#[0-9]+|\#[xX][0-9A-Fa-f]+);)
      | (?P<word>\w+)
      | (?P<punct>[^\w\s])
      | (?P<space>\s+)",
    )
    .expect("valid heuristic regex")
});

/// Word/punctuation tokenizer that recognizes HTML tags and entities
///
/// Every punctuation character is its own token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer {
    html: HtmlPolicy,
}

impl HeuristicTokenizer {
    pub fn new(html: HtmlPolicy) -> Self {
        Self { html }
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut html_run: Option<String> = None;

        for caps in HEURISTIC.captures_iter(text) {
            if caps.name("space").is_some() {
                continue;
            }
            let html = caps.name("tag").or_else(|| caps.name("entity"));
            match (html, self.html) {
                (Some(_), HtmlPolicy::Skip) => {}
                (Some(m), HtmlPolicy::Retain) => tokens.push(m.as_str().to_string()),
                (Some(m), HtmlPolicy::Group) => {
                    html_run.get_or_insert_with(String::new).push_str(m.as_str());
                }
                (None, _) => {
                    if let Some(run) = html_run.take() {
                        tokens.push(run);
                    }
                    if let Some(m) = caps.name("word").or_else(|| caps.name("punct")) {
                        tokens.push(m.as_str().to_string());
                    }
                }
            }
        }
        if let Some(run) = html_run {
            tokens.push(run);
        }
        tokens
    }
}
