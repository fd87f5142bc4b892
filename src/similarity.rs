//! Similarity functions over property values
//!
//! Each function is built from a typed options struct. Options can also be given as a JSON
//! object; unknown keys are rejected when the function is constructed.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::record::Record;
use crate::tokenizer::{Tokenizer, WhitespaceTokenizer, WordTokenizer};
use crate::types::Value;
use crate::{Error, Result};

/// Deterministic score in `[0, 1]` for two values
pub trait Similarity: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, a: &Value, b: &Value) -> Result<f64>;

    /// Score one property of two records.
    fn score_property(&self, a: &Record, b: &Record, property: &str) -> Result<f64> {
        self.score(a.get(property)?, b.get(property)?)
    }
}

fn parse_options<T: DeserializeOwned>(function: &str, options: serde_json::Value) -> Result<T> {
    let options = if options.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        options
    };
    serde_json::from_value(options)
        .map_err(|e| Error::parameter(format!("invalid options for {}: {}", function, e)))
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    #[default]
    Whitespace,
    Word,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct JaccardOptions {
    /// How string values are split; string lists are used as-is
    pub tokenizer: TokenizerKind,
    pub lowercase: bool,
}

impl Default for JaccardOptions {
    fn default() -> Self {
        Self {
            tokenizer: TokenizerKind::Whitespace,
            lowercase: true,
        }
    }
}

/// Jaccard index of two token sets. Two empty sets score 1.
pub struct JaccardSimilarity {
    options: JaccardOptions,
    tokenizer: Arc<dyn Tokenizer>,
}

impl JaccardSimilarity {
    pub fn new(options: JaccardOptions) -> Self {
        let tokenizer: Arc<dyn Tokenizer> = match options.tokenizer {
            TokenizerKind::Whitespace => Arc::new(WhitespaceTokenizer),
            TokenizerKind::Word => Arc::new(WordTokenizer::new().lowercase(false)),
        };
        Self { options, tokenizer }
    }

    pub fn from_options(options: serde_json::Value) -> Result<Self> {
        Ok(Self::new(parse_options("jaccard", options)?))
    }

    fn tokens(&self, value: &Value) -> Result<HashSet<String>> {
        let tokens: Vec<String> = match value {
            Value::Null => Vec::new(),
            Value::String(s) => self.tokenizer.tokenize(s),
            Value::StringList(list) => list.clone(),
            other => {
                return Err(Error::parameter(format!(
                    "jaccard expects a string or string list, got {}",
                    other.kind()
                )))
            }
        };
        Ok(tokens
            .into_iter()
            .map(|t| if self.options.lowercase { t.to_lowercase() } else { t })
            .collect())
    }
}

impl Default for JaccardSimilarity {
    fn default() -> Self {
        Self::new(JaccardOptions::default())
    }
}

impl Similarity for JaccardSimilarity {
    fn name(&self) -> &'static str {
        "jaccard"
    }

    fn score(&self, a: &Value, b: &Value) -> Result<f64> {
        let a = self.tokens(a)?;
        let b = self.tokens(b)?;
        if a.is_empty() && b.is_empty() {
            return Ok(1.0);
        }
        let intersection = a.intersection(&b).count();
        let union = a.union(&b).count();
        Ok(intersection as f64 / union as f64)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExactMatchOptions {
    pub ignore_case: bool,
    pub trim: bool,
    /// Score of a pair where either value is null
    pub null_score: f64,
}

/// 1 for equal values, 0 otherwise
#[derive(Default)]
pub struct ExactMatch {
    options: ExactMatchOptions,
}

impl ExactMatch {
    pub fn new(options: ExactMatchOptions) -> Self {
        Self { options }
    }

    pub fn from_options(options: serde_json::Value) -> Result<Self> {
        let options: ExactMatchOptions = parse_options("exact_match", options)?;
        if !(0.0..=1.0).contains(&options.null_score) {
            return Err(Error::parameter("exact_match null_score must be within [0, 1]"));
        }
        Ok(Self::new(options))
    }

    fn normalize<'a>(&self, s: &'a str) -> std::borrow::Cow<'a, str> {
        let s = if self.options.trim { s.trim() } else { s };
        if self.options.ignore_case {
            s.to_lowercase().into()
        } else {
            s.into()
        }
    }
}

impl Similarity for ExactMatch {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn score(&self, a: &Value, b: &Value) -> Result<f64> {
        if a.is_null() || b.is_null() {
            return Ok(self.options.null_score);
        }
        let equal = match (a, b) {
            (Value::String(x), Value::String(y)) => self.normalize(x) == self.normalize(y),
            _ => a == b,
        };
        Ok(if equal { 1.0 } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn test_jaccard() {
        let jaccard = JaccardSimilarity::default();
        assert_eq!(jaccard.score(&s("a b c"), &s("B c d")).unwrap(), 0.5);
        assert_eq!(jaccard.score(&Value::Null, &Value::Null).unwrap(), 1.0);
        assert_eq!(jaccard.score(&s("a"), &Value::Null).unwrap(), 0.0);
        assert!(jaccard.score(&Value::Integer(1), &s("a")).is_err());

        let list = Value::StringList(vec!["a".into(), "b".into()]);
        assert_eq!(jaccard.score(&list, &s("a b")).unwrap(), 1.0);
    }

    #[test]
    fn test_jaccard_options() {
        let jaccard = JaccardSimilarity::from_options(json!({"tokenizer": "word", "lowercase": false})).unwrap();
        assert_eq!(jaccard.score(&s("a,b"), &s("a b")).unwrap(), 1.0);
        assert_eq!(jaccard.score(&s("A"), &s("a")).unwrap(), 0.0);

        let err = JaccardSimilarity::from_options(json!({"threshold": 0.3})).err().unwrap();
        assert!(matches!(err, Error::Parameter(_)));
    }

    #[test]
    fn test_exact_match() {
        let exact = ExactMatch::from_options(json!({"ignore_case": true, "trim": true})).unwrap();
        assert_eq!(exact.score(&s(" Foo"), &s("foo ")).unwrap(), 1.0);
        assert_eq!(exact.score(&Value::Integer(1), &Value::Integer(1)).unwrap(), 1.0);
        assert_eq!(exact.score(&Value::Integer(1), &Value::Float(1.5)).unwrap(), 0.0);
        assert_eq!(exact.score(&Value::Null, &s("x")).unwrap(), 0.0);

        assert!(ExactMatch::from_options(serde_json::Value::Null).is_ok());
        assert!(ExactMatch::from_options(json!({"null_score": 2.0})).is_err());
        assert!(ExactMatch::from_options(json!({"fuzzy": true})).is_err());
    }
}
