//! In-memory array reader

use std::sync::Arc;

use crate::types::RawObject;
use crate::{Error, Result};

use super::Reader;

#[derive(Clone)]
pub struct ArrayReader {
    items: Arc<Vec<serde_json::Value>>,
    position: usize,
}

impl ArrayReader {
    /// Every item must be a JSON object; anything else surfaces as an ingestion error when read.
    pub fn new(items: Vec<serde_json::Value>) -> Self {
        Self {
            items: Arc::new(items),
            position: 0,
        }
    }

    pub fn from_objects(items: Vec<RawObject>) -> Self {
        Self::new(items.into_iter().map(serde_json::Value::Object).collect())
    }
}

impl Iterator for ArrayReader {
    type Item = Result<RawObject>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.position)?;
        let index = self.position;
        self.position += 1;
        Some(match item {
            serde_json::Value::Object(map) => Ok(map.clone()),
            other => Err(Error::ingestion(format!(
                "array item {} is not an object: {}",
                index, other
            ))),
        })
    }
}

impl Reader for ArrayReader {
    fn source_name(&self) -> &str {
        "array"
    }

    fn fork(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fork_continues_from_current_position() {
        let mut reader = ArrayReader::new(vec![json!({"id": "1"}), json!({"id": "2"}), json!({"id": "3"})]);
        reader.next().unwrap().unwrap();

        let fork = reader.fork().unwrap();
        let rest: Vec<_> = reader.map(|r| r.unwrap()["id"].clone()).collect();
        let forked: Vec<_> = fork.map(|r| r.unwrap()["id"].clone()).collect();
        assert_eq!(rest, vec![json!("2"), json!("3")]);
        assert_eq!(rest, forked);
    }

    #[test]
    fn test_non_object_is_ingestion_error() {
        let mut reader = ArrayReader::new(vec![json!(5)]);
        assert!(matches!(reader.next(), Some(Err(Error::Ingestion(_)))));
    }
}
