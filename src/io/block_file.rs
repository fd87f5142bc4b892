//! Block file format
//!
//! Newline-delimited JSON, one single-entry object per line: `{"<key>": [id1, id2, ...]}`.
//! Blank lines are ignored on read. The writer buffers lines, flushes them in batches, and
//! atomically renames a temp file over the destination when finished.

use serde_json::Value as JsonValue;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Streaming reader over a block file
pub struct BlockFileReader {
    source_name: String,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl BlockFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            source_name: path.display().to_string(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    fn parse(&self, line: &str) -> Result<(String, Vec<String>)> {
        let value: JsonValue = serde_json::from_str(line)
            .map_err(|e| Error::format(&self.source_name, self.line_no, e.to_string()))?;
        let object = value.as_object().ok_or_else(|| {
            Error::format(&self.source_name, self.line_no, "expected a JSON object")
        })?;
        if object.len() != 1 {
            return Err(Error::format(
                &self.source_name,
                self.line_no,
                format!("expected a single-entry object, found {} entries", object.len()),
            ));
        }
        let (key, ids) = object.iter().next().ok_or_else(|| {
            Error::format(&self.source_name, self.line_no, "empty object")
        })?;
        let ids = ids
            .as_array()
            .ok_or_else(|| Error::format(&self.source_name, self.line_no, "value must be a list"))?
            .iter()
            .map(|id| {
                id.as_str().map(str::to_string).ok_or_else(|| {
                    Error::format(&self.source_name, self.line_no, "ids must be strings")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((key.clone(), ids))
    }
}

impl Iterator for BlockFileReader {
    type Item = Result<(String, Vec<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(self.parse(&line));
        }
    }
}

/// Buffered, atomically committed block file writer
pub struct BlockFileWriter {
    destination: PathBuf,
    temp: BufWriter<NamedTempFile>,
    buffer: Vec<String>,
    batch_size: usize,
    written: usize,
}

impl BlockFileWriter {
    pub fn create(destination: impl Into<PathBuf>, batch_size: usize) -> Result<Self> {
        let destination = destination.into();
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let temp = NamedTempFile::new_in(&dir)?;
        Ok(Self {
            destination,
            temp: BufWriter::new(temp),
            buffer: Vec::with_capacity(batch_size.max(1)),
            batch_size: batch_size.max(1),
            written: 0,
        })
    }

    pub fn write<I, S>(&mut self, key: &str, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<JsonValue> = ids.into_iter().map(|id| JsonValue::String(id.into())).collect();
        let mut entry = serde_json::Map::with_capacity(1);
        entry.insert(key.to_string(), JsonValue::Array(ids));
        self.buffer.push(JsonValue::Object(entry).to_string());
        if self.buffer.len() >= self.batch_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<()> {
        for line in self.buffer.drain(..) {
            self.temp.write_all(line.as_bytes())?;
            self.temp.write_all(b"\n")?;
            self.written += 1;
        }
        self.temp.flush()?;
        Ok(())
    }

    /// Flush remaining lines and rename the temp file over the destination.
    pub fn finish(mut self) -> Result<usize> {
        self.flush_batch()?;
        let temp = self
            .temp
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        temp.as_file().sync_all()?;
        temp.persist(&self.destination)
            .map_err(|e| Error::Io(e.error))?;
        tracing::debug!(
            path = %self.destination.display(),
            blocks = self.written,
            "Block file committed"
        );
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_block_file_roundtrip_with_blank_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocks.jsonl");

        let mut writer = BlockFileWriter::create(&path, 2).unwrap();
        writer.write("apple pie", ["1", "2"]).unwrap();
        writer.write("b", ["3"]).unwrap();
        writer.write("c", Vec::<String>::new()).unwrap();
        assert_eq!(writer.finish().unwrap(), 3);

        // Blank lines are tolerated.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("\n\n");
        std::fs::write(&path, content).unwrap();

        let blocks: Vec<_> = BlockFileReader::open(&path)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], ("apple pie".to_string(), vec!["1".into(), "2".into()]));
        assert!(blocks[2].1.is_empty());
    }

    #[test]
    fn test_destination_untouched_until_finish() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blocks.jsonl");
        std::fs::write(&path, "{\"old\":[\"1\"]}\n").unwrap();

        let mut writer = BlockFileWriter::create(&path, 1).unwrap();
        writer.write("new", ["2"]).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("old"));

        writer.finish().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("new"));
        assert!(!content.contains("old"));
    }

    #[test]
    fn test_format_violation_reports_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"a\":[\"1\"]}\n\n{\"a\":[\"1\"],\"b\":[]}\n").unwrap();

        let results: Vec<_> = BlockFileReader::open(&path).unwrap().collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(Error::Format { line, .. }) => assert_eq!(*line, 3),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
