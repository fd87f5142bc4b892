//! Newline-delimited JSON reader and writer

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::RawObject;
use crate::{Error, Result};

use super::Reader;

pub struct JsonLinesReader {
    path: PathBuf,
    source_name: String,
    reader: BufReader<File>,
    offset: u64,
    line_no: usize,
    ignore_blank_lines: bool,
}

impl JsonLinesReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_at(path.as_ref().to_path_buf(), 0, 0, true)
    }

    /// When disabled, a blank line is an ingestion error.
    pub fn ignore_blank_lines(mut self, ignore: bool) -> Self {
        self.ignore_blank_lines = ignore;
        self
    }

    fn open_at(path: PathBuf, offset: u64, line_no: usize, ignore_blank_lines: bool) -> Result<Self> {
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            source_name: path.display().to_string(),
            path,
            reader: BufReader::new(file),
            offset,
            line_no,
            ignore_blank_lines,
        })
    }
}

impl Iterator for JsonLinesReader {
    type Item = Result<RawObject>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            self.offset += read as u64;
            self.line_no += 1;

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(Error::ingestion(format!(
                        "{} line {}: {}",
                        self.source_name, self.line_no, e
                    ))))
                }
            };

            if line.trim().is_empty() {
                if self.ignore_blank_lines {
                    continue;
                }
                return Some(Err(Error::ingestion(format!(
                    "{} line {}: blank line",
                    self.source_name, self.line_no
                ))));
            }

            return Some(match serde_json::from_str::<serde_json::Value>(line) {
                Ok(serde_json::Value::Object(map)) => Ok(map),
                Ok(_) => Err(Error::ingestion(format!(
                    "{} line {}: expected a JSON object",
                    self.source_name, self.line_no
                ))),
                Err(e) => Err(Error::ingestion(format!(
                    "{} line {}: {}",
                    self.source_name, self.line_no, e
                ))),
            });
        }
    }
}

impl Reader for JsonLinesReader {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn fork(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(Self::open_at(
            self.path.clone(),
            self.offset,
            self.line_no,
            self.ignore_blank_lines,
        )?))
    }
}

/// Writes one JSON object per line
pub struct JsonLinesWriter {
    writer: BufWriter<File>,
}

impl JsonLinesWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn write(&mut self, object: &RawObject) -> Result<()> {
        serde_json::to_writer(&mut self.writer, object)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
