//! Delimited text (CSV, TSV, ...) reader and writer
//!
//! The first row is the header. Every field is read as a string; fields beyond the header are
//! kept under `column_<n>` (0-based) so ragged rows lose nothing.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::types::RawObject;
use crate::{Error, Result};

use super::Reader;

/// Quoting policy for writing; reading honours quotes unless the policy is [`Quoting::Never`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quoting {
    #[default]
    Minimal,
    All,
    NonNumeric,
    Never,
}

impl Quoting {
    fn style(self) -> csv::QuoteStyle {
        match self {
            Quoting::Minimal => csv::QuoteStyle::Necessary,
            Quoting::All => csv::QuoteStyle::Always,
            Quoting::NonNumeric => csv::QuoteStyle::NonNumeric,
            Quoting::Never => csv::QuoteStyle::Never,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DelimitedOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub quoting: Quoting,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            quoting: Quoting::Minimal,
        }
    }
}

impl DelimitedOptions {
    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            ..Self::default()
        }
    }

    fn reader(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .quoting(self.quoting != Quoting::Never)
            .flexible(true);
        builder
    }
}

pub struct DelimitedReader {
    path: PathBuf,
    source_name: String,
    options: DelimitedOptions,
    reader: csv::Reader<File>,
    headers: Vec<String>,
    row: csv::StringRecord,
}

impl DelimitedReader {
    pub fn open(path: impl AsRef<Path>, options: DelimitedOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = options.reader().from_path(&path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self {
            source_name: path.display().to_string(),
            path,
            options,
            reader,
            headers,
            row: csv::StringRecord::new(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn to_object(&self) -> RawObject {
        let mut object = RawObject::new();
        for (idx, field) in self.row.iter().enumerate() {
            let key = match self.headers.get(idx) {
                Some(name) => name.clone(),
                None => format!("column_{}", idx),
            };
            object.insert(key, serde_json::Value::String(field.to_string()));
        }
        object
    }
}

impl Iterator for DelimitedReader {
    type Item = Result<RawObject>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.row) {
            Ok(true) => Some(Ok(self.to_object())),
            Ok(false) => None,
            Err(e) => Some(Err(Error::ingestion(format!("{}: {}", self.source_name, e)))),
        }
    }
}

impl Reader for DelimitedReader {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn fork(&self) -> Result<Box<dyn Reader>> {
        let mut fork = Self::open(&self.path, self.options)?;
        fork.reader.seek(self.reader.position().clone())?;
        Ok(Box::new(fork))
    }
}

/// Writes raw objects under a fixed column list
///
/// Strings are written as-is, nulls and absent keys as empty fields, and any other JSON value in
/// its compact JSON form.
pub struct DelimitedWriter {
    writer: csv::Writer<File>,
    columns: Vec<String>,
}

impl DelimitedWriter {
    pub fn create(
        path: impl AsRef<Path>,
        columns: Vec<String>,
        options: DelimitedOptions,
    ) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(options.delimiter)
            .quote(options.quote)
            .quote_style(options.quoting.style())
            .from_path(path)?;
        writer.write_record(&columns)?;
        Ok(Self { writer, columns })
    }

    pub fn write(&mut self, object: &RawObject) -> Result<()> {
        let fields: Vec<String> = self
            .columns
            .iter()
            .map(|column| match object.get(column) {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        self.writer.write_record(&fields)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
