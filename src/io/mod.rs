//! Readers and writers for raw objects and block files
//!
//! A [`Reader`] is a lazy sequence of raw objects. Every reader can be forked: the fork starts
//! where the original currently is and the two then advance independently.

use crate::types::RawObject;
use crate::Result;

pub mod array;
pub mod block_file;
pub mod delimited;
pub mod frame;
pub mod jsonl;

pub use array::ArrayReader;
pub use block_file::{BlockFileReader, BlockFileWriter};
pub use delimited::{DelimitedOptions, DelimitedReader, DelimitedWriter, Quoting};
pub use frame::FrameReader;
pub use jsonl::{JsonLinesReader, JsonLinesWriter};

pub trait Reader: Iterator<Item = Result<RawObject>> + Send {
    /// Short description used in logs and error messages.
    fn source_name(&self) -> &str;

    /// An independent reader positioned where this one currently is.
    fn fork(&self) -> Result<Box<dyn Reader>>;
}

impl Reader for Box<dyn Reader> {
    fn source_name(&self) -> &str {
        (**self).source_name()
    }

    fn fork(&self) -> Result<Box<dyn Reader>> {
        (**self).fork()
    }
}
