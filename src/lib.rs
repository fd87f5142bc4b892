//! recordlink - record linkage and deduplication
//!
//! Records are projected from raw input objects into datasets held by pluggable key-value
//! adapters. Block generators reduce the candidate space into blocks, pair streams walk those
//! blocks, and trials score the pairs against a labelled ground truth:
//! - Blocking by hash key, token, canopy, sorted neighbourhood, inverted index and MinHash-LSH
//! - Block union and intersection
//! - Memory, local filesystem and S3 backed adapters
//! - Confusion-matrix evaluation with top-k and threshold curves

pub mod adapter;
pub mod blocking;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod io;
pub mod minhash;
pub mod pairs;
pub mod parallel;
pub mod record;
pub mod similarity;
pub mod storage;
pub mod telemetry;
pub mod tokenizer;
pub mod types;

pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
