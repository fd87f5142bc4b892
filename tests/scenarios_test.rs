//! End-to-end scenarios: ingestion -> blocking -> pairs -> evaluation

use futures::TryStreamExt;
use recordlink::adapter::KeySetAdapter;
use recordlink::blocking::{
    BlockGenerator, BlockWriter, CanopyBlockGenerator, HashBlockGenerator,
    InvertedIndexBlockGenerator, KeySource, TokenBlockGenerator,
};
use recordlink::dataset::Dataset;
use recordlink::evaluation::{GroundTruth, Trial};
use recordlink::io::ArrayReader;
use recordlink::record::RecordSchema;
use recordlink::tokenizer::WhitespaceTokenizer;
use recordlink::types::Value;
use serde_json::{json, Value as Json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

async fn dataset(id: &str, fields: &[&str], rows: Vec<Json>) -> Dataset {
    let mut schema = RecordSchema::builder("Row");
    for field in fields {
        schema = schema.field(*field);
    }
    Dataset::builder(schema.build().unwrap())
        .id(id)
        .ingest(ArrayReader::new(rows))
        .await
        .unwrap()
}

async fn record_ids(block: &recordlink::blocking::Block, block_id: &str) -> Vec<String> {
    block
        .members(block_id)
        .await
        .unwrap()
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.record_id)
        .collect()
}

#[tokio::test]
async fn test_dedup_by_equal_category() {
    let ds = dataset(
        "items",
        &["c"],
        vec![
            json!({"id": "1", "c": "a"}),
            json!({"id": "2", "c": "a"}),
            json!({"id": "3", "c": "b"}),
            json!({"id": "4", "c": "b"}),
            json!({"id": "5", "c": "b"}),
        ],
    )
    .await;

    let generator: BlockGenerator = HashBlockGenerator::new(KeySource::property("c")).into();
    let block = generator.generate_block(&ds, None, None).await.unwrap();

    assert_eq!(block.block_ids().await.unwrap(), vec!["a", "b"]);
    assert_eq!(record_ids(&block, "a").await, vec!["1", "2"]);
    assert_eq!(record_ids(&block, "b").await, vec!["3", "4", "5"]);

    let pairs: Vec<(String, String)> = ds
        .generate_pairs(None, Some(&block), None)
        .map_ok(|(a, b)| (a.id().to_string(), b.id().to_string()))
        .try_collect()
        .await
        .unwrap();
    let expected: Vec<(String, String)> = [("1", "2"), ("3", "4"), ("3", "5"), ("4", "5")]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    assert_eq!(pairs, expected);
}

#[tokio::test]
async fn test_dedup_trial_admits_reversed_ground_truth_pairs() {
    let ds = dataset(
        "items",
        &["c"],
        vec![json!({"id": "1", "c": "a"}), json!({"id": "2", "c": "a"})],
    )
    .await;
    let block = BlockGenerator::from(HashBlockGenerator::new(KeySource::property("c")))
        .generate_block(&ds, None, None)
        .await
        .unwrap();

    let mut gt = GroundTruth::new();
    gt.add_positive("2", "1");
    let gt = Arc::new(gt);

    let pairs: Vec<_> = ds
        .generate_pairs(None, Some(&block), Some(gt.as_ref()))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(pairs.len(), 1);

    let mut trial = Trial::new(gt).single_dataset(true);
    for (a, b) in &pairs {
        assert!(trial.add_result(a, b, true, 0.8));
    }
    assert_eq!(trial.evaluate().true_positives, 1);
}

#[tokio::test]
async fn test_token_block_with_cap() {
    let ds = dataset(
        "fruit",
        &["name"],
        vec![
            json!({"id": "1", "name": "apple"}),
            json!({"id": "2", "name": "banana"}),
            json!({"id": "3", "name": "apple banana"}),
            json!({"id": "4", "name": "pineapple"}),
        ],
    )
    .await;

    let generator = TokenBlockGenerator::new(KeySource::tokenized(
        "name",
        Arc::new(WhitespaceTokenizer),
    ));
    let writer = BlockWriter::in_memory().block_max_size(Some(1));
    let blacklist = writer.blacklist_adapter().clone();
    BlockGenerator::from(generator)
        .generate(&ds, None, &writer)
        .await
        .unwrap();
    let block = writer.finish().await.unwrap();

    let blacklisted: BTreeSet<String> = blacklist
        .scan()
        .map_ok(|(key, _)| key)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(
        blacklisted,
        BTreeSet::from(["apple".to_string(), "banana".to_string()])
    );
    for (_, size) in block.sizes().await.unwrap() {
        assert!(size <= 1);
    }
    assert_eq!(block.block_ids().await.unwrap(), vec!["pineapple"]);
}

#[tokio::test]
async fn test_canopy_on_scalar_vectors() {
    let names = ["apple", "banana", "cherry", "orange", "pear", "quince"];
    let rows = names
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"id": i.to_string(), "name": name}))
        .collect();
    let ds = dataset("names", &["name"], rows).await;

    let key = KeySource::function(|record| {
        let first = record
            .get("name")?
            .as_str()
            .and_then(|s| s.chars().next())
            .map(|c| c.to_ascii_lowercase() as u32 as f64 - 97.0)
            .unwrap_or(0.0);
        Ok(Value::Vector(vec![first]))
    });
    let generator = CanopyBlockGenerator::new(
        key,
        5.0,
        1.0,
        Arc::new(|a: &[f64], b: &[f64]| (a[0] - b[0]).abs()),
    )
    .unwrap()
    .seed(7);
    let block = BlockGenerator::from(generator)
        .generate_block(&ds, None, None)
        .await
        .unwrap();

    let early: BTreeSet<String> = ["0", "1", "2"].iter().map(|s| s.to_string()).collect();
    let late: BTreeSet<String> = ["3", "4", "5"].iter().map(|s| s.to_string()).collect();
    let mut covered = BTreeSet::new();
    for block_id in block.block_ids().await.unwrap() {
        let members: BTreeSet<String> = record_ids(&block, &block_id).await.into_iter().collect();
        assert!(members.is_subset(&early) || members.is_subset(&late));
        covered.extend(members);
    }
    assert_eq!(covered.len(), names.len());
}

async fn token_dataset(id: &str, tokens: Vec<(&str, Vec<&str>)>) -> Dataset {
    let rows = tokens
        .iter()
        .map(|(rid, toks)| json!({"id": rid, "tokens": toks}))
        .collect();
    dataset(id, &["tokens"], rows).await
}

#[tokio::test]
async fn test_inverted_index_with_set_cap() {
    // t1: {a, b, c}, t2: {a} on the left; t1: {x, y}, t2: {y, z} on the right
    let left = token_dataset(
        "left",
        vec![("a", vec!["t1", "t2"]), ("b", vec!["t1"]), ("c", vec!["t1"])],
    )
    .await;
    let right = token_dataset(
        "right",
        vec![("x", vec!["t1"]), ("y", vec!["t1", "t2"]), ("z", vec!["t2"])],
    )
    .await;

    let dir = TempDir::new().unwrap();
    let pairs = |set_size| {
        let left = left.clone();
        let right = right.clone();
        let work_dir = dir.path().to_path_buf();
        async move {
            let generator = InvertedIndexBlockGenerator::new(KeySource::property("tokens"), set_size)
                .unwrap()
                .spill_buffer_size(3)
                .work_dir(work_dir);
            generator
                .candidate_pairs(&left, Some(&right))
                .await
                .unwrap()
                .try_collect::<Vec<_>>()
                .await
                .unwrap()
        }
    };

    let expected: Vec<(String, String)> = [
        ("a", "x"),
        ("a", "y"),
        ("b", "x"),
        ("b", "y"),
        ("c", "x"),
        ("c", "y"),
        ("a", "y"),
        ("a", "z"),
    ]
    .iter()
    .map(|(l, r)| (l.to_string(), r.to_string()))
    .collect();
    assert_eq!(pairs(10).await, expected);
    assert_eq!(
        pairs(1).await,
        vec![
            ("a".to_string(), "y".to_string()),
            ("a".to_string(), "z".to_string())
        ]
    );

    // blocks follow the same cap and record the dropped token
    let generator = InvertedIndexBlockGenerator::new(KeySource::property("tokens"), 1).unwrap();
    let writer = BlockWriter::in_memory();
    let blacklist = writer.blacklist_adapter().clone();
    BlockGenerator::from(generator)
        .generate(&left, Some(&right), &writer)
        .await
        .unwrap();
    let block = writer.finish().await.unwrap();
    assert_eq!(block.block_ids().await.unwrap(), vec!["t2"]);
    assert!(blacklist.contains_key("t1").await.unwrap());
}

#[test]
fn test_trial_with_top_k() {
    let mut gt = GroundTruth::new();
    gt.add_positive("1", "a");
    gt.add_negative("2", "b");
    gt.add_positive("3", "c");
    gt.add_negative("4", "d");

    let mut trial = Trial::new(Arc::new(gt)).min_confidence(0.0).top_k(2);
    trial.add_result_by_id("1", "a", true, 0.9, None);
    trial.add_result_by_id("2", "b", true, 0.7, None);
    trial.add_result_by_id("3", "c", true, 0.5, None);
    trial.add_result_by_id("4", "d", true, 0.3, None);

    let kept: Vec<&str> = trial.results().iter().map(|r| r.id1.as_str()).collect();
    assert_eq!(kept, vec!["1", "2"]);

    let matrix = trial.evaluate();
    assert_eq!(matrix.true_positives, 1);
    assert_eq!(matrix.false_positives, 1);
    assert_eq!(matrix.precision(), 0.5);
}

#[test]
fn test_ground_truth_file_round_trip() {
    let mut gt = GroundTruth::new();
    gt.add_positive("1", "10");
    gt.add_positive("2", "11");
    gt.add_negative("3", "12");

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truth.csv");
    gt.save(&path).unwrap();
    let loaded = GroundTruth::load(&path).unwrap();

    let triples = |g: &GroundTruth| -> BTreeSet<(String, String, bool)> {
        g.iter()
            .map(|(a, b, l)| (a.to_string(), b.to_string(), l))
            .collect()
    };
    assert_eq!(triples(&loaded), triples(&gt));
    assert_eq!(loaded, gt);
}
