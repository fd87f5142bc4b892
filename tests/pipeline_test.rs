//! Storage-backed linkage run: ingest, block, score in parallel, evaluate

use futures::TryStreamExt;
use recordlink::adapter::{StorageKeySetAdapter, StorageKeyValueAdapter};
use recordlink::blocking::{Block, BlockGenerator, BlockWriter, KeySource, TokenBlockGenerator};
use recordlink::dataset::Dataset;
use recordlink::evaluation::{Evaluation, GroundTruth, Trial};
use recordlink::io::{DelimitedOptions, DelimitedReader, JsonLinesReader};
use recordlink::parallel::{ParallelConfig, ParallelProcessor};
use recordlink::record::RecordSchema;
use recordlink::similarity::{JaccardSimilarity, Similarity};
use recordlink::storage::{LocalStorage, StorageBackend};
use recordlink::tokenizer::WordTokenizer;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn schema() -> Arc<RecordSchema> {
    RecordSchema::builder("Company").field("name").build().unwrap()
}

#[tokio::test]
async fn test_storage_backed_linkage_run() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("left.csv"),
        "id,name\n1,Acme Corp\n2,Globex Inc\n3,Initech\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("right.jsonl"),
        "{\"id\": \"a\", \"name\": \"ACME Corporation\"}\n\n{\"id\": \"b\", \"name\": \"Globex\"}\n{\"id\": \"c\", \"name\": \"Umbrella\"}\n",
    )
    .unwrap();

    let storage: Arc<dyn StorageBackend> =
        Arc::new(LocalStorage::new(dir.path().join("store")).unwrap());
    let schema = schema();

    let left = Dataset::builder(schema.clone())
        .id("left")
        .adapter(Arc::new(StorageKeyValueAdapter::new(
            storage.clone(),
            "records/left",
            schema.clone(),
        )))
        .ingest(DelimitedReader::open(dir.path().join("left.csv"), DelimitedOptions::default()).unwrap())
        .await
        .unwrap();
    let right = Dataset::builder(schema.clone())
        .id("right")
        .ingest(JsonLinesReader::open(dir.path().join("right.jsonl")).unwrap())
        .await
        .unwrap();
    assert_eq!(left.len().await.unwrap(), 3);
    assert_eq!(right.len().await.unwrap(), 3);

    let key = KeySource::tokenized("name", Arc::new(WordTokenizer::new().lowercase(true)));
    let writer = BlockWriter::new(Arc::new(StorageKeySetAdapter::new(storage.clone(), "blocks")));
    BlockGenerator::from(TokenBlockGenerator::new(key))
        .generate(&left, Some(&right), &writer)
        .await
        .unwrap();
    writer.finish().await.unwrap();

    // reopen both the records and the blocks from storage
    let left = Dataset::open(
        "left",
        schema.clone(),
        Arc::new(StorageKeyValueAdapter::new(storage.clone(), "records/left", schema)),
    );
    let block = Block::new(Arc::new(StorageKeySetAdapter::new(storage.clone(), "blocks")));
    assert_eq!(block.block_ids().await.unwrap(), vec!["acme", "globex"]);

    let mut gt = GroundTruth::new();
    gt.add_positive("1", "a");
    gt.add_positive("2", "b");
    gt.add_negative("1", "b");
    let gt = Arc::new(gt);

    let trial = Arc::new(Mutex::new(Trial::new(gt.clone()).label("jaccard")));
    let sink = trial.clone();
    let jaccard = Arc::new(JaccardSimilarity::default());
    let processor = ParallelProcessor::start(
        ParallelConfig {
            workers: 2,
            queue_size: 2,
        },
        CancellationToken::new(),
        move |(a, b): (Arc<recordlink::record::Record>, Arc<recordlink::record::Record>)| {
            let jaccard = jaccard.clone();
            async move {
                let score = jaccard.score_property(&a, &b, "name")?;
                Ok::<_, recordlink::Error>((a.id().to_string(), b.id().to_string(), score))
            }
        },
        Some(Box::new(move |(id1, id2, score): (String, String, f64)| {
            sink.lock().unwrap().add_result_by_id(&id1, &id2, score > 0.3, score, None);
            Ok(())
        })),
    )
    .unwrap();

    let mut pairs = left.generate_pairs(Some(&right), Some(&block), None);
    while let Some(pair) = pairs.try_next().await.unwrap() {
        processor.submit(pair).await.unwrap();
    }
    drop(pairs);
    processor.finish().await.unwrap();

    let trial = Arc::try_unwrap(trial).ok().unwrap().into_inner().unwrap();
    assert_eq!(trial.len(), 2);
    let mut evaluation = Evaluation::new();
    evaluation.add_trial(trial);
    let table = evaluation.table();
    assert_eq!(table[0].label, "jaccard");
    assert_eq!(table[0].matrix.true_positives, 2);
    assert_eq!(table[0].recall, 1.0);
}
