//! End-to-end flows through the document server.

use std::sync::Arc;

use simdex::config::{IndexConfig, Settings};
use simdex::semantic::model_from_settings;
use simdex::{Document, DocumentId, HashingModel, IndexError, IndexServer, Query};
use tempfile::TempDir;

fn corpus() -> Vec<Document> {
    [
        "Human machine interface for lab abc computer applications",
        "A survey of user opinion of computer system response time",
        "The EPS user interface management system",
        "System and human system engineering testing of EPS",
        "Relation of user perceived response time to error measurement",
        "The generation of random binary unordered trees",
        "The intersection graph of paths in trees",
        "Graph minors IV Widths of trees and well quasi ordering",
        "Graph minors A survey",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| Document::new(format!("doc_{i}"), *text))
    .collect()
}

fn open(dir: &TempDir) -> IndexServer {
    let config = IndexConfig {
        shard_size: 4,
        top_sims: 5,
        ..IndexConfig::default()
    };
    IndexServer::open(dir.path().join("index"), config)
        .unwrap()
        .with_model(Arc::new(HashingModel::new(128).unwrap()))
}

#[test]
fn test_index_in_two_rounds_and_query() {
    let temp_dir = TempDir::new().unwrap();
    let server = open(&temp_dir);
    let docs = corpus();

    server.add_documents(docs[..5].to_vec());
    assert_eq!(server.index(None).unwrap(), 5);
    server.add_documents(docs[5..].to_vec());
    assert_eq!(server.index(None).unwrap(), 4);

    let status = server.status();
    assert_eq!(status.documents, 9);
    assert_eq!(status.shards, 3);
    assert_eq!(status.dimension, Some(128));
    assert!(status.to_string().contains("9 documents"));

    let sims = server
        .find_similar(DocumentId::from("doc_8"), 0.0, 0)
        .unwrap();
    assert_eq!(sims.len(), 5);
    assert_eq!(sims[0].0.as_str(), "doc_8");
    assert!(sims.windows(2).all(|w| w[0].1 >= w[1].1));
}

#[test]
fn test_min_score_stops_at_first_lower_score() {
    let temp_dir = TempDir::new().unwrap();
    let server = open(&temp_dir);
    server.index(Some(corpus())).unwrap();

    let all = server
        .find_similar(Query::Id(DocumentId::from("doc_6")), 0.0, 0)
        .unwrap();
    let threshold = all[1].1;
    let filtered = server
        .find_similar(Query::Id(DocumentId::from("doc_6")), threshold, 0)
        .unwrap();

    assert!(filtered.len() >= 2);
    assert!(filtered.iter().all(|(_, score)| *score >= threshold));
    assert_eq!(&all[..filtered.len()], &filtered[..]);
}

#[test]
fn test_text_query_needs_model() {
    let temp_dir = TempDir::new().unwrap();
    {
        let server = open(&temp_dir);
        server.index(Some(corpus())).unwrap();
    }

    let server = IndexServer::open(temp_dir.path().join("index"), IndexConfig::default()).unwrap();
    let query = Document::new("q", "graph minors trees");
    assert!(matches!(
        server.find_similar(query.clone(), 0.0, 10),
        Err(IndexError::NoModel)
    ));

    // Id queries work without a model
    assert!(server.find_similar(DocumentId::from("doc_0"), 0.0, 10).is_ok());

    server.set_model(Arc::new(HashingModel::new(128).unwrap()));
    let sims = server.find_similar(query, 0.0, 3).unwrap();
    assert_eq!(sims.len(), 3);
}

#[test]
fn test_model_dimension_mismatch_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let server = open(&temp_dir);
    server.index(Some(corpus())).unwrap();

    server.set_model(Arc::new(HashingModel::new(64).unwrap()));
    server.add_documents([Document::new("late", "graph of trees")]);
    assert!(matches!(
        server.index(None),
        Err(IndexError::DimensionMismatch {
            expected: 128,
            actual: 64
        })
    ));
    assert_eq!(server.buffered(), 1);
    assert_eq!(server.status().documents, 9);
}

#[test]
fn test_settings_drive_server() {
    let temp_dir = TempDir::new().unwrap();
    let settings_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &settings_path,
        r#"
index_path = "idx"

[index]
shard_size = 3
top_sims = 4
score_mode = "signed"

[model]
kind = "hashing"
dimension = 32
"#,
    )
    .unwrap();

    let settings = Settings::load_from(&settings_path).unwrap();
    let model = model_from_settings(&settings.model).unwrap();
    let server = IndexServer::open(temp_dir.path().join(&settings.index_path), settings.index)
        .unwrap()
        .with_model(Arc::from(model));
    server.index(Some(corpus())).unwrap();

    let status = server.status();
    assert_eq!(status.shards, 3);
    assert_eq!(status.top_sims, 4);
    assert_eq!(status.score_mode, "signed");
    assert_eq!(status.model.as_deref(), Some("hashing-32"));
}
