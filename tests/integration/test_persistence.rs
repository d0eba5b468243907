//! Save, reopen and recover an index directory.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use simdex::index::IndexManifest;
use simdex::{DocumentId, IndexError, ScoreMode, SimilarityIndex};
use tempfile::TempDir;

use crate::common::{VectorTextModel, batch, random_vectors, small_config};

#[test]
fn test_reopen_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let model = VectorTextModel { dimension: 6 };
    let docs = random_vectors(30, 6, 5);

    let before: Vec<_> = {
        let mut index = SimilarityIndex::create(temp_dir.path(), small_config(8, 5)).unwrap();
        index.index_documents(&batch(&docs[..20]), &model).unwrap();
        index.index_documents(&batch(&docs[20..]), &model).unwrap();
        index.delete(&[DocumentId::from("doc_3")]).unwrap();
        docs.iter()
            .filter(|(id, _)| id != "doc_3")
            .map(|(id, _)| index.sims_by_id(&DocumentId::new(id.clone())).unwrap())
            .collect()
    };

    let index = SimilarityIndex::open(temp_dir.path(), small_config(8, 5)).unwrap();
    assert_eq!(index.len(), 29);
    assert_eq!(index.stored_len(), 30);
    assert_eq!(index.model_name(), Some("vector-text"));
    assert!(!index.contains(&DocumentId::from("doc_3")));

    let after: Vec<_> = docs
        .iter()
        .filter(|(id, _)| id != "doc_3")
        .map(|(id, _)| index.sims_by_id(&DocumentId::new(id.clone())).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_open_discards_uncommitted_rows() {
    let temp_dir = TempDir::new().unwrap();
    let model = VectorTextModel { dimension: 2 };
    {
        let mut index = SimilarityIndex::create(temp_dir.path(), small_config(4, 5)).unwrap();
        let docs = vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.0, 1.0]),
        ];
        index.index_documents(&batch(&docs), &model).unwrap();
    }

    // An append that wrote rows and the header count but never committed
    let shard = temp_dir.path().join("shard_0.vec");
    let mut file = OpenOptions::new().read(true).write(true).open(&shard).unwrap();
    file.seek(SeekFrom::End(0)).unwrap();
    for value in [0.6f32, 0.8] {
        file.write_all(&value.to_le_bytes()).unwrap();
    }
    file.seek(SeekFrom::Start(12)).unwrap();
    file.write_all(&3u32.to_le_bytes()).unwrap();
    drop(file);
    std::fs::write(temp_dir.path().join("state_99.bin"), b"partial").unwrap();

    let mut index = SimilarityIndex::open(temp_dir.path(), small_config(4, 5)).unwrap();
    assert_eq!(index.stored_len(), 2);
    assert_eq!(index.len(), 2);
    assert!(!temp_dir.path().join("state_99.bin").exists());

    let docs = vec![("c".to_string(), vec![1.0, 1.0])];
    index.index_documents(&batch(&docs), &model).unwrap();
    let sims = index.sims_by_id(&DocumentId::from("a")).unwrap();
    assert_eq!(sims.len(), 3);
    assert_eq!(sims[1].0.as_str(), "c");
}

#[test]
fn test_corrupted_state_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    let model = VectorTextModel { dimension: 3 };
    {
        let mut index = SimilarityIndex::create(temp_dir.path(), small_config(4, 5)).unwrap();
        index
            .index_documents(&batch(&random_vectors(5, 3, 11)), &model)
            .unwrap();
    }

    let manifest = IndexManifest::load(temp_dir.path()).unwrap();
    let state = temp_dir.path().join(&manifest.state_file);
    let mut bytes = std::fs::read(&state).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&state, bytes).unwrap();

    assert!(matches!(
        SimilarityIndex::open(temp_dir.path(), small_config(4, 5)),
        Err(IndexError::Corrupted { .. })
    ));
}

#[test]
fn test_persisted_settings_win_over_config() {
    let temp_dir = TempDir::new().unwrap();
    let model = VectorTextModel { dimension: 3 };
    {
        let mut config = small_config(4, 3);
        config.score_mode = ScoreMode::Signed;
        let mut index = SimilarityIndex::create(temp_dir.path(), config).unwrap();
        index
            .index_documents(&batch(&random_vectors(10, 3, 21)), &model)
            .unwrap();
    }

    let index = SimilarityIndex::open(temp_dir.path(), small_config(100, 50)).unwrap();
    assert_eq!(index.config().shard_size, 4);
    assert_eq!(index.config().top_sims, 3);
    assert_eq!(index.config().score_mode, ScoreMode::Signed);
    assert_eq!(index.shard_count(), 3);

    let sims = index.sims_by_id(&DocumentId::from("doc_0")).unwrap();
    assert_eq!(sims.len(), 3);
}

#[test]
fn test_nothing_is_written_before_first_batch() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("index");
    let index = SimilarityIndex::open_or_create(&root, small_config(4, 5)).unwrap();

    assert!(!index.is_initialized());
    assert!(!IndexManifest::exists(&root));
    assert!(matches!(
        SimilarityIndex::open(&root, small_config(4, 5)),
        Err(IndexError::Io { .. }) | Err(IndexError::Corrupted { .. })
    ));
}

#[test]
fn test_remove_files() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("index");
    let model = VectorTextModel { dimension: 3 };
    let mut index = SimilarityIndex::create(&root, small_config(2, 5)).unwrap();
    index
        .index_documents(&batch(&random_vectors(5, 3, 8)), &model)
        .unwrap();
    drop(index);

    SimilarityIndex::remove_files(&root).unwrap();
    assert!(!root.exists());
}
