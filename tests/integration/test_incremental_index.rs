//! Incremental indexing must give the same lists as ranking from scratch.

use std::collections::HashMap;

use simdex::{DocumentId, IndexError, SimilarityIndex};
use tempfile::TempDir;

use crate::common::{VectorTextModel, batch, cosine, random_vectors, small_config};

fn brute_force(
    corpus: &HashMap<String, Vec<f32>>,
    query: &[f32],
    top: usize,
) -> Vec<(String, f32)> {
    let mut scores: Vec<(String, f32)> = corpus
        .iter()
        .map(|(id, vector)| (id.clone(), cosine(query, vector).abs()))
        .collect();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    scores.truncate(top);
    scores
}

#[test]
fn test_orthogonal_documents_across_batches() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = SimilarityIndex::create(temp_dir.path(), small_config(2, 10)).unwrap();
    let model = VectorTextModel { dimension: 3 };

    let docs = vec![
        ("x".to_string(), vec![1.0, 0.0, 0.0]),
        ("y".to_string(), vec![0.0, 1.0, 0.0]),
        ("z".to_string(), vec![0.0, 0.0, 1.0]),
    ];
    index.index_documents(&batch(&docs[..1]), &model).unwrap();
    index.index_documents(&batch(&docs[1..]), &model).unwrap();

    for (id, _) in &docs {
        let sims = index.sims_by_id(&DocumentId::new(id.clone())).unwrap();
        assert_eq!(sims.len(), 3);
        assert_eq!(sims[0].0.as_str(), id);
        assert!((sims[0].1 - 1.0).abs() < 1e-6);
        assert!(sims[1..].iter().all(|(_, score)| score.abs() < 1e-6));
    }
}

#[test]
fn test_later_duplicate_outranks_orthogonal_peer() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = SimilarityIndex::create(temp_dir.path(), small_config(4, 10)).unwrap();
    let model = VectorTextModel { dimension: 2 };

    let first = vec![
        ("first".to_string(), vec![1.0, 0.0]),
        ("second".to_string(), vec![0.0, 1.0]),
    ];
    index.index_documents(&batch(&first), &model).unwrap();
    index
        .index_documents(&batch(&[("third".to_string(), vec![1.0, 0.0])]), &model)
        .unwrap();

    let sims = index.sims_by_id(&DocumentId::from("first")).unwrap();
    let rank = |name: &str| sims.iter().position(|(id, _)| id.as_str() == name).unwrap();
    assert_eq!(sims.len(), 3);
    assert!(rank("third") < rank("second"));
    assert!((sims[rank("third")].1 - 1.0).abs() < 1e-6);
    assert!(sims[rank("second")].1.abs() < 1e-6);
}

#[test]
fn test_lookup_by_id_matches_query_by_vector() {
    let temp_dir = TempDir::new().unwrap();
    let top = 6;
    let mut index = SimilarityIndex::create(temp_dir.path(), small_config(5, top)).unwrap();
    let model = VectorTextModel { dimension: 8 };
    let docs = random_vectors(30, 8, 7);

    for chunk in docs.chunks(9) {
        index.index_documents(&batch(chunk), &model).unwrap();
    }

    for (id, vector) in &docs {
        let by_id = index.sims_by_id(&DocumentId::new(id.clone())).unwrap();
        let by_vector = index.sims_by_vector(vector).unwrap();

        assert_eq!(by_id.len(), by_vector.len(), "{id}");
        for ((id_a, score_a), (id_b, score_b)) in by_id.iter().zip(&by_vector) {
            assert_eq!(id_a, id_b, "{id}");
            assert!((score_a - score_b).abs() < 1e-5, "{id}: {score_a} vs {score_b}");
        }
    }
}

#[test]
fn test_incremental_lists_match_brute_force() {
    let temp_dir = TempDir::new().unwrap();
    let top = 8;
    let mut index = SimilarityIndex::create(temp_dir.path(), small_config(16, top)).unwrap();
    let model = VectorTextModel { dimension: 12 };
    let docs = random_vectors(60, 12, 42);

    for chunk in docs.chunks(13) {
        index.index_documents(&batch(chunk), &model).unwrap();
    }
    assert_eq!(index.len(), 60);
    assert_eq!(index.shard_count(), 4);

    let corpus: HashMap<String, Vec<f32>> = docs.iter().cloned().collect();
    for (id, vector) in &docs {
        let sims = index.sims_by_id(&DocumentId::new(id.clone())).unwrap();
        let expected = brute_force(&corpus, vector, top);

        assert_eq!(sims.len(), top, "cap not reached for {id}");
        for ((_, got), (_, want)) in sims.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-4, "{id}: {got} vs {want}");
        }
        for (peer, score) in &sims {
            let truth = cosine(vector, &corpus[peer.as_str()]).abs();
            assert!((score - truth).abs() < 1e-4, "{id} -> {peer}");
        }
        assert!(sims.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}

#[test]
fn test_cap_and_uniqueness_hold_after_replacements() {
    let temp_dir = TempDir::new().unwrap();
    let top = 5;
    let mut index = SimilarityIndex::create(temp_dir.path(), small_config(10, top)).unwrap();
    let model = VectorTextModel { dimension: 6 };

    let first = random_vectors(20, 6, 1);
    index.index_documents(&batch(&first), &model).unwrap();

    // Same ids, new vectors: every old slot becomes a ghost
    let second = random_vectors(20, 6, 2);
    index.index_documents(&batch(&second[..10]), &model).unwrap();
    index.index_documents(&batch(&second[10..]), &model).unwrap();

    assert_eq!(index.len(), 20);
    assert_eq!(index.stored_len(), 40);
    assert_eq!(index.ghost_count(), 20);

    let corpus: HashMap<String, Vec<f32>> = second.iter().cloned().collect();
    for (id, vector) in &second {
        let sims = index.sims_by_id(&DocumentId::new(id.clone())).unwrap();
        assert!(sims.len() <= top);

        let mut seen = std::collections::HashSet::new();
        assert!(sims.iter().all(|(peer, _)| seen.insert(peer.clone())));

        for (peer, score) in &sims {
            let truth = cosine(vector, &corpus[peer.as_str()]).abs();
            assert!((score - truth).abs() < 1e-4, "stale score for {id} -> {peer}");
        }
    }
}

#[test]
fn test_delete_then_readd() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = SimilarityIndex::create(temp_dir.path(), small_config(4, 10)).unwrap();
    let model = VectorTextModel { dimension: 4 };
    let docs = random_vectors(6, 4, 9);
    index.index_documents(&batch(&docs), &model).unwrap();

    let gone = DocumentId::from("doc_2");
    assert_eq!(index.delete(std::slice::from_ref(&gone)).unwrap(), 1);
    assert!(!index.contains(&gone));
    for (id, _) in &docs {
        if id == "doc_2" {
            continue;
        }
        let sims = index.sims_by_id(&DocumentId::new(id.clone())).unwrap();
        assert!(sims.iter().all(|(peer, _)| peer != &gone));
    }

    let back = vec![("doc_2".to_string(), vec![0.5, 0.5, 0.5, 0.5])];
    index.index_documents(&batch(&back), &model).unwrap();
    assert_eq!(index.len(), 6);
    assert_eq!(index.ghost_count(), 1);

    let sims = index.sims_by_id(&gone).unwrap();
    assert_eq!(sims.len(), 6);
    assert_eq!(sims[0].0, gone);

    let by_vector = index.sims_by_vector(&[1.0, 1.0, 1.0, 1.0]).unwrap();
    assert_eq!(by_vector[0].0, gone);
    assert!((by_vector[0].1 - 1.0).abs() < 1e-5);
}

#[test]
fn test_delete_unknown_id_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = SimilarityIndex::create(temp_dir.path(), small_config(4, 10)).unwrap();
    let model = VectorTextModel { dimension: 4 };
    index
        .index_documents(&batch(&random_vectors(3, 4, 3)), &model)
        .unwrap();

    let result = index.delete(&[DocumentId::from("doc_0"), DocumentId::from("missing")]);
    match result {
        Err(IndexError::NotFound { ids }) => {
            assert_eq!(ids, vec![DocumentId::from("missing")]);
        }
        other => panic!("Expected NotFound, got {other:?}"),
    }
    assert_eq!(index.len(), 3);
    assert!(index.contains(&DocumentId::from("doc_0")));
}

#[test]
fn test_live_scan_mode_matches_precomputed() {
    let docs = random_vectors(25, 5, 77);
    let model = VectorTextModel { dimension: 5 };

    let cached_dir = TempDir::new().unwrap();
    let mut cached = SimilarityIndex::create(cached_dir.path(), small_config(8, 6)).unwrap();
    let scan_dir = TempDir::new().unwrap();
    let mut scan_config = small_config(8, 6);
    scan_config.precompute = false;
    let mut scan = SimilarityIndex::create(scan_dir.path(), scan_config).unwrap();

    for chunk in docs.chunks(9) {
        cached.index_documents(&batch(chunk), &model).unwrap();
        scan.index_documents(&batch(chunk), &model).unwrap();
    }

    for (id, _) in &docs {
        let id = DocumentId::new(id.clone());
        let a = cached.sims_by_id(&id).unwrap();
        let b = scan.sims_by_id(&id).unwrap();
        assert_eq!(a.len(), b.len());
        for ((_, x), (_, y)) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4);
        }
    }
}
