use std::time::{Duration, Instant};

use nanoindex::agent::Algorithm;
use nanoindex::config::Config;
use nanoindex::error::EngineError;
use nanoindex::search::{SearchEngine, SearchOptions};

fn test_config(data_dir: &str, dim: usize) -> Config {
    Config {
        port: 0,
        bind_addr: "127.0.0.1".parse().unwrap(),
        data_dir: data_dir.to_string(),
        dim,
        initial_capacity: 16,
        default_nprobe: 10,
        default_max_codes: 50_000,
        agent_algorithm: Algorithm::EpsilonGreedy,
        agent_epsilon: 0.1,
        checkpoint_every: 10,
        max_k: 256,
        max_vector_batch: 1024,
        request_timeout_ms: 0,
        search_threads: 0,
        train_sample_cap: 10_000,
        train_max_iters: 20,
        train_seed: 42,
    }
}

fn ivf(top_k: usize) -> SearchOptions {
    SearchOptions {
        top_k,
        use_index: true,
        ..SearchOptions::default()
    }
}

fn flat(top_k: usize) -> SearchOptions {
    SearchOptions {
        top_k,
        use_index: false,
        ..SearchOptions::default()
    }
}

#[test]
fn single_cell_index_degenerates_to_flat() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine
        .add(
            &[
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![2.0, 0.0],
                vec![3.0, 0.0],
            ],
            &[1, 2, 3, 4],
        )
        .unwrap();
    let outcome = engine.train(1, None).unwrap();
    assert_eq!(outcome.k, 1);
    assert_eq!(outcome.n_trained, 4);

    let via_ivf = engine.search(&[1.2, 0.0], ivf(4), None).unwrap();
    let via_flat = engine.search(&[1.2, 0.0], flat(4), None).unwrap();
    assert_eq!(via_ivf.results, via_flat.results);
}

#[test]
fn untrained_index_request_falls_back_to_flat() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine.add(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[1, 2]).unwrap();

    let outcome = engine.search(&[1.0, 0.0], ivf(2), None).unwrap();
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].id, 1);
}

#[test]
fn rows_added_after_training_stay_invisible_until_retrain() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine
        .add(&[vec![0.0, 0.0], vec![10.0, 10.0]], &[1, 2])
        .unwrap();
    engine.train(2, None).unwrap();

    engine.add(&[vec![0.1, 0.1]], &[3]).unwrap();

    let outcome = engine.search(&[0.0, 0.0], ivf(3), None).unwrap();
    let ids: Vec<i64> = outcome.results.iter().map(|r| r.id).collect();
    assert!(!ids.contains(&3), "post-train row must be invisible to IVF");

    let outcome = engine.search(&[0.0, 0.0], flat(3), None).unwrap();
    let ids: Vec<i64> = outcome.results.iter().map(|r| r.id).collect();
    assert!(ids.contains(&3), "flat scan still sees the new row");

    let retrained = engine.train(2, None).unwrap();
    assert_eq!(retrained.n_trained, 3);
    let outcome = engine.search(&[0.0, 0.0], ivf(3), None).unwrap();
    let ids: Vec<i64> = outcome.results.iter().map(|r| r.id).collect();
    assert!(ids.contains(&3));
}

#[test]
fn trained_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    let vectors: Vec<Vec<f32>> = (0..32)
        .map(|i| {
            if i % 2 == 0 {
                vec![4.0 + i as f32 * 0.01, 4.0]
            } else {
                vec![-4.0 - i as f32 * 0.01, -4.0]
            }
        })
        .collect();
    let ids: Vec<i64> = (0..32).collect();

    let expected = {
        let engine = SearchEngine::new(&test_config(&data_dir, 2)).unwrap();
        engine.add(&vectors, &ids).unwrap();
        engine.train(2, None).unwrap();
        engine.search(&[4.0, 4.0], ivf(5), None).unwrap().results
    };
    assert!(dir.path().join("ivf.bin").exists());

    let engine = SearchEngine::new(&test_config(&data_dir, 2)).unwrap();
    let stats = engine.stats();
    let index = stats.index.expect("index reloaded");
    assert_eq!(index.k, 2);
    assert_eq!(index.n_trained, 32);
    assert_eq!(index.total_indexed, 32);

    let reloaded = engine.search(&[4.0, 4.0], ivf(5), None).unwrap().results;
    assert_eq!(reloaded, expected);
}

#[test]
fn train_rejects_k_beyond_rows() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine.add(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[1, 2]).unwrap();
    let err = engine.train(5, None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    let err = engine.train(0, None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn expired_deadline_surfaces_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    let vectors: Vec<Vec<f32>> = (0..16).map(|i| vec![i as f32, 0.0]).collect();
    let ids: Vec<i64> = (0..16).collect();
    engine.add(&vectors, &ids).unwrap();

    let past = Instant::now() - Duration::from_millis(5);
    let err = engine.train(2, Some(past)).unwrap_err();
    assert!(matches!(err, EngineError::Timeout));

    engine.train(2, None).unwrap();
    let err = engine.search(&[1.0, 0.0], ivf(4), Some(past)).unwrap_err();
    assert!(matches!(err, EngineError::Timeout));
}

#[test]
fn reset_clears_store_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine
        .add(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]], &[1, 2, 3])
        .unwrap();
    engine.train(1, None).unwrap();

    engine.reset().unwrap();
    assert!(!dir.path().join("ivf.bin").exists());
    let stats = engine.stats();
    assert_eq!(stats.store.count, 0);
    assert!(stats.index.is_none());

    let outcome = engine.search(&[1.0, 0.0], ivf(2), None).unwrap();
    assert!(outcome.results.is_empty());

    // The same ids are insertable again after a reset.
    engine.add(&[vec![0.5, 0.5]], &[1]).unwrap();
    assert_eq!(engine.stats().store.count, 1);
}
