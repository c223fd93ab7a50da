use nanoindex::agent::Algorithm;
use nanoindex::config::Config;
use nanoindex::error::EngineError;
use nanoindex::search::{Metric, SearchEngine, SearchOptions};

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
        max_vector_batch: 256,
        request_timeout_ms: 0,
        search_threads: 0,
        train_sample_cap: 10_000,
        train_max_iters: 20,
        train_seed: 42,
    }
}

fn flat(top_k: usize) -> SearchOptions {
    SearchOptions {
        top_k,
        metric: Metric::L2,
        use_index: false,
        use_agent: false,
    }
}

#[test]
fn exact_match_l2() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 3)).unwrap();
    engine
        .add(
            &[
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ],
            &[10, 20, 30],
        )
        .unwrap();

    let outcome = engine.search(&[1.0, 0.0, 0.0], flat(1), None).unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, 10);
    assert_eq!(outcome.results[0].distance, 0.0);
    assert!(outcome.strategy.is_none());
}

#[test]
fn equal_distances_break_ties_by_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine
        .add(&[vec![1.0, 1.0], vec![1.0, 1.0]], &[7, 3])
        .unwrap();

    let outcome = engine.search(&[1.0, 1.0], flat(2), None).unwrap();
    let ids: Vec<i64> = outcome.results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![7, 3], "row 0 wins the tie over row 1");
}

#[test]
fn top_k_beyond_store_returns_everything_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine
        .add(
            &[vec![3.0, 0.0], vec![1.0, 0.0], vec![2.0, 0.0]],
            &[1, 2, 3],
        )
        .unwrap();

    let outcome = engine.search(&[0.0, 0.0], flat(50), None).unwrap();
    let ids: Vec<i64> = outcome.results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
    let dists: Vec<f32> = outcome.results.iter().map(|r| r.distance).collect();
    assert!(dists.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn empty_store_returns_empty_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 4)).unwrap();
    let outcome = engine
        .search(&[0.5, 0.5, 0.5, 0.5], SearchOptions::default(), None)
        .unwrap();
    assert!(outcome.results.is_empty());
    assert!(outcome.strategy.is_none());
}

#[test]
fn cosine_metric_orders_by_angle() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    // Same direction at a different magnitude beats a closer point off-axis.
    engine
        .add(&[vec![10.0, 0.0], vec![1.0, 1.0]], &[1, 2])
        .unwrap();

    let outcome = engine
        .search(
            &[1.0, 0.0],
            SearchOptions {
                top_k: 2,
                metric: Metric::Cosine,
                use_index: false,
                use_agent: false,
            },
            None,
        )
        .unwrap();
    assert_eq!(outcome.results[0].id, 1);
    assert!(outcome.results[0].distance.abs() < 1e-6);
}

#[test]
fn dimension_mismatch_and_zero_top_k_are_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 3)).unwrap();
    engine.add(&[vec![1.0, 2.0, 3.0]], &[1]).unwrap();

    let err = engine.search(&[1.0, 2.0], flat(1), None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = engine.search(&[1.0, 2.0, 3.0], flat(0), None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn latency_is_measured() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SearchEngine::new(&test_config(&dir.path().to_string_lossy(), 2)).unwrap();
    engine.add(&[vec![1.0, 0.0]], &[1]).unwrap();
    let outcome = engine.search(&[1.0, 0.0], flat(1), None).unwrap();
    assert!(outcome.latency_ms >= 0.0);
    assert!(outcome.latency_ms < 10_000.0);
}
