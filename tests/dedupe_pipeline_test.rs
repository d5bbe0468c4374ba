use corpus_dedupe::engine::dedupe::{run_dedupe, DedupeConfig, DedupeError};
use corpus_dedupe::engine::minhash::SignatureBuilder;
use corpus_dedupe::persistence::{DuplicateRecord, DuplicatesStore, MinhashRecord, MinhashStore};
use std::path::Path;

// * Test Suite for the end-to-end dedupe pass

fn commit_corpus(working_dir: &Path, texts: &[String]) {
    let builder = SignatureBuilder::new();
    let records: Vec<MinhashRecord> = texts
        .iter()
        .enumerate()
        .map(|(offset, text)| MinhashRecord {
            offset: offset as u64,
            signature: builder.build(text),
        })
        .collect();
    let store = MinhashStore::open(working_dir).unwrap();
    store.commit_batch(&records).unwrap();
}

fn collect_duplicates(duplicates_dir: &Path) -> Vec<DuplicateRecord> {
    DuplicatesStore::open(duplicates_dir)
        .unwrap()
        .iter_records()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

// * Deterministic pseudo-random stream for fixture generation
fn splitmix(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn random_document(state: &mut u64, words: usize) -> String {
    (0..words)
        .map(|_| format!("w{}", splitmix(state) % 5_000))
        .collect::<Vec<String>>()
        .join(" ")
}

#[test]
fn test_trivial_duplicate() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let text = "the quick brown fox jumps over the lazy dog".to_string();
    commit_corpus(minhashes_dir.path(), &[text.clone(), text]);

    let summary = run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();
    assert_eq!(summary.total_duplicates, 1);

    let records = collect_duplicates(duplicates_dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].offset, 1);
    assert!(records[0].matches.contains(&0));

    let statistics = DuplicatesStore::open(duplicates_dir.path())
        .unwrap()
        .statistics()
        .unwrap()
        .unwrap();
    assert_eq!(statistics.total_duplicates, 1);
}

#[test]
fn test_no_duplicates_in_random_corpus() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let mut state = 7u64;
    let texts: Vec<String> = (0..1_000).map(|_| random_document(&mut state, 200)).collect();
    commit_corpus(minhashes_dir.path(), &texts);

    let summary = run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();

    assert_eq!(summary.total_duplicates, 0);
    assert_eq!(summary.documents_scanned, 1_000);
    assert!(DuplicatesStore::open(duplicates_dir.path())
        .unwrap()
        .is_complete());
}

#[test]
fn test_near_duplicate_is_flagged() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    // * 100 words, two changed at the extremes: Jaccard stays high
    let mut state = 99u64;
    let original: Vec<String> = (0..100)
        .map(|_| format!("w{}", splitmix(&mut state) % 5_000))
        .collect();
    let mut edited = original.clone();
    edited[0] = "changed".to_string();
    edited[99] = "also".to_string();

    commit_corpus(
        minhashes_dir.path(),
        &[original.join(" "), edited.join(" ")],
    );

    let summary = run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();
    assert_eq!(summary.total_duplicates, 1);

    let records = collect_duplicates(duplicates_dir.path());
    assert_eq!(records[0].offset, 1);
    assert_eq!(records[0].matches, vec![0]);
}

#[test]
fn test_transitive_cluster_keeps_earliest_only() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let mut state = 123u64;
    let base: Vec<String> = (0..100)
        .map(|_| format!("w{}", splitmix(&mut state) % 5_000))
        .collect();
    let mut b = base.clone();
    b[0] = "edited".to_string();
    let mut c = base.clone();
    c[99] = "altered".to_string();

    commit_corpus(
        minhashes_dir.path(),
        &[base.join(" "), b.join(" "), c.join(" ")],
    );

    let summary = run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();
    assert_eq!(summary.total_duplicates, 2);

    let records = collect_duplicates(duplicates_dir.path());
    let flagged: Vec<u64> = records.iter().map(|record| record.offset).collect();
    assert_eq!(flagged, vec![1, 2]);

    for record in &records {
        // * The earliest member always survives as a witness and every
        // * witness is earlier than the record it vouches for
        assert!(record.matches.contains(&0));
        assert!(record.matches.iter().all(|&m| m < record.offset));
    }

    // * A flagged offset never reappears as a later witness
    assert!(!records[1].matches.contains(&records[0].offset));
}

#[test]
fn test_empty_documents_form_their_own_cluster() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let mut state = 5u64;
    commit_corpus(
        minhashes_dir.path(),
        &[
            String::new(),
            random_document(&mut state, 50),
            "tiny".to_string(),
        ],
    );

    let summary = run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();

    // * The empty document at 0 and the sub-5-token document at 2 share the
    // * sentinel signature; only the later one is flagged
    assert_eq!(summary.total_duplicates, 1);
    let records = collect_duplicates(duplicates_dir.path());
    assert_eq!(records[0].offset, 2);
    assert_eq!(records[0].matches, vec![0]);
}

#[test]
fn test_rerun_with_done_sentinel_is_noop() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let text = "the quick brown fox jumps over the lazy dog".to_string();
    commit_corpus(minhashes_dir.path(), &[text.clone(), text]);

    run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();
    let statistics_before =
        std::fs::read(duplicates_dir.path().join("duplicate_statistics.json")).unwrap();

    let summary = run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();
    assert!(summary.skipped);

    let statistics_after =
        std::fs::read(duplicates_dir.path().join("duplicate_statistics.json")).unwrap();
    assert_eq!(statistics_before, statistics_after);
}

#[test]
fn test_determinism_across_runs() {
    let mut state = 2024u64;
    let mut texts: Vec<String> = (0..50).map(|_| random_document(&mut state, 60)).collect();
    // * Seed some duplicates
    texts[10] = texts[3].clone();
    texts[20] = texts[3].clone();
    texts[45] = texts[7].clone();

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let minhashes_dir = tempfile::tempdir().unwrap();
        let duplicates_dir = tempfile::tempdir().unwrap();
        commit_corpus(minhashes_dir.path(), &texts);
        run_dedupe(
            minhashes_dir.path(),
            duplicates_dir.path(),
            DedupeConfig::default(),
        )
        .unwrap();

        let statistics =
            std::fs::read(duplicates_dir.path().join("duplicate_statistics.json")).unwrap();
        outputs.push((statistics, collect_duplicates(duplicates_dir.path())));
    }

    assert_eq!(outputs[0].0, outputs[1].0, "statistics must be byte-identical");
    assert_eq!(outputs[0].1, outputs[1].1, "duplicate records must be identical");
}

#[test]
fn test_duplicates_batch_rollover() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let text = "the quick brown fox jumps over the lazy dog".to_string();
    commit_corpus(minhashes_dir.path(), &vec![text; 5]);

    let config = DedupeConfig {
        save_frequency: 2,
        ..DedupeConfig::default()
    };
    let summary = run_dedupe(minhashes_dir.path(), duplicates_dir.path(), config).unwrap();
    assert_eq!(summary.total_duplicates, 4);

    let store = DuplicatesStore::open(duplicates_dir.path()).unwrap();
    // * Four duplicates at frequency two: two full batches, no tail
    assert_eq!(store.batch_files().unwrap().len(), 2);
    assert_eq!(store.smol_files().unwrap().len(), 2);

    let offsets: Vec<u64> = store
        .iter_offsets()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(offsets, vec![1, 2, 3, 4]);
}

#[test]
fn test_lsh_sidecar_reused_on_restart() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let text = "the quick brown fox jumps over the lazy dog".to_string();
    commit_corpus(minhashes_dir.path(), &[text.clone(), text]);

    // * First run dumps the sidecar; wiping the outputs but keeping the
    // * sidecar simulates a dedupe pass dying after the build
    run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();
    let first = collect_duplicates(duplicates_dir.path());

    for name in ["duplicates_0000.bin", "duplicates_smol_0000.bin", "duplicate_statistics.json", "dedupe.done"] {
        std::fs::remove_file(duplicates_dir.path().join(name)).unwrap();
    }
    assert!(duplicates_dir.path().join("lsh.bin").exists());

    run_dedupe(
        minhashes_dir.path(),
        duplicates_dir.path(),
        DedupeConfig::default(),
    )
    .unwrap();
    assert_eq!(collect_duplicates(duplicates_dir.path()), first);
}

#[test]
fn test_invalid_threshold_is_fatal() {
    let minhashes_dir = tempfile::tempdir().unwrap();
    let duplicates_dir = tempfile::tempdir().unwrap();

    let config = DedupeConfig {
        lsh_threshold: 1.5,
        ..DedupeConfig::default()
    };
    let result = run_dedupe(minhashes_dir.path(), duplicates_dir.path(), config);
    assert!(matches!(result, Err(DedupeError::InvalidThreshold(_))));
}
