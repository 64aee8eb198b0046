//! Basic single-threaded tests for TripletLoader functionality.
//!
//! Tests cover:
//! - Chunk eligibility scenarios (mixed groups, all singletons)
//! - Batch shape and label pattern
//! - Cycles and the length estimate
//! - Seed determinism across loaders and epochs
//! - Plain, gzip and zip sources
//! - Error propagation (malformed records, missing source, bad config)

mod common;
use common::{
    collect_batches, config_for, entity_lines, lines_for, write_gzip, write_plain, write_zip,
    RecordingEncoder,
};
use triplet_loader::{HashingEncoder, LoaderError, TripletLoader};

use anyhow::Result;
use tempfile::TempDir;

// ================================================================================================
// 1. Chunk Scenarios
// ================================================================================================
#[test]
fn test_mixed_groups_yield_one_batch() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "six.tsv", &lines_for(&["A", "A", "A", "B", "B", "C"]))?;

    let config = config_for(&path).read_size(6).batch_size(2).build();
    let loader = TripletLoader::new(config, HashingEncoder::default())?;
    let batches = collect_batches(loader.iter()?)?;

    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.labels, vec![1, 0, 1, 0]);
    assert_eq!(batch.tensor_a.rows(), 4);
    assert_eq!(batch.tensor_b.rows(), 4);

    let stats = loader.stats();
    assert_eq!(stats.chunks_read, 1);
    assert_eq!(stats.records_read, 6);
    assert_eq!(stats.batches_built, 1);
    Ok(())
}

#[test]
fn test_all_singletons_yield_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "three.tsv", &lines_for(&["A", "B", "C"]))?;

    let config = config_for(&path).read_size(3).build();
    let loader = TripletLoader::new(config, HashingEncoder::default())?;

    assert_eq!(loader.iter()?.count(), 0);
    assert_eq!(loader.stats().chunks_skipped, 1);
    Ok(())
}

#[test]
fn test_batch_shape_and_labels() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "entities.tsv", &entity_lines(6, 4))?;

    let config = config_for(&path).read_size(8).batch_size(5).build();
    let loader = TripletLoader::new(config, HashingEncoder::default())?;

    let expected_labels: Vec<i64> = (0..10).map(|i| if i % 2 == 0 { 1 } else { 0 }).collect();
    let batches = collect_batches(loader.iter()?)?;
    assert_eq!(batches.len(), 3);
    for batch in &batches {
        assert_eq!(batch.len(), 10);
        assert_eq!(batch.labels, expected_labels);
        assert_eq!(batch.tensor_a.rows(), 10);
        assert!(batch.tensor_a.as_slice().iter().all(|&id| (0..1000).contains(&id)));
    }
    Ok(())
}

// ================================================================================================
// 2. Cycles and Length
// ================================================================================================
#[test]
fn test_cycles_repeat_the_source() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "cycles.tsv", &lines_for(&["A", "A", "B", "B", "C", "C"]))?;

    let config = config_for(&path).read_size(3).cycles(3).build();
    let loader = TripletLoader::new(config, HashingEncoder::default())?;

    assert_eq!(loader.iter()?.count(), 6);
    assert_eq!(loader.stats().chunks_read, 6);
    Ok(())
}

#[test]
fn test_estimated_len() -> Result<()> {
    let dir = TempDir::new()?;
    let mut lines = entity_lines(5, 2);
    lines.insert(3, String::new());
    lines.push("   ".to_string());
    let path = write_plain(dir.path(), "estimate.tsv", &lines)?;

    let config = config_for(&path).read_size(4).cycles(2).build();
    let loader = TripletLoader::new(config, HashingEncoder::default())?;

    // 10 non-blank lines -> 2 full chunks per cycle
    assert_eq!(loader.estimated_len()?, 4);
    Ok(())
}

// ================================================================================================
// 3. Determinism
// ================================================================================================
#[test]
fn test_same_seed_same_batches() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "seeded.tsv", &entity_lines(6, 4))?;

    let run = |seed: u64| -> Result<_> {
        let config = config_for(&path).read_size(8).batch_size(5).seed(seed).build();
        let loader = TripletLoader::new(config, HashingEncoder::default())?;
        collect_batches(loader.iter()?)
    };

    assert_eq!(run(7)?, run(7)?);
    assert_ne!(run(7)?, run(8)?);
    Ok(())
}

#[test]
fn test_epochs_draw_different_triplets() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "epochs.tsv", &entity_lines(6, 4))?;

    let config = config_for(&path).read_size(8).batch_size(5).build();
    let loader = TripletLoader::new(config, HashingEncoder::default())?;

    let first = collect_batches(loader.iter()?)?;
    let second = collect_batches(loader.iter()?)?;
    assert_eq!(loader.epoch(), 2);
    assert_eq!(first.len(), second.len());
    assert_ne!(first, second);
    Ok(())
}

#[test]
fn test_random_seed_is_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "unseeded.tsv", &entity_lines(4, 3))?;

    let mut config = config_for(&path).build();
    config.seed = None;
    let loader = TripletLoader::new(config.clone(), HashingEncoder::default())?;

    // Re-running with the reported seed reproduces the epoch
    let replay = TripletLoader::new(
        triplet_loader::LoaderConfig {
            seed: Some(loader.seed()),
            ..config
        },
        HashingEncoder::default(),
    )?;
    assert_eq!(collect_batches(loader.iter()?)?, collect_batches(replay.iter()?)?);
    Ok(())
}

// ================================================================================================
// 4. Source Formats
// ================================================================================================
#[test]
fn test_compressed_sources_match_plain() -> Result<()> {
    let dir = TempDir::new()?;
    let lines = entity_lines(5, 3);
    let plain = write_plain(dir.path(), "data.tsv", &lines)?;
    let gzip = write_gzip(dir.path(), "data.tsv.gz", &lines)?;
    let zip = write_zip(dir.path(), "data.zip", &lines)?;

    let load = |path: &std::path::Path| -> Result<_> {
        let loader = TripletLoader::new(config_for(path).build(), HashingEncoder::default())?;
        collect_batches(loader.iter()?)
    };

    let expected = load(&plain)?;
    assert!(!expected.is_empty());
    assert_eq!(load(&gzip)?, expected);
    assert_eq!(load(&zip)?, expected);
    Ok(())
}

#[test]
fn test_custom_placeholder() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "mask.tsv", &entity_lines(3, 4))?;

    let encoder = RecordingEncoder::default();
    let config = config_for(&path).mention_placeholder("[MASK]").build();
    let loader = TripletLoader::new(config, encoder.clone())?;
    collect_batches(loader.iter()?)?;

    let sentences = encoder.sentences.lock().unwrap();
    assert!(!sentences.is_empty());
    assert!(sentences
        .iter()
        .all(|s| s.starts_with("left ") && s.contains(" [MASK] right ")));
    Ok(())
}

// ================================================================================================
// 5. Errors
// ================================================================================================
#[test]
fn test_malformed_records_end_the_epoch() -> Result<()> {
    let dir = TempDir::new()?;
    let lines: Vec<String> = ["A", "A", "B", "B"]
        .iter()
        .map(|key| format!("{}\tonly left context", key))
        .collect();
    let path = write_plain(dir.path(), "malformed.tsv", &lines)?;

    let loader = TripletLoader::new(config_for(&path).build(), HashingEncoder::default())?;
    let mut iter = loader.iter()?;

    match iter.next() {
        Some(Err(LoaderError::MalformedRecord { expected, found, .. })) => {
            assert_eq!(expected, 4);
            assert_eq!(found, 2);
        }
        other => panic!("expected MalformedRecord, got {:?}", other.map(|r| r.is_ok())),
    }
    assert!(iter.next().is_none());
    Ok(())
}

#[test]
fn test_missing_source() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("absent.tsv");

    let loader = TripletLoader::new(config_for(&path).build(), HashingEncoder::default())?;
    assert!(matches!(
        loader.estimated_len(),
        Err(LoaderError::SourceAccess { .. })
    ));

    let results: Vec<_> = loader.iter()?.collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(LoaderError::SourceAccess { .. })));
    Ok(())
}

#[test]
fn test_invalid_config_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_plain(dir.path(), "any.tsv", &entity_lines(2, 2))?;

    let result = TripletLoader::new(config_for(&path).batch_size(0).build(), HashingEncoder::default());
    assert!(matches!(result, Err(LoaderError::InvalidConfig(_))));
    Ok(())
}
