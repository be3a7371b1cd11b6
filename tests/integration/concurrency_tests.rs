use super::common::{cache_in, media_file, ScriptedSource};
use media_columns::media::{MediaKind, Metadata, VideoMetadata};
use media_columns::probe::Prober;
use media_columns::{MetadataCache, MetadataStore};
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[test]
fn test_concurrent_resolves_probe_once() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "shared.png", 256, 1_000);
    let source = ScriptedSource::slow(Metadata::image(1280, 720), Duration::from_millis(300));
    let cache = Arc::new(cache_in(dir.path(), MediaKind::Image, source.clone()));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            let file = file.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.resolve(&file, MediaKind::Image)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().dimensions, Some((1280, 720)));
    }
    assert_eq!(source.calls(), 1);
    assert_eq!(cache.store().unwrap().count().unwrap(), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, 16);
    assert_eq!(stats.stores, 1);
}

#[test]
fn test_resolve_many_probes_each_file_once() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::returning(Metadata::image(3, 4));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());

    let files: Vec<(PathBuf, MediaKind)> = (0..32)
        .map(|i| {
            (
                media_file(dir.path(), &format!("{i}.png"), 32, 1_000 + i),
                MediaKind::Image,
            )
        })
        .collect();

    let first = cache.resolve_many(&files);
    let second = cache.resolve_many(&files);

    assert_eq!(first.len(), 32);
    assert!(first.iter().all(|d| d.dimensions == Some((3, 4))));
    assert_eq!(first, second);
    assert_eq!(source.calls(), 32);
    assert_eq!(cache.stats().hits, 32);
}

#[test]
fn test_slow_probe_times_out_without_blocking_others() {
    let dir = tempdir().unwrap();
    let slow = media_file(dir.path(), "slow.mp4", 64, 1_000);
    let fast = media_file(dir.path(), "fast.png", 64, 1_000);

    let video = ScriptedSource::slow(
        Metadata::Video(VideoMetadata::default()),
        Duration::from_secs(3),
    );
    let image = ScriptedSource::returning(Metadata::image(9, 9));
    let prober = Prober::new(Duration::from_millis(100))
        .with_source(MediaKind::Video, video.clone())
        .with_source(MediaKind::Image, image);
    let cache = Arc::new(
        MetadataCache::new(prober)
            .with_store(MetadataStore::open(&dir.path().join("media.sqlite3")).unwrap()),
    );

    let started = Instant::now();
    let slow_handle = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.resolve(&slow, MediaKind::Video))
    };
    let fast_result = cache.resolve(&fast, MediaKind::Image);

    assert_eq!(fast_result.dimensions, Some((9, 9)));
    assert!(slow_handle.join().unwrap().is_unknown());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(cache.store().unwrap().count().unwrap(), 1);
    assert_eq!(cache.stats().probe_failures, 1);
}

#[test]
fn test_late_arrivals_reuse_the_stored_result() {
    const ROUNDS: usize = 20;
    const CALLERS: usize = 16;

    let dir = tempdir().unwrap();
    let source = ScriptedSource::slow(Metadata::image(640, 480), Duration::from_millis(2));
    let cache = Arc::new(cache_in(dir.path(), MediaKind::Image, source.clone()));

    for round in 0..ROUNDS {
        let file = media_file(
            dir.path(),
            &format!("late-{round}.png"),
            128,
            5_000 + round as i64,
        );
        let barrier = Arc::new(Barrier::new(CALLERS));

        // Staggered arrivals: some callers miss the store just before the
        // first read of the file completes.
        let handles: Vec<_> = (0..CALLERS as u64)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let file = file.clone();
                thread::spawn(move || {
                    barrier.wait();
                    thread::sleep(Duration::from_micros(i * 200));
                    cache.resolve(&file, MediaKind::Image)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().dimensions, Some((640, 480)));
        }
    }

    assert_eq!(source.calls(), ROUNDS);
    assert_eq!(cache.stats().stores, ROUNDS as u64);
    assert_eq!(cache.store().unwrap().count().unwrap(), ROUNDS as u64);
}
