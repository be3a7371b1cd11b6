use super::common::{cache_in, media_file, rewrite, ScriptedSource};
use filetime::{set_file_mtime, FileTime};
use media_columns::cache::{cache_key, CacheEntry, Fingerprint};
use media_columns::media::{MediaKind, Metadata, VideoMetadata};
use media_columns::MetadataStore;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_changed_file_is_probed_again() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "a.png", 2048, 1000);
    let source = ScriptedSource::returning(Metadata::image(800, 600));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());

    // First listing probes and stores.
    let first = cache.resolve(&file, MediaKind::Image);
    assert_eq!(first.dimensions, Some((800, 600)));
    assert_eq!(source.calls(), 1);

    let key = cache_key(&file).unwrap();
    let stored = cache.store().unwrap().get(&key).unwrap().unwrap();
    assert_eq!(stored.fingerprint, Fingerprint::new(1_000_000_000_000, 2048));

    // Second listing is served from the cache.
    assert_eq!(cache.resolve(&file, MediaKind::Image), first);
    assert_eq!(source.calls(), 1);

    // The file changes; the stale entry is overwritten.
    source.set_result(Some(Metadata::image(1024, 768)));
    rewrite(&file, 3000, 1050);
    let third = cache.resolve(&file, MediaKind::Image);
    assert_eq!(third.dimensions, Some((1024, 768)));
    assert_eq!(source.calls(), 2);

    let replaced = cache.store().unwrap().get(&key).unwrap().unwrap();
    assert_eq!(replaced.fingerprint, Fingerprint::new(1_050_000_000_000, 3000));
    assert_eq!(replaced.created_at, stored.created_at);
    assert_eq!(cache.store().unwrap().count().unwrap(), 1);
}

#[test]
fn test_mtime_change_alone_invalidates() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "b.png", 512, 2000);
    let source = ScriptedSource::returning(Metadata::image(10, 10));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());

    cache.resolve(&file, MediaKind::Image);
    set_file_mtime(&file, FileTime::from_unix_time(2001, 0)).unwrap();
    cache.resolve(&file, MediaKind::Image);
    cache.resolve(&file, MediaKind::Image);

    assert_eq!(source.calls(), 2);
}

#[test]
fn test_size_change_alone_invalidates() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "c.png", 512, 2000);
    let source = ScriptedSource::returning(Metadata::image(10, 10));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());

    cache.resolve(&file, MediaKind::Image);
    rewrite(&file, 513, 2000);
    cache.resolve(&file, MediaKind::Image);
    cache.resolve(&file, MediaKind::Image);

    assert_eq!(source.calls(), 2);
}

#[test]
fn test_failure_is_not_cached_and_keeps_old_entry_out() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "d.png", 100, 3000);
    let source = ScriptedSource::returning(Metadata::image(640, 480));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());
    cache.resolve(&file, MediaKind::Image);

    // The file is replaced by something the probe cannot read.
    source.set_result(None);
    rewrite(&file, 200, 3100);
    assert!(cache.resolve(&file, MediaKind::Image).is_unknown());
    assert!(cache.resolve(&file, MediaKind::Image).is_unknown());
    assert_eq!(source.calls(), 3);

    // The stale row is never served for the new fingerprint.
    let key = cache_key(&file).unwrap();
    let stored = cache.store().unwrap().get(&key).unwrap().unwrap();
    assert_ne!(stored.fingerprint, Fingerprint::of(&file).unwrap());

    // Once readable again, one probe repopulates.
    source.set_result(Some(Metadata::image(320, 240)));
    assert_eq!(
        cache.resolve(&file, MediaKind::Image).dimensions,
        Some((320, 240))
    );
    assert_eq!(cache.resolve(&file, MediaKind::Image).dimensions, Some((320, 240)));
    assert_eq!(source.calls(), 4);
}

#[test]
fn test_directory_and_missing_paths_are_unknown() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::returning(Metadata::image(1, 1));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());

    let sub = dir.path().join("folder.png");
    fs::create_dir(&sub).unwrap();

    assert!(cache.resolve(&sub, MediaKind::Image).is_unknown());
    assert!(cache
        .resolve(&dir.path().join("missing.png"), MediaKind::Image)
        .is_unknown());
    assert_eq!(source.calls(), 0);
}

#[test]
fn test_video_results_are_cached() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "clip.mp4", 4096, 5000);
    let video = Metadata::Video(VideoMetadata {
        width: Some(1920),
        height: Some(1080),
        duration_secs: Some(10.5),
        frame_rate: Some(30),
    });
    let source = ScriptedSource::returning(video);
    let cache = cache_in(dir.path(), MediaKind::Video, source.clone());

    let first = cache.resolve_path(&file);
    let second = cache.resolve_path(&file);

    assert_eq!(first.dimensions, Some((1920, 1080)));
    assert_eq!(first.duration_secs, Some(10.5));
    assert_eq!(first.frame_rate, Some(30));
    assert_eq!(first, second);
    assert_eq!(source.calls(), 1);
}

#[test]
fn test_entries_survive_reopen() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "e.png", 64, 6000);
    let source = ScriptedSource::returning(Metadata::image(5, 7));

    {
        let cache = cache_in(dir.path(), MediaKind::Image, source.clone());
        cache.resolve(&file, MediaKind::Image);
    }

    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());
    assert_eq!(cache.resolve(&file, MediaKind::Image).dimensions, Some((5, 7)));
    assert_eq!(source.calls(), 1);
}

#[test]
fn test_store_put_get_roundtrip() {
    let dir = tempdir().unwrap();
    let store = MetadataStore::open(&dir.path().join("media.sqlite3")).unwrap();
    let entry = CacheEntry::new(
        "/videos/holiday.mkv".into(),
        Fingerprint::new(1_700_000_000_123_456_789, 987_654_321),
        Metadata::Video(VideoMetadata {
            width: Some(3840),
            height: Some(2160),
            duration_secs: Some(5025.25),
            frame_rate: Some(60),
        }),
        chrono::Utc::now(),
    );

    store.put(&entry).unwrap();

    assert_eq!(store.get(&entry.path).unwrap(), Some(entry));
}

#[test]
fn test_hits_flush_last_access_on_drop() {
    let dir = tempdir().unwrap();
    let file = media_file(dir.path(), "f.png", 64, 7000);
    let source = ScriptedSource::returning(Metadata::image(2, 2));
    let key = cache_key(&file).unwrap();

    let before = {
        let cache = cache_in(dir.path(), MediaKind::Image, source.clone());
        cache.resolve(&file, MediaKind::Image);
        let before = cache.store().unwrap().get(&key).unwrap().unwrap().last_access;
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.resolve(&file, MediaKind::Image);
        before
    };

    let store = MetadataStore::open(&dir.path().join("media.sqlite3")).unwrap();
    let after = store.get(&key).unwrap().unwrap().last_access;
    assert!(after > before);
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_names_are_cached_separately() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempdir().unwrap();
    let first = dir.path().join(OsStr::from_bytes(b"\xff.png"));
    let second = dir.path().join(OsStr::from_bytes(b"\xfe.png"));
    rewrite(&first, 128, 3_000);
    rewrite(&second, 128, 3_000);

    let source = ScriptedSource::returning(Metadata::image(10, 10));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());

    assert_eq!(cache.resolve(&first, MediaKind::Image).dimensions, Some((10, 10)));
    source.set_result(Some(Metadata::image(20, 20)));
    assert_eq!(cache.resolve(&second, MediaKind::Image).dimensions, Some((20, 20)));
    assert_eq!(source.calls(), 2);

    // Each name keeps its own entry.
    assert_eq!(cache.resolve(&first, MediaKind::Image).dimensions, Some((10, 10)));
    assert_eq!(source.calls(), 2);

    let store = cache.store().unwrap();
    assert_eq!(store.count().unwrap(), 2);
    let stored = store.get(&cache_key(&second).unwrap()).unwrap().unwrap();
    assert_eq!(stored.path, cache_key(&second).unwrap());
}
