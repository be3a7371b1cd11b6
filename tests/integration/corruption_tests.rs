use super::common::{cache_in, media_file, ScriptedSource};
use media_columns::cache::cache_key;
use media_columns::media::{MediaKind, Metadata};
use media_columns::{Config, MetadataCache, MetadataStore};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::new(width, height).save(&path).unwrap();
    path
}

fn config_with_database(path: PathBuf) -> Config {
    Config {
        database_path: Some(path),
        ..Config::default()
    }
}

#[test]
fn test_garbage_database_is_rebuilt_on_startup() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("media.sqlite3");
    fs::write(&db, b"definitely not sqlite".repeat(512)).unwrap();
    let image = png(dir.path(), "photo.png", 40, 30);

    let cache = MetadataCache::from_config(&config_with_database(db.clone()));

    assert!(!cache.is_degraded());
    assert_eq!(cache.resolve_path(&image).dimensions, Some((40, 30)));
    assert_eq!(cache.store().unwrap().count().unwrap(), 1);
    assert!(MetadataStore::open(&db).is_ok());
}

#[test]
fn test_unusable_location_degrades_to_probing() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, b"file").unwrap();
    let image = png(dir.path(), "photo.png", 12, 34);

    let cache = MetadataCache::from_config(&config_with_database(blocker.join("media.sqlite3")));

    assert!(cache.is_degraded());
    assert_eq!(cache.resolve_path(&image).dimensions, Some((12, 34)));
    assert_eq!(cache.resolve_path(&image).dimensions, Some((12, 34)));
    assert_eq!(cache.stats().hits, 0);
}

#[test]
fn test_database_deleted_while_running() {
    let dir = tempdir().unwrap();
    let first = media_file(dir.path(), "one.png", 10, 1_000);
    let second = media_file(dir.path(), "two.png", 20, 1_000);
    let source = ScriptedSource::returning(Metadata::image(2, 2));
    let cache = cache_in(dir.path(), MediaKind::Image, source.clone());

    cache.resolve(&first, MediaKind::Image);
    let db = cache.store().unwrap().path().to_path_buf();
    for suffix in ["", "-wal", "-shm"] {
        let file = PathBuf::from(format!("{}{suffix}", db.display()));
        let _ = fs::remove_file(file);
    }

    // The next request recreates the database instead of failing.
    assert_eq!(cache.resolve(&second, MediaKind::Image).dimensions, Some((2, 2)));
    assert!(db.exists());

    let store = cache.store().unwrap();
    assert!(store.get(&cache_key(&second).unwrap()).unwrap().is_some());
    assert!(store.get(&cache_key(&first).unwrap()).unwrap().is_none());

    // The lost entry is simply probed again.
    cache.resolve(&first, MediaKind::Image);
    assert_eq!(source.calls(), 3);
}

#[test]
fn test_undecodable_image_is_unknown_and_uncached() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("media.sqlite3");
    let broken = dir.path().join("broken.png");
    fs::write(&broken, b"\x89PNG\r\n\x1a\nthis is not really a png").unwrap();

    let cache = MetadataCache::from_config(&config_with_database(db));

    assert!(cache.resolve_path(&broken).is_unknown());
    assert_eq!(cache.store().unwrap().count().unwrap(), 0);
    assert_eq!(cache.stats().probe_failures, 1);
}
