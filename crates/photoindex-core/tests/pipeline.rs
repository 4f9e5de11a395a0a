//! End-to-end scans through the public `PhotoindexCore` API.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use photoindex_core::models::{ScanOutcome, ScanResult};
use photoindex_core::{
    AppSettings, Capabilities, DataDirPathProvider, NoOpEventSink, PhotoindexCore, ShareTarget,
    TriggerOutcome,
};
use tempfile::TempDir;

fn write_image(path: &Path, width: u32, height: u32, color: [u8; 3]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
        .save(path)
        .unwrap();
}

fn open_core(tmp: &TempDir) -> PhotoindexCore {
    let provider = Arc::new(DataDirPathProvider::with_base_dir(tmp.path().join("data")));
    PhotoindexCore::new(
        provider,
        Arc::new(NoOpEventSink),
        AppSettings::default(),
        Capabilities::default(),
    )
    .unwrap()
}

async fn scan(core: &PhotoindexCore, root_id: i64) -> ScanResult {
    match core.trigger_scan(root_id).await.unwrap() {
        TriggerOutcome::Completed { result } => result,
        other => panic!("unexpected trigger outcome: {:?}", other),
    }
}

#[tokio::test]
async fn rescan_of_unchanged_tree_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let photos = tmp.path().join("photos");
    write_image(&photos.join("2021/spring/a.png"), 40, 30, [200, 10, 10]);
    write_image(&photos.join("2021/b.png"), 30, 40, [10, 200, 10]);

    let core = open_core(&tmp);
    let root = core.register_root("alice", &photos.to_string_lossy()).unwrap();

    let first = scan(&core, root.root_id).await;
    assert_eq!(first.outcome, ScanOutcome::Completed);
    assert_eq!(first.counts.albums_created, 3);
    assert_eq!(first.counts.media_created, 2);
    assert!(first.failures.is_empty());

    let before = core.stats().unwrap();
    let second = scan(&core, root.root_id).await;
    assert!(second.is_noop(), "{:?}", second.counts);
    assert_eq!(second.counts.media_unchanged, 2);

    let after = core.stats().unwrap();
    assert_eq!(before.album_count, after.album_count);
    assert_eq!(before.media_count, after.media_count);
    assert_eq!(before.derivative_count, after.derivative_count);
    core.shutdown().await;
}

#[tokio::test]
async fn identical_files_share_one_derivative_set() {
    let tmp = TempDir::new().unwrap();
    let photos = tmp.path().join("photos");
    write_image(&photos.join("one/copy.png"), 50, 50, [1, 2, 3]);
    std::fs::create_dir_all(photos.join("two")).unwrap();
    std::fs::copy(photos.join("one/copy.png"), photos.join("two/copy.png")).unwrap();

    let core = open_core(&tmp);
    let root = core.register_root("alice", &photos.to_string_lossy()).unwrap();
    let result = scan(&core, root.root_id).await;

    assert_eq!(result.counts.media_created, 2);
    let variants = core.settings().derivatives.variants.len();
    assert_eq!(result.counts.derivatives_generated, variants);
    assert_eq!(core.stats().unwrap().derivative_count as usize, variants);
    assert_eq!(core.cache_stats().unwrap().total_files as usize, variants);
    core.shutdown().await;
}

#[tokio::test]
async fn changed_content_keeps_media_identity() {
    let tmp = TempDir::new().unwrap();
    let photos = tmp.path().join("photos");
    let file = photos.join("trip/beach.png");
    write_image(&file, 20, 20, [0, 0, 255]);

    let core = open_core(&tmp);
    let root = core.register_root("alice", &photos.to_string_lossy()).unwrap();
    scan(&core, root.root_id).await;

    let top = core.root_album(root.root_id).unwrap().unwrap();
    let trip = core.child_albums(top.album_id).unwrap().remove(0);
    let before = core.album_media(trip.album_id).unwrap().remove(0);

    write_image(&file, 64, 48, [255, 255, 0]);
    let result = scan(&core, root.root_id).await;
    assert_eq!(result.counts.media_updated, 1);
    assert_eq!(result.counts.media_created, 0);

    let after = core.album_media(trip.album_id).unwrap().remove(0);
    assert_eq!(after.media_id, before.media_id);
    assert_ne!(after.fingerprint, before.fingerprint);
    assert_eq!(after.width, Some(64));

    // The superseded fingerprint has no referencing media and is evicted.
    let variants = core.settings().derivatives.variants.len();
    assert_eq!(core.stats().unwrap().derivative_count as usize, variants);
    core.shutdown().await;
}

#[tokio::test]
async fn removed_directory_cascades_and_revokes_shares() {
    let tmp = TempDir::new().unwrap();
    let photos = tmp.path().join("photos");
    write_image(&photos.join("keep/k.png"), 16, 16, [9, 9, 9]);
    write_image(&photos.join("gone/inner/x.png"), 16, 16, [90, 90, 90]);
    write_image(&photos.join("gone/y.png"), 17, 16, [180, 180, 180]);

    let core = open_core(&tmp);
    let root = core.register_root("alice", &photos.to_string_lossy()).unwrap();
    scan(&core, root.root_id).await;

    let top = core.root_album(root.root_id).unwrap().unwrap();
    let gone = core
        .child_albums(top.album_id)
        .unwrap()
        .into_iter()
        .find(|album| album.title == "gone")
        .unwrap();
    let token = core
        .share("alice", ShareTarget::Album(gone.album_id), None, None)
        .unwrap();
    assert!(core.resolve_share(&token.token).unwrap().is_some());

    std::fs::remove_dir_all(photos.join("gone")).unwrap();
    let result = scan(&core, root.root_id).await;

    assert_eq!(result.counts.albums_deleted, 2);
    assert_eq!(result.counts.media_deleted, 2);
    assert!(core.resolve_share(&token.token).unwrap().is_none());

    let stats = core.stats().unwrap();
    assert_eq!(stats.album_count, 2);
    assert_eq!(stats.media_count, 1);
    core.shutdown().await;
}

#[tokio::test]
async fn corrupt_file_is_reported_without_failing_the_scan() {
    let tmp = TempDir::new().unwrap();
    let photos = tmp.path().join("photos");
    write_image(&photos.join("ok.png"), 12, 12, [5, 6, 7]);
    std::fs::write(photos.join("broken.jpg"), b"not a jpeg at all").unwrap();

    let core = open_core(&tmp);
    let root = core.register_root("alice", &photos.to_string_lossy()).unwrap();
    let result = scan(&core, root.root_id).await;

    assert_eq!(result.outcome, ScanOutcome::Completed);
    assert_eq!(result.counts.media_created, 1);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].path.ends_with("broken.jpg"));
    assert_eq!(core.scan_history(root.root_id, 10).len(), 1);
    core.shutdown().await;
}
