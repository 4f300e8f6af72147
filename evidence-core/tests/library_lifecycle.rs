//! Lifecycle tests for a persistent evidence library.
//!
//! These tests open a library over a real data directory, close it, and open
//! it again to check what survives a restart and what does not.

use chrono::{TimeZone, Utc};
use evidence_core::{
    ArtifactKind, Config, EvidenceLibrary, FileBlobStore, ImageError, NewEvidence,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Create a PNG with a recognizable color.
fn create_png(color: [u8; 4]) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(240, 90, Rgba(color));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("PNG encoding failed");
    buffer.into_inner()
}

fn config_for(dir: &Path, capacity: usize) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        cache_capacity: capacity,
        stamp_worker: true,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_records_and_artifacts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let captured = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let source = create_png([200, 10, 10, 255]);

    let (record_id, old_url) = {
        let library = EvidenceLibrary::open(config_for(dir.path(), 50)).await.unwrap();
        let tc = library.add_test_case("", None).await.unwrap();
        let record = library
            .add_evidence(
                NewEvidence::new(source.clone(), "before.png", captured)
                    .in_test_case(&tc.id)
                    .with_comment("first screen"),
            )
            .await
            .unwrap();
        let url = record.display_urls().unwrap().stamped_url;
        library.close().await.unwrap();
        (record.id, url)
    };

    assert!(dir.path().join("projects.json").exists());

    let library = EvidenceLibrary::open(config_for(dir.path(), 50)).await.unwrap();
    let record = library.record(&record_id).unwrap();
    assert_eq!(record.comment, "first screen");
    assert_eq!(record.captured_at, captured);
    assert!(record.handles.is_none(), "handles are never persisted");
    assert_eq!(library.current_project().unwrap().test_cases[0].name, "No.1");

    // Handles from the previous session are gone; new ones are created on demand
    assert!(library.resolve_url(&old_url).is_none());
    let urls = library.request_display(&record_id).await.unwrap().unwrap();
    assert_ne!(urls.stamped_url, old_url);
    assert_eq!(
        library.artifact(&record_id, ArtifactKind::Base).await.unwrap(),
        Some(source)
    );
}

#[tokio::test]
async fn test_capacity_one_library() {
    let dir = tempfile::tempdir().unwrap();
    let library = EvidenceLibrary::open(config_for(dir.path(), 1)).await.unwrap();
    let captured = Utc::now();

    let first = library
        .add_evidence(NewEvidence::new(create_png([1, 1, 1, 255]), "1.png", captured))
        .await
        .unwrap();
    let first_handles = first.handles.clone().unwrap();

    let second = library
        .add_evidence(NewEvidence::new(create_png([2, 2, 2, 255]), "2.png", captured))
        .await
        .unwrap();

    assert!(!first_handles.is_valid());
    assert!(library.record(&first.id).unwrap().handles.is_none());
    assert!(second.display_urls().is_some());

    // Displaying the first one again evicts the second
    library.request_display(&first.id).await.unwrap().unwrap();
    assert!(library.record(&second.id).unwrap().handles.is_none());
    assert_eq!(library.cache_stats().entries, 1);
}

#[tokio::test]
async fn test_concurrent_display_requests_share_handles() {
    let dir = tempfile::tempdir().unwrap();
    let library = Arc::new(EvidenceLibrary::open(config_for(dir.path(), 10)).await.unwrap());
    let record = library
        .add_evidence(NewEvidence::new(create_png([5, 5, 5, 255]), "a.png", Utc::now()))
        .await
        .unwrap();
    library.evict_all().unwrap();

    let requests: Vec<_> = (0..4)
        .map(|_| {
            let library = Arc::clone(&library);
            let id = record.id.clone();
            tokio::spawn(async move { library.request_display(&id).await })
        })
        .collect();

    let mut urls = Vec::new();
    for request in requests {
        urls.push(request.await.unwrap().unwrap().unwrap());
    }
    assert!(urls.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(library.cache_stats().misses, 1);
}

#[tokio::test]
async fn test_clear_all_keeps_data_dir_usable() {
    let dir = tempfile::tempdir().unwrap();
    let library = EvidenceLibrary::open(config_for(dir.path(), 10)).await.unwrap();
    let record = library
        .add_evidence(NewEvidence::new(create_png([7, 7, 7, 255]), "a.png", Utc::now()))
        .await
        .unwrap();

    library.clear_all().await.unwrap();
    assert!(matches!(
        library.record(&record.id),
        Err(ImageError::EvidenceNotFound(_))
    ));
    library.close().await.unwrap();

    let reopened = EvidenceLibrary::open(config_for(dir.path(), 10)).await.unwrap();
    assert!(reopened.records().is_empty());
    assert_eq!(reopened.projects().len(), 1);
}

#[tokio::test]
async fn test_unusable_data_dir_is_store_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();

    let result = EvidenceLibrary::open(config_for(&file, 10)).await;
    assert!(matches!(result, Err(ImageError::StoreUnavailable(_))));
    assert!(FileBlobStore::open(&file).await.is_err());
}
