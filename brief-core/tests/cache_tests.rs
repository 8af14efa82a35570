mod common;

use std::time::Duration;

use brief_core::{ContentCache, DisplayContent, Html2TextExtractor, TextMetadata};
use common::FakePages;

#[tokio::test]
async fn store_then_read_round_trips_and_overwrites() {
    let cache = ContentCache::in_memory();
    assert_eq!(cache.cached_text("http://e/1").await, None);

    cache
        .store_text("first", "http://e/1", TextMetadata::default())
        .await;
    assert_eq!(cache.cached_text("http://e/1").await.as_deref(), Some("first"));

    cache
        .store_text("second", "http://e/1", TextMetadata::default())
        .await;
    assert_eq!(cache.cached_text("http://e/1").await.as_deref(), Some("second"));
    assert_eq!(cache.text_len().await, 1);

    cache.clear().await;
    assert!(!cache.has_text("http://e/1").await);
}

#[tokio::test]
async fn entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ContentCache::load_from_dir(dir.path()).await;
    let metadata = TextMetadata {
        title: Some("Title".into()),
        source_id: Some("f1".into()),
    };
    cache.store_text("body", "http://e/1", metadata.clone()).await;

    let reopened = ContentCache::load_from_dir(dir.path()).await;
    let entry = reopened.text_entry("http://e/1").await.unwrap();
    assert_eq!(entry.text, "body");
    assert_eq!(entry.metadata, metadata);
}

#[tokio::test]
async fn display_load_refreshes_rich_cache_on_success() {
    let cache = ContentCache::in_memory();
    let pages = FakePages::default().with_page("http://e/1", "<p>v1</p>");
    let extractor = Html2TextExtractor::default();

    let first = cache
        .load_for_display("http://e/1", &pages, &extractor, Duration::from_secs(1))
        .await;
    assert!(matches!(first, Some(DisplayContent::Fresh { .. })));

    let pages = FakePages::default().with_page("http://e/1", "<p>v2</p>");
    cache
        .load_for_display("http://e/1", &pages, &extractor, Duration::from_secs(1))
        .await;
    let rich = cache.cached_rich("http://e/1").await.unwrap();
    assert_eq!(rich.html, "<p>v2</p>");
    assert_eq!(rich.base_url, "http://e/1");
    assert!(cache.cached_text("http://e/1").await.unwrap().contains("v2"));
}

#[tokio::test]
async fn display_load_falls_back_rich_then_text() {
    let cache = ContentCache::in_memory();
    let extractor = Html2TextExtractor::default();
    let offline = FakePages::default();

    cache
        .store_text("plain", "http://e/1", TextMetadata::default())
        .await;
    let fallback = cache
        .load_for_display("http://e/1", &offline, &extractor, Duration::from_secs(1))
        .await;
    assert_eq!(fallback, Some(DisplayContent::CachedText("plain".into())));

    let online = FakePages::default().with_page("http://e/1", "<p>styled</p>");
    cache
        .load_for_display("http://e/1", &online, &extractor, Duration::from_secs(1))
        .await;
    let fallback = cache
        .load_for_display("http://e/1", &offline, &extractor, Duration::from_secs(1))
        .await;
    match fallback {
        Some(DisplayContent::CachedRich(rich)) => assert_eq!(rich.html, "<p>styled</p>"),
        other => panic!("expected rich fallback, got {other:?}"),
    }

    let missing = cache
        .load_for_display("http://e/unknown", &offline, &extractor, Duration::from_secs(1))
        .await;
    assert_eq!(missing, None);
}

#[tokio::test(start_paused = true)]
async fn display_load_times_out_to_cache() {
    let cache = ContentCache::in_memory();
    cache
        .store_text("cached", "http://e/slow", TextMetadata::default())
        .await;
    let pages = FakePages::default()
        .with_page("http://e/slow", "<p>late</p>")
        .with_hanging("http://e/slow");

    let result = cache
        .load_for_display(
            "http://e/slow",
            &pages,
            &Html2TextExtractor::default(),
            Duration::from_millis(100),
        )
        .await;
    assert_eq!(result, Some(DisplayContent::CachedText("cached".into())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_writes_all_reach_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ContentCache::load_from_dir(dir.path()).await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..200 {
        let cache = cache.clone();
        tasks.spawn(async move {
            let link = format!("http://e/{i}");
            cache
                .store_text(format!("body {i}"), &link, TextMetadata::default())
                .await;
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
    assert_eq!(cache.text_len().await, 200);

    let reopened = ContentCache::load_from_dir(dir.path()).await;
    assert_eq!(reopened.text_len().await, 200);
}
