use std::path::Path;
use std::sync::Arc;

use brief_core::sources::build_client;
use brief_core::storage::JsonFile;
use brief_core::{
    shared_feed_list, spawn_scheduler, ContentCache, DigestEngine, Event, Feed, Html2TextExtractor,
    HttpFeedFetcher, HttpPageFetcher, KeyValueStore, LeadSentenceModel, PipelineConfig, ReadStateStore,
    RefreshOrchestrator, ScheduleConfig, Summarizer, SystemClock,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let dir = PipelineConfig::data_dir()?;
    let config = PipelineConfig::load(&dir);
    let feeds = shared_feed_list(load_feeds(&dir).await);
    let client = build_client(&config.http)?;

    let feed_fetcher = Arc::new(HttpFeedFetcher::new(client.clone(), &config.http));
    let page_fetcher = Arc::new(HttpPageFetcher::new(client, &config.http));
    let cache = ContentCache::load_from_dir(dir.join("cache")).await;
    let read_state =
        ReadStateStore::load_from(dir.join("read_state.json"), config.refresh.latest_snapshot_size).await;
    let summarizer = Summarizer::load_from(
        dir.join("summaries.json"),
        Arc::new(LeadSentenceModel),
        cache.clone(),
        config.summary.clone(),
    )
    .await;
    let store = KeyValueStore::load_from(dir.join("store.json")).await;

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let extractor = Arc::new(Html2TextExtractor::default());
    let orchestrator = RefreshOrchestrator::new(
        feeds.clone(),
        feed_fetcher.clone(),
        page_fetcher,
        extractor.clone(),
        cache,
        config.refresh.clone(),
    )
    .with_read_state(read_state.clone())
    .with_events(event_tx);

    let digest = Arc::new(
        DigestEngine::load(
            feeds,
            feed_fetcher,
            extractor,
            summarizer,
            store,
            Arc::new(SystemClock),
            config.digest.clone(),
        )
        .await,
    );

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                Event::FeedRefreshed { feed_id, articles } => {
                    info!(feed = %feed_id, items = articles.len(), "feed refreshed")
                }
                Event::Highlights(items) => info!(count = items.len(), "new highlights"),
            }
        }
    });

    let mut view = digest.subscribe();
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            if current.loading {
                continue;
            }
            let fresh = current.entries.iter().filter(|e| e.is_new).count();
            info!(entries = current.entries.len(), fresh, collapsed = current.collapsed, "digest view");
        }
    });

    let scheduler = spawn_scheduler(
        orchestrator,
        digest,
        ScheduleConfig {
            interval: config.refresh.interval(),
        },
    );
    info!(dir = %dir.display(), "readbrief running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Err(err) = scheduler.stop().await {
        warn!(error = %err, "scheduler did not stop cleanly");
    }
    read_state.flush().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn load_feeds(dir: &Path) -> Vec<Feed> {
    let feeds: Vec<Feed> = JsonFile::new(dir.join("feeds.json")).load().await;
    if feeds.is_empty() {
        warn!(path = %dir.join("feeds.json").display(), "no feeds configured");
    }
    feeds
}
