//! Gated fan-out over every feed, with opportunistic article text prefetch.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ContentCache, TextMetadata};
use crate::config::RefreshConfig;
use crate::deadline::{with_deadline, with_timeout};
use crate::error::{FetchError, RefreshError};
use crate::feed::{list_feeds, Article, Feed, SharedFeedList};
use crate::gate::ConcurrencyGate;
use crate::read_state::ReadStateStore;
use crate::sources::{FeedFetcher, PageFetcher, TextExtractor};

/// Messages pushed to downstream consumers. Sent with `try_send`: a full or
/// closed channel drops the event instead of stalling the run.
#[derive(Debug, Clone)]
pub enum Event {
    FeedRefreshed { feed_id: String, articles: Vec<Article> },
    /// Freshly seen items collected across all feeds at the end of a run.
    Highlights(Vec<Article>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub cached: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Completed,
    Cached,
    Skipped,
}

#[derive(Debug, Default)]
struct ProgressState {
    run: u64,
    counts: ProgressSnapshot,
}

/// Counters for the current run. Increments carry the run id they were issued
/// for, so tasks of an abandoned run cannot touch a later run's numbers.
#[derive(Debug, Default)]
pub struct RefreshProgress {
    state: Mutex<ProgressState>,
}

impl RefreshProgress {
    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn begin(&self, total: usize) -> u64 {
        let mut state = self.lock();
        state.run += 1;
        state.counts = ProgressSnapshot {
            total,
            ..ProgressSnapshot::default()
        };
        state.run
    }

    fn record(&self, run: u64, counter: Counter) {
        let mut state = self.lock();
        if state.run != run {
            return;
        }
        match counter {
            Counter::Completed => state.counts.completed += 1,
            Counter::Cached => state.counts.cached += 1,
            Counter::Skipped => state.counts.skipped += 1,
        }
    }

    fn reset(&self) {
        let mut state = self.lock();
        state.run += 1;
        state.counts = ProgressSnapshot::default();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().counts
    }
}

/// Counts a feed as completed however its task ends.
struct CompletionGuard {
    progress: Arc<RefreshProgress>,
    run: u64,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.progress.record(self.run, Counter::Completed);
    }
}

/// Keeps a link claimed while its page is being fetched.
struct InFlight {
    links: Arc<Mutex<HashSet<String>>>,
    link: String,
}

impl InFlight {
    fn claim(links: &Arc<Mutex<HashSet<String>>>, link: &str) -> Option<Self> {
        let mut set = links.lock().unwrap_or_else(|p| p.into_inner());
        set.insert(link.to_string()).then(|| Self {
            links: Arc::clone(links),
            link: link.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.links.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.link);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub progress: ProgressSnapshot,
    pub failed_feeds: Vec<String>,
    pub highlights: Vec<Article>,
}

enum FeedOutcome {
    Refreshed { highlights: Vec<Article> },
    Failed { feed_id: String },
    Cancelled,
}

#[derive(Clone)]
pub struct RefreshOrchestrator {
    feeds: SharedFeedList,
    feed_fetcher: Arc<dyn FeedFetcher>,
    page_fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn TextExtractor>,
    cache: ContentCache,
    read_state: Option<ReadStateStore>,
    events: Option<mpsc::Sender<Event>>,
    feed_gate: ConcurrencyGate,
    article_gate: ConcurrencyGate,
    progress: Arc<RefreshProgress>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    config: RefreshConfig,
}

impl fmt::Debug for RefreshOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshOrchestrator")
            .field("feed_gate", &self.feed_gate)
            .field("article_gate", &self.article_gate)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RefreshOrchestrator {
    pub fn new(
        feeds: SharedFeedList,
        feed_fetcher: Arc<dyn FeedFetcher>,
        page_fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn TextExtractor>,
        cache: ContentCache,
        config: RefreshConfig,
    ) -> Self {
        Self {
            feeds,
            feed_fetcher,
            page_fetcher,
            extractor,
            cache,
            read_state: None,
            events: None,
            feed_gate: ConcurrencyGate::new("feeds", config.feed_concurrency),
            article_gate: ConcurrencyGate::new("articles", config.article_concurrency),
            progress: Arc::default(),
            in_flight: Arc::default(),
            config,
        }
    }

    /// Keeps the latest-links snapshot of each refreshed feed in `store`.
    pub fn with_read_state(mut self, store: ReadStateStore) -> Self {
        self.read_state = Some(store);
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn feed_gate(&self) -> &ConcurrencyGate {
        &self.feed_gate
    }

    pub fn article_gate(&self) -> &ConcurrencyGate {
        &self.article_gate
    }

    /// Refreshes every feed under the whole-run deadline.
    ///
    /// When the deadline fires both gates are reset and the counters zeroed
    /// before [`RefreshError::Timeout`] is returned.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RefreshReport, RefreshError> {
        let token = cancel.child_token();
        let deadline = self.config.run_timeout();
        match with_timeout(deadline, self.run_inner(&token)).await {
            Ok(outcome) => outcome,
            Err(elapsed) => {
                token.cancel();
                self.feed_gate.reset();
                self.article_gate.reset();
                self.progress.reset();
                warn!(timeout = ?elapsed.0, "refresh run timed out, gates reset");
                Err(RefreshError::from(elapsed))
            }
        }
    }

    async fn run_inner(&self, token: &CancellationToken) -> Result<RefreshReport, RefreshError> {
        let feeds = list_feeds(&self.feeds).await;
        let run = self.progress.begin(feeds.len());
        info!(feeds = feeds.len(), "refresh started");

        let mut tasks = JoinSet::new();
        for feed in feeds {
            let this = self.clone();
            let token = token.clone();
            tasks.spawn(async move { this.refresh_feed(feed, token, run).await });
        }

        let mut report = RefreshReport::default();
        loop {
            let joined = tokio::select! {
                _ = token.cancelled() => return Err(RefreshError::Cancelled),
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok(FeedOutcome::Refreshed { highlights })) => report.highlights.extend(highlights),
                Some(Ok(FeedOutcome::Failed { feed_id })) => report.failed_feeds.push(feed_id),
                Some(Ok(FeedOutcome::Cancelled)) => {}
                Some(Err(err)) => warn!(error = %err, "feed task failed"),
            }
        }

        if !report.highlights.is_empty() {
            self.emit(Event::Highlights(report.highlights.clone()));
        }
        report.progress = self.progress.snapshot();
        info!(
            completed = report.progress.completed,
            cached = report.progress.cached,
            skipped = report.progress.skipped,
            failed = report.failed_feeds.len(),
            "refresh finished"
        );
        Ok(report)
    }

    async fn refresh_feed(&self, feed: Feed, token: CancellationToken, run: u64) -> FeedOutcome {
        let _completed = CompletionGuard {
            progress: Arc::clone(&self.progress),
            run,
        };
        if token.is_cancelled() {
            return FeedOutcome::Cancelled;
        }

        let fetched = match self.feed_gate.with_permit(self.feed_fetcher.load_items(&feed)).await {
            Ok(fetched) => fetched,
            Err(_) => return FeedOutcome::Cancelled,
        };
        let items = match fetched {
            Ok(items) => items,
            Err(err) => {
                warn!(feed = %feed.url, error = %err, "failed to fetch feed");
                return FeedOutcome::Failed { feed_id: feed.id };
            }
        };
        if token.is_cancelled() {
            return FeedOutcome::Cancelled;
        }

        let highlights = self.collect_highlights(&feed, &items);
        self.emit(Event::FeedRefreshed {
            feed_id: feed.id.clone(),
            articles: items.clone(),
        });

        let prefetch: Vec<Article> = items.into_iter().take(self.config.prefetch_per_feed).collect();
        self.prefetch_articles(prefetch, &token, run).await;
        FeedOutcome::Refreshed { highlights }
    }

    /// Items not yet seen, read before the snapshot update marks the feed's latest set.
    fn collect_highlights(&self, feed: &Feed, items: &[Article]) -> Vec<Article> {
        let limit = self.config.highlights_per_feed;
        let Some(store) = &self.read_state else {
            return items.iter().take(limit).cloned().collect();
        };
        let highlights = items
            .iter()
            .filter(|article| store.is_new(&article.link))
            .take(limit)
            .cloned()
            .collect();
        let links: Vec<&str> = items.iter().map(|article| article.link.as_str()).collect();
        store.update_latest_articles(&feed.id, &links);
        highlights
    }

    async fn prefetch_articles(&self, articles: Vec<Article>, token: &CancellationToken, run: u64) {
        let batch_size = self.article_gate.limit();
        let batches: Vec<Vec<Article>> = articles
            .chunks(batch_size)
            .map(<[Article]>::to_vec)
            .collect();
        let count = batches.len();

        for (idx, batch) in batches.into_iter().enumerate() {
            if token.is_cancelled() {
                return;
            }
            let mut tasks = JoinSet::new();
            for article in batch {
                let this = self.clone();
                let token = token.clone();
                tasks.spawn(async move { this.prefetch_article(article, token, run).await });
            }
            while tasks.join_next().await.is_some() {}

            if idx + 1 < count {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(self.config.inter_batch_delay()) => {}
                }
            }
        }
    }

    async fn prefetch_article(&self, article: Article, token: CancellationToken, run: u64) {
        let Ok(_permit) = self.article_gate.acquire().await else {
            return;
        };
        if token.is_cancelled() {
            return;
        }
        if self.cache.has_text(&article.link).await {
            self.progress.record(run, Counter::Skipped);
            return;
        }
        let Some(_claim) = InFlight::claim(&self.in_flight, &article.link) else {
            self.progress.record(run, Counter::Skipped);
            return;
        };

        let fetched: Result<String, FetchError> =
            with_deadline(self.config.item_timeout(), self.page_fetcher.fetch_html(&article.link)).await;
        let html = match fetched {
            Ok(html) => html,
            Err(err) => {
                debug!(link = %article.link, error = %err, "article prefetch failed");
                return;
            }
        };
        let text = self.extractor.extract_readable_text(&html);
        if text.is_empty() {
            debug!(link = %article.link, "no readable text extracted");
            return;
        }
        if token.is_cancelled() {
            return;
        }
        let metadata = TextMetadata {
            title: Some(article.title.clone()),
            source_id: Some(article.source_id.clone()),
        };
        self.cache.store_text(text, &article.link, metadata).await;
        self.progress.record(run, Counter::Cached);
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            if let Err(err) = tx.try_send(event) {
                debug!(error = %err, "event dropped");
            }
        }
    }
}
