//! Cooldown-gated digest of the newest not-yet-surfaced item per feed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::DigestConfig;
use crate::deadline::with_deadline;
use crate::error::FetchError;
use crate::feed::{list_feeds, Article, SharedFeedList};
use crate::sources::{FeedFetcher, TextExtractor};
use crate::storage::KeyValueStore;
use crate::summarizer::{Summarizer, SummaryLength};

pub const ENTRIES_KEY: &str = "digest.entries";
pub const SEEN_LINKS_KEY: &str = "digest.seen_links";
pub const LAST_RECOMPUTE_KEY: &str = "digest.last_recompute";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestEntry {
    pub source_id: String,
    pub source_title: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    /// Surfaced by a pass and not yet acknowledged.
    pub is_new: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl DigestEntry {
    fn from_article(article: &Article, summary: String) -> Self {
        Self {
            source_id: article.source_id.clone(),
            source_title: article.source_title.clone(),
            title: article.title.clone(),
            summary,
            link: article.link.clone(),
            is_new: true,
            published_at: article.published_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigestView {
    pub entries: Vec<DigestEntry>,
    pub loading: bool,
    pub collapsed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestOutcome {
    /// Another pass was running; one follow-up pass has been queued.
    Deferred,
    /// Inside the cooldown: only the held entries were re-validated.
    Reconciled { expand: bool },
    NoNewItems,
    Updated { new_entries: usize, expand: bool },
}

#[derive(Debug)]
struct DigestState {
    entries: Vec<DigestEntry>,
    /// Oldest first.
    seen_links: Vec<String>,
    last_recompute: Option<DateTime<Utc>>,
    collapsed: bool,
    loading: bool,
    in_flight: bool,
    /// `Some(force)` when a pass was requested while one was running.
    rerun: Option<bool>,
}

impl DigestState {
    fn view(&self) -> DigestView {
        DigestView {
            entries: self.entries.clone(),
            loading: self.loading,
            collapsed: self.collapsed,
        }
    }
}

fn sort_newest_first<T>(items: &mut [T], published: impl Fn(&T) -> Option<DateTime<Utc>>) {
    items.sort_by(|a, b| published(b).cmp(&published(a)));
}

/// Re-validates held entries against the surfaced-links set. An entry whose link
/// was never recorded as surfaced counts as new again. Returns whether the
/// digest should auto-expand.
fn reconcile_state(state: &mut DigestState, auto_expand: bool) -> bool {
    let seen: HashSet<&str> = state.seen_links.iter().map(String::as_str).collect();
    let mut any_new = false;
    for entry in &mut state.entries {
        if !seen.contains(entry.link.as_str()) {
            entry.is_new = true;
        }
        any_new |= entry.is_new;
    }
    let expand = any_new && state.collapsed && auto_expand;
    if expand {
        state.collapsed = false;
    }
    expand
}

/// The most recent item of a feed; without dates the feed's own order wins.
fn newest_item(items: Vec<Article>) -> Option<Article> {
    items
        .into_iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.published_at.cmp(&b.published_at).then(ib.cmp(ia)))
        .map(|(_, article)| article)
}

/// Union of `old` and `new`, dropping the oldest retained links once over `cap`.
/// Links added by this pass are never evicted by it.
pub fn merge_seen_links(old: Vec<String>, new: &[String], cap: usize) -> Vec<String> {
    let fresh: HashSet<&str> = new.iter().map(String::as_str).collect();
    let mut merged: Vec<String> = old
        .into_iter()
        .filter(|link| !fresh.contains(link.as_str()))
        .collect();
    let mut added = HashSet::new();
    merged.extend(new.iter().filter(|link| added.insert(link.as_str())).cloned());
    if merged.len() > cap {
        let excess = merged.len() - cap;
        merged.drain(..excess);
    }
    merged
}

pub struct DigestEngine {
    feeds: SharedFeedList,
    fetcher: Arc<dyn FeedFetcher>,
    extractor: Arc<dyn TextExtractor>,
    summarizer: Summarizer,
    store: KeyValueStore,
    clock: Arc<dyn Clock>,
    config: DigestConfig,
    state: Mutex<DigestState>,
    view: watch::Sender<DigestView>,
}

/// Clears the in-flight marker if a pass is dropped before it finishes.
struct PassGuard<'a> {
    engine: &'a DigestEngine,
    armed: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.engine.lock();
            state.in_flight = false;
            state.rerun = None;
            state.loading = false;
            self.engine.publish(&state);
        }
    }
}

impl DigestEngine {
    /// Restores the persisted digest so it can be shown before any recompute.
    pub async fn load(
        feeds: SharedFeedList,
        fetcher: Arc<dyn FeedFetcher>,
        extractor: Arc<dyn TextExtractor>,
        summarizer: Summarizer,
        store: KeyValueStore,
        clock: Arc<dyn Clock>,
        config: DigestConfig,
    ) -> Self {
        let entries: Vec<DigestEntry> = store.get(ENTRIES_KEY).await.unwrap_or_default();
        let seen_links: Vec<String> = store.get(SEEN_LINKS_KEY).await.unwrap_or_default();
        let last_recompute: Option<DateTime<Utc>> = store.get(LAST_RECOMPUTE_KEY).await;
        let mut state = DigestState {
            entries,
            seen_links,
            last_recompute,
            collapsed: true,
            loading: false,
            in_flight: false,
            rerun: None,
        };
        reconcile_state(&mut state, config.auto_expand);
        let (view, _) = watch::channel(state.view());
        Self {
            feeds,
            fetcher,
            extractor,
            summarizer,
            store,
            clock,
            config,
            state: Mutex::new(state),
            view,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DigestState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, state: &DigestState) {
        self.view.send_replace(state.view());
    }

    pub fn subscribe(&self) -> watch::Receiver<DigestView> {
        self.view.subscribe()
    }

    pub fn entries(&self) -> Vec<DigestEntry> {
        self.lock().entries.clone()
    }

    pub fn seen_links(&self) -> Vec<String> {
        self.lock().seen_links.clone()
    }

    pub fn is_collapsed(&self) -> bool {
        self.lock().collapsed
    }

    pub fn set_collapsed(&self, collapsed: bool) {
        let mut state = self.lock();
        state.collapsed = collapsed;
        self.publish(&state);
    }

    /// Marks every held entry as no longer new.
    pub async fn acknowledge(&self) {
        let entries = {
            let mut state = self.lock();
            state.entries.iter_mut().for_each(|entry| entry.is_new = false);
            self.publish(&state);
            state.entries.clone()
        };
        self.store.set(ENTRIES_KEY, &entries).await;
    }

    /// Recomputes unless the last successful pass is inside the cooldown.
    pub async fn refresh(&self) -> DigestOutcome {
        self.pass(false).await
    }

    /// User-triggered recompute that ignores the cooldown.
    pub async fn refresh_now(&self) -> DigestOutcome {
        self.pass(true).await
    }

    /// Forgets entries, surfaced links and digest headlines, then recomputes.
    pub async fn clear(&self) -> DigestOutcome {
        {
            let mut state = self.lock();
            state.entries.clear();
            state.seen_links.clear();
            state.last_recompute = None;
            self.publish(&state);
        }
        self.store.remove(ENTRIES_KEY).await;
        self.store.remove(SEEN_LINKS_KEY).await;
        self.store.remove(LAST_RECOMPUTE_KEY).await;
        self.summarizer.clear_hero_summaries().await;
        self.pass(true).await
    }

    fn within_cooldown(&self, state: &DigestState) -> bool {
        state
            .last_recompute
            .is_some_and(|last| self.clock.now() - last < self.config.cooldown())
    }

    fn reconcile(&self, state: &mut DigestState) -> bool {
        reconcile_state(state, self.config.auto_expand)
    }

    async fn pass(&self, force: bool) -> DigestOutcome {
        {
            let mut state = self.lock();
            if state.in_flight {
                state.rerun = Some(state.rerun.unwrap_or(false) || force);
                debug!("digest pass already running, follow-up queued");
                return DigestOutcome::Deferred;
            }
            if !force && self.within_cooldown(&state) {
                let expand = self.reconcile(&mut state);
                self.publish(&state);
                return DigestOutcome::Reconciled { expand };
            }
            state.in_flight = true;
            state.loading = true;
            self.publish(&state);
        }

        let mut guard = PassGuard {
            engine: self,
            armed: true,
        };
        let mut force = force;
        loop {
            let within_cooldown = self.within_cooldown(&self.lock());
            let outcome = if force || !within_cooldown {
                self.recompute().await
            } else {
                let mut state = self.lock();
                let expand = self.reconcile(&mut state);
                DigestOutcome::Reconciled { expand }
            };

            let mut state = self.lock();
            match state.rerun.take() {
                Some(rerun_force) => force = rerun_force,
                None => {
                    state.in_flight = false;
                    state.loading = false;
                    guard.armed = false;
                    self.publish(&state);
                    return outcome;
                }
            }
        }
    }

    async fn recompute(&self) -> DigestOutcome {
        let feeds = list_feeds(&self.feeds).await;
        let mut tasks = JoinSet::new();
        let fetch_timeout = self.config.fetch_timeout();
        for feed in feeds {
            let fetcher = Arc::clone(&self.fetcher);
            tasks.spawn(async move {
                let loaded: Result<Vec<Article>, FetchError> =
                    with_deadline(fetch_timeout, fetcher.load_items(&feed)).await;
                match loaded {
                    Ok(items) => newest_item(items),
                    Err(err) => {
                        debug!(feed = %feed.url, error = %err, "digest feed fetch failed");
                        None
                    }
                }
            });
        }
        let mut newest = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(article)) = joined {
                newest.push(article);
            }
        }
        sort_newest_first(&mut newest, |a: &Article| a.published_at);

        let seen: HashSet<String> = self.lock().seen_links.iter().cloned().collect();
        let mut picked = HashSet::new();
        let fresh: Vec<Article> = newest
            .into_iter()
            .filter(|a| !seen.contains(&a.link) && picked.insert(a.link.clone()))
            .take(self.config.effective_quota())
            .collect();
        let now = self.clock.now();

        if fresh.is_empty() {
            let entries = {
                let mut state = self.lock();
                state.entries.iter_mut().for_each(|entry| entry.is_new = false);
                state.collapsed = true;
                state.last_recompute = Some(now);
                self.publish(&state);
                state.entries.clone()
            };
            self.store.set(ENTRIES_KEY, &entries).await;
            self.store.set(LAST_RECOMPUTE_KEY, &now).await;
            debug!("digest has no new items");
            return DigestOutcome::NoNewItems;
        }

        let mut new_entries = self.summarize_all(fresh).await;
        sort_newest_first(&mut new_entries, |e: &DigestEntry| e.published_at);
        let new_links: Vec<String> = new_entries.iter().map(|e| e.link.clone()).collect();

        let (entries, seen_links, expand) = {
            let mut state = self.lock();
            let fresh_links: HashSet<&str> = new_links.iter().map(String::as_str).collect();
            let mut merged = new_entries.clone();
            merged.extend(
                state
                    .entries
                    .iter()
                    .filter(|entry| !fresh_links.contains(entry.link.as_str()))
                    .cloned(),
            );
            sort_newest_first(&mut merged, |e: &DigestEntry| e.published_at);
            merged.truncate(self.config.effective_quota());

            state.entries = merged;
            let old_seen = std::mem::take(&mut state.seen_links);
            state.seen_links = merge_seen_links(old_seen, &new_links, self.config.seen_capacity);
            state.last_recompute = Some(now);
            let expand = !new_entries.is_empty() && state.collapsed && self.config.auto_expand;
            if expand {
                state.collapsed = false;
            }
            self.publish(&state);
            (state.entries.clone(), state.seen_links.clone(), expand)
        };
        self.store.set(ENTRIES_KEY, &entries).await;
        self.store.set(SEEN_LINKS_KEY, &seen_links).await;
        self.store.set(LAST_RECOMPUTE_KEY, &now).await;

        info!(new = new_entries.len(), held = entries.len(), "digest updated");
        DigestOutcome::Updated {
            new_entries: new_entries.len(),
            expand,
        }
    }

    async fn summarize_all(&self, articles: Vec<Article>) -> Vec<DigestEntry> {
        let mut tasks = JoinSet::new();
        for article in articles {
            let summarizer = self.summarizer.clone();
            let extractor = Arc::clone(&self.extractor);
            let min_chars = self.config.min_summary_chars;
            tasks.spawn(async move {
                let seed = article
                    .summary
                    .as_deref()
                    .map(|html| extractor.extract_readable_text(html))
                    .filter(|text| !text.is_empty())
                    .or_else(|| Some(article.title.clone()));
                match summarizer
                    .generate_with_retry(&article.link, SummaryLength::Headline, seed, min_chars, |_| {})
                    .await
                {
                    Ok(summary) => Some(DigestEntry::from_article(&article, summary)),
                    Err(err) => {
                        debug!(link = %article.link, error = %err, "digest summary failed");
                        None
                    }
                }
            });
        }
        let mut entries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(entry)) = joined {
                entries.push(entry);
            }
        }
        entries
    }
}
