#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use brief_core::{Article, Clock, FetchError, Feed, FeedFetcher, LanguageModel, PageFetcher, SummaryLength};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};

pub fn feed(id: &str) -> Feed {
    Feed {
        id: id.into(),
        title: format!("Feed {id}"),
        url: format!("http://feeds.test/{id}"),
        icon_url: None,
        folder_id: None,
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn article(source: &str, link: &str, published_secs: i64) -> Article {
    Article {
        id: link.into(),
        title: format!("Title of {link}"),
        link: link.into(),
        published_at: Some(at(published_secs)),
        summary: Some(format!("Summary text for {link} that is long enough to digest.")),
        thumbnail_url: None,
        source_id: source.into(),
        source_title: format!("Feed {source}"),
        source_icon: None,
    }
}

/// Tracks how many calls are inside a section at once.
#[derive(Default)]
pub struct Concurrency {
    active: AtomicUsize,
    max: AtomicUsize,
}

pub struct Active<'a>(&'a Concurrency);

impl Concurrency {
    pub fn enter(&self) -> Active<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        Active(self)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFeeds {
    items: Mutex<HashMap<String, Vec<Article>>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub calls: AtomicUsize,
    pub concurrency: Concurrency,
    /// (feed id, start, end) in virtual time
    pub spans: Mutex<Vec<(String, tokio::time::Instant, tokio::time::Instant)>>,
}

impl FakeFeeds {
    pub fn with_items(self, feed_id: &str, items: Vec<Article>) -> Self {
        self.items.lock().unwrap().insert(feed_id.into(), items);
        self
    }

    pub fn with_delay(self, feed_id: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(feed_id.into(), delay);
        self
    }

    pub fn set_items(&self, feed_id: &str, items: Vec<Article>) {
        self.items.lock().unwrap().insert(feed_id.into(), items);
    }
}

#[async_trait]
impl FeedFetcher for FakeFeeds {
    async fn load_items(&self, feed: &Feed) -> Result<Vec<Article>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = tokio::time::Instant::now();
        {
            let _active = self.concurrency.enter();
            let delay = self.delays.lock().unwrap().get(&feed.id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.spans
            .lock()
            .unwrap()
            .push((feed.id.clone(), start, tokio::time::Instant::now()));
        let items = self.items.lock().unwrap().get(&feed.id).cloned();
        items.ok_or_else(|| FetchError::Status {
            status: 500,
            url: feed.url.clone(),
        })
    }
}

#[derive(Default)]
pub struct FakePages {
    pages: Mutex<HashMap<String, String>>,
    hanging: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    starts: Mutex<Vec<tokio::time::Instant>>,
    pub calls: AtomicUsize,
    pub concurrency: Concurrency,
}

impl FakePages {
    pub fn with_page(self, link: &str, html: &str) -> Self {
        self.pages.lock().unwrap().insert(link.into(), html.into());
        self
    }

    pub fn with_hanging(self, link: &str) -> Self {
        self.hanging.lock().unwrap().insert(link.into());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn remove_page(&self, link: &str) {
        self.pages.lock().unwrap().remove(link);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instants at which each fetch began, in call order.
    pub fn starts(&self) -> Vec<tokio::time::Instant> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakePages {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().unwrap().push(tokio::time::Instant::now());
        let _active = self.concurrency.enter();
        let hangs = self.hanging.lock().unwrap().contains(url);
        if hangs {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let page = self.pages.lock().unwrap().get(url).cloned();
        page.ok_or_else(|| FetchError::Status {
            status: 404,
            url: url.to_string(),
        })
    }
}

/// Language model replaying scripted outputs, one script per call.
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Vec<String>>>,
    fallback: Vec<String>,
    available: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    /// Every call yields `parts`.
    pub fn always(parts: &[&str]) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback: parts.iter().map(|p| p.to_string()).collect(),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls consume `scripts` in order, then fall back to `fallback`.
    pub fn scripted(scripts: Vec<Vec<&str>>, fallback: &[&str]) -> Self {
        let model = Self::always(fallback);
        *model.scripts.lock().unwrap() = scripts
            .into_iter()
            .map(|s| s.into_iter().map(String::from).collect())
            .collect();
        model
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LanguageModel for ScriptedModel {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn summarize(&self, text: &str, length: SummaryLength) -> BoxStream<'static, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let marker = format!("[{length}:{}]", text.len());
        let parts: Vec<String> = script
            .into_iter()
            .map(|part| part.replace("{marker}", &marker))
            .collect();
        stream::iter(parts).boxed()
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
