//! Link-keyed article content caches.
//!
//! A text entry means "do not refetch": the refresh path consults
//! [`ContentCache::cached_text`] before any network request. The rich cache keeps
//! the styled markup for offline display and is refreshed on every successful fetch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::deadline::with_deadline;
use crate::error::FetchError;
use crate::sources::{PageFetcher, TextExtractor};
use crate::storage::JsonFile;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TextMetadata {
    pub title: Option<String>,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedText {
    pub text: String,
    #[serde(default)]
    pub metadata: TextMetadata,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RichContent {
    pub html: String,
    pub base_url: String,
    pub captured_at: DateTime<Utc>,
}

/// What [`ContentCache::load_for_display`] managed to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayContent {
    /// Fetched just now; both caches were refreshed.
    Fresh { rich: RichContent, text: String },
    /// Fetch failed, served from the rich cache.
    CachedRich(RichContent),
    /// Fetch failed and no rich entry exists, served from the text cache.
    CachedText(String),
}

type TextMap = HashMap<String, CachedText>;
type RichMap = HashMap<String, RichContent>;

#[derive(Debug, Clone)]
pub struct ContentCache {
    text: Arc<RwLock<TextMap>>,
    rich: Arc<RwLock<RichMap>>,
    text_file: Arc<JsonFile<TextMap>>,
    rich_file: Arc<JsonFile<RichMap>>,
}

impl ContentCache {
    pub fn in_memory() -> Self {
        Self {
            text: Arc::default(),
            rich: Arc::default(),
            text_file: Arc::new(JsonFile::in_memory()),
            rich_file: Arc::new(JsonFile::in_memory()),
        }
    }

    pub async fn load_from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, "failed to create cache dir");
        }
        let text_file = JsonFile::new(dir.join("text_cache.json"));
        let rich_file = JsonFile::new(dir.join("rich_cache.json"));
        let text = text_file.load().await;
        let rich = rich_file.load().await;
        Self {
            text: Arc::new(RwLock::new(text)),
            rich: Arc::new(RwLock::new(rich)),
            text_file: Arc::new(text_file),
            rich_file: Arc::new(rich_file),
        }
    }

    pub async fn cached_text(&self, link: &str) -> Option<String> {
        let text = self.text.read().await;
        text.get(link).map(|entry| entry.text.clone())
    }

    pub async fn has_text(&self, link: &str) -> bool {
        self.text.read().await.contains_key(link)
    }

    pub async fn text_entry(&self, link: &str) -> Option<CachedText> {
        self.text.read().await.get(link).cloned()
    }

    /// Upserts the text for `link`, replacing any previous entry.
    pub async fn store_text(&self, text: impl Into<String>, link: &str, metadata: TextMetadata) {
        let entry = CachedText {
            text: text.into(),
            metadata,
            stored_at: Utc::now(),
        };
        self.text.write().await.insert(link.to_string(), entry);
        self.persist_text().await;
    }

    pub async fn cached_rich(&self, link: &str) -> Option<RichContent> {
        self.rich.read().await.get(link).cloned()
    }

    pub async fn store_rich(&self, link: &str, content: RichContent) {
        self.rich.write().await.insert(link.to_string(), content);
        self.persist_rich().await;
    }

    pub async fn text_len(&self) -> usize {
        self.text.read().await.len()
    }

    /// Drops every text and rich entry.
    pub async fn clear(&self) {
        self.text.write().await.clear();
        self.persist_text().await;
        self.clear_rich().await;
    }

    pub async fn clear_rich(&self) {
        self.rich.write().await.clear();
        self.persist_rich().await;
    }

    async fn persist_text(&self) {
        self.text_file
            .save_with(|| async { self.text.read().await.clone() })
            .await;
    }

    async fn persist_rich(&self) {
        self.rich_file
            .save_with(|| async { self.rich.read().await.clone() })
            .await;
    }

    /// Fetches `link` for display, refreshing both caches on success.
    ///
    /// On failure the rich cache is consulted first, then the text cache.
    pub async fn load_for_display(
        &self,
        link: &str,
        fetcher: &dyn PageFetcher,
        extractor: &dyn TextExtractor,
        timeout: Duration,
    ) -> Option<DisplayContent> {
        let fetched: Result<String, FetchError> =
            with_deadline(timeout, fetcher.fetch_html(link)).await;
        match fetched {
            Ok(html) => {
                let text = extractor.extract_readable_text(&html);
                let rich = RichContent {
                    html,
                    base_url: link.to_string(),
                    captured_at: Utc::now(),
                };
                self.store_rich(link, rich.clone()).await;
                if !text.is_empty() {
                    self.store_text(text.clone(), link, TextMetadata::default())
                        .await;
                }
                Some(DisplayContent::Fresh { rich, text })
            }
            Err(err) => {
                debug!(link, error = %err, "display fetch failed, using cached content");
                if let Some(rich) = self.cached_rich(link).await {
                    return Some(DisplayContent::CachedRich(rich));
                }
                self.cached_text(link).await.map(DisplayContent::CachedText)
            }
        }
    }
}
