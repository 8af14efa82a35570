//! Cached, streaming summaries keyed by `(link, length)`.

pub mod model;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::ContentCache;
use crate::config::SummaryConfig;
use crate::error::SummaryError;
use crate::storage::JsonFile;

pub use model::{LanguageModel, LeadSentenceModel};

/// Named summary style. Each variant is its own cache key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
    Short,
    Long,
    Detailed,
    /// One-line summary shown in the digest.
    Headline,
}

impl SummaryLength {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryLength::Short => "short",
            SummaryLength::Long => "long",
            SummaryLength::Detailed => "detailed",
            SummaryLength::Headline => "headline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "short" => Some(SummaryLength::Short),
            "long" => Some(SummaryLength::Long),
            "detailed" => Some(SummaryLength::Detailed),
            "headline" => Some(SummaryLength::Headline),
            _ => None,
        }
    }

    fn scope(self) -> SummaryScope {
        match self {
            SummaryLength::Headline => SummaryScope::Digest,
            _ => SummaryScope::Article,
        }
    }
}

impl fmt::Display for SummaryLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SummaryScope {
    Article,
    Digest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryEntry {
    pub text: String,
    pub expanded: bool,
}

impl SummaryEntry {
    pub fn has_summary(&self) -> bool {
        !self.text.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSummary {
    link: String,
    length: SummaryLength,
    text: String,
    #[serde(default)]
    expanded: bool,
}

type SummaryKey = (SummaryLength, String);

fn key(link: &str, length: SummaryLength) -> SummaryKey {
    (length, link.to_string())
}

/// Produces and caches summaries. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    content: ContentCache,
    config: SummaryConfig,
    entries: Arc<RwLock<HashMap<SummaryKey, SummaryEntry>>>,
    errors: Arc<Mutex<HashSet<SummaryKey>>>,
    file: Arc<JsonFile<Vec<StoredSummary>>>,
}

impl fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summarizer")
            .field("config", &self.config)
            .field("file", &self.file.path())
            .finish_non_exhaustive()
    }
}

impl Summarizer {
    pub fn in_memory(model: Arc<dyn LanguageModel>, content: ContentCache, config: SummaryConfig) -> Self {
        Self::with_file(model, content, config, JsonFile::in_memory(), Vec::new())
    }

    pub async fn load_from(
        path: impl AsRef<Path>,
        model: Arc<dyn LanguageModel>,
        content: ContentCache,
        config: SummaryConfig,
    ) -> Self {
        let file = JsonFile::new(path.as_ref());
        let stored = file.load().await;
        Self::with_file(model, content, config, file, stored)
    }

    fn with_file(
        model: Arc<dyn LanguageModel>,
        content: ContentCache,
        config: SummaryConfig,
        file: JsonFile<Vec<StoredSummary>>,
        stored: Vec<StoredSummary>,
    ) -> Self {
        let entries = stored
            .into_iter()
            .map(|s| {
                (
                    (s.length, s.link),
                    SummaryEntry {
                        text: s.text,
                        expanded: s.expanded,
                    },
                )
            })
            .collect();
        Self {
            model,
            content,
            config,
            entries: Arc::new(RwLock::new(entries)),
            errors: Arc::default(),
            file: Arc::new(file),
        }
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SummaryKey, SummaryEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SummaryKey, SummaryEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_errors(&self) -> std::sync::MutexGuard<'_, HashSet<SummaryKey>> {
        self.errors.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Pure cache read; never triggers generation.
    pub fn cached_summary(&self, link: &str, length: SummaryLength) -> Option<String> {
        self.read_entries()
            .get(&key(link, length))
            .filter(|entry| entry.has_summary())
            .map(|entry| entry.text.clone())
    }

    pub fn has_cached_summary(&self, link: &str, length: SummaryLength) -> bool {
        self.read_entries()
            .get(&key(link, length))
            .is_some_and(SummaryEntry::has_summary)
    }

    pub fn is_expanded(&self, link: &str, length: SummaryLength) -> bool {
        self.read_entries()
            .get(&key(link, length))
            .is_some_and(|entry| entry.expanded)
    }

    pub async fn set_expanded(&self, expanded: bool, link: &str, length: SummaryLength) {
        {
            let mut entries = self.write_entries();
            let entry = entries.entry(key(link, length)).or_default();
            if entry.expanded == expanded {
                return;
            }
            entry.expanded = expanded;
        }
        self.persist().await;
    }

    /// Set when every generation attempt for this item failed.
    pub fn has_error(&self, link: &str, length: SummaryLength) -> bool {
        self.lock_errors().contains(&key(link, length))
    }

    pub fn clear_error(&self, link: &str, length: SummaryLength) {
        self.lock_errors().remove(&key(link, length));
    }

    fn set_error(&self, link: &str, length: SummaryLength) {
        self.lock_errors().insert(key(link, length));
    }

    pub fn summary_count(&self) -> usize {
        self.read_entries().values().filter(|e| e.has_summary()).count()
    }

    async fn store_summary(&self, link: &str, length: SummaryLength, text: String) {
        {
            let mut entries = self.write_entries();
            entries.entry(key(link, length)).or_default().text = text;
        }
        self.clear_error(link, length);
        self.persist().await;
    }

    async fn persist(&self) {
        self.file.save_with(|| async { self.stored() }).await;
    }

    fn stored(&self) -> Vec<StoredSummary> {
        self.read_entries()
            .iter()
            .filter(|(_, entry)| entry.has_summary() || entry.expanded)
            .map(|((length, link), entry)| StoredSummary {
                link: link.clone(),
                length: *length,
                text: entry.text.clone(),
                expanded: entry.expanded,
            })
            .collect()
    }

    async fn source_text(&self, link: &str, seed_text: Option<String>) -> Option<String> {
        match seed_text.filter(|t| !t.trim().is_empty()) {
            Some(seed) => Some(seed),
            None => self.content.cached_text(link).await,
        }
    }

    async fn generation_stream(
        &self,
        link: &str,
        length: SummaryLength,
        seed_text: Option<String>,
    ) -> Result<BoxStream<'static, String>, SummaryError> {
        let text = self
            .source_text(link, seed_text)
            .await
            .ok_or_else(|| SummaryError::NoSourceText(link.to_string()))?;
        if !self.model.is_available() {
            return Err(SummaryError::ModelUnavailable);
        }
        Ok(self.model.summarize(&text, length))
    }

    /// Summary as a finite, non-restartable stream of increasingly complete text.
    ///
    /// A cache hit yields the cached text once. Otherwise partial model output
    /// is forwarded and the final text is cached when the stream completes.
    /// A stream that ends without text sets the item's error flag. Dropping the
    /// stream early caches and flags nothing.
    pub fn stream_summary(
        &self,
        link: &str,
        length: SummaryLength,
        seed_text: Option<String>,
    ) -> BoxStream<'static, String> {
        let this = self.clone();
        let link = link.to_string();
        async_stream::stream! {
            if let Some(text) = this.cached_summary(&link, length) {
                yield text;
                return;
            }
            let mut partials = match this.generation_stream(&link, length, seed_text).await {
                Ok(partials) => partials,
                Err(err) => {
                    debug!(link = %link, %length, error = %err, "summary not generated");
                    this.set_error(&link, length);
                    return;
                }
            };
            let mut last: Option<String> = None;
            while let Some(partial) = partials.next().await {
                last = Some(partial.clone());
                yield partial;
            }
            match last.filter(|t| !t.trim().is_empty()) {
                Some(text) => this.store_summary(&link, length, text).await,
                None => {
                    debug!(link = %link, %length, "model yielded no summary");
                    this.set_error(&link, length);
                }
            }
        }
        .boxed()
    }

    /// Generates with bounded retries, used where a failed summary should be retried
    /// before giving up.
    ///
    /// An attempt fails when the model yields nothing or fewer than `min_chars`
    /// characters. The delay before attempt `n + 1` is `backoff * n`. Exhausting
    /// all attempts sets the item's error flag and caches nothing.
    pub async fn generate_with_retry<P>(
        &self,
        link: &str,
        length: SummaryLength,
        seed_text: Option<String>,
        min_chars: usize,
        mut on_partial: P,
    ) -> Result<String, SummaryError>
    where
        P: FnMut(&str) + Send,
    {
        if let Some(text) = self.cached_summary(link, length) {
            self.clear_error(link, length);
            return Ok(text);
        }
        let attempts = self.config.max_attempts.max(1);
        let min_chars = min_chars.max(1);
        for attempt in 1..=attempts {
            match self.generation_stream(link, length, seed_text.clone()).await {
                Ok(mut partials) => {
                    let mut last: Option<String> = None;
                    while let Some(partial) = partials.next().await {
                        on_partial(&partial);
                        last = Some(partial);
                    }
                    match last {
                        Some(text) if text.trim().chars().count() >= min_chars => {
                            self.store_summary(link, length, text.clone()).await;
                            return Ok(text);
                        }
                        Some(text) => {
                            debug!(link, attempt, chars = text.chars().count(), "summary too short")
                        }
                        None => debug!(link, attempt, "summary stream yielded nothing"),
                    }
                }
                Err(err @ SummaryError::NoSourceText(_)) => {
                    self.set_error(link, length);
                    return Err(err);
                }
                Err(err) => debug!(link, attempt, error = %err, "summary attempt failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.backoff() * attempt).await;
            }
        }
        warn!(link, %length, attempts, "summary generation exhausted");
        self.set_error(link, length);
        Err(SummaryError::Exhausted { attempts })
    }

    /// Drops every cached summary text. Expand toggles are kept.
    pub async fn clear_cache(&self) {
        self.clear_where(|_| true).await;
    }

    /// Drops inline article summaries only; digest headlines stay.
    pub async fn clear_article_summaries(&self) {
        self.clear_where(|length| length.scope() == SummaryScope::Article)
            .await;
    }

    /// Drops digest headlines only; article summaries stay.
    pub async fn clear_hero_summaries(&self) {
        self.clear_where(|length| length.scope() == SummaryScope::Digest)
            .await;
    }

    async fn clear_where(&self, matches: impl Fn(SummaryLength) -> bool) {
        {
            let mut entries = self.write_entries();
            entries.retain(|(length, _), entry| {
                if matches(*length) {
                    entry.text.clear();
                }
                entry.has_summary() || entry.expanded
            });
        }
        self.lock_errors().retain(|(length, _)| !matches(*length));
        self.persist().await;
    }
}
