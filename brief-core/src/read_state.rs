//! Durable read/seen flags per article link, plus per-source "latest links" snapshots.
//!
//! Queries are synchronous and served from memory. Mutations persist best-effort:
//! I/O failures are logged and never reach the caller.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::storage::JsonFile;

const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadState {
    pub is_read: bool,
    /// True until the link has been marked seen.
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct LinkFlags {
    #[serde(default)]
    read: bool,
    #[serde(default)]
    seen: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReadStateData {
    #[serde(default)]
    links: HashMap<String, LinkFlags>,
    /// source id -> most recent links, newest first
    #[serde(default)]
    latest: HashMap<String, Vec<String>>,
}

impl ReadStateData {
    fn state(&self, link: &str) -> ReadState {
        let flags = self.links.get(link).copied().unwrap_or_default();
        ReadState {
            is_read: flags.read,
            is_new: !flags.seen,
        }
    }

    fn source_has_new(&self, source_id: &str) -> bool {
        self.latest
            .get(source_id)
            .is_some_and(|links| links.iter().any(|link| self.state(link).is_new))
    }
}

#[derive(Debug, Clone)]
pub struct ReadStateStore {
    inner: Arc<RwLock<ReadStateData>>,
    file: Arc<JsonFile<ReadStateData>>,
    flush_pending: Arc<AtomicBool>,
    flush_delay: Duration,
    snapshot_size: usize,
}

impl ReadStateStore {
    pub fn in_memory(snapshot_size: usize) -> Self {
        Self::with_file(JsonFile::in_memory(), ReadStateData::default(), snapshot_size)
    }

    pub async fn load_from(path: impl AsRef<Path>, snapshot_size: usize) -> Self {
        let file = JsonFile::new(path.as_ref());
        let data = file.load().await;
        Self::with_file(file, data, snapshot_size)
    }

    fn with_file(file: JsonFile<ReadStateData>, data: ReadStateData, snapshot_size: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
            file: Arc::new(file),
            flush_pending: Arc::new(AtomicBool::new(false)),
            flush_delay: DEFAULT_FLUSH_DELAY,
            snapshot_size: snapshot_size.max(1),
        }
    }

    /// Delay before a deferred snapshot update reaches disk.
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, ReadStateData> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ReadStateData> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_read(&self, link: &str) -> bool {
        self.read().state(link).is_read
    }

    pub fn is_new(&self, link: &str) -> bool {
        self.read().state(link).is_new
    }

    pub fn get_states<S: AsRef<str>>(&self, links: &[S]) -> Vec<ReadState> {
        let data = self.read();
        links.iter().map(|link| data.state(link.as_ref())).collect()
    }

    /// Sets read without touching the seen flag.
    pub async fn mark_as_read(&self, link: &str) {
        let changed = {
            let mut data = self.write();
            let flags = data.links.entry(link.to_string()).or_default();
            !std::mem::replace(&mut flags.read, true)
        };
        if changed {
            self.persist().await;
        } else {
            debug!(link, "already marked as read");
        }
    }

    /// Clears the "new" flag for every link without marking any of them read.
    pub async fn mark_all_as_seen<S: AsRef<str>>(&self, links: &[S]) {
        let changed = {
            let mut data = self.write();
            let mut changed = false;
            for link in links {
                let flags = data.links.entry(link.as_ref().to_string()).or_default();
                changed |= !std::mem::replace(&mut flags.seen, true);
            }
            changed
        };
        if changed {
            self.persist().await;
        }
    }

    fn replace_latest<S: AsRef<str>>(&self, source_id: &str, links: &[S]) {
        let mut seen = HashSet::new();
        let snapshot: Vec<String> = links
            .iter()
            .map(|link| link.as_ref().to_string())
            .filter(|link| seen.insert(link.clone()))
            .take(self.snapshot_size)
            .collect();
        self.write().latest.insert(source_id.to_string(), snapshot);
    }

    /// Replaces the latest-links snapshot for `source_id`; written to disk shortly after.
    pub fn update_latest_articles<S: AsRef<str>>(&self, source_id: &str, links: &[S]) {
        self.replace_latest(source_id, links);
        self.schedule_flush();
    }

    /// Like [`update_latest_articles`](Self::update_latest_articles) but durable on return.
    pub async fn update_latest_articles_now<S: AsRef<str>>(&self, source_id: &str, links: &[S]) {
        self.replace_latest(source_id, links);
        self.persist().await;
    }

    pub fn latest_articles(&self, source_id: &str) -> Vec<String> {
        self.read().latest.get(source_id).cloned().unwrap_or_default()
    }

    pub fn source_has_new_articles_sync(&self, source_id: &str) -> bool {
        self.read().source_has_new(source_id)
    }

    pub fn folder_has_new_articles_sync<S: AsRef<str>>(&self, folder_id: &str, source_ids: &[S]) -> bool {
        let data = self.read();
        let has_new = source_ids
            .iter()
            .any(|source| data.source_has_new(source.as_ref()));
        trace!(folder = folder_id, has_new, "folder unseen check");
        has_new
    }

    pub async fn clear(&self) {
        *self.write() = ReadStateData::default();
        self.persist().await;
    }

    /// Writes any deferred snapshot now.
    pub async fn flush(&self) {
        self.flush_pending.store(false, Ordering::Release);
        self.persist().await;
    }

    fn schedule_flush(&self) {
        if self.flush_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.flush_pending.store(false, Ordering::Release);
            debug!("no runtime available, deferred flush skipped");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(this.flush_delay).await;
            if this.flush_pending.swap(false, Ordering::AcqRel) {
                this.persist().await;
            }
        });
    }

    async fn persist(&self) {
        self.file.save_with(|| async { self.snapshot() }).await;
    }

    fn snapshot(&self) -> ReadStateData {
        self.read().clone()
    }
}
