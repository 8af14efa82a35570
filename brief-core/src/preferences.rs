use crate::storage::KeyValueStore;
use crate::summarizer::SummaryLength;

fn source_key(source_id: &str) -> String {
    format!("summary_length.source.{source_id}")
}

fn folder_key(folder_id: &str) -> String {
    format!("summary_length.folder.{folder_id}")
}

/// Per-source and per-folder preferred summary length.
#[derive(Debug, Clone)]
pub struct SummaryPreferences {
    store: KeyValueStore,
    default_length: SummaryLength,
}

impl SummaryPreferences {
    pub fn new(store: KeyValueStore, default_length: SummaryLength) -> Self {
        Self {
            store,
            default_length,
        }
    }

    async fn read(&self, key: &str) -> Option<SummaryLength> {
        let raw: String = self.store.get(key).await?;
        SummaryLength::parse(&raw)
    }

    pub async fn source_length(&self, source_id: &str) -> Option<SummaryLength> {
        self.read(&source_key(source_id)).await
    }

    pub async fn folder_length(&self, folder_id: &str) -> Option<SummaryLength> {
        self.read(&folder_key(folder_id)).await
    }

    /// `None` removes the preference so the next level up applies.
    pub async fn set_source_length(&self, source_id: &str, length: Option<SummaryLength>) {
        let key = source_key(source_id);
        match length {
            Some(length) => self.store.set(&key, &length.as_str()).await,
            None => self.store.remove(&key).await,
        }
    }

    pub async fn set_folder_length(&self, folder_id: &str, length: Option<SummaryLength>) {
        let key = folder_key(folder_id);
        match length {
            Some(length) => self.store.set(&key, &length.as_str()).await,
            None => self.store.remove(&key).await,
        }
    }

    /// Source preference, then folder preference, then the configured default.
    pub async fn effective_length(&self, source_id: &str, folder_id: Option<&str>) -> SummaryLength {
        if let Some(length) = self.source_length(source_id).await {
            return length;
        }
        if let Some(folder_id) = folder_id {
            if let Some(length) = self.folder_length(folder_id).await {
                return length;
            }
        }
        self.default_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_overrides_folder_overrides_default() {
        let prefs = SummaryPreferences::new(KeyValueStore::in_memory(), SummaryLength::Short);
        assert_eq!(prefs.effective_length("s1", Some("f1")).await, SummaryLength::Short);

        prefs.set_folder_length("f1", Some(SummaryLength::Long)).await;
        assert_eq!(prefs.effective_length("s1", Some("f1")).await, SummaryLength::Long);
        assert_eq!(prefs.effective_length("s1", None).await, SummaryLength::Short);

        prefs.set_source_length("s1", Some(SummaryLength::Detailed)).await;
        assert_eq!(prefs.effective_length("s1", Some("f1")).await, SummaryLength::Detailed);

        prefs.set_source_length("s1", None).await;
        assert_eq!(prefs.effective_length("s1", Some("f1")).await, SummaryLength::Long);
    }
}
