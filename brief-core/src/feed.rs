use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Feed {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// A single item fetched from a feed. `link` is the identity key for every keyed store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub thumbnail_url: Option<String>,
    pub source_id: String,
    pub source_title: String,
    pub source_icon: Option<String>,
}

impl Article {
    fn for_feed(feed: &Feed, title: String, link: String) -> Self {
        Self {
            id: link.clone(),
            title,
            link,
            published_at: None,
            summary: None,
            thumbnail_url: None,
            source_id: feed.id.clone(),
            source_title: feed.title.clone(),
            source_icon: feed.icon_url.clone(),
        }
    }

    pub fn from_rss_item(feed: &Feed, item: &rss::Item) -> Option<Self> {
        // Items without a link or guid have no stable identity.
        let link = item
            .link()
            .map(str::to_owned)
            .or_else(|| item.guid().map(|guid| guid.value().to_owned()))
            .filter(|link| !link.is_empty())?;

        let mut article = Self::for_feed(feed, item.title().unwrap_or_default().to_owned(), link);
        article.published_at = item
            .pub_date()
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|dt| dt.with_timezone(&Utc));
        article.summary = item
            .description()
            .or_else(|| item.content())
            .map(ToOwned::to_owned);
        article.thumbnail_url = item
            .enclosure()
            .filter(|enclosure| enclosure.mime_type().starts_with("image/"))
            .map(|enclosure| enclosure.url().to_owned());
        Some(article)
    }

    pub fn from_atom_entry(feed: &Feed, entry: &atom_syndication::Entry) -> Option<Self> {
        let link = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .or_else(|| entry.links().first())
            .map(|link| link.href().to_owned())
            .filter(|href| !href.is_empty())?;

        let mut article = Self::for_feed(feed, entry.title().value.clone(), link);
        article.published_at = entry
            .published()
            .copied()
            .or(Some(*entry.updated()))
            .map(|dt| dt.with_timezone(&Utc));
        article.summary = entry
            .summary()
            .map(|text| text.value.clone())
            .or_else(|| entry.content().and_then(|c| c.value().map(ToOwned::to_owned)));
        Some(article)
    }
}

pub type SharedFeedList = Arc<RwLock<Vec<Feed>>>;

pub fn shared_feed_list(initial: Vec<Feed>) -> SharedFeedList {
    Arc::new(RwLock::new(initial))
}

pub async fn add_feed(store: &SharedFeedList, feed: Feed) {
    let mut feeds = store.write().await;
    feeds.retain(|existing| existing.id != feed.id);
    feeds.push(feed);
}

pub async fn remove_feed(store: &SharedFeedList, feed_id: &str) {
    let mut feeds = store.write().await;
    feeds.retain(|existing| existing.id != feed_id);
}

pub async fn list_feeds(store: &SharedFeedList) -> Vec<Feed> {
    store.read().await.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> Feed {
        Feed {
            id: "f1".into(),
            title: "Feed One".into(),
            url: "http://example.com/feed".into(),
            icon_url: Some("http://example.com/icon.png".into()),
            folder_id: None,
        }
    }

    #[test]
    fn rss_item_denormalises_source_fields() {
        let mut item = rss::Item::default();
        item.set_title("Hello".to_string());
        item.set_link("http://example.com/1".to_string());
        item.set_pub_date("Mon, 21 Oct 2024 07:28:00 GMT".to_string());

        let article = Article::from_rss_item(&feed(), &item).unwrap();
        assert_eq!(article.id, "http://example.com/1");
        assert_eq!(article.source_id, "f1");
        assert_eq!(article.source_title, "Feed One");
        assert_eq!(article.source_icon.as_deref(), Some("http://example.com/icon.png"));
        assert!(article.published_at.is_some());
    }

    #[test]
    fn rss_item_without_identity_is_skipped() {
        let mut item = rss::Item::default();
        item.set_title("No link".to_string());
        assert!(Article::from_rss_item(&feed(), &item).is_none());
    }

    #[tokio::test]
    async fn add_feed_replaces_same_id() {
        let store = shared_feed_list(vec![feed()]);
        let mut renamed = feed();
        renamed.title = "Renamed".into();
        add_feed(&store, renamed).await;
        let feeds = list_feeds(&store).await;
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "Renamed");
        remove_feed(&store, "f1").await;
        assert!(list_feeds(&store).await.is_empty());
    }
}
