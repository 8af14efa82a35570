//! Seams to the network and to text extraction, plus the HTTP implementations.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;
use crate::error::FetchError;
use crate::feed::{Article, Feed};

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn load_items(&self, feed: &Feed) -> Result<Vec<Article>, FetchError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

pub trait TextExtractor: Send + Sync {
    fn extract_readable_text(&self, html: &str) -> String;
}

pub fn build_client(config: &HttpConfig) -> Result<Client, FetchError> {
    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout())
        .build()?;
    Ok(client)
}

async fn read_capped_body(response: reqwest::Response, limit: usize) -> Result<bytes::Bytes, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(FetchError::TooLarge { limit });
    }
    let mut buf = bytes::BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(FetchError::TooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn parse_http_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
}

/// Fetches a feed over HTTP and parses it as RSS 2.0, falling back to Atom.
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFeedFetcher {
    pub fn new(client: Client, config: &HttpConfig) -> Self {
        Self {
            client,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

pub fn parse_feed(feed: &Feed, body: &[u8]) -> Result<Vec<Article>, FetchError> {
    let rss_err = match rss::Channel::read_from(body) {
        Ok(channel) => {
            return Ok(channel
                .items()
                .iter()
                .filter_map(|item| Article::from_rss_item(feed, item))
                .collect())
        }
        Err(err) => err.to_string(),
    };
    match atom_syndication::Feed::read_from(body) {
        Ok(atom) => Ok(atom
            .entries()
            .iter()
            .filter_map(|entry| Article::from_atom_entry(feed, entry))
            .collect()),
        Err(atom_err) => Err(FetchError::Parse {
            rss: rss_err,
            atom: atom_err.to_string(),
        }),
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn load_items(&self, feed: &Feed) -> Result<Vec<Article>, FetchError> {
        let url = parse_http_url(&feed.url)?;
        let response = self.client.get(url).send().await?;
        let body = read_capped_body(response, self.max_body_bytes).await?;
        let items = parse_feed(feed, &body)?;
        debug!(feed = %feed.url, count = items.len(), "feed loaded");
        Ok(items)
    }
}

#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    max_body_bytes: usize,
    timeout: Duration,
}

impl HttpPageFetcher {
    pub fn new(client: Client, config: &HttpConfig) -> Self {
        Self {
            client,
            max_body_bytes: config.max_body_bytes,
            timeout: config.request_timeout(),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let url = parse_http_url(url)?;
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let body = read_capped_body(response, self.max_body_bytes).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Readable text via `html2text`, wrapped at a fixed width.
#[derive(Debug, Clone, Copy)]
pub struct Html2TextExtractor {
    width: usize,
}

impl Default for Html2TextExtractor {
    fn default() -> Self {
        Self { width: 100 }
    }
}

impl TextExtractor for Html2TextExtractor {
    fn extract_readable_text(&self, html: &str) -> String {
        html2text::from_read(html.as_bytes(), self.width)
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> Feed {
        Feed {
            id: "f".into(),
            title: "F".into(),
            url: "http://example.com/feed".into(),
            icon_url: None,
            folder_id: Some("news".into()),
        }
    }

    #[test]
    fn parses_atom_when_rss_fails() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <id>urn:feed</id>
  <updated>2024-10-21T08:00:00Z</updated>
  <entry>
    <title>Entry</title>
    <id>urn:1</id>
    <link href="http://example.com/a1"/>
    <updated>2024-10-21T08:00:00Z</updated>
    <summary>Sum</summary>
  </entry>
</feed>"#;
        let items = parse_feed(&feed(), atom.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "http://example.com/a1");
        assert_eq!(items[0].summary.as_deref(), Some("Sum"));
    }

    #[test]
    fn garbage_reports_both_parsers() {
        let err = parse_feed(&feed(), b"not a feed").unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(matches!(
            parse_http_url("file:///etc/passwd"),
            Err(FetchError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn extractor_strips_markup() {
        let text = Html2TextExtractor::default()
            .extract_readable_text("<html><body><p>Hello <b>world</b></p></body></html>");
        assert!(text.contains("Hello"));
        assert!(!text.contains("<b>"));
    }
}
