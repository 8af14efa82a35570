use brief_core::sources::build_client;
use brief_core::{Feed, FeedFetcher, FetchError, HttpConfig, HttpFeedFetcher, HttpPageFetcher, PageFetcher};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_rss() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First</description>
    </item>
    <item>
      <title>Item 2</title>
      <link>http://example.com/2</link>
      <guid>2</guid>
      <pubDate>Mon, 21 Oct 2024 08:00:00 GMT</pubDate>
      <description>Second</description>
    </item>
  </channel>
</rss>"#
        .to_string()
}

fn sample_atom() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <id>urn:feed</id>
  <updated>2024-10-21T08:00:00Z</updated>
  <entry>
    <title>Entry</title>
    <id>urn:1</id>
    <link href="http://example.com/a1"/>
    <updated>2024-10-21T08:00:00Z</updated>
  </entry>
</feed>"#
        .to_string()
}

fn feed_at(url: String) -> Feed {
    Feed {
        id: "feed1".into(),
        title: "Test".into(),
        url,
        icon_url: None,
        folder_id: None,
    }
}

async fn serve(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn loads_rss_items() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed",
        ResponseTemplate::new(200)
            .insert_header("content-type", "application/rss+xml")
            .set_body_string(sample_rss()),
    )
    .await;

    let config = HttpConfig::default();
    let fetcher = HttpFeedFetcher::new(build_client(&config).unwrap(), &config);
    let items = fetcher
        .load_items(&feed_at(format!("{}/feed", server.uri())))
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].link, "http://example.com/1");
    assert_eq!(items[0].source_id, "feed1");
    assert!(items[1].published_at > items[0].published_at);
}

#[tokio::test]
async fn falls_back_to_atom() {
    let server = MockServer::start().await;
    serve(&server, "/atom", ResponseTemplate::new(200).set_body_string(sample_atom())).await;

    let config = HttpConfig::default();
    let fetcher = HttpFeedFetcher::new(build_client(&config).unwrap(), &config);
    let items = fetcher
        .load_items(&feed_at(format!("{}/atom", server.uri())))
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].link, "http://example.com/a1");
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;
    serve(&server, "/feed", ResponseTemplate::new(500)).await;

    let config = HttpConfig::default();
    let fetcher = HttpFeedFetcher::new(build_client(&config).unwrap(), &config);
    let err = fetcher
        .load_items(&feed_at(format!("{}/feed", server.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }), "got {err:?}");
}

#[tokio::test]
async fn non_http_urls_are_rejected() {
    let config = HttpConfig::default();
    let fetcher = HttpFeedFetcher::new(build_client(&config).unwrap(), &config);
    let err = fetcher
        .load_items(&feed_at("file:///etc/passwd".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::UnsupportedScheme(_)), "got {err:?}");
}

#[tokio::test]
async fn page_bodies_are_capped() {
    let server = MockServer::start().await;
    serve(&server, "/small", ResponseTemplate::new(200).set_body_string("<p>ok</p>")).await;
    serve(&server, "/large", ResponseTemplate::new(200).set_body_string("x".repeat(4096))).await;

    let config = HttpConfig {
        max_body_bytes: 1024,
        ..HttpConfig::default()
    };
    let fetcher = HttpPageFetcher::new(build_client(&config).unwrap(), &config);

    let html = fetcher
        .fetch_html(&format!("{}/small", server.uri()))
        .await
        .unwrap();
    assert_eq!(html, "<p>ok</p>");

    let err = fetcher
        .fetch_html(&format!("{}/large", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooLarge { limit: 1024 }), "got {err:?}");
}
