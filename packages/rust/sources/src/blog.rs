//! Research blog feeds (RSS/Atom).
//!
//! Each configured feed is fetched concurrently through a [`TaskPool`]. A
//! feed that fails is logged and skipped; the source only fails when every
//! feed does. Posts keep the feed's `priority` flag so the pipeline can route
//! them straight to the report.

use async_trait::async_trait;
use chrono::Duration;
use paperfeeder_shared::{BlogFeed, Paper, PaperFeederError, PaperId, Result, SourceTag, TaskPool};
use reqwest::Client;
use scraper::Html;
use tracing::{debug, info, instrument, warn};

use crate::atom::normalize_whitespace;
use crate::feed::{FeedItem, parse_items};
use crate::{FetchWindow, PaperSource};

/// Characters of post text kept as the abstract.
const MAX_POST_CHARS: usize = 1500;

/// Posts from a set of blog feeds.
#[derive(Debug, Clone)]
pub struct BlogSource {
    client: Client,
    feeds: Vec<BlogFeed>,
    days: u32,
    max_posts_per_feed: usize,
    pool: TaskPool,
}

impl BlogSource {
    pub fn new(
        client: Client,
        feeds: Vec<BlogFeed>,
        days: u32,
        max_posts_per_feed: usize,
        pool: TaskPool,
    ) -> Self {
        Self {
            client,
            feeds,
            days,
            max_posts_per_feed,
            pool,
        }
    }
}

async fn fetch_feed(client: &Client, feed: &BlogFeed) -> Result<Vec<FeedItem>> {
    let response = client
        .get(&feed.feed_url)
        .send()
        .await
        .map_err(|e| PaperFeederError::Network(format!("{}: {e}", feed.name)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(PaperFeederError::Network(format!("{}: HTTP {status}", feed.name)));
    }
    let body = response
        .text()
        .await
        .map_err(|e| PaperFeederError::Network(format!("{}: failed to read body: {e}", feed.name)))?;
    parse_items(&body)
}

/// Visible text of an HTML fragment, whitespace-normalized.
fn strip_html(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    normalize_whitespace(&doc.root_element().text().collect::<Vec<_>>().join(" "))
}

fn truncate_chars(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

fn item_to_paper(item: FeedItem, feed: &BlogFeed) -> Option<Paper> {
    if item.link.is_empty() {
        debug!(feed = %feed.key, title = %item.title, "skipping post without a link");
        return None;
    }
    let title = normalize_whitespace(&strip_html(&item.title));
    let title = if title.is_empty() { "Untitled".to_string() } else { title };
    let summary = truncate_chars(strip_html(&item.summary), MAX_POST_CHARS);

    Some(
        Paper::new(
            PaperId::from_url(&item.link),
            item.link,
            title,
            summary,
            SourceTag::Blog,
        )
        .with_authors(item.author.into_iter().collect())
        .with_published_at(item.published)
        .with_notes(Some(format!("From: {}", feed.name)))
        .with_priority(feed.priority),
    )
}

#[async_trait]
impl PaperSource for BlogSource {
    fn name(&self) -> &str {
        "blogs"
    }

    #[instrument(skip_all, fields(feeds = self.feeds.len(), days = self.days))]
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Paper>> {
        if self.feeds.is_empty() {
            return Ok(Vec::new());
        }

        let cutoff = window.end - Duration::days(i64::from(self.days));
        let client = self.client.clone();
        let results = self
            .pool
            .run("blogs", self.feeds.clone(), move |feed| {
                let client = client.clone();
                async move {
                    let result = fetch_feed(&client, &feed).await;
                    (feed, result)
                }
            })
            .await;

        let mut papers = Vec::new();
        let mut failed = 0usize;
        for (slot, configured) in results.into_iter().zip(&self.feeds) {
            let Some((feed, result)) = slot else {
                warn!(feed = %configured.key, "feed did not finish before the deadline");
                failed += 1;
                continue;
            };
            match result {
                Ok(items) => {
                    let before = papers.len();
                    papers.extend(
                        items
                            .into_iter()
                            .take(self.max_posts_per_feed)
                            .filter(|item| item.published.is_none_or(|at| at >= cutoff))
                            .filter_map(|item| item_to_paper(item, &feed)),
                    );
                    debug!(feed = %feed.key, posts = papers.len() - before, "feed parsed");
                }
                Err(e) => {
                    warn!(feed = %feed.key, error = %e, "blog feed failed, skipping");
                    failed += 1;
                }
            }
        }

        if failed == self.feeds.len() {
            return Err(PaperFeederError::Network(format!(
                "all {failed} blog feeds failed"
            )));
        }

        let priority = papers.iter().filter(|p| p.is_priority()).count();
        info!(posts = papers.len(), priority, failed, "blog posts fetched");
        Ok(papers)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn rss(items: &[(&str, &str, &str)]) -> String {
        let body: String = items
            .iter()
            .map(|(title, link, date)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <description>&lt;p&gt;Post about {title}.&lt;/p&gt;</description>\
                     <pubDate>{date}</pubDate></item>"
                )
            })
            .collect();
        format!("<rss version=\"2.0\"><channel><title>Blog</title>{body}</channel></rss>")
    }

    fn feed(server: &MockServer, key: &str, priority: bool) -> BlogFeed {
        BlogFeed {
            key: key.into(),
            name: format!("{key} blog"),
            feed_url: format!("{}/{key}/feed.xml", server.uri()),
            priority,
        }
    }

    fn window() -> FetchWindow {
        FetchWindow::lookback(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap(), 1)
    }

    fn source(feeds: Vec<BlogFeed>, max_posts: usize) -> BlogSource {
        BlogSource::new(
            Client::new(),
            feeds,
            7,
            max_posts,
            TaskPool::new(4, StdDuration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn posts_keep_feed_priority_and_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lab/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
                ("Fresh Post", "https://lab.example.org/fresh", "Mon, 08 Jan 2024 09:00:00 GMT"),
                ("Old Post", "https://lab.example.org/old", "Mon, 01 Jan 2024 09:00:00 GMT"),
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/forum/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[(
                "Forum Thread",
                "https://forum.example.org/t/1",
                "Tue, 09 Jan 2024 09:00:00 GMT",
            )])))
            .mount(&server)
            .await;

        let papers = source(vec![feed(&server, "lab", true), feed(&server, "forum", false)], 5)
            .fetch(&window())
            .await
            .expect("fetch");

        let titles: Vec<_> = papers.iter().map(|p| p.title()).collect();
        assert_eq!(titles, vec!["Fresh Post", "Forum Thread"]);
        assert!(papers[0].is_priority());
        assert!(!papers[1].is_priority());
        assert_eq!(papers[0].source(), SourceTag::Blog);
        assert_eq!(papers[0].abstract_text(), "Post about Fresh Post.");
        assert_eq!(papers[0].notes(), Some("From: lab blog"));
        assert_eq!(papers[0].id().as_str(), "lab.example.org/fresh");
    }

    #[tokio::test]
    async fn only_top_entries_of_each_feed_are_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lab/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
                ("One", "https://lab.example.org/1", "Mon, 08 Jan 2024 09:00:00 GMT"),
                ("Two", "https://lab.example.org/2", "Mon, 08 Jan 2024 08:00:00 GMT"),
                ("Three", "https://lab.example.org/3", "Mon, 08 Jan 2024 07:00:00 GMT"),
            ])))
            .mount(&server)
            .await;

        let papers = source(vec![feed(&server, "lab", true)], 2)
            .fetch(&window())
            .await
            .expect("fetch");
        assert_eq!(papers.len(), 2);
    }

    #[tokio::test]
    async fn one_broken_feed_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lab/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[(
                "Fresh Post",
                "https://lab.example.org/fresh",
                "Mon, 08 Jan 2024 09:00:00 GMT",
            )])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone/feed.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let papers = source(vec![feed(&server, "gone", true), feed(&server, "lab", true)], 5)
            .fetch(&window())
            .await
            .expect("partial failure is not an error");
        assert_eq!(papers.len(), 1);
    }

    #[tokio::test]
    async fn every_feed_failing_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = source(vec![feed(&server, "a", true), feed(&server, "b", false)], 5)
            .fetch(&window())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("all 2 blog feeds failed"));
    }

    #[test]
    fn html_is_stripped_and_long_posts_truncated() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>\n<p>again</p>"), "Hello world again");
        let long = truncate_chars("x".repeat(MAX_POST_CHARS + 10), MAX_POST_CHARS);
        assert_eq!(long.chars().count(), MAX_POST_CHARS + 3);
        assert!(long.ends_with("..."));
    }
}
