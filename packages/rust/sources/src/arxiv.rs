//! arXiv export API adapter.

use async_trait::async_trait;
use paperfeeder_shared::{
    Paper, PaperFeederError, PaperId, Result, RetryPolicy, SourceTag, is_arxiv_id, retry,
};
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::atom::{AtomEntry, parse_feed};
use crate::{FetchWindow, PaperSource};

/// Thin client over the arXiv Atom query endpoint.
#[derive(Debug, Clone)]
pub struct ArxivClient {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl ArxivClient {
    pub fn new(client: Client, endpoint: &str, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            retry,
        }
    }

    /// Newest submissions across `categories`, most recent first.
    pub async fn search(&self, categories: &[String], max_results: u32) -> Result<Vec<AtomEntry>> {
        let query = category_query(categories);
        debug!(%query, max_results, "querying arXiv");
        let max_results = max_results.to_string();
        let params = [
            ("search_query", query.as_str()),
            ("start", "0"),
            ("max_results", max_results.as_str()),
            ("sortBy", "submittedDate"),
            ("sortOrder", "descending"),
        ];
        let xml = retry(self.retry, "arxiv search", || self.get(&params)).await?;
        Ok(parse_feed(&xml))
    }

    /// Resolve one paper by id through the `id_list` API.
    ///
    /// arXiv reports unknown or malformed ids as an ordinary feed entry whose
    /// `<id>` points at `/api/errors`; such entries are not papers.
    pub async fn lookup(&self, arxiv_id: &str) -> Result<Option<AtomEntry>> {
        let params = [("id_list", arxiv_id)];
        let xml = retry(self.retry, "arxiv lookup", || self.get(&params)).await?;
        Ok(parse_feed(&xml)
            .into_iter()
            .find(|entry| is_arxiv_id(&entry.arxiv_id)))
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(params)
            .send()
            .await
            .map_err(|e| PaperFeederError::Network(format!("arXiv: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaperFeederError::Network(format!("arXiv: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| PaperFeederError::Network(format!("arXiv: failed to read body: {e}")))
    }
}

/// `cat:cs.LG OR cat:cs.CL`
fn category_query(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| format!("cat:{c}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Convert a feed entry into a paper attributed to `source`.
pub(crate) fn entry_to_paper(entry: AtomEntry, source: SourceTag) -> Paper {
    let id = PaperId::arxiv(&entry.arxiv_id);
    let url = match id.arxiv_id() {
        Some(bare) => format!("https://arxiv.org/abs/{bare}"),
        None => entry.abs_url.clone(),
    };
    Paper::new(id, url, entry.title, entry.summary, source)
        .with_authors(entry.authors)
        .with_published_at(entry.published)
        .with_categories(entry.categories)
        .with_pdf_url(entry.pdf_url)
}

// ---------------------------------------------------------------------------
// ArxivSource
// ---------------------------------------------------------------------------

/// Recent submissions in a fixed set of categories.
#[derive(Debug, Clone)]
pub struct ArxivSource {
    client: ArxivClient,
    categories: Vec<String>,
    max_results: u32,
}

impl ArxivSource {
    pub fn new(client: ArxivClient, categories: Vec<String>, max_results: u32) -> Self {
        Self {
            client,
            categories,
            max_results,
        }
    }
}

#[async_trait]
impl PaperSource for ArxivSource {
    fn name(&self) -> &str {
        "arxiv"
    }

    #[instrument(skip_all, fields(categories = ?self.categories))]
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Paper>> {
        if self.categories.is_empty() {
            return Err(PaperFeederError::config("arXiv enabled with no categories"));
        }

        let entries = self.client.search(&self.categories, self.max_results).await?;
        let total = entries.len();
        let papers: Vec<Paper> = entries
            .into_iter()
            .filter(|e| window.contains(e.published))
            .map(|e| entry_to_paper(e, SourceTag::Arxiv))
            .collect();

        info!(total, in_window = papers.len(), "arXiv entries parsed");
        Ok(papers)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fixture() -> String {
        std::fs::read_to_string("../../../fixtures/arxiv/query.xml").expect("read arXiv fixture")
    }

    fn client(server: &MockServer, attempts: u32) -> ArxivClient {
        ArxivClient::new(
            Client::new(),
            &format!("{}/api/query", server.uri()),
            RetryPolicy::new(attempts, Duration::ZERO),
        )
    }

    #[test]
    fn builds_or_query() {
        let cats = vec!["cs.LG".to_string(), "cs.CL".to_string()];
        assert_eq!(category_query(&cats), "cat:cs.LG OR cat:cs.CL");
    }

    #[tokio::test]
    async fn fetch_filters_by_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("search_query", "cat:cs.LG OR cat:cs.CL"))
            .and(query_param("sortBy", "submittedDate"))
            .and(query_param("max_results", "300"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture()))
            .mount(&server)
            .await;

        let source = ArxivSource::new(
            client(&server, 1),
            vec!["cs.LG".into(), "cs.CL".into()],
            300,
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        let papers = source
            .fetch(&FetchWindow::lookback(now, 2))
            .await
            .expect("fetch");

        // The fixture's third entry predates the window.
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].id().as_str(), "arxiv:2401.01234");
        assert_eq!(papers[0].url(), "https://arxiv.org/abs/2401.01234");
        assert_eq!(papers[0].source(), SourceTag::Arxiv);
        assert_eq!(papers[0].authors().len(), 2);
        assert!(papers[0].pdf_url().is_some());
    }

    #[tokio::test]
    async fn search_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture()))
            .mount(&server)
            .await;

        let entries = client(&server, 2)
            .search(&["cs.LG".to_string()], 10)
            .await
            .expect("second attempt succeeds");
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn search_fails_after_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server, 2)
            .search(&["cs.LG".to_string()], 10)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn lookup_by_id_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("id_list", "2401.01234"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture()))
            .mount(&server)
            .await;

        let entry = client(&server, 1)
            .lookup("2401.01234")
            .await
            .expect("lookup")
            .expect("entry present");
        assert_eq!(entry.title, "Diffusion Language Models Learn Latent Reasoning");
    }

    #[tokio::test]
    async fn lookup_ignores_api_error_entries() {
        let error_feed = r#"<feed>
  <title>ArXiv Query: id_list=9999.99999</title>
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_9999.99999</id>
    <title>Error</title>
    <summary>incorrect id format for 9999.99999</summary>
  </entry>
</feed>"#;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("id_list", "9999.99999"))
            .respond_with(ResponseTemplate::new(200).set_body_string(error_feed))
            .mount(&server)
            .await;

        let entry = client(&server, 1).lookup("9999.99999").await.expect("lookup");
        assert!(entry.is_none());
    }
}
