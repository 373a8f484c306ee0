//! Fetch orchestration against wiremock feeds and an in-memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ednews_core::{parse_sources, Entry};
use ednews_crossref::{CrossrefClient, CrossrefConfig, DoiCache};
use ednews_db::{connect_pool, get_article_by_doi, run_migrations, save_items, ItemRow, PoolConfig};
use ednews_feeds::{
    resolve_sources, run_fetch, run_postprocess, DbPostprocessor, FeedError, FetchOptions,
    PostContext, ProcessorRegistry, SaveTarget, SourceStatus,
};
use sqlx::SqlitePool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const THREE_AND_ONE_EMPTY: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>District A</title>
  <item><title>Budget hearing set</title><link>https://a.example.org/1</link></item>
  <item><title>New principal named</title><link>https://a.example.org/2</link></item>
  <item><title>Bond measure passes</title><link>https://a.example.org/3</link></item>
  <item><title>   </title></item>
</channel></rss>"#;

const JOURNAL: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>AERJ</title>
  <item>
    <title>Chronic absenteeism after the pandemic</title>
    <link>https://doi.org/10.3102/abc</link>
  </item>
  <item>
    <title>Teacher retention in rural districts</title>
    <link>https://journal.example.org/articles/42</link>
  </item>
</channel></rss>"#;

const ONE_NEW_PAPER: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>AERJ</title>
  <item><title>Newest paper in the feed</title><link>https://journal.example.org/new</link></item>
</channel></rss>"#;

/// Records the titles it is offered and optionally takes its time.
#[derive(Default)]
struct Recorder {
    offered: Mutex<Vec<String>>,
    delay: Duration,
}

#[async_trait]
impl DbPostprocessor for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn run(
        &self,
        _pool: &SqlitePool,
        rows: &[ItemRow],
        _ctx: &PostContext,
    ) -> Result<usize, FeedError> {
        tokio::time::sleep(self.delay).await;
        let mut offered = self.offered.lock().unwrap();
        offered.extend(rows.iter().filter_map(|r| r.title.clone()));
        Ok(rows.len())
    }
}

async fn store() -> SqlitePool {
    let pool = connect_pool("sqlite::memory:", PoolConfig::default())
        .await
        .expect("memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}

fn crossref(base_url: &str) -> CrossrefClient {
    let config = CrossrefConfig {
        max_retries: 0,
        backoff_base_ms: 0,
        ..CrossrefConfig::default()
    };
    CrossrefClient::with_base_url(&config, DoiCache::new(), base_url).expect("crossref client")
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("http client")
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

async fn mount_feed(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn slow_source_fails_alone() {
    let server = MockServer::start().await;
    mount_feed(&server, "/a.rss", THREE_AND_ONE_EMPTY).await;
    Mock::given(method("GET"))
        .and(path("/b.rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(THREE_AND_ONE_EMPTY)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let uri = server.uri();
    let file = parse_sources(
        &format!(
            r#"{{"feeds": {{
                "a": {{"feed": "{uri}/a.rss"}},
                "b": {{"feed": "{uri}/b.rss"}},
                "c": {{"link": "https://c.example.org"}}
            }}}}"#
        ),
        "test",
    )
    .unwrap();
    let registry = ProcessorRegistry::with_builtins(&crossref(&uri));
    let sources = resolve_sources(&file, &registry).unwrap();

    let pool = store().await;
    let summary = run_fetch(
        &pool,
        &http_client(Duration::from_millis(500)),
        &sources,
        &FetchOptions::default(),
    )
    .await;

    let a = summary.report("a").expect("report for a");
    assert_eq!(a.status, SourceStatus::Ok);
    assert_eq!(a.fetched, 3);
    assert_eq!(a.saved, 3);

    assert!(summary.report("b").unwrap().is_failed());
    assert!(matches!(
        summary.report("c").unwrap().status,
        SourceStatus::Skipped(_)
    ));

    assert_eq!(summary.failed, 1);
    assert!(summary.is_partial_failure());
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM items WHERE feed_id = 'a'").await, 3);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM items WHERE feed_id = 'b'").await, 0);
}

#[tokio::test]
async fn refetching_the_same_feed_saves_nothing_new() {
    let server = MockServer::start().await;
    mount_feed(&server, "/a.rss", THREE_AND_ONE_EMPTY).await;
    let uri = server.uri();
    let file = parse_sources(&format!(r#"{{"feeds": {{"a": {{"feed": "{uri}/a.rss"}}}}}}"#), "t").unwrap();
    let sources = resolve_sources(&file, &ProcessorRegistry::with_builtins(&crossref(&uri))).unwrap();
    let pool = store().await;
    let client = http_client(Duration::from_secs(5));

    let first = run_fetch(&pool, &client, &sources, &FetchOptions::default()).await;
    let second = run_fetch(&pool, &client, &sources, &FetchOptions::default()).await;
    assert_eq!(first.saved, 3);
    assert_eq!(second.saved, 0);
    assert!(!second.has_failures());
}

#[tokio::test]
async fn news_sources_are_saved_as_headlines() {
    let server = MockServer::start().await;
    mount_feed(&server, "/a.rss", THREE_AND_ONE_EMPTY).await;
    let uri = server.uri();
    let file = parse_sources(&format!(r#"{{"feeds": {{"a": {{"feed": "{uri}/a.rss"}}}}}}"#), "t").unwrap();
    let sources = resolve_sources(&file, &ProcessorRegistry::with_builtins(&crossref(&uri))).unwrap();
    let pool = store().await;

    let options = FetchOptions {
        target: SaveTarget::Headlines,
        ..FetchOptions::default()
    };
    let summary = run_fetch(&pool, &http_client(Duration::from_secs(5)), &sources, &options).await;
    assert_eq!(summary.saved, 3);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM headlines").await, 3);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM items").await, 0);
}

#[tokio::test]
async fn crossref_postprocessor_links_items_to_articles() {
    let server = MockServer::start().await;
    mount_feed(&server, "/aerj.rss", JOURNAL).await;
    Mock::given(method("GET"))
        .and(path("/works/10.3102/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "message": {
                "DOI": "10.3102/abc",
                "title": ["Chronic Absenteeism After the Pandemic"],
                "author": [{"given": "Lena", "family": "Park"}],
                "issued": {"date-parts": [[2024, 9, 15]]}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "message": {"items": [{"DOI": "10.9999/other"}, {"DOI": "10.3102/DEF"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works/10.3102/def"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let uri = server.uri();
    let file = parse_sources(
        &format!(
            r#"{{"feeds": {{"aerj": {{
                "feed": "{uri}/aerj.rss",
                "publication_id": "10.3102",
                "issn": "0002-8312",
                "processor": ["rss", "crossref"]
            }}}}}}"#
        ),
        "test",
    )
    .unwrap();
    let sources = resolve_sources(&file, &ProcessorRegistry::with_builtins(&crossref(&uri))).unwrap();
    let pool = store().await;

    let summary = run_fetch(&pool, &http_client(Duration::from_secs(5)), &sources, &FetchOptions::default()).await;
    let report = summary.report("aerj").unwrap();
    assert_eq!(report.saved, 2);
    assert_eq!(report.enriched, 2);
    assert_eq!(report.post_failures, 0);

    let enriched = get_article_by_doi(&pool, "10.3102/abc").await.unwrap().unwrap();
    assert_eq!(enriched.title.as_deref(), Some("Chronic Absenteeism After the Pandemic"));
    assert_eq!(enriched.authors.as_deref(), Some("Lena Park"));
    assert_eq!(enriched.feed_id.as_deref(), Some("aerj"));
    assert_eq!(enriched.issn.as_deref(), Some("0002-8312"));

    let placeholder = get_article_by_doi(&pool, "10.3102/def").await.unwrap().unwrap();
    assert_eq!(placeholder.title.as_deref(), Some("Teacher retention in rural districts"));
    assert_eq!(placeholder.authors, None);

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM items WHERE doi IS NOT NULL").await, 2);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM items WHERE doi = '10.3102/abc' AND published = '2024-09-15'").await,
        1
    );
}

#[tokio::test]
async fn legacy_enricher_output_is_upserted_as_articles() {
    let server = MockServer::start().await;
    mount_feed(&server, "/aerj.rss", JOURNAL).await;
    Mock::given(method("GET"))
        .and(path("/works/10.3102/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {"DOI": "10.3102/abc", "author": [{"given": "Lena", "family": "Park"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {"items": []}
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let file = parse_sources(
        &format!(
            r#"{{"feeds": {{"aerj": {{"feed": "{uri}/aerj.rss", "processor": {{"pre": "rss", "post": "crossref_enricher"}}}}}}}}"#
        ),
        "test",
    )
    .unwrap();
    let sources = resolve_sources(&file, &ProcessorRegistry::with_builtins(&crossref(&uri))).unwrap();
    let pool = store().await;

    let summary = run_fetch(&pool, &http_client(Duration::from_secs(5)), &sources, &FetchOptions::default()).await;
    let report = summary.report("aerj").unwrap();
    assert_eq!(report.enriched, 1);

    let article = get_article_by_doi(&pool, "10.3102/abc").await.unwrap().unwrap();
    assert_eq!(article.title.as_deref(), Some("Chronic absenteeism after the pandemic"));
    assert_eq!(article.authors.as_deref(), Some("Lena Park"));
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM articles").await, 1);
}

#[tokio::test]
async fn postprocess_reruns_over_stored_items() {
    let server = MockServer::start().await;
    mount_feed(&server, "/aerj.rss", JOURNAL).await;
    Mock::given(method("GET"))
        .and(path("/works/10.3102/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {"DOI": "10.3102/abc", "title": ["Chronic Absenteeism"]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {"items": []}
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let registry = ProcessorRegistry::with_builtins(&crossref(&uri));
    let plain = parse_sources(&format!(r#"{{"feeds": {{"aerj": {{"feed": "{uri}/aerj.rss"}}}}}}"#), "t").unwrap();
    let enriched = parse_sources(
        &format!(r#"{{"feeds": {{"aerj": {{"feed": "{uri}/aerj.rss", "processor": ["rss", "crossref"]}}}}}}"#),
        "t",
    )
    .unwrap();
    let pool = store().await;

    let fetched = run_fetch(
        &pool,
        &http_client(Duration::from_secs(5)),
        &resolve_sources(&plain, &registry).unwrap(),
        &FetchOptions::default(),
    )
    .await;
    assert_eq!(fetched.saved, 2);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM articles").await, 0);

    let summary = run_postprocess(
        &pool,
        &resolve_sources(&enriched, &registry).unwrap(),
        &FetchOptions::default(),
    )
    .await;
    let report = summary.report("aerj").unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.enriched, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM items WHERE doi = '10.3102/abc'").await, 1);

    let none = run_postprocess(&pool, &resolve_sources(&plain, &registry).unwrap(), &FetchOptions::default()).await;
    assert!(none.reports.is_empty());
}

#[tokio::test]
async fn postprocessor_sees_new_items_on_a_full_source() {
    let server = MockServer::start().await;
    mount_feed(&server, "/aerj.rss", ONE_NEW_PAPER).await;
    let uri = server.uri();

    let pool = store().await;
    let backlog: Vec<Entry> = (0..2000)
        .map(|n| Entry {
            title: Some(format!("Backlog paper {n}")),
            link: Some(format!("https://journal.example.org/old/{n}")),
            ..Entry::default()
        })
        .collect();
    assert_eq!(save_items(&pool, "aerj", &backlog, &[]).await.unwrap(), 2000);

    let recorder = Arc::new(Recorder::default());
    let mut registry = ProcessorRegistry::with_builtins(&crossref(&uri));
    registry.register_db_postprocessor("recorder", Arc::clone(&recorder) as Arc<dyn DbPostprocessor>);
    let file = parse_sources(
        &format!(r#"{{"feeds": {{"aerj": {{"feed": "{uri}/aerj.rss", "processor": ["rss", "recorder"]}}}}}}"#),
        "t",
    )
    .unwrap();
    let sources = resolve_sources(&file, &registry).unwrap();

    let summary = run_fetch(&pool, &http_client(Duration::from_secs(5)), &sources, &FetchOptions::default()).await;
    assert_eq!(summary.report("aerj").unwrap().saved, 1);

    let offered = recorder.offered.lock().unwrap();
    assert_eq!(offered.len(), 2000);
    assert_eq!(offered.last().map(String::as_str), Some("Newest paper in the feed"));
    assert!(!offered.iter().any(|t| t == "Backlog paper 0"));
}

#[tokio::test]
async fn slow_postprocessor_does_not_time_out_other_fetches() {
    let server = MockServer::start().await;
    mount_feed(&server, "/a.rss", JOURNAL).await;
    Mock::given(method("GET"))
        .and(path("/b.rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(THREE_AND_ONE_EMPTY)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let uri = server.uri();

    let recorder = Arc::new(Recorder {
        delay: Duration::from_secs(2),
        ..Recorder::default()
    });
    let mut registry = ProcessorRegistry::with_builtins(&crossref(&uri));
    registry.register_db_postprocessor("recorder", Arc::clone(&recorder) as Arc<dyn DbPostprocessor>);
    let file = parse_sources(
        &format!(
            r#"{{"feeds": {{
                "a": {{"feed": "{uri}/a.rss", "processor": ["rss", "recorder"]}},
                "b": {{"feed": "{uri}/b.rss"}}
            }}}}"#
        ),
        "t",
    )
    .unwrap();
    let sources = resolve_sources(&file, &registry).unwrap();
    let pool = store().await;

    let summary = run_fetch(&pool, &http_client(Duration::from_secs(1)), &sources, &FetchOptions::default()).await;

    let a = summary.report("a").unwrap();
    assert_eq!(a.status, SourceStatus::Ok);
    assert_eq!(a.enriched, 2);
    assert_eq!(summary.report("b").unwrap().status, SourceStatus::Ok);
    assert_eq!(summary.failed, 0);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM items WHERE feed_id = 'b'").await, 3);
}
