//! Integration tests for `CrossrefClient` using wiremock HTTP mocks.

use ednews_crossref::{CrossrefClient, CrossrefConfig, CrossrefError, DoiCache, JournalWorksQuery};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config(max_retries: u32) -> CrossrefConfig {
    CrossrefConfig {
        max_retries,
        backoff_base_ms: 0,
        timeout_secs: 5,
        ..CrossrefConfig::default()
    }
}

fn test_client(base_url: &str, max_retries: u32) -> CrossrefClient {
    CrossrefClient::with_base_url(&fast_config(max_retries), DoiCache::new(), base_url)
        .expect("client construction should not fail")
}

fn search_body(dois: &[&str]) -> serde_json::Value {
    let items: Vec<_> = dois.iter().map(|d| serde_json::json!({ "DOI": d })).collect();
    serde_json::json!({ "status": "ok", "message": { "items": items } })
}

#[tokio::test]
async fn rate_limited_lookup_is_retried_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 2);
    let found = client
        .lookup_doi_by_title_or_none("Teacher retention in rural districts", None)
        .await;
    assert_eq!(found, None);
    assert!(client.cache().is_empty(), "failures must not be cached");
}

#[tokio::test]
async fn exhausted_retries_surface_as_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works/10.3102/abc"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 1);
    let err = client.fetch_metadata("10.3102/abc").await.unwrap_err();
    assert!(matches!(
        err,
        CrossrefError::RetriesExhausted { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn not_found_returns_none_after_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works/10.3102/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    let meta = client
        .fetch_metadata("10.3102/missing")
        .await
        .expect("404 is not an error");
    assert_eq!(meta, None);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works/10.3102/bad"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    assert_eq!(client.fetch_metadata_or_none("10.3102/bad").await, None);
}

#[tokio::test]
async fn lookup_prefers_the_publication_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("query.title", "Teacher retention in rural districts"))
        .and(query_param("rows", "20"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(search_body(&["10.1111/elsewhere", "10.3102/AERJ.1"])),
        )
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 0);
    let preferred = client
        .lookup_doi_by_title("Teacher retention in rural districts", Some("10.3102"))
        .await
        .unwrap();
    assert_eq!(preferred.as_deref(), Some("10.3102/aerj.1"));

    let first = client
        .lookup_doi_by_title("Teacher retention in rural districts", None)
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("10.1111/elsewhere"));
}

#[tokio::test]
async fn cached_lookups_do_not_hit_the_network_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 0);
    let title = "A title with no Crossref match at all";
    assert_eq!(client.lookup_doi_by_title(title, None).await.unwrap(), None);
    assert_eq!(client.lookup_doi_by_title(title, None).await.unwrap(), None);
    assert_eq!(client.cache().get(title, None), Some(None));
}

#[tokio::test]
async fn shared_cache_spans_clients() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["10.5/x"])))
        .expect(1)
        .mount(&server)
        .await;

    let cache = DoiCache::new();
    let a = CrossrefClient::with_base_url(&fast_config(0), cache.clone(), &server.uri()).unwrap();
    let b = CrossrefClient::with_base_url(&fast_config(0), cache, &server.uri()).unwrap();
    let title = "Shared cache across two clients";
    assert_eq!(a.lookup_doi_by_title(title, None).await.unwrap().as_deref(), Some("10.5/x"));
    assert_eq!(b.lookup_doi_by_title(title, None).await.unwrap().as_deref(), Some("10.5/x"));
}

#[tokio::test]
async fn fetch_metadata_parses_the_work() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "status": "ok",
        "message": {
            "DOI": "10.3102/0013189X241234",
            "title": ["Chronic Absenteeism After the Pandemic"],
            "author": [
                {"given": "Lena", "family": "Park"},
                {"given": "Omar", "family": "Haddad"}
            ],
            "abstract": "<jats:p>Absences rose sharply.</jats:p>",
            "issued": {"date-parts": [[2024, 9, 15]]}
        }
    });
    Mock::given(method("GET"))
        .and(path("/works/10.3102/0013189X241234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 0);
    let meta = client
        .fetch_metadata("10.3102/0013189X241234")
        .await
        .unwrap()
        .expect("work should be found");

    assert_eq!(meta.doi, "10.3102/0013189x241234");
    assert_eq!(meta.authors.as_deref(), Some("Lena Park, Omar Haddad"));
    assert_eq!(meta.abstract_text.as_deref(), Some("Absences rose sharply."));
    assert_eq!(meta.published.as_deref(), Some("2024-09-15"));
}

#[tokio::test]
async fn malformed_body_is_a_deserialize_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works/10.1/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    let err = client.fetch_metadata("10.1/broken").await.unwrap_err();
    assert!(matches!(err, CrossrefError::Deserialize { .. }));
}

/// Hits the real Crossref API. Run with `EDNEWS_CROSSREF_LIVE=1`.
#[tokio::test]
async fn live_metadata_lookup() {
    if std::env::var("EDNEWS_CROSSREF_LIVE").as_deref() != Ok("1") {
        return;
    }
    let client = CrossrefClient::new(&CrossrefConfig::default(), DoiCache::new()).unwrap();
    let meta = client
        .fetch_metadata("10.3102/0002831218817770")
        .await
        .expect("live request should succeed");
    assert!(meta.is_some());
}

#[tokio::test]
async fn journal_works_follow_the_cursor_up_to_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/journals/0002-8312/works"))
        .and(query_param("cursor", "*"))
        .and(query_param("rows", "3"))
        .and(query_param("filter", "type:journal-article"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {
                "next-cursor": "page-2",
                "items": [
                    {"DOI": "10.3102/One", "title": ["First paper"], "abstract": "<jats:p>Short.</jats:p>"},
                    {"title": ["Listed without a DOI"]}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/journals/0002-8312/works"))
        .and(query_param("cursor", "page-2"))
        .and(query_param("rows", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {
                "next-cursor": "page-3",
                "items": [{"DOI": "10.3102/two", "title": ["Second paper"]}]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 0);
    let query = JournalWorksQuery {
        limit: 3,
        ..JournalWorksQuery::default()
    };
    let works = client.fetch_journal_works("0002-8312", &query).await.unwrap();

    let dois: Vec<_> = works.iter().map(|w| w.doi.as_str()).collect();
    assert_eq!(dois, vec!["10.3102/one", "10.3102/two"]);
    assert_eq!(works[0].title.as_deref(), Some("First paper"));
    assert_eq!(works[0].abstract_text.as_deref(), Some("Short."));
}

#[tokio::test]
async fn unknown_journal_has_no_works() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/journals/9999-9999/works"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 2);
    let works = client
        .fetch_journal_works("9999-9999", &JournalWorksQuery::default())
        .await
        .unwrap();
    assert!(works.is_empty());
}
