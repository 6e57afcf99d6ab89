use anyhow::Result;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spider_search::config::CrawlConfig;
use spider_search::crawler::crawl_and_index;
use spider_search::db::{Database, PageRepo};

mod test_helpers {
    use super::*;
    use spider_search::analyzer::TextAnalyzer;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub async fn create_test_db() -> Result<(Database, TempDir)> {
        let dir = tempfile::tempdir()?;
        let db = Database::open(&dir.path().join("crawl.db"), 2, Duration::from_secs(5)).await?;
        Ok((db, dir))
    }

    pub fn create_test_analyzer() -> Arc<TextAnalyzer> {
        let stop_words: HashSet<String> = ["the", "a", "to"].iter().map(|w| w.to_string()).collect();
        Arc::new(TextAnalyzer::standard(Arc::new(stop_words)))
    }

    pub fn crawl_config(max_pages: usize, max_depth: Option<usize>) -> CrawlConfig {
        CrawlConfig {
            max_pages,
            max_depth,
            concurrency: 2,
            fetch_timeout: Duration::from_secs(5),
        }
    }

    pub async fn mount_html(server: &MockServer, route: &str, html: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html.to_string(), "text/html"))
            .mount(server)
            .await;
    }

    /// `/` links to `/a`, `/b` and `/c`; `/a` links back home and to `/b`;
    /// `/b` links to a page that does not exist; `/c` is plain text.
    pub async fn mount_site(server: &MockServer) {
        mount_html(
            server,
            "/",
            r##"<html><head><title>Home</title></head><body>
                <p>Welcome to the test site</p>
                <a href="/a">Page A</a> <a href="/b#section">Page B</a> <a href="/c">Notes</a>
                <a href="mailto:admin@example.com">Mail</a>
            </body></html>"##,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                    .set_body_raw(
                        r#"<html><head><title>Alpha</title></head><body><p>alpha content</p>
                           <a href="/">Home</a><a href="/b">B</a></body></html>"#
                            .to_string(),
                        "text/html",
                    ),
            )
            .mount(server)
            .await;
        mount_html(
            server,
            "/b",
            r#"<html><head><title>Beta</title></head><body><p>beta content</p>
               <a href="/missing">Gone</a></body></html>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/c"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("just notes".to_string(), "text/plain"))
            .mount(server)
            .await;
    }
}

use test_helpers::*;

#[tokio::test]
async fn test_crawl_indexes_reachable_pages() -> Result<()> {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let (db, _dir) = create_test_db().await?;

    let (crawled, indexed) =
        crawl_and_index(&db, create_test_analyzer(), &crawl_config(50, None), &server.uri()).await?;

    // `/c` is not html and `/missing` is a 404
    assert_eq!(crawled.pages_fetched, 3);
    assert_eq!(crawled.pages_failed, 2);
    assert_eq!(indexed.pages_indexed, 3);

    let repo = PageRepo::new(&db);
    assert_eq!(repo.count().await?, 3);

    let home_url = format!("{}/", server.uri());
    let home = repo.find_by_url(&home_url).await?.expect("home page indexed");
    assert_eq!(home.title.as_deref(), Some("Home"));
    assert!(home.content.unwrap_or_default().contains("Welcome to the test site"));

    let children = repo.child_links(&home_url).await?;
    assert_eq!(
        children,
        vec![
            format!("{}/a", server.uri()),
            format!("{}/b", server.uri()),
            format!("{}/c", server.uri()),
        ]
    );
    let parents = repo.parent_links(&format!("{}/b", server.uri())).await?;
    assert_eq!(parents.len(), 2);

    db.close().await;
    Ok(())
}

#[tokio::test]
async fn test_last_modified_is_normalized() -> Result<()> {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let (db, _dir) = create_test_db().await?;

    crawl_and_index(&db, create_test_analyzer(), &crawl_config(50, None), &server.uri()).await?;

    let repo = PageRepo::new(&db);
    let alpha = repo
        .find_by_url(&format!("{}/a", server.uri()))
        .await?
        .expect("alpha indexed");
    assert_eq!(alpha.last_modified.as_deref(), Some("2015-10-21T07:28:00+00:00"));
    assert!(alpha.size.unwrap_or_default() > 0);

    let beta = repo
        .find_by_url(&format!("{}/b", server.uri()))
        .await?
        .expect("beta indexed");
    assert!(beta.last_modified.is_none());

    db.close().await;
    Ok(())
}

#[tokio::test]
async fn test_crawl_respects_max_pages() -> Result<()> {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let (db, _dir) = create_test_db().await?;

    let (crawled, _) =
        crawl_and_index(&db, create_test_analyzer(), &crawl_config(2, None), &server.uri()).await?;

    assert_eq!(crawled.pages_fetched, 2);
    assert_eq!(PageRepo::new(&db).count().await?, 2);

    db.close().await;
    Ok(())
}

#[tokio::test]
async fn test_crawl_respects_max_depth() -> Result<()> {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let (db, _dir) = create_test_db().await?;

    let (crawled, _) =
        crawl_and_index(&db, create_test_analyzer(), &crawl_config(50, Some(0)), &server.uri()).await?;

    assert_eq!(crawled.pages_fetched, 1);
    assert_eq!(crawled.pages_failed, 0);
    assert_eq!(PageRepo::new(&db).count().await?, 1);

    db.close().await;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_seed_fails_softly() -> Result<()> {
    let server = MockServer::start().await;
    let (db, _dir) = create_test_db().await?;

    let (crawled, indexed) =
        crawl_and_index(&db, create_test_analyzer(), &crawl_config(5, None), &server.uri()).await?;

    assert_eq!(crawled.pages_fetched, 0);
    assert_eq!(crawled.pages_failed, 1);
    assert_eq!(indexed.pages_indexed, 0);

    db.close().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_seed_is_an_error() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let res = crawl_and_index(&db, create_test_analyzer(), &crawl_config(5, None), "not a url").await;
    assert!(res.is_err());
    db.close().await;
    Ok(())
}
