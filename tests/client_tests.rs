use anyhow::Result;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spider_search::client::{ClientError, LinkList, SearchClient, SearchSession, ViewState, count_message};

mod test_helpers {
    use super::*;

    pub fn result_json(id: i64, score: f64, links: usize) -> serde_json::Value {
        let links: Vec<String> = (0..links).map(|i| format!("http://l.test/{i}")).collect();
        json!({
            "id": id,
            "score": score,
            "title": format!("Result {id}"),
            "url": format!("http://r.test/{id}"),
            "snippet": "snippet",
            "last_modified": null,
            "size": 42,
            "keywords": [{"word": "crab", "frequency": 3}],
            "parent_links": links,
            "child_links": [],
        })
    }

    pub async fn mount_search(server: &MockServer, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/api/search"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }
}

use test_helpers::*;

#[tokio::test]
async fn test_blank_query_never_hits_the_network() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = SearchClient::new(&server.uri())?;
    assert_eq!(client.search("   ").await, Err(ClientError::EmptyQuery));

    let mut session = SearchSession::new(client);
    let state = session.submit("").await;
    assert_eq!(state, &ViewState::Error("Please enter a search query".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_results_state_and_truncation_message() -> Result<()> {
    let server = MockServer::start().await;
    mount_search(
        &server,
        200,
        json!({
            "results": [result_json(1, 0.9, 0), result_json(2, 0.5, 0)],
            "query": "crab",
            "total_results": 120,
        }),
    )
    .await;

    let mut session = SearchSession::new(SearchClient::new(&server.uri())?);
    session.submit("crab").await;
    let ViewState::Results(response) = session.state().clone() else {
        panic!("expected results, got {:?}", session.state());
    };
    assert_eq!(response.results.len(), 2);
    assert_eq!(
        count_message(&response).as_deref(),
        Some("Showing top 2 of 120 results")
    );
    assert!(session.render().contains("Showing top 2 of 120 results"));
    Ok(())
}

#[tokio::test]
async fn test_empty_result_set() -> Result<()> {
    let server = MockServer::start().await;
    mount_search(&server, 200, json!({"results": [], "query": "zeta", "total_results": 0})).await;

    let mut session = SearchSession::new(SearchClient::new(&server.uri())?);
    assert_eq!(
        session.submit("zeta").await,
        &ViewState::Empty {
            query: "zeta".to_string()
        }
    );
    assert_eq!(session.render(), "No results found for \"zeta\"");
    Ok(())
}

#[tokio::test]
async fn test_server_failure_is_a_network_error() -> Result<()> {
    let server = MockServer::start().await;
    mount_search(&server, 500, json!({"error": "database is locked"})).await;

    let client = SearchClient::new(&server.uri())?;
    let err = client.search("crab").await.unwrap_err();
    assert_eq!(err, ClientError::Network);
    assert_eq!(
        err.to_string(),
        "Failed to execute search. Make sure the server is running."
    );

    // the server's own error text stays out of the view
    let mut session = SearchSession::new(client);
    let ViewState::Error(message) = session.submit("crab").await.clone() else {
        panic!("expected an error state");
    };
    assert!(!message.contains("database is locked"));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() -> Result<()> {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = SearchClient::new(&uri)?;
    assert_eq!(
        client.search("crab").await.unwrap_err().to_string(),
        "Failed to execute search. Make sure the server is running."
    );
    Ok(())
}

#[tokio::test]
async fn test_error_body_is_a_search_error() -> Result<()> {
    let server = MockServer::start().await;
    mount_search(&server, 200, json!({"error": "index not ready"})).await;

    let mut session = SearchSession::new(SearchClient::new(&server.uri())?);
    assert_eq!(
        session.submit("crab").await,
        &ViewState::Error("Search error: index not ready".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_new_search_resets_link_expansion() -> Result<()> {
    let server = MockServer::start().await;
    mount_search(
        &server,
        200,
        json!({"results": [result_json(7, 1.0, 9)], "query": "crab", "total_results": 1}),
    )
    .await;

    let mut session = SearchSession::new(SearchClient::new(&server.uri())?);
    session.submit("crab").await;
    session.expansion_mut().toggle(7, LinkList::Parent);
    assert!(session.render().contains("http://l.test/8"));

    session.submit("crab").await;
    assert!(!session.expansion().is_expanded(7, LinkList::Parent));
    let text = session.render();
    assert!(!text.contains("http://l.test/8"));
    assert!(text.contains("... 4 more"));
    Ok(())
}
