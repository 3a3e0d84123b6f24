#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Paging through full pipelines: scripted transport and a real HTTP server.

use futures_util::{StreamExt, TryStreamExt};
use http::StatusCode;
use http::header::{AUTHORIZATION, USER_AGENT};
use httpmock::prelude::*;
use nimbus_auth::{AccessToken, BearerTokenPolicy, CredentialError, StaticTokenCredential, TokenCredential};
use nimbus_http::mock::MockTransport;
use nimbus_http::policies::{RetryPolicy, UserAgentPolicy};
use nimbus_http::{
    ClientOptions, ErrorKind, ExponentialBackoff, HttpTransport, Pipeline, Policy, RetryConfig,
    async_trait,
};
use nimbus_sdk::{JsonPager, PagerError, PagerState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn scripted_pipeline(auth: BearerTokenPolicy, transport: &Arc<MockTransport>) -> Pipeline {
    let policies: Vec<Arc<dyn Policy>> = vec![
        Arc::new(UserAgentPolicy::try_new("nimbus-tests/1.0").unwrap()),
        Arc::new(auth),
        Arc::new(RetryPolicy::new(RetryConfig::fast(3))),
    ];
    Pipeline::new(policies, transport.clone())
}

fn static_auth(token: &str) -> BearerTokenPolicy {
    let credential = StaticTokenCredential::new(AccessToken::expiring_in(
        token,
        Duration::from_secs(3600),
    ));
    BearerTokenPolicy::from_credential(Arc::new(credential), ["https://svc.example.com/.default"])
}

#[tokio::test]
async fn retried_page_yields_items_once() {
    let transport = Arc::new(
        MockTransport::new()
            .with_status(StatusCode::SERVICE_UNAVAILABLE)
            .with_status(StatusCode::SERVICE_UNAVAILABLE)
            .with_json(StatusCode::OK, &json!({"items": ["a", "b"], "nextLink": null})),
    );
    let pager = JsonPager::new(scripted_pipeline(static_auth("tok"), &transport))
        .list::<String>(Url::parse("https://svc.example.com/letters").unwrap());

    let mut items = pager.items();
    let mut collected = Vec::new();
    while let Some(item) = items.next().await {
        collected.push(item.unwrap());
    }

    assert_eq!(collected, vec!["a", "b"]);
    assert_eq!(items.fetch_count(), 1);
    assert_eq!(items.state(), PagerState::Exhausted);
    assert_eq!(transport.call_count(), 3);
    for request in transport.requests() {
        assert_eq!(request.headers[AUTHORIZATION], "Bearer tok");
        assert_eq!(request.headers[USER_AGENT], "nimbus-tests/1.0");
    }
}

#[tokio::test]
async fn unresolvable_credential_fails_the_first_page() {
    #[derive(Debug)]
    struct Nothing;

    #[async_trait]
    impl TokenCredential for Nothing {
        async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken, CredentialError> {
            Err(CredentialError::Unavailable("no credential configured".into()))
        }
    }

    let transport = Arc::new(MockTransport::new().with_json(StatusCode::OK, &json!({"items": []})));
    let auth = BearerTokenPolicy::from_credential(Arc::new(Nothing), ["scope"]);
    let pager = JsonPager::new(scripted_pipeline(auth, &transport))
        .list::<String>(Url::parse("https://svc.example.com/letters").unwrap());

    let mut pages = pager.pages();
    let err = pages.next().await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    assert_eq!(pages.state(), PagerState::Failed);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn exhausted_retries_surface_status_and_attempts() {
    let transport = Arc::new(
        MockTransport::new()
            .with_status(StatusCode::TOO_MANY_REQUESTS)
            .with_status(StatusCode::TOO_MANY_REQUESTS)
            .with_status(StatusCode::TOO_MANY_REQUESTS)
            .with_status(StatusCode::TOO_MANY_REQUESTS),
    );
    let pager = JsonPager::new(scripted_pipeline(static_auth("tok"), &transport))
        .list::<String>(Url::parse("https://svc.example.com/letters").unwrap());

    let err = pager.items().next().await.unwrap().unwrap_err();

    let PagerError::Fetch(err) = err else {
        panic!("expected fetch error");
    };
    assert_eq!(err.kind(), ErrorKind::ServiceFault);
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(err.attempts(), Some(4));
    assert_eq!(transport.call_count(), 4);
}

fn http_pipeline() -> Pipeline {
    let transport = HttpTransport::builder()
        .allow_insecure_http()
        .attempt_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let backoff = ExponentialBackoff::fast();
    Pipeline::builder(ClientOptions {
        retry_max_attempts: 1,
        retry_base_delay: backoff.initial,
        retry_max_delay: backoff.max,
        ..Default::default()
    })
    .transport(Arc::new(transport))
    .build()
    .unwrap()
}

#[tokio::test]
async fn walks_pages_served_over_http() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(GET).path("/items");
        then.status(200).json_body(json!({
            "items": [{"id": 1}, {"id": 2}],
            "nextLink": "/items/page-2"
        }));
    });
    let second = server.mock(|when, then| {
        when.method(GET).path("/items/page-2");
        then.status(200)
            .json_body(json!({"items": [{"id": 3}], "nextLink": null}));
    });

    let pager = JsonPager::new(http_pipeline())
        .list::<serde_json::Value>(Url::parse(&server.url("/items")).unwrap());
    let ids: Vec<i64> = pager
        .items()
        .map_ok(|item| item["id"].as_i64().unwrap())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(ids, vec![1, 2, 3]);
    first.assert_calls(1);
    second.assert_calls(1);
}

#[tokio::test]
async fn stopping_early_skips_remaining_pages() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(GET).path("/items");
        then.status(200)
            .json_body(json!({"items": [1, 2], "nextLink": "/items/page-2"}));
    });
    let second = server.mock(|when, then| {
        when.method(GET).path("/items/page-2");
        then.status(200).json_body(json!({"items": [3]}));
    });

    let pager = JsonPager::new(http_pipeline())
        .list::<u32>(Url::parse(&server.url("/items")).unwrap());
    let head: Vec<u32> = pager.items().take(2).try_collect().await.unwrap();

    assert_eq!(head, vec![1, 2]);
    first.assert_calls(1);
    second.assert_calls(0);
}
