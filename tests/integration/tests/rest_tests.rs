//! REST dispatcher integration tests
//!
//! Each test runs against its own in-process mock API.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::time::{Duration, Instant};

use chat_core::ClientEvent;
use chat_rest::{Auth, FileAttachment, ResponseBody, RestError, RestRequest};
use futures::future::join_all;
use integration_tests::{gap_ms, next_event, MockApi, MockResponse, TEST_TOKEN};
use serde_json::json;

const CHANNEL: &str = "123456789012345678";

fn messages_path() -> String {
    format!("/channels/{CHANNEL}/messages")
}

// ============================================================================
// Basic Dispatch
// ============================================================================

#[tokio::test]
async fn test_json_response_and_request_event() {
    let mock = MockApi::start().await.unwrap();
    let (handler, events) = mock.handler().unwrap();
    let mut rx = events.subscribe();

    mock.enqueue(
        "/users/@me",
        MockResponse::ok(json!({"id": "1", "username": "bot"})).header("x-ratelimit-limit", 5),
    );

    let body = handler
        .auth_request(RestRequest::get("users/@me"))
        .await
        .unwrap();
    assert_eq!(body.as_json().unwrap()["username"], "bot");

    let event = next_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ClientEvent::Request(_))
    })
    .await
    .unwrap();
    let ClientEvent::Request(request) = event else {
        unreachable!()
    };
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/users/@me");
    assert_eq!(request.route, "/users/@me");
    assert!(request.with_auth);
    assert_eq!(request.status, 200);
    assert_eq!(request.response_body.unwrap()["id"], "1");
}

#[tokio::test]
async fn test_no_content_is_empty() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    let path = format!("/channels/{CHANNEL}/typing");
    mock.enqueue(&path, MockResponse::status(204));

    let body = handler
        .auth_request(RestRequest::post(path.as_str()))
        .await
        .unwrap();
    assert_eq!(body, ResponseBody::Empty);
}

#[tokio::test]
async fn test_binary_passthrough() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.enqueue("/avatar.png", MockResponse::raw(200, "image/png", vec![0x89, b'P', b'N', b'G']));

    let body = handler.request(RestRequest::get("/avatar.png")).await.unwrap();
    assert_eq!(body, ResponseBody::Binary(vec![0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn test_request_headers_and_query() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler_with(|options| {
        options.super_properties = Some("eyJvcyI6IkxpbnV4In0=".to_string());
    })
    .unwrap();
    let path = format!("/guilds/{CHANNEL}/bans/234567890123456789");
    mock.enqueue(&path, MockResponse::status(204));

    handler
        .request(
            RestRequest::put(path.as_str())
                .json(json!({"delete_message_seconds": 60}))
                .reason("spam & abuse")
                .auth(Auth::Token("Bot explicit".to_string()))
                .query("with_counts", true),
        )
        .await
        .unwrap();

    let recorded = &mock.requests_to(&path)[0];
    assert_eq!(recorded.method, "PUT");
    assert_eq!(recorded.header("authorization"), Some("Bot explicit"));
    assert_eq!(recorded.header("x-audit-log-reason"), Some("spam%20%26%20abuse"));
    assert_eq!(recorded.header("x-super-properties"), Some("eyJvcyI6IkxpbnV4In0="));
    assert!(recorded.header("user-agent").unwrap().starts_with("DiscordBot"));
    assert_eq!(recorded.header("content-type"), Some("application/json"));
    assert_eq!(recorded.query.as_deref(), Some("with_counts=true"));
    assert_eq!(recorded.json().unwrap(), json!({"delete_message_seconds": 60}));
}

#[tokio::test]
async fn test_multipart_upload() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.enqueue(&messages_path(), MockResponse::ok(json!({"id": "9"})));

    handler
        .auth_request(
            RestRequest::post(messages_path())
                .json(json!({"content": "see attached"}))
                .file(FileAttachment::new("notes.txt", b"hello".to_vec())),
        )
        .await
        .unwrap();

    let recorded = &mock.requests_to(&messages_path())[0];
    assert!(recorded
        .header("content-type")
        .unwrap()
        .starts_with("multipart/form-data"));

    let body = String::from_utf8_lossy(&recorded.body);
    assert!(body.contains("name=\"files[0]\"; filename=\"notes.txt\""));
    assert!(body.contains("name=\"payload_json\""));
    assert!(body.contains(r#"{"content":"see attached"}"#));
}

// ============================================================================
// Bucket Sequencing
// ============================================================================

#[tokio::test]
async fn test_same_route_runs_in_submission_order() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.always(
        &messages_path(),
        MockResponse::ok(json!([]))
            .header("x-ratelimit-limit", 5)
            .header("x-ratelimit-remaining", 4)
            .delay(Duration::from_millis(100)),
    );

    let calls = (0..5).map(|n| {
        handler.auth_request(RestRequest::get(messages_path()).query("n", n))
    });
    for result in join_all(calls).await {
        result.unwrap();
    }

    let recorded = mock.requests_to(&messages_path());
    let order: Vec<_> = recorded.iter().map(|r| r.query.clone().unwrap()).collect();
    assert_eq!(order, vec!["n=0", "n=1", "n=2", "n=3", "n=4"]);

    // Each request starts only after the previous response was handled
    for pair in recorded.windows(2) {
        assert!(gap_ms(&pair[0], &pair[1]) >= 90);
    }
}

#[tokio::test]
async fn test_distinct_routes_run_concurrently() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    for channel in ["111111111111111111", "222222222222222222"] {
        mock.always(
            &format!("/channels/{channel}"),
            MockResponse::ok(json!({})).delay(Duration::from_millis(300)),
        );
    }

    let start = Instant::now();
    let (a, b) = tokio::join!(
        handler.auth_request(RestRequest::get("/channels/111111111111111111")),
        handler.auth_request(RestRequest::get("/channels/222222222222222222")),
    );
    a.unwrap();
    b.unwrap();
    assert!(start.elapsed() < Duration::from_millis(550));
    assert_eq!(handler.bucket_count(), 2);
}

#[tokio::test]
async fn test_exhausted_bucket_waits_for_reset_after() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.enqueue(
        &messages_path(),
        MockResponse::ok(json!({"id": "1"}))
            .header("x-ratelimit-limit", 1)
            .header("x-ratelimit-remaining", 0)
            .header("x-ratelimit-reset-after", 2),
    );
    mock.always(&messages_path(), MockResponse::ok(json!({"id": "2"})));

    handler
        .auth_request(RestRequest::post(messages_path()).json(json!({"content": "a"})))
        .await
        .unwrap();

    let route = format!("/channels/{CHANNEL}/messages");
    let snapshot = handler.bucket_snapshot(&route).unwrap();
    assert_eq!(snapshot.remaining, 0);

    handler
        .auth_request(RestRequest::post(messages_path()).json(json!({"content": "b"})))
        .await
        .unwrap();

    let recorded = mock.requests_to(&messages_path());
    assert_eq!(recorded.len(), 2);
    assert!(gap_ms(&recorded[0], &recorded[1]) >= 1_900);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_429_is_retried_transparently() {
    let mock = MockApi::start().await.unwrap();
    let (handler, events) = mock.handler().unwrap();
    let mut rx = events.subscribe();

    mock.enqueue(
        &messages_path(),
        MockResponse::json(429, json!({"message": "You are being rate limited.", "retry_after": 0.3, "global": false}))
            .header("x-ratelimit-limit", 5)
            .header("x-ratelimit-remaining", 0)
            .header("retry-after", "0.3")
            .header("x-ratelimit-scope", "user"),
    );
    mock.enqueue(&messages_path(), MockResponse::ok(json!({"id": "1"})));

    let body = handler
        .auth_request(RestRequest::post(messages_path()).json(json!({"content": "hi"})))
        .await
        .unwrap();
    assert_eq!(body.as_json().unwrap()["id"], "1");

    let recorded = mock.requests_to(&messages_path());
    assert_eq!(recorded.len(), 2);
    assert!(gap_ms(&recorded[0], &recorded[1]) >= 250);
    assert_eq!(recorded[0].body, recorded[1].body);

    next_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ClientEvent::Debug { message, .. } if message.starts_with("429"))
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_shared_scope_uses_body_retry_after() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();

    mock.enqueue(
        &messages_path(),
        MockResponse::json(429, json!({"retry_after": 0.4, "global": false}))
            .header("retry-after", "0")
            .header("x-ratelimit-scope", "shared"),
    );
    mock.enqueue(&messages_path(), MockResponse::ok(json!({})));

    handler.auth_request(RestRequest::get(messages_path())).await.unwrap();

    let recorded = mock.requests_to(&messages_path());
    assert!(gap_ms(&recorded[0], &recorded[1]) >= 350);
}

#[tokio::test]
async fn test_global_limit_blocks_authenticated_routes() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();

    mock.enqueue(
        &messages_path(),
        MockResponse::json(429, json!({"retry_after": 0.5, "global": true}))
            .header("x-ratelimit-global", "true")
            .header("retry-after", "0.5")
            .header("x-ratelimit-scope", "global"),
    );
    mock.always(&messages_path(), MockResponse::ok(json!({})));
    mock.always("/users/@me", MockResponse::ok(json!({})));
    mock.always("/gateway", MockResponse::ok(json!({"url": "wss://gateway.test"})));

    let limited = handler.auth_request(RestRequest::get(messages_path()));
    let other = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handler.is_globally_blocked());

        // Unauthenticated traffic is not subject to the global limit
        let started = Instant::now();
        handler.request(RestRequest::get("/gateway")).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));

        handler.auth_request(RestRequest::get("/users/@me")).await
    };
    let (limited, other) = tokio::join!(limited, other);
    limited.unwrap();
    other.unwrap();

    let first = &mock.requests_to(&messages_path())[0];
    let blocked = &mock.requests_to("/users/@me")[0];
    assert!(gap_ms(first, blocked) >= 450);
    assert!(!handler.is_globally_blocked());
}

#[tokio::test]
async fn test_502_retried_then_http_error() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.always(
        &messages_path(),
        MockResponse::raw(502, "text/html", "<html>Bad Gateway</html>"),
    );

    let err = handler
        .auth_request(RestRequest::post(messages_path()).json(json!({"content": "x"})))
        .await
        .unwrap_err();

    match err {
        RestError::Http(http) => {
            assert_eq!(http.status, 502);
            assert_eq!(http.method, "POST");
            assert_eq!(http.path, messages_path());
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }

    let recorded = mock.requests_to(&messages_path());
    assert_eq!(recorded.len(), 4);
    for request in &recorded[1..] {
        assert_eq!(request.method, recorded[0].method);
        assert_eq!(request.body, recorded[0].body);
    }
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_structured_api_error() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.enqueue(
        &messages_path(),
        MockResponse::json(
            400,
            json!({
                "code": 50035,
                "message": "Invalid Form Body",
                "errors": {"content": {"_errors": [{"code": "BASE_TYPE_MAX_LENGTH", "message": "Must be 2000 or fewer in length."}]}}
            }),
        ),
    );

    let err = handler
        .auth_request(RestRequest::post(messages_path()).json(json!({"content": "x"})))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(50035));
    assert_eq!(err.status(), Some(400));
    let RestError::Api(api) = err else {
        unreachable!()
    };
    assert_eq!(api.errors, vec!["content: Must be 2000 or fewer in length.".to_string()]);
}

#[tokio::test]
async fn test_timeout_releases_bucket() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler_with(|options| {
        options.request_timeout = Some(Duration::from_millis(150));
    })
    .unwrap();

    mock.enqueue(
        &messages_path(),
        MockResponse::ok(json!({})).delay(Duration::from_millis(600)),
    );
    mock.enqueue(&messages_path(), MockResponse::ok(json!({"id": "2"})));

    let err = handler
        .auth_request(RestRequest::get(messages_path()))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The route is still usable
    let body = tokio::time::timeout(
        Duration::from_secs(2),
        handler.auth_request(RestRequest::get(messages_path())),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(body.as_json().unwrap()["id"], "2");
}

#[tokio::test]
async fn test_invalid_method_rejected_before_network() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();

    let err = handler
        .request(RestRequest::new("OPTIONS", "/users/@me"))
        .await
        .unwrap_err();
    assert!(matches!(err, RestError::InvalidMethod(_)));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_default_token_is_sent() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.enqueue("/users/@me", MockResponse::ok(json!({})));

    handler.auth_request(RestRequest::get("/users/@me")).await.unwrap();
    assert_eq!(
        mock.requests_to("/users/@me")[0].header("authorization"),
        Some(TEST_TOKEN)
    );
}

#[tokio::test]
async fn test_image_field_sent_as_data_url() {
    let mock = MockApi::start().await.unwrap();
    let (handler, _events) = mock.handler().unwrap();
    mock.enqueue("/users/@me", MockResponse::ok(json!({"id": "1"})));

    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
    let request = RestRequest::patch("/users/@me").image("avatar", &png).unwrap();
    handler.auth_request(request).await.unwrap();

    let sent = mock.requests_to("/users/@me")[0].json().unwrap();
    assert!(sent["avatar"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));

    let err = RestRequest::patch("/users/@me")
        .image_url("avatar", "not-a-data-url")
        .unwrap_err();
    assert!(matches!(err, RestError::InvalidImage { .. }));
    assert_eq!(mock.requests().len(), 1);
}
