use agentbox_session::{
    HttpSessionClient, HttpSessionClientConfig, PermissionResponse, PromptPart, SessionClient,
    SessionError,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> HttpSessionClient {
    let config = HttpSessionClientConfig::default().with_request_timeout(Duration::from_secs(2));
    HttpSessionClient::new(config).expect("client build")
}

#[tokio::test]
async fn test_health_ok_and_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"healthy": true})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client();
    client.health(&server.uri()).await.expect("first health check passes");

    match client.health(&server.uri()).await {
        Err(SessionError::UnexpectedStatus { status, .. }) => assert_eq!(status, 503),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_health_connection_refused_is_transport() {
    let err = client()
        .health("http://127.0.0.1:1")
        .await
        .expect_err("nothing listens on port 1");
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_create_session_returns_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ses-123",
            "title": "New session"
        })))
        .mount(&server)
        .await;

    let id = client()
        .create_session(&format!("{}/", server.uri()))
        .await
        .expect("session create");
    assert_eq!(id, "ses-123");
}

#[tokio::test]
async fn test_create_session_without_id_is_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "x"})))
        .mount(&server)
        .await;

    let err = client().create_session(&server.uri()).await.expect_err("missing id");
    assert!(matches!(err, SessionError::InvalidResponse { endpoint: "session", .. }));
}

#[tokio::test]
async fn test_prompt_accepts_every_success_code_it_knows() {
    for code in [200u16, 202, 204] {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session/ses-1/prompt_async"))
            .and(body_json(json!({
                "parts": [{"type": "text", "text": "fix the build"}]
            })))
            .respond_with(ResponseTemplate::new(code))
            .expect(1)
            .mount(&server)
            .await;

        client()
            .send_prompt_async(&server.uri(), "ses-1", &[PromptPart::text("fix the build")])
            .await
            .unwrap_or_else(|e| panic!("status {} rejected: {}", code, e));

        server.verify().await;
    }
}

#[tokio::test]
async fn test_prompt_server_error_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session/ses-1/prompt_async"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client()
        .send_prompt_async(&server.uri(), "ses-1", &[PromptPart::text("hi")])
        .await
        .expect_err("500 must fail");

    match err {
        SessionError::UnexpectedStatus { endpoint, status, body } => {
            assert_eq!(endpoint, "prompt_async");
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_abort_reads_boolean_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session/ses-1/abort"))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/ses-2/abort"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client();
    assert!(!client.abort_session(&server.uri(), "ses-1").await.unwrap());
    assert!(client.abort_session(&server.uri(), "ses-2").await.unwrap());
}

#[tokio::test]
async fn test_permission_reply_body_and_codes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session/ses-1/permissions/perm-1"))
        .and(body_json(json!({"response": "once"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/ses-1/permissions/perm-2"))
        .and(body_json(json!({"response": "reject"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/ses-1/permissions/perm-3"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let client = client();
    client
        .reply_permission(&server.uri(), "ses-1", "perm-1", PermissionResponse::Once)
        .await
        .expect("200 accepted");
    client
        .reply_permission(&server.uri(), "ses-1", "perm-2", PermissionResponse::Reject)
        .await
        .expect("204 accepted");
    assert!(client
        .reply_permission(&server.uri(), "ses-1", "perm-3", PermissionResponse::Always)
        .await
        .is_err());

    server.verify().await;
}

#[tokio::test]
async fn test_subscribe_events_delivers_in_order_then_closes() {
    let server = MockServer::start().await;

    let body = concat!(
        ": keepalive\n\n",
        "event: session.status\n",
        "data: {\"sessionID\":\"ses-1\",\"status\":{\"type\":\"busy\"}}\n\n",
        "data: {\"type\":\"message.part.updated\",\"properties\":{\"part\":{\"sessionID\":\"ses-1\"}}}\n\n",
        "data: {not json}\n\n",
        "event: session.idle\n",
        "data: {\"sessionID\":\"ses-1\"}\n\n",
    );

    Mock::given(method("GET"))
        .and(path("/event"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _reader = client().subscribe_events(&server.uri(), tx);

    let mut types = Vec::new();
    loop {
        let next = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event timeout");
        match next {
            Some(event) => types.push(event.event_type),
            None => break,
        }
    }

    assert_eq!(
        types,
        vec!["session.status", "message.part.updated", "session.idle"]
    );
}

#[tokio::test]
async fn test_subscribe_events_rejected_closes_channel() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _reader = client().subscribe_events(&server.uri(), tx);

    let next = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("channel should close");
    assert!(next.is_none());
}
