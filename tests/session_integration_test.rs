// Integration tests for ChatSession over a mocked graph service.
// These cover the full submit -> stream -> settle lifecycle, including
// route-decision suppression, interrupts, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use docent::config::Config;
use docent::graph::GraphClient;
use docent::session::{
    ChatSession, Role, SessionPhase, SessionUpdate, PROCESSING_ERROR_MESSAGE,
};

async fn mock_stream_server(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex("^/threads/[^/]+/runs/stream$"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;
    server
}

async fn session_for(server: &MockServer) -> ChatSession {
    let client = Arc::new(GraphClient::with_base_url(server.uri()));
    let config = Config::default().with_skip_health_check(true);
    let mut session = ChatSession::new(client, config);
    assert!(session.connect().await);
    session
}

#[tokio::test]
async fn test_submit_streams_accumulating_answer() {
    let body = concat!(
        "data: {\"event\": \"messages/metadata\", \"data\": {\"run_id\": \"run-1\"}}\n\n",
        "data: {\"event\": \"messages/partial\", \"data\": [{\"type\": \"ai\", \"content\": \"The\", \"id\": \"m-1\"}]}\n\n",
        "data: {\"event\": \"messages/partial\", \"data\": [{\"type\": \"ai\", \"content\": \"The answer is 4\", \"id\": \"m-1\"}]}\n\n",
        "data: {\"event\": \"messages/metadata\", \"data\": {\"m-1\": {\"metadata\": {\"langgraph_node\": \"direct_answer\"}}}}\n\n",
    );
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("what is 2 + 2").expect("submit accepted");
    session.run_until_settled().await;

    assert_eq!(session.phase(), SessionPhase::Connected);
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.messages()[0].role, Role::User);
    assert_eq!(session.messages()[1].role, Role::Assistant);
    assert_eq!(session.messages()[1].content, "The answer is 4");
    assert_eq!(
        session.sources().get("m-1").map(String::as_str),
        Some("direct_answer")
    );
    assert!(session.take_notice().is_none());
}

#[tokio::test]
async fn test_route_decision_never_reaches_the_conversation() {
    let body = concat!(
        "data: {\"event\": \"messages/partial\", \"data\": [{\"type\": \"ai\", \"content\": \"{\\\"route\\\": \\\"retrieve\\\"}\"}]}\n\n",
        "data: {\"event\": \"messages/partial\", \"data\": [{\"type\": \"ai\", \"content\": \"Paris is the capital of France.\"}]}\n\n",
    );
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("capital of France?").expect("submit accepted");
    session.run_until_settled().await;

    assert_eq!(session.messages()[1].content, "Paris is the capital of France.");
    assert!(session.take_notice().is_none());
}

#[tokio::test]
async fn test_upstream_error_before_content_sets_notice() {
    let body = "data: {\"event\": \"error\", \"data\": {\"message\": \"model exploded\"}}\n\n";
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("hello").expect("submit accepted");
    session.run_until_settled().await;

    assert_eq!(session.messages()[1].content, PROCESSING_ERROR_MESSAGE);
    assert_eq!(session.take_notice().as_deref(), Some("model exploded"));
    assert_eq!(session.phase(), SessionPhase::Connected);
}

#[tokio::test]
async fn test_upstream_error_after_content_preserves_partial() {
    let body = concat!(
        "data: {\"event\": \"messages\", \"data\": [{\"content\": \"partial answer\"}]}\n\n",
        "data: {\"event\": \"error\", \"data\": {\"message\": \"model exploded\"}}\n\n",
    );
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("hello").expect("submit accepted");
    session.run_until_settled().await;

    assert_eq!(session.messages()[1].content, "partial answer");
    assert!(session.take_notice().is_none());
}

#[tokio::test]
async fn test_interrupt_after_partial_content_is_silent() {
    let body = concat!(
        "data: {\"event\": \"messages\", \"data\": [{\"content\": \"The answer is 4\"}]}\n\n",
        "data: {\"event\": \"error\", \"data\": {\"message\": \"interrupt\"}}\n\n",
    );
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("what is 2 + 2").expect("submit accepted");
    session.run_until_settled().await;

    assert_eq!(session.messages()[1].content, "The answer is 4");
    assert!(session.take_notice().is_none());
    assert_eq!(session.phase(), SessionPhase::Connected);
}

#[tokio::test]
async fn test_untyped_delta_treated_as_assistant() {
    let body =
        "data: {\"event\": \"messages\", \"data\": [{\"content\": \"untyped but real\"}]}\n\n";
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("hello").expect("submit accepted");
    session.run_until_settled().await;

    assert_eq!(session.messages()[1].content, "untyped but real");
}

#[tokio::test]
async fn test_non_assistant_deltas_ignored() {
    let body = concat!(
        "data: {\"event\": \"messages\", \"data\": [{\"type\": \"human\", \"content\": \"echo of the question\"}]}\n\n",
        "data: {\"event\": \"messages\", \"data\": [{\"type\": \"tool\", \"content\": \"raw tool output\"}]}\n\n",
    );
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("hello").expect("submit accepted");
    session.run_until_settled().await;

    // Nothing assistant-like streamed; the empty placeholder is finalized
    // as-is with no notice.
    assert_eq!(session.messages()[1].content, "");
    assert!(session.take_notice().is_none());
}

#[tokio::test]
async fn test_stop_requests_remote_cancellation() {
    let server = MockServer::start().await;
    // A long delay keeps the run in flight while we stop it.
    Mock::given(method("POST"))
        .and(path_regex("^/threads/[^/]+/runs/stream$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {}\n\n", "text/event-stream")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex("^/threads/[^/]+/runs/[^/]+/cancel$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut session = session_for(&server).await;
    session.submit("long question").expect("submit accepted");

    // The run id normally arrives on the first metadata event; with the
    // response held back, feed it through the same update path.
    session.handle_update(SessionUpdate::RunStarted {
        run_id: "run-7".to_string(),
    });
    session.stop();

    assert!(!session.is_submitting());
    assert_eq!(session.phase(), SessionPhase::Connected);
    // Only the user message remains; the placeholder never got content.
    assert_eq!(session.messages().len(), 1);
    assert!(session.take_notice().is_none());

    // Give the fire-and-forget cancel request a moment to land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancel_hits = server
        .received_requests()
        .await
        .expect("recorded requests")
        .iter()
        .filter(|r| r.url.path().ends_with("/cancel"))
        .count();
    assert_eq!(cancel_hits, 1);
}

#[tokio::test]
async fn test_second_conversation_uses_fresh_thread() {
    let body = "data: {\"event\": \"messages\", \"data\": [{\"content\": \"hi there\"}]}\n\n";
    let server = mock_stream_server(body).await;
    let mut session = session_for(&server).await;

    session.submit("hello").expect("submit accepted");
    session.run_until_settled().await;
    let first_thread = session.thread_id().to_string();

    session.new_conversation();
    session.submit("hello again").expect("submit accepted");
    session.run_until_settled().await;

    assert_ne!(session.thread_id(), first_thread);
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.messages()[1].content, "hi there");

    let stream_paths: Vec<String> = server
        .received_requests()
        .await
        .expect("recorded requests")
        .iter()
        .filter(|r| r.url.path().ends_with("/runs/stream"))
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(stream_paths.len(), 2);
    assert_ne!(stream_paths[0], stream_paths[1]);
}
