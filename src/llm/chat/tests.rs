use super::*;
use crate::llm::client::ChatDelta;
use crate::llm::testing::{Reply, ScriptedClient};

fn per_message(messages: &[ChatMessage]) -> usize {
    messages.len()
}

fn s(text: &str) -> ChatMessage {
    ChatMessage::System(text.to_string())
}

fn u(text: &str) -> ChatMessage {
    ChatMessage::User(text.to_string())
}

fn a(text: &str) -> ChatMessage {
    ChatMessage::Assistant(text.to_string())
}

fn session_with(client: ScriptedClient, system_prompt: &str) -> (ChatSession, Arc<ScriptedClient>) {
    let client = Arc::new(client);
    let options = SessionOptions {
        system_prompt: system_prompt.to_string(),
        ..SessionOptions::default()
    };
    (ChatSession::new(Arc::clone(&client) as Arc<dyn LlmClient>, options), client)
}

fn request(prompt: &str) -> SendRequest {
    SendRequest {
        model: "llama3".to_string(),
        prompt: prompt.to_string(),
        ..SendRequest::default()
    }
}

#[test]
fn truncate_keeps_history_that_fits() {
    let history = vec![s("s"), u("u1"), a("a1")];
    assert_eq!(truncate_history(&per_message, &history, 7), history);
}

#[test]
fn truncate_keeps_history_at_exact_limit() {
    let history = vec![s("s"), u("u1"), a("a1")];
    assert_eq!(truncate_history(&per_message, &history, 3), history);
}

#[test]
fn truncate_drops_oldest_pair() {
    let history = vec![s("s"), u("u1"), a("a1"), u("u2"), a("a2")];
    assert_eq!(
        truncate_history(&per_message, &history, 3),
        vec![s("s"), u("u2"), a("a2")]
    );
}

#[test]
fn truncate_drops_orphan_assistant_singly() {
    let history = vec![s("s"), a("a1"), u("u2"), a("a2")];
    assert_eq!(
        truncate_history(&per_message, &history, 3),
        vec![s("s"), u("u2"), a("a2")]
    );
}

#[test]
fn truncate_without_system_head() {
    let history = vec![a("a1"), a("a1"), u("u2"), a("a2"), u("u3"), a("a3")];
    assert_eq!(
        truncate_history(&per_message, &history, 4),
        vec![u("u2"), a("a2"), u("u3"), a("a3")]
    );
}

#[test]
fn truncate_never_drops_system_head() {
    let history = vec![s("s"), a("a1"), u("u2"), a("a2"), u("u3"), a("a3")];
    assert_eq!(truncate_history(&per_message, &history, 1), vec![s("s")]);
}

#[test]
fn truncate_zero_limit_disables() {
    let history = vec![s("s"), u("u1"), a("a1"), u("u2"), a("a2")];
    assert_eq!(truncate_history(&per_message, &history, 0), history);
}

#[test]
fn truncate_empty_history() {
    assert!(truncate_history(&per_message, &[], 3).is_empty());
}

#[test]
fn truncate_is_idempotent() {
    let history = vec![s("s"), u("u1"), a("a1"), u("u2"), a("a2"), u("u3")];
    for limit in 0..8 {
        let once = truncate_history(&approx_token_count, &history, limit);
        let twice = truncate_history(&approx_token_count, &once, limit);
        assert_eq!(once, twice, "limit {limit}");
    }
}

#[test]
fn approx_count_rounds_up() {
    assert_eq!(approx_token_count(&[]), 0);
    assert_eq!(approx_token_count(&[u("abcd")]), 1);
    assert_eq!(approx_token_count(&[u("abcde")]), 2);
    assert_eq!(approx_token_count(&[u("ab"), a("cd"), s("é")]), 2);
}

#[test]
fn new_session_holds_system_prompt() {
    let (session, _) = session_with(ScriptedClient::new(&[]), "sys");
    assert_eq!(session.history(), &[s("sys")]);
    assert_eq!(session.tokens_used(), 1);

    let (session, _) = session_with(ScriptedClient::new(&[]), "");
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn send_appends_exchange() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::Text("hello".to_string()));
    let (mut session, client) = session_with(client, "sys");

    let response = session
        .send(request("hi"), &CancellationToken::new())
        .await
        .expect("send should succeed");

    assert_eq!(response.content, "hello");
    assert_eq!(session.history(), &[s("sys"), u("hi"), a("hello")]);

    let sent = client.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].messages, vec![s("sys"), u("hi")]);
}

#[tokio::test]
async fn send_without_model_leaves_history() {
    let (mut session, client) = session_with(ScriptedClient::new(&[]), "sys");
    let err = session
        .send(
            SendRequest {
                prompt: "hi".to_string(),
                ..SendRequest::default()
            },
            &CancellationToken::new(),
        )
        .await
        .expect_err("missing model should fail");

    assert!(matches!(err, LlmError::NoModelSelected));
    assert_eq!(session.history(), &[s("sys")]);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn send_rolls_back_on_api_error() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::Status(503));
    let (mut session, _) = session_with(client, "sys");

    let err = session
        .send(request("hi"), &CancellationToken::new())
        .await
        .expect_err("send should fail");

    assert!(matches!(err, LlmError::Api(ref api) if api.status_code == 503));
    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn send_rolls_back_on_empty_response() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::NoChoices);
    let (mut session, _) = session_with(client, "sys");

    let err = session
        .send(request("hi"), &CancellationToken::new())
        .await
        .expect_err("send should fail");

    assert!(matches!(err, LlmError::EmptyCompletionResponse));
    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn send_honours_cancellation() {
    let (mut session, _) = session_with(ScriptedClient::new(&["llama3"]), "sys");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = session
        .send(request("hi"), &cancel)
        .await
        .expect_err("cancelled send should fail");

    assert!(matches!(err, LlmError::Cancelled));
    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn send_applies_truncation_and_overrides() {
    let client = ScriptedClient::new(&["llama3"])
        .reply(Reply::Text("a1".to_string()))
        .reply(Reply::Text("a2".to_string()));
    let client = Arc::new(client);
    let options = SessionOptions {
        system_prompt: "s".to_string(),
        context_tokens: 100,
        temperature: Some(0.7),
        token_counter: Arc::new(per_message),
    };
    let mut session = ChatSession::new(Arc::clone(&client) as Arc<dyn LlmClient>, options);
    let cancel = CancellationToken::new();

    session.send(request("u1"), &cancel).await.expect("first send");
    session
        .send(
            SendRequest {
                context_tokens: Some(2),
                temperature: Some(1.5),
                ..request("u2")
            },
            &cancel,
        )
        .await
        .expect("second send");

    let sent = client.requests();
    assert_eq!(sent[0].temperature, Some(0.7));
    assert_eq!(sent[1].temperature, Some(1.5));
    assert_eq!(sent[1].messages, vec![s("s"), u("u2")]);
    // The stored history is never truncated, only the outbound copy
    assert_eq!(session.history().len(), 5);
}

#[tokio::test]
async fn streaming_records_answer_on_clean_end() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::streamed(&["Hel", "", "lo"]));
    let (mut session, _) = session_with(client, "sys");

    let mut parts = Vec::new();
    {
        let mut stream = session
            .send_streaming(request("hi"), CancellationToken::new())
            .await
            .expect("stream should open");
        while let Some(part) = stream.next().await {
            parts.push(part.expect("delta should be ok"));
        }
        assert!(stream.next().await.is_none());
    }

    assert_eq!(parts, vec!["Hel", "lo"]);
    assert_eq!(session.history(), &[s("sys"), u("hi"), a("Hello")]);
}

#[tokio::test]
async fn streaming_error_rolls_back() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::DeltasThenFail(
        vec![ChatDelta::content("partial")],
        500,
    ));
    let (mut session, _) = session_with(client, "sys");

    let mut results = Vec::new();
    {
        let mut stream = session
            .send_streaming(request("hi"), CancellationToken::new())
            .await
            .expect("stream should open");
        while let Some(item) = stream.next().await {
            results.push(item);
        }
    }

    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Ok(ref text) if text == "partial"));
    assert!(matches!(results[1], Err(LlmError::Api(_))));
    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn streaming_refusal_surfaces_model_refused() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::Deltas(vec![
        ChatDelta {
            refusal: "I can't ".to_string(),
            ..ChatDelta::default()
        },
        ChatDelta {
            refusal: "help with that".to_string(),
            finish_reason: Some("stop".to_string()),
            ..ChatDelta::default()
        },
    ]));
    let (mut session, _) = session_with(client, "sys");

    let result = {
        let mut stream = session
            .send_streaming(request("hi"), CancellationToken::new())
            .await
            .expect("stream should open");
        stream.next().await
    };

    match result {
        Some(Err(LlmError::ModelRefused(text))) => assert_eq!(text, "I can't help with that"),
        other => panic!("unexpected item: {other:?}"),
    }
    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn streaming_cancel_rolls_back() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::Hang(vec![ChatDelta::content("x")]));
    let (mut session, _) = session_with(client, "sys");
    let cancel = CancellationToken::new();

    {
        let mut stream = session
            .send_streaming(request("hi"), cancel.clone())
            .await
            .expect("stream should open");
        let first = stream.next().await.expect("first delta").expect("should be ok");
        assert_eq!(first, "x");

        cancel.cancel();
        let next = stream.next().await;
        assert!(matches!(next, Some(Err(LlmError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn dropping_stream_early_rolls_back() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::streamed(&["a", "b", "c"]));
    let (mut session, _) = session_with(client, "sys");

    {
        let mut stream = session
            .send_streaming(request("hi"), CancellationToken::new())
            .await
            .expect("stream should open");
        let _ = stream.next().await;
    }

    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn streaming_open_failure_rolls_back() {
    let client = ScriptedClient::new(&["llama3"]).reply(Reply::Status(401));
    let (mut session, _) = session_with(client, "sys");

    let err = session
        .send_streaming(request("hi"), CancellationToken::new())
        .await
        .expect_err("open should fail");

    assert!(matches!(err, LlmError::Api(ref api) if api.status_code == 401));
    assert_eq!(session.history(), &[s("sys")]);
}

#[tokio::test]
async fn reset_keeps_only_system_prompt() {
    let (mut session, _) = session_with(ScriptedClient::new(&["llama3"]), "sys");
    session
        .send(request("hi"), &CancellationToken::new())
        .await
        .expect("send should succeed");
    assert_eq!(session.history().len(), 3);

    session.reset();
    assert_eq!(session.history(), &[s("sys")]);
}
