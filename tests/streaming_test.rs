//! Streamed calls ship exactly one terminal payload however they end.

mod support;

use futures_util::StreamExt;
use std::sync::Arc;

use llm_meter::api::{
    ChatCompletionChunk, ChatMessage, ChatParams, Completion, CompletionUsage, GenAiClient,
    Response, ResponseStreamEvent, ResponseUsage, ResponsesParams,
};
use llm_meter::{ApiError, Field, MeteringConfig, StopReason};
use support::*;

fn chunk(text: &str) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: "chatcmpl-s1".into(),
        ..ChatCompletionChunk::content("gpt-4o-mini", text)
    }
}

fn final_chunk() -> ChatCompletionChunk {
    chunk("")
        .with_finish_reason("stop")
        .with_usage(CompletionUsage::new(10, 15))
}

fn streaming_params() -> ChatParams {
    ChatParams::new("gpt-4o-mini", vec![ChatMessage::user("Tell me a story")]).streaming()
}

#[tokio::test]
async fn completed_stream_ships_one_payload() {
    let (layer, mut payloads) = layer();
    let client = Arc::new(FakeClient::openai().with_chat(FakeChat::default().reply(Ok(
        Completion::Stream(chunks(vec![
            Ok(chunk("Once")),
            Ok(chunk(" upon")),
            Ok(final_chunk()),
        ])),
    ))));
    let metered = layer.patch(client.clone());

    let mut stream = metered
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();

    let mut received = 0;
    while let Some(item) = stream.next().await {
        item.unwrap();
        received += 1;
    }
    assert_eq!(received, 3);
    assert!(stream.next().await.is_none());
    drop(stream);

    let payload = payloads.next().await;
    assert!(payload.is_streamed);
    assert_eq!(payload.transaction_id, "chatcmpl-s1");
    assert_eq!(payload.stop_reason, StopReason::End);
    assert_eq!(payload.input_token_count, Field::Value(10));
    assert_eq!(payload.output_token_count, Field::Value(15));
    assert_eq!(payload.total_token_count, Field::Value(25));
    assert!(payload.time_to_first_token.is_some());
    assert!(payload.completion_start_time.is_some());
    payloads.assert_quiet().await;

    let forwarded = &client.chat.as_ref().unwrap().seen()[0];
    assert_eq!(
        forwarded.stream_options.as_ref().and_then(|o| o.include_usage),
        Some(true)
    );
}

#[tokio::test]
async fn mid_stream_error_is_reraised_and_metered_once() {
    let (layer, mut payloads) = layer();
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(chunks(vec![
            Ok(chunk("Once")),
            Err(ApiError::with_status(502, "upstream reset")),
            Ok(chunk("never seen")),
        ])))),
    )));

    let mut stream = client
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();

    assert!(stream.next().await.unwrap().is_ok());
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.status, Some(502));
    assert!(stream.next().await.is_none());
    drop(stream);

    let payload = payloads.next().await;
    assert_eq!(payload.stop_reason, StopReason::Error);
    assert!(payload.is_streamed);
    payloads.assert_quiet().await;
}

#[tokio::test]
async fn early_drop_ships_cancelled_payload() {
    let (layer, mut payloads) = layer();
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(stalled(vec![
            Ok(chunk("Once")),
            Ok(chunk(" upon")),
        ])))),
    )));

    let mut stream = client
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    let payload = payloads.next().await;
    assert_eq!(payload.stop_reason, StopReason::Cancelled);
    assert_eq!(payload.input_token_count, Field::Absent);
    assert_eq!(payload.transaction_id, "chatcmpl-s1");
    payloads.assert_quiet().await;
}

#[tokio::test]
async fn unpolled_stream_still_ships_one_payload() {
    let (layer, mut payloads) = layer();
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(stalled(Vec::new())))),
    )));

    let stream = client
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap();
    drop(stream);

    let payload = payloads.next().await;
    assert_eq!(payload.stop_reason, StopReason::Cancelled);
    assert!(payload.time_to_first_token.is_none());
    payloads.assert_quiet().await;
}

#[tokio::test]
async fn usage_on_any_chunk_keeps_latest_snapshot() {
    let (layer, mut payloads) = layer();
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(chunks(vec![
            Ok(chunk("a").with_usage(CompletionUsage::new(4, 1))),
            Ok(chunk("b").with_usage(CompletionUsage::new(4, 2))),
            Ok(chunk("").with_finish_reason("length")),
        ])))),
    )));

    let stream = client
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 3);

    let payload = payloads.next().await;
    assert_eq!(payload.output_token_count, Field::Value(2));
    assert_eq!(payload.stop_reason, StopReason::TokenLimit);
}

#[tokio::test]
async fn captured_output_is_bounded() {
    let config = MeteringConfig::builder()
        .api_key(TEST_API_KEY)
        .capture_prompts(true)
        .max_prompt_size(8)
        .build()
        .unwrap();
    let (layer, mut payloads) = layer_with(config);
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(chunks(vec![
            Ok(chunk("Once ")),
            Ok(chunk("upon a time")),
            Ok(final_chunk()),
        ])))),
    )));

    let stream = client
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let _: Vec<_> = stream.collect().await;

    let payload = payloads.next().await;
    assert_eq!(payload.output_response.as_deref(), Some("Once upo"));
    assert_eq!(payload.prompts_truncated, Some(true));
}

#[tokio::test]
async fn responses_stream_reads_final_event() {
    let (layer, mut payloads) = layer();
    let done = Response {
        id: "resp_s".into(),
        model: "gpt-4.1-mini".into(),
        status: Some("completed".into()),
        usage: Some(ResponseUsage::new(3, 9)),
        ..Default::default()
    };
    let client = layer.patch(Arc::new(FakeClient::openai().with_responses(
        FakeResponses::default().reply(Ok(Completion::Stream(chunks(vec![
            Ok(ResponseStreamEvent::text_delta("Hi")),
            Ok(ResponseStreamEvent::completed(done)),
        ])))),
    )));

    let stream = client
        .responses()
        .unwrap()
        .create(ResponsesParams::new("gpt-4.1-mini", "hello").streaming(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let _: Vec<_> = stream.collect().await;

    let payload = payloads.next().await;
    assert_eq!(payload.transaction_id, "resp_s");
    assert_eq!(payload.model, "gpt-4.1-mini");
    assert_eq!(payload.total_token_count, Field::Value(12));
    assert_eq!(payload.stop_reason, StopReason::End);
    payloads.assert_quiet().await;
}

#[tokio::test]
async fn many_concurrent_streams_each_ship_once() {
    let (layer, mut payloads) = layer();
    let mut chat = FakeChat::default();
    for _ in 0..8 {
        chat = chat.reply(Ok(Completion::Stream(chunks(vec![
            Ok(chunk("x")),
            Ok(final_chunk()),
        ]))));
    }
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(chat)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let stream = client
                .chat()
                .unwrap()
                .create(streaming_params(), None)
                .await
                .unwrap()
                .into_stream()
                .unwrap();
            stream.collect::<Vec<_>>().await.len()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 2);
    }
    for _ in 0..8 {
        payloads.next().await;
    }
    payloads.assert_quiet().await;
}

#[tokio::test]
async fn time_to_first_token_covers_upstream_delay() {
    let (layer, mut payloads) = layer();
    let delayed = async_stream::stream! {
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        yield Ok::<_, ApiError>(chunk("late"));
        yield Ok::<_, ApiError>(final_chunk());
    };
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(Box::pin(delayed)))),
    )));

    let stream = client
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let _: Vec<_> = stream.collect().await;

    let payload = payloads.next().await;
    assert!(payload.time_to_first_token.unwrap() >= 60);
    assert!(payload.request_duration >= payload.time_to_first_token.unwrap());
}

#[tokio::test]
async fn secret_crossing_capture_limit_is_redacted() {
    let config = MeteringConfig::builder()
        .api_key(TEST_API_KEY)
        .capture_prompts(true)
        .max_prompt_size(20)
        .build()
        .unwrap();
    let (layer, mut payloads) = layer_with(config);
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(chunks(vec![
            Ok(chunk("sk-abcdefghij")),
            Ok(chunk("klmnopqrstuvwx and more")),
            Ok(final_chunk()),
        ])))),
    )));

    let stream = client
        .chat()
        .unwrap()
        .create(streaming_params(), None)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let _: Vec<_> = stream.collect().await;

    let payload = payloads.next().await;
    let output = payload.output_response.unwrap();
    assert!(!output.contains("abcdefghij"));
    assert_eq!(output, "sk-***REDACTED*** an");
    assert_eq!(payload.prompts_truncated, Some(true));
}
