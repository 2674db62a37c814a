//! Hosted deployments are priced by their resolved model family.

mod support;

use futures_util::StreamExt;
use std::sync::Arc;

use llm_meter::api::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, ChatParams, Completion, CompletionUsage,
    GenAiClient,
};
use support::*;

fn completion(model: &str) -> Completion<ChatCompletion, ChatCompletionChunk> {
    Completion::Single(ChatCompletion {
        id: format!("chatcmpl-{model}"),
        model: model.into(),
        choices: vec![Default::default()],
        usage: Some(CompletionUsage::new(2, 2)),
        ..Default::default()
    })
}

#[tokio::test]
async fn hosted_deployment_resolves_to_family() {
    let (layer, mut payloads) = layer();
    let client = layer.patch(Arc::new(FakeClient::azure().with_chat(
        FakeChat::default()
            .reply(Ok(completion("gpt-4o-2024-11-20")))
            .reply(Ok(completion("contoso-prod-chat")))
            .reply(Ok(completion("contoso-prod-chat"))),
    )));
    let chat = client.chat().unwrap();

    for _ in 0..3 {
        chat.create(
            ChatParams::new("my-deployment", vec![ChatMessage::user("hi")]),
            None,
        )
        .await
        .unwrap();
    }

    let first = payloads.next().await;
    assert_eq!(first.provider, "Azure");
    assert_eq!(first.model_source, "OPENAI");
    assert_eq!(first.model, "gpt-4o");
    assert_eq!(payloads.next().await.model, "contoso-prod-chat");
    assert_eq!(payloads.next().await.model, "contoso-prod-chat");

    let stats = layer.resolver().stats();
    assert_eq!(stats.cached, 2);
    assert_eq!(stats.warned, 1);
    assert_eq!(stats.heuristic_runs, 2);
}

#[tokio::test]
async fn primary_vendor_models_are_not_rewritten() {
    let (layer, mut payloads) = layer();
    let client = layer.patch(Arc::new(FakeClient::openai().with_chat(
        FakeChat::default().reply(Ok(completion("gpt-4o-2024-11-20"))),
    )));
    client
        .chat()
        .unwrap()
        .create(
            ChatParams::new("gpt-4o-2024-11-20", vec![ChatMessage::user("hi")]),
            None,
        )
        .await
        .unwrap();

    assert_eq!(payloads.next().await.model, "gpt-4o-2024-11-20");
    assert_eq!(layer.resolver().stats().heuristic_runs, 0);
}

#[tokio::test]
async fn streamed_deployment_resolves_from_chunk_model_only() {
    let (layer, mut payloads) = layer();
    let client = layer.patch(Arc::new(FakeClient::azure().with_chat(
        FakeChat::default().reply(Ok(Completion::Stream(chunks(vec![
            Ok(ChatCompletionChunk::content("gpt-4o-2024-11-20", "hi")),
            Ok(ChatCompletionChunk::content("gpt-4o-2024-11-20", "").with_finish_reason("stop")),
        ])))),
    )));

    let stream = client
        .chat()
        .unwrap()
        .create(
            ChatParams::new("contoso-prod-chat", vec![ChatMessage::user("hi")]).streaming(),
            None,
        )
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let _: Vec<_> = stream.collect().await;

    assert_eq!(payloads.next().await.model, "gpt-4o");
    let stats = layer.resolver().stats();
    assert_eq!(stats.warned, 0);
    assert_eq!(stats.heuristic_runs, 1);
}
