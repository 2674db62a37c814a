//! Patching is idempotent and never double counts.

mod support;

use std::sync::Arc;

use llm_meter::api::{
    ChatCompletion, ChatMessage, ChatParams, ClientInfo, Completion, CompletionUsage, GenAiClient,
};
use llm_meter::{Field, ProviderKind};
use support::*;

fn reply() -> Completion<ChatCompletion, llm_meter::api::ChatCompletionChunk> {
    Completion::Single(ChatCompletion {
        id: "chatcmpl-p".into(),
        model: "gpt-4o".into(),
        choices: vec![Default::default()],
        usage: Some(CompletionUsage::new(1, 2)),
        ..Default::default()
    })
}

#[tokio::test]
async fn double_patch_meters_once() {
    let (layer, mut payloads) = layer();
    let client = Arc::new(FakeClient::openai().with_chat(FakeChat::default().reply(Ok(reply()))));

    let first = layer.patch(client.clone());
    let second = layer.patch(client);
    assert!(Arc::ptr_eq(&first, &second));

    second
        .chat()
        .unwrap()
        .create(ChatParams::new("gpt-4o", vec![ChatMessage::user("hi")]), None)
        .await
        .unwrap();

    assert_eq!(payloads.next().await.total_token_count, Field::Value(3));
    payloads.assert_quiet().await;
}

#[tokio::test]
async fn patching_a_metered_client_passes_through() {
    let (layer, mut payloads) = layer();
    let inner = layer.patch(Arc::new(
        FakeClient::openai().with_chat(FakeChat::default().reply(Ok(reply()))),
    ));
    let outer = layer.patch(inner);
    assert!(outer.is_passthrough());

    outer
        .chat()
        .unwrap()
        .create(ChatParams::new("gpt-4o", vec![ChatMessage::user("hi")]), None)
        .await
        .unwrap();

    payloads.next().await;
    payloads.assert_quiet().await;
}

#[tokio::test]
async fn missing_capabilities_are_skipped() {
    let (layer, _payloads) = layer();
    let client = layer.patch(Arc::new(
        FakeClient::openai().with_chat(FakeChat::default().reply(Ok(reply()))),
    ));
    assert!(client.chat().is_some());
    assert!(client.embeddings().is_none());
    assert!(client.responses().is_none());
    assert!(client.images().is_none());
    assert!(client.audio().is_none());
}

#[tokio::test]
async fn descriptor_is_detected_once_per_client() {
    let (layer, _payloads) = layer();
    let azure = layer.patch(Arc::new(FakeClient::azure()));
    let openai = layer.patch(Arc::new(FakeClient {
        info: ClientInfo::new("CustomClient"),
        ..FakeClient::openai()
    }));

    assert_eq!(azure.descriptor().kind, ProviderKind::AzureOpenAi);
    assert_eq!(azure.descriptor().api_version.as_deref(), Some("2024-10-21"));
    assert_eq!(
        layer.patcher().descriptor(azure.handle()).map(|d| d.kind),
        Some(ProviderKind::AzureOpenAi)
    );
    assert_ne!(azure.handle(), openai.handle());
    assert_eq!(layer.patcher().patched_count(), 2);

    drop(azure);
    assert_eq!(layer.patcher().patched_count(), 1);
}
