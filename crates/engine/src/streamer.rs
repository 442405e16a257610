//! Response streaming and publication.
//!
//! A bot message is created empty and broadcast, then grows in place as
//! chunks arrive from the completion provider, each append re-broadcast to
//! the chat's subscribers. The chunk loop is the one deliberate suspension
//! point in the hot path. Callers that already hold final content (a
//! rejected-plan reply, an executed plan's result) use the direct path,
//! which produces the same message shape and the same event sequence:
//! message-created, one or more content updates, then a final update
//! carrying token usage.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use engram_config::EngineConfig;
use engram_core::{
    ChatId, ChatMessage, ClientEvent, CompletionProvider, CompletionRequest, CompletionSettings,
    Error, MessageRepository, Result, Transport, Usage,
};

use crate::context::assembler::AssembledPrompt;
use crate::context::token::TokenCounter;

const STAGE_RESPONSE: &str = "response";

/// Streams completions into persisted, broadcast chat messages.
pub struct ResponseStreamer {
    config: Arc<EngineConfig>,
    provider: Arc<dyn CompletionProvider>,
    messages: Arc<dyn MessageRepository>,
    transport: Arc<dyn Transport>,
    counter: TokenCounter,
}

impl ResponseStreamer {
    pub fn new(
        config: Arc<EngineConfig>,
        provider: Arc<dyn CompletionProvider>,
        messages: Arc<dyn MessageRepository>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            provider,
            messages,
            transport,
            counter: TokenCounter::new(),
        }
    }

    /// Generate the response for an assembled prompt, streaming increments
    /// to subscribers as they arrive.
    ///
    /// Cancellation stops consumption and keeps whatever content arrived;
    /// a provider error mid-stream persists the partial content and then
    /// propagates.
    pub async fn stream(
        &self,
        chat_id: &ChatId,
        prompt: &AssembledPrompt,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        let mut message = self.new_bot_message(chat_id, Some(prompt));
        self.messages.create(message.clone()).await?;
        self.broadcast_created(chat_id, &message).await;

        let request = CompletionRequest::new(
            prompt.blocks.clone(),
            CompletionSettings {
                max_tokens: self.config.response_token_reservation as u32,
                ..Default::default()
            },
        );
        let mut rx = self
            .provider
            .complete_streaming(request)
            .await
            .map_err(Error::Provider)?;

        let mut reported: Option<Usage> = None;
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(message_id = %message.id, "Stream cancelled, keeping partial content");
                    break;
                }
                chunk = rx.recv() => chunk,
            };
            let Some(chunk) = received else {
                break;
            };
            match chunk {
                Ok(chunk) => {
                    if let Some(delta) = chunk.content.as_deref() {
                        if !delta.is_empty() {
                            message.append_content(delta);
                            self.broadcast_updated(chat_id, &message).await;
                        }
                    }
                    if chunk.usage.is_some() {
                        reported = chunk.usage;
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(err) => {
                    // Keep what arrived; the turn surfaces the failure.
                    self.messages.upsert(message.clone()).await?;
                    return Err(Error::Provider(err));
                }
            }
        }

        self.finish(chat_id, message, reported).await
    }

    /// Publish content that is already final, converging on the streamed
    /// path's message shape and event sequence.
    pub async fn direct(
        &self,
        chat_id: &ChatId,
        content: &str,
        prompt: Option<&AssembledPrompt>,
    ) -> Result<ChatMessage> {
        let mut message = self.new_bot_message(chat_id, prompt);
        self.messages.create(message.clone()).await?;
        self.broadcast_created(chat_id, &message).await;

        message.append_content(content);
        self.broadcast_updated(chat_id, &message).await;

        self.finish(chat_id, message, None).await
    }

    /// Record final usage, persist, and broadcast the finished message.
    async fn finish(
        &self,
        chat_id: &ChatId,
        mut message: ChatMessage,
        reported: Option<Usage>,
    ) -> Result<ChatMessage> {
        let tokens = reported
            .map(|u| u.completion_tokens)
            .unwrap_or_else(|| self.counter.count(&message.content) as u32);
        message.record_usage(STAGE_RESPONSE, tokens);
        self.messages.upsert(message.clone()).await?;
        self.broadcast_updated(chat_id, &message).await;
        Ok(message)
    }

    fn new_bot_message(&self, chat_id: &ChatId, prompt: Option<&AssembledPrompt>) -> ChatMessage {
        let mut message = ChatMessage::bot(chat_id, &self.config.bot_name, "");
        if let Some(prompt) = prompt {
            message.rendered_prompt = Some(prompt.rendered.clone());
            message.citations = prompt.citations.values().cloned().collect();
            message.token_usage = prompt.token_usage.clone();
        }
        message
    }

    async fn broadcast_created(&self, chat_id: &ChatId, message: &ChatMessage) {
        self.transport
            .broadcast(
                &chat_id.0,
                ClientEvent::MessageCreated {
                    message: message.clone(),
                },
            )
            .await;
    }

    async fn broadcast_updated(&self, chat_id: &ChatId, message: &ChatMessage) {
        self.transport
            .broadcast(
                &chat_id.0,
                ClientEvent::MessageUpdated {
                    message: message.clone(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use engram_core::error::ProviderError;
    use engram_core::provider::{ChunkReceiver, CompletionChunk, CompletionResponse};
    use engram_core::repository::InProcessMessageStore;
    use engram_core::{AuthorRole, BroadcastHub};

    /// Streams the reply in fixed-size chunks; `complete` is unused here.
    struct ChunkingProvider {
        reply: String,
        chunk_size: usize,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl CompletionProvider for ChunkingProvider {
        fn name(&self) -> &str {
            "chunking"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: self.reply.clone(),
                usage: None,
            })
        }

        async fn complete_streaming(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<ChunkReceiver, ProviderError> {
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            let pieces: Vec<String> = self
                .reply
                .as_bytes()
                .chunks(self.chunk_size)
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect();
            let fail_after = self.fail_after;
            tokio::spawn(async move {
                for (i, piece) in pieces.iter().enumerate() {
                    if fail_after.is_some_and(|n| i >= n) {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted("connection reset".into())))
                            .await;
                        return;
                    }
                    let _ = tx
                        .send(Ok(CompletionChunk {
                            content: Some(piece.clone()),
                            done: false,
                            usage: None,
                        }))
                        .await;
                }
                let _ = tx
                    .send(Ok(CompletionChunk {
                        content: None,
                        done: true,
                        usage: Some(Usage {
                            prompt_tokens: 20,
                            completion_tokens: 7,
                            total_tokens: 27,
                        }),
                    }))
                    .await;
            });
            Ok(rx)
        }
    }

    fn prompt() -> AssembledPrompt {
        AssembledPrompt {
            blocks: vec![engram_core::PromptBlock::system("persona")],
            rendered: "[system] persona".into(),
            token_count: 4,
            citations: BTreeMap::new(),
            token_usage: BTreeMap::from([("intent".to_string(), 5)]),
        }
    }

    fn streamer(provider: Arc<dyn CompletionProvider>) -> (ResponseStreamer, Arc<InProcessMessageStore>, Arc<BroadcastHub>) {
        let messages = Arc::new(InProcessMessageStore::new());
        let hub = Arc::new(BroadcastHub::default());
        let streamer = ResponseStreamer::new(
            Arc::new(EngineConfig::default()),
            provider,
            messages.clone(),
            hub.clone(),
        );
        (streamer, messages, hub)
    }

    fn event_types(rx: &mut tokio::sync::broadcast::Receiver<Arc<engram_core::Envelope>>) -> Vec<&'static str> {
        let mut types = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            types.push(envelope.event.event_type());
        }
        types
    }

    #[tokio::test]
    async fn streaming_grows_the_message_and_persists_it() {
        let (streamer, messages, hub) = streamer(Arc::new(ChunkingProvider {
            reply: "Hello streaming world".into(),
            chunk_size: 5,
            fail_after: None,
        }));
        let mut rx = hub.subscribe();
        let chat_id = ChatId::from("c1");

        let message = streamer
            .stream(&chat_id, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(message.content, "Hello streaming world");
        assert_eq!(message.role, AuthorRole::Bot);
        // Usage from the provider's final chunk, not the heuristic.
        assert_eq!(message.token_usage.get("response"), Some(&7));
        // Helper usage carried over from assembly.
        assert_eq!(message.token_usage.get("intent"), Some(&5));
        assert_eq!(message.rendered_prompt.as_deref(), Some("[system] persona"));

        let stored = messages
            .try_find_by_id(&chat_id, &message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, "Hello streaming world");
        assert_eq!(messages.len().await, 1);

        // created, one update per 5-byte chunk (5), final update.
        let types = event_types(&mut rx);
        assert_eq!(types.first(), Some(&"message-created"));
        assert_eq!(types.len(), 7);
        assert!(types[1..].iter().all(|t| *t == "message-updated"));
    }

    #[tokio::test]
    async fn direct_path_matches_streamed_shape_and_events() {
        let provider = Arc::new(ChunkingProvider {
            reply: "same reply".into(),
            chunk_size: 100, // single chunk
            fail_after: None,
        });
        let (streamer, _messages, hub) = streamer(provider);
        let chat_id = ChatId::from("c1");

        let mut rx = hub.subscribe();
        let streamed = streamer
            .stream(&chat_id, &prompt(), &CancellationToken::new())
            .await
            .unwrap();
        let streamed_events = event_types(&mut rx);

        let mut rx = hub.subscribe();
        let direct = streamer.direct(&chat_id, "same reply", Some(&prompt())).await.unwrap();
        let direct_events = event_types(&mut rx);

        assert_eq!(streamed_events, direct_events);
        assert_eq!(streamed.content, direct.content);
        assert_eq!(streamed.role, direct.role);
        assert_eq!(streamed.kind, direct.kind);
        assert_eq!(streamed.rendered_prompt, direct.rendered_prompt);
        assert!(direct.token_usage.contains_key("response"));
    }

    #[tokio::test]
    async fn provider_failure_keeps_partial_content() {
        let (streamer, messages, _hub) = streamer(Arc::new(ChunkingProvider {
            reply: "partial then broken".into(),
            chunk_size: 7,
            fail_after: Some(1),
        }));
        let chat_id = ChatId::from("c1");

        let err = streamer
            .stream(&chat_id, &prompt(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        // The partial content survived the failure.
        let page = messages.find_by_chat_id(&chat_id, 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "partial");
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_content() {
        let (streamer, messages, _hub) = streamer(Arc::new(ChunkingProvider {
            reply: "never consumed".into(),
            chunk_size: 100,
            fail_after: None,
        }));
        let chat_id = ChatId::from("c1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let message = streamer.stream(&chat_id, &prompt(), &cancel).await.unwrap();
        // Cancelled before the first chunk: the shell message persists with
        // its usage entry, empty content.
        assert_eq!(message.content, "");
        assert!(message.token_usage.contains_key("response"));
        assert_eq!(messages.len().await, 1);
    }
}
