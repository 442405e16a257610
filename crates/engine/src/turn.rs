//! The chat turn pipeline.
//!
//! One inbound message runs as one logical async task: assemble the
//! prompt, stream the response, then harvest memories. An optional
//! wall-clock timeout wraps the whole turn and surfaces as
//! `Error::Timeout`, distinct from every other failure, with the user's
//! message already persisted by the time it can fire. A single
//! cancellation token is threaded through every stage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use engram_config::EngineConfig;
use engram_core::error::PlannerError;
use engram_core::{
    ChatId, ChatMessage, ClientEvent, CompletionProvider, Error, MemoryProvider, MessageKind,
    MessageRepository, Plan, PlanState, Planner, Result, SessionRepository, Transport,
};

use crate::context::assembler::{AssemblyOutcome, ContextAssembler};
use crate::context::retriever::MemoryRetriever;
use crate::extractor::SemanticMemoryExtractor;
use crate::streamer::ResponseStreamer;

/// The engine driving complete chat turns against the collaborator traits.
pub struct ChatTurnEngine {
    config: Arc<EngineConfig>,
    messages: Arc<dyn MessageRepository>,
    transport: Arc<dyn Transport>,
    planner: Option<Arc<dyn Planner>>,
    assembler: ContextAssembler,
    streamer: ResponseStreamer,
    extractor: SemanticMemoryExtractor,
}

impl ChatTurnEngine {
    pub fn new(
        config: EngineConfig,
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        provider: Arc<dyn CompletionProvider>,
        memory: Arc<dyn MemoryProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = Arc::new(config);
        let retriever = MemoryRetriever::new(&config, sessions.clone(), memory.clone());
        let assembler = ContextAssembler::new(
            config.clone(),
            sessions,
            messages.clone(),
            provider.clone(),
            transport.clone(),
            retriever,
        );
        let streamer = ResponseStreamer::new(
            config.clone(),
            provider.clone(),
            messages.clone(),
            transport.clone(),
        );
        let extractor = SemanticMemoryExtractor::new(config.clone(), provider, memory);
        Self {
            config,
            messages,
            transport,
            planner: None,
            assembler,
            streamer,
            extractor,
        }
    }

    /// Attach the external planner collaborator.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner.clone());
        self.assembler = self.assembler.with_planner(planner);
        self
    }

    /// Run one full turn for an inbound user message.
    pub async fn run_turn(
        &self,
        chat_id: &ChatId,
        user_id: &str,
        user_name: &str,
        text: &str,
    ) -> Result<ChatMessage> {
        self.run_turn_with_cancel(chat_id, user_id, user_name, text, CancellationToken::new())
            .await
    }

    /// Run one full turn under an externally owned cancellation token.
    pub async fn run_turn_with_cancel(
        &self,
        chat_id: &ChatId,
        user_id: &str,
        user_name: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<ChatMessage> {
        match self.config.turn_timeout_secs {
            Some(secs) => {
                let turn = self.turn_inner(chat_id, user_id, user_name, text, &cancel);
                match tokio::time::timeout(Duration::from_secs(secs), turn).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(chat_id = %chat_id, timeout_secs = secs, "Turn exceeded its wall-clock limit");
                        Err(Error::Timeout { elapsed_secs: secs })
                    }
                }
            }
            None => self.turn_inner(chat_id, user_id, user_name, text, &cancel).await,
        }
    }

    async fn turn_inner(
        &self,
        chat_id: &ChatId,
        user_id: &str,
        user_name: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        self.status(chat_id, "assembling context").await;
        let outcome = self
            .assembler
            .assemble(chat_id, user_id, user_name, text, cancel)
            .await?;
        let prompt = match outcome {
            AssemblyOutcome::PlanProposal(message) => {
                info!(chat_id = %chat_id, message_id = %message.id, "Plan proposal awaits approval");
                return Ok(message);
            }
            AssemblyOutcome::Prompt(prompt) => prompt,
        };

        self.status(chat_id, "generating response").await;
        let message = match self.streamer.stream(chat_id, &prompt, cancel).await {
            Ok(message) => message,
            Err(err) => {
                self.report_failure(chat_id, &err).await;
                return Err(err);
            }
        };

        self.status(chat_id, "updating memories").await;
        let exchange = format!(
            "{user_name}: {text}\n{}: {}",
            self.config.bot_name, message.content
        );
        self.extractor.extract(chat_id, &exchange).await;

        Ok(message)
    }

    /// Handle the user's verdict on a previously proposed plan.
    ///
    /// Approval executes the plan and publishes the result through the
    /// direct response path; rejection publishes a canned reply. Either
    /// way the plan message is updated in place and a state change is
    /// broadcast.
    pub async fn respond_to_plan(
        &self,
        chat_id: &ChatId,
        plan_message_id: &str,
        approved: bool,
    ) -> Result<ChatMessage> {
        let Some(mut plan_message) = self
            .messages
            .try_find_by_id(chat_id, plan_message_id)
            .await?
        else {
            return Err(Error::Internal(format!(
                "plan message '{plan_message_id}' not found"
            )));
        };
        if plan_message.kind != MessageKind::Plan {
            return Err(Error::Internal(format!(
                "message '{plan_message_id}' is not a plan"
            )));
        }
        let mut plan: Plan = serde_json::from_str(&plan_message.content)?;

        if !approved {
            self.update_plan_state(&mut plan, &mut plan_message, PlanState::Rejected)
                .await?;
            return self
                .streamer
                .direct(chat_id, "Understood, I will not run that plan.", None)
                .await;
        }

        let Some(planner) = &self.planner else {
            return Err(Error::Planner(PlannerError::NotConfigured));
        };
        self.update_plan_state(&mut plan, &mut plan_message, PlanState::Approved)
            .await?;

        let args: BTreeMap<String, String> = BTreeMap::new();
        match planner.execute_plan(&plan, &args).await {
            Ok(result) => {
                self.update_plan_state(&mut plan, &mut plan_message, PlanState::Executed)
                    .await?;
                self.streamer.direct(chat_id, &result, None).await
            }
            Err(err) => {
                warn!(chat_id = %chat_id, error = %err, "Plan execution failed");
                let explanation = format!("I tried to run the plan but it failed: {err}.");
                self.streamer.direct(chat_id, &explanation, None).await
            }
        }
    }

    async fn update_plan_state(
        &self,
        plan: &mut Plan,
        plan_message: &mut ChatMessage,
        state: PlanState,
    ) -> Result<()> {
        plan.state = state;
        plan_message.content = serde_json::to_string(plan)?;
        self.messages.upsert(plan_message.clone()).await?;
        self.transport
            .broadcast(
                &plan_message.chat_id.0,
                ClientEvent::PlanStateChanged {
                    message_id: plan_message.id.clone(),
                    state,
                },
            )
            .await;
        Ok(())
    }

    async fn status(&self, chat_id: &ChatId, status: &str) {
        self.transport
            .broadcast(
                &chat_id.0,
                ClientEvent::StatusUpdate {
                    status: status.to_string(),
                },
            )
            .await;
    }

    /// Best-effort text explanation in place of the response. The original
    /// error still propagates; this only keeps the chat readable.
    async fn report_failure(&self, chat_id: &ChatId, err: &Error) {
        let text = format!("I could not finish a response: {err}. Please try again.");
        if let Err(report_err) = self.streamer.direct(chat_id, &text, None).await {
            warn!(chat_id = %chat_id, error = %report_err, "Failed to report turn failure to the chat");
        }
    }
}
