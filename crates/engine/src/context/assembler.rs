//! Staged prompt assembly.
//!
//! One turn's prompt is built in a fixed stage order: persist the user
//! message, render the persona, extract the audience and the user's
//! intent, retrieve memories, acquire external information from the
//! planner, and fill chat history into whatever budget remains. The final
//! block order is persona, audience, intent, memory, history, with the
//! planner's output appended last: the most recently appended system
//! content carries the most salience for common completion providers, and
//! that slot belongs to the most specific, most grounded information.
//!
//! Only the session lookup and the persona render are fatal; every other
//! stage degrades to an empty block under [`stage_scope`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use engram_config::EngineConfig;
use engram_core::{
    ChatId, ChatMessage, Citation, ClientEvent, CompletionProvider, CompletionRequest,
    CompletionSettings, Error, MessageKind, MessageRepository, PersonaTemplate, Plan,
    PlanDisposition, PlanState, Planner, PromptBlock, PromptRole, Result, SessionRepository,
    Transport,
};

use crate::context::budget::BudgetLedger;
use crate::context::retriever::MemoryRetriever;
use crate::context::token::TokenCounter;
use crate::safe::stage_scope;

const STAGE_AUDIENCE: &str = "audience";
const STAGE_INTENT: &str = "intent";
const STAGE_EXTERNAL: &str = "external_info";

/// Per-turn state with a named slot for every value the engine reads.
///
/// The one string map is reserved for provider pass-through values the
/// engine itself never interprets.
#[derive(Debug, Default)]
pub struct TurnContext {
    pub persona: String,
    pub audience: String,
    pub intent: String,
    pub memory_text: String,
    pub history: String,
    pub external_info: String,
    pub citations: BTreeMap<String, Citation>,
    pub token_usage: BTreeMap<String, u32>,
    pub pass_through: BTreeMap<String, String>,
}

/// A fully assembled prompt, ready for the completion provider.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    /// Ordered role-tagged blocks.
    pub blocks: Vec<PromptBlock>,

    /// Flat rendering of the blocks, kept on the bot message for debugging.
    pub rendered: String,

    /// Token count of the blocks.
    pub token_count: usize,

    /// Document citations gathered during retrieval, keyed by link.
    pub citations: BTreeMap<String, Citation>,

    /// Helper-call token usage keyed by stage name.
    pub token_usage: BTreeMap<String, u32>,
}

/// What assembly produced: a prompt, or a plan proposal that short-circuits
/// the turn until the user approves or rejects it.
#[derive(Debug)]
pub enum AssemblyOutcome {
    Prompt(AssembledPrompt),
    PlanProposal(ChatMessage),
}

/// Builds one turn's prompt from the session, the repositories, the memory
/// index, and the planner.
pub struct ContextAssembler {
    config: Arc<EngineConfig>,
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    provider: Arc<dyn CompletionProvider>,
    planner: Option<Arc<dyn Planner>>,
    transport: Arc<dyn Transport>,
    retriever: MemoryRetriever,
    counter: TokenCounter,
}

impl ContextAssembler {
    pub fn new(
        config: Arc<EngineConfig>,
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        provider: Arc<dyn CompletionProvider>,
        transport: Arc<dyn Transport>,
        retriever: MemoryRetriever,
    ) -> Self {
        Self {
            config,
            sessions,
            messages,
            provider,
            planner: None,
            transport,
            retriever,
            counter: TokenCounter::new(),
        }
    }

    /// Attach the external planner collaborator.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Run the assembly stages for one inbound message.
    pub async fn assemble(
        &self,
        chat_id: &ChatId,
        user_id: &str,
        user_name: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<AssemblyOutcome> {
        // Stage 1: session lookup and user-message persistence. No session
        // means nothing to attach the turn to, so this is fatal.
        let session = self.sessions.find_by_id(chat_id).await?;
        let user_message = ChatMessage::user(chat_id, user_id, user_name, text);
        self.messages.create(user_message.clone()).await?;
        self.transport
            .broadcast(
                &chat_id.0,
                ClientEvent::MessageCreated {
                    message: user_message,
                },
            )
            .await;

        let mut ctx = TurnContext::default();
        let mut ledger = BudgetLedger::from_config(&self.config);

        // Stage 2: persona. The one render that must succeed.
        ctx.persona = PersonaTemplate::new(&self.config.persona_template)
            .render(&self.config.base_persona_vars(&session.system_description))
            .map_err(|e| e.in_stage("persona"))?;
        ledger.consume(self.counter.count_role(PromptRole::System, &ctx.persona));

        // Prior messages, newest first; shared by the helper calls and the
        // history fill. Includes the message persisted above.
        let recent = self
            .messages
            .find_by_chat_id(chat_id, 0, self.config.history_fetch_count)
            .await?;

        // Stage 3: audience. Skipped entirely when every caller is the
        // anonymous default user.
        if self.config.authentication_enabled {
            self.ensure_live(cancel)?;
            let (audience, tokens) = stage_scope(STAGE_AUDIENCE, (String::new(), 0), async {
                let prompt =
                    self.render_helper_prompt(&self.config.audience_prompt, &recent, &[])?;
                self.helper_completion(prompt).await
            })
            .await;
            ctx.token_usage.insert(STAGE_AUDIENCE.into(), tokens);
            if !audience.is_empty() {
                ledger.consume(
                    self.counter
                        .count_role(PromptRole::System, &Self::audience_block(&audience)),
                );
            }
            ctx.audience = audience;
        }

        // Stage 4: intent. The extracted goal doubles as the retrieval and
        // planning query.
        self.ensure_live(cancel)?;
        let (intent, tokens) = stage_scope(STAGE_INTENT, (String::new(), 0), async {
            let prompt = self.render_helper_prompt(
                &self.config.intent_prompt,
                &recent,
                &[("message", text)],
            )?;
            self.helper_completion(prompt).await
        })
        .await;
        ctx.token_usage.insert(STAGE_INTENT.into(), tokens);
        if !intent.is_empty() {
            ledger.consume(
                self.counter
                    .count_role(PromptRole::System, &Self::intent_block(&intent)),
            );
        }
        ctx.intent = intent;
        let query: &str = if ctx.intent.is_empty() {
            text
        } else {
            ctx.intent.as_str()
        };

        // Stage 5: memory retrieval under its weighted slice.
        self.ensure_live(cancel)?;
        let memory_budget = ledger.slice(self.config.memories_weight);
        let retrieved = self.retriever.retrieve(query, chat_id, memory_budget).await?;
        ledger.consume(retrieved.token_count);
        ctx.memory_text = retrieved.text;
        ctx.citations = retrieved.citations;

        // Stage 6: external information from the planner. A proposed plan
        // short-circuits the whole turn.
        if let Some(planner) = &self.planner {
            self.ensure_live(cancel)?;
            let external_budget = ledger.slice(self.config.external_info_weight);
            match planner.create_plan(query).await {
                Ok(PlanDisposition::RequiresApproval(plan)) => {
                    return self.propose_plan(chat_id, plan).await;
                }
                Ok(PlanDisposition::Ready(plan)) => {
                    let mut args = ctx.pass_through.clone();
                    args.insert("token_budget".into(), external_budget.to_string());
                    args.insert("enabled_tools".into(), session.enabled_tools.join(","));
                    let result = stage_scope(STAGE_EXTERNAL, String::new(), async {
                        planner.execute_plan(&plan, &args).await.map_err(Error::from)
                    })
                    .await;
                    ctx.external_info = self.counter.truncate_to_fit(&result, external_budget);
                    ledger.consume(
                        self.counter
                            .count_role(PromptRole::System, &ctx.external_info),
                    );
                }
                Err(err) => {
                    warn!(stage = STAGE_EXTERNAL, error = %err, "Plan creation failed, continuing without external information");
                }
            }
        }

        // Stage 7: chat history fills whatever is left, newest first.
        ctx.history = self.fill_history(&recent, ledger.remaining());
        ledger.consume(self.counter.count_role(PromptRole::User, &ctx.history));

        debug!(
            chat_id = %chat_id,
            consumed = ledger.consumed(),
            budget = ledger.max_request_budget(),
            "Context assembled"
        );

        // Stage 8: fixed ordering, tool output last.
        Ok(AssemblyOutcome::Prompt(self.finalize(ctx)))
    }

    fn finalize(&self, ctx: TurnContext) -> AssembledPrompt {
        let mut blocks = vec![PromptBlock::system(ctx.persona)];
        if !ctx.audience.is_empty() {
            blocks.push(PromptBlock::system(Self::audience_block(&ctx.audience)));
        }
        if !ctx.intent.is_empty() {
            blocks.push(PromptBlock::system(Self::intent_block(&ctx.intent)));
        }
        if !ctx.memory_text.is_empty() {
            blocks.push(PromptBlock::system(ctx.memory_text));
        }
        if !ctx.history.is_empty() {
            blocks.push(PromptBlock::user(ctx.history));
        }
        if !ctx.external_info.is_empty() {
            blocks.push(PromptBlock::system(ctx.external_info));
        }

        let rendered = blocks
            .iter()
            .map(|b| format!("[{}] {}", b.role.as_str(), b.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let token_count = self.counter.count_blocks(&blocks);

        AssembledPrompt {
            blocks,
            rendered,
            token_count,
            citations: ctx.citations,
            token_usage: ctx.token_usage,
        }
    }

    /// Persist and broadcast a plan that needs user approval.
    async fn propose_plan(&self, chat_id: &ChatId, mut plan: Plan) -> Result<AssemblyOutcome> {
        plan.state = PlanState::Proposed;
        let payload = serde_json::to_string(&plan)?;
        let proposal = ChatMessage::plan(chat_id, &self.config.bot_name, payload);
        self.messages.create(proposal.clone()).await?;
        self.transport
            .broadcast(
                &chat_id.0,
                ClientEvent::MessageCreated {
                    message: proposal.clone(),
                },
            )
            .await;
        self.transport
            .broadcast(
                &chat_id.0,
                ClientEvent::PlanStateChanged {
                    message_id: proposal.id.clone(),
                    state: PlanState::Proposed,
                },
            )
            .await;
        Ok(AssemblyOutcome::PlanProposal(proposal))
    }

    /// Render a helper-prompt template, filling `{{history}}` with as much
    /// recent transcript as the helper call's window allows.
    fn render_helper_prompt(
        &self,
        template: &str,
        newest_first: &[ChatMessage],
        extra_vars: &[(&str, &str)],
    ) -> Result<String> {
        let mut history_budget = self
            .config
            .completion_token_limit
            .saturating_sub(self.config.framing_token_overhead)
            .saturating_sub(self.config.helper_token_limit)
            .saturating_sub(self.counter.count(template));
        for (_, value) in extra_vars {
            history_budget = history_budget.saturating_sub(self.counter.count(value));
        }

        let mut vars = BTreeMap::from([(
            "history".to_string(),
            self.fill_history(newest_first, history_budget),
        )]);
        for (name, value) in extra_vars {
            vars.insert((*name).to_string(), (*value).to_string());
        }
        PersonaTemplate::new(template).render(&vars)
    }

    /// A bounded completion call; returns the trimmed reply and its token
    /// usage.
    async fn helper_completion(&self, prompt: String) -> Result<(String, u32)> {
        let request = CompletionRequest::new(
            vec![PromptBlock::system(prompt)],
            CompletionSettings {
                max_tokens: self.config.helper_token_limit as u32,
                ..Default::default()
            },
        );
        let response = self.provider.complete(request).await.map_err(Error::Provider)?;
        let tokens = response
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| self.counter.count(&response.content) as u32);
        Ok((response.content.trim().to_string(), tokens))
    }

    /// Format prior messages newest-first into a chronological transcript,
    /// stopping at the first message that would overflow the budget.
    /// Document-kind messages never appear in history.
    fn fill_history(&self, newest_first: &[ChatMessage], budget: usize) -> String {
        let mut used = 0;
        let mut lines: Vec<String> = Vec::new();
        for message in newest_first {
            if message.kind == MessageKind::Document {
                continue;
            }
            let line = format!("{}: {}\n", message.author_name, message.content);
            let line_tokens = self.counter.count(&line);
            if used + line_tokens > budget {
                break;
            }
            used += line_tokens;
            lines.push(line);
        }
        lines.reverse();
        lines.concat()
    }

    fn audience_block(audience: &str) -> String {
        format!("Participants in this conversation: {audience}")
    }

    fn intent_block(intent: &str) -> String {
        format!("The user's goal: {intent}")
    }

    fn ensure_live(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
