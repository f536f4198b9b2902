//! Conversational agent driver.
//!
//! [`AgentDriver`] is shared by every connection. It binds a model provider,
//! the tool definitions and the system prompt into an [`AgentInstance`] and
//! rebuilds that instance only when the set of tool names changes.
//! [`ChatAgent`] pairs the instance with one connection's tool handles and
//! runs chat invocations.
//!
//! # Example
//!
//! ```ignore
//! use agent_bridge::{AgentConfig, AgentDriver, ChatMessage};
//! use agent_bridge::providers::OpenAIProviderFactory;
//!
//! let driver = AgentDriver::new(AgentConfig::default(), Arc::new(OpenAIProviderFactory::new(llm)));
//! let agent = driver.initialize(registry).await?;
//!
//! let mut run = agent.run(vec![ChatMessage::user("find cats")]);
//! while let Some(event) = run.events.recv().await {
//!     println!("{event:?}");
//! }
//! let summary = run.outcome.await??;
//! ```

mod fallback;
mod helpers;
mod llm;
mod turn;
mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use types::ChatSummary;

use crate::error::BridgeError;
use crate::events::AgentEvent;
use crate::llm::{LlmProvider, Message, Tool as ToolDefinition};
use crate::providers::ProviderFactory;
use crate::tools::ToolRegistry;
use crate::types::{AgentConfig, ChatMessage};
use helpers::{DoneGuard, convert_messages, send_event};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, mpsc, oneshot};
use turn::{RoundContext, execute_tool_call, run_round};
use types::RoundState;

/// Capacity of the per-invocation event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A model client bound to tool definitions and a system prompt.
pub struct AgentInstance {
    provider: Arc<dyn LlmProvider>,
    tool_definitions: Vec<ToolDefinition>,
    system_prompt: String,
    signature: String,
}

impl AgentInstance {
    /// Sorted, comma-joined tool names this instance was built for.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.provider.model()
    }
}

/// Builds and caches agent instances.
pub struct AgentDriver {
    config: AgentConfig,
    factory: Arc<dyn ProviderFactory>,
    instance: RwLock<Option<Arc<AgentInstance>>>,
    builds: AtomicUsize,
}

impl AgentDriver {
    #[must_use]
    pub fn new(config: AgentConfig, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            config,
            factory,
            instance: RwLock::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Number of agent instances built so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Bind `tools` to an agent instance, reusing the cached instance when
    /// its tool signature matches.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if a new instance is needed and
    /// the provider cannot be built, e.g. because no credential is set.
    pub async fn initialize(&self, tools: ToolRegistry) -> Result<ChatAgent, BridgeError> {
        let signature = tools.signature();

        let cached = self
            .instance
            .read()
            .await
            .as_ref()
            .filter(|instance| instance.signature == signature)
            .cloned();

        let instance = match cached {
            Some(instance) => {
                debug!("Reusing agent for tool signature [{signature}]");
                instance
            }
            None => {
                if tools.is_empty() {
                    warn!("Building agent without tools");
                }
                let provider = self.factory.create()?;
                let instance = Arc::new(AgentInstance {
                    provider,
                    tool_definitions: tools.to_llm_tools(),
                    system_prompt: self.config.system_prompt.clone(),
                    signature,
                });
                *self.instance.write().await = Some(Arc::clone(&instance));
                self.builds.fetch_add(1, Ordering::SeqCst);
                info!(
                    "Built agent for model {} with {} tools",
                    instance.model(),
                    tools.len()
                );
                instance
            }
        };

        Ok(ChatAgent {
            instance,
            tools: Arc::new(tools),
            config: self.config.clone(),
        })
    }
}

/// An agent instance bound to one connection's tool handles.
#[derive(Clone)]
pub struct ChatAgent {
    instance: Arc<AgentInstance>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

/// Handles of a running chat invocation.
pub struct ChatRun {
    /// Events in emission order; ends with exactly one `done`
    pub events: mpsc::Receiver<AgentEvent>,
    /// How the invocation ended, available once `done` was sent
    pub outcome: oneshot::Receiver<Result<ChatSummary, BridgeError>>,
}

impl ChatAgent {
    #[must_use]
    pub fn instance(&self) -> &AgentInstance {
        &self.instance
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one chat invocation over `messages` in a spawned task.
    #[must_use]
    pub fn run(&self, messages: Vec<ChatMessage>) -> ChatRun {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let agent = self.clone();

        tokio::spawn(async move {
            let done = DoneGuard::new(tx.clone());
            let result = agent.run_rounds(&messages, &tx).await;

            if let Err(e) = &result {
                error!("Chat invocation failed: {e}");
                send_event(&tx, AgentEvent::error(e.to_string())).await;
            }
            done.finish().await;

            if outcome_tx.send(result).is_err() {
                debug!("Chat outcome receiver dropped");
            }
        });

        ChatRun {
            events: rx,
            outcome: outcome_rx,
        }
    }

    async fn run_rounds(
        &self,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<ChatSummary, BridgeError> {
        let mut state = RoundState::new(convert_messages(messages)?);
        let ctx = RoundContext {
            instance: &self.instance,
            tools: &self.tools,
            config: &self.config,
            tx,
        };

        loop {
            if state.iteration >= self.config.max_rounds {
                warn!(
                    "Max rounds reached (rounds={}, max={})",
                    state.iteration, self.config.max_rounds
                );
                break;
            }
            state.begin_round();
            run_round(&ctx, &mut state).await?;

            if state.cancelled || state.tool_invoked {
                break;
            }
            let Some(output) = state.last_output.clone() else {
                break;
            };
            if !fallback::looks_like_json(&output) {
                break;
            }
            // A fallback result is only useful if another round can read it.
            if state.iteration >= self.config.max_rounds {
                warn!(
                    "JSON output in the last round, not invoking a tool (rounds={})",
                    state.iteration
                );
                break;
            }
            if ctx.client_gone(&mut state) {
                break;
            }
            if !self.recover_from_json(&output, &mut state, tx).await {
                break;
            }
        }

        info!(
            "Chat completed (rounds={}, tool_calls={}, fallback_calls={}, cancelled={})",
            state.iteration, state.tool_calls, state.fallback_calls, state.cancelled
        );
        Ok(state.summary())
    }

    /// Treat JSON output as an implicit tool call. Returns whether a tool ran
    /// and the conversation should continue.
    async fn recover_from_json(
        &self,
        output: &str,
        state: &mut RoundState,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> bool {
        let Some(call) = fallback::infer_call(output) else {
            debug!("JSON output does not name a tool, finishing");
            return false;
        };
        let Some(tool) = fallback::resolve(&self.tools, &call) else {
            let err = BridgeError::ToolResolution(format!(
                "{} is not available (tools: [{}])",
                call.tool_name,
                self.tools.signature()
            ));
            warn!("JSON fallback failed: {err}");
            send_event(tx, AgentEvent::error(err.to_string())).await;
            return false;
        };

        let tool_name = tool.describe().name.clone();
        info!("JSON fallback invoking {tool_name} (round={})", state.iteration);
        let result = execute_tool_call(tool, call.arguments.clone(), tx).await;
        state.fallback_calls += 1;

        let call_id = format!("fallback_{}", uuid::Uuid::new_v4().simple());
        if matches!(state.messages.last(), Some(m) if m.text() == Some(output)) {
            state.messages.pop();
        }
        state.messages.push(Message::assistant_with_tool_use(
            Some(output.to_string()),
            &call_id,
            tool_name,
            call.arguments,
        ));
        state
            .messages
            .push(Message::tool_result(call_id, result.output, !result.success));
        true
    }
}
