use super::AgentInstance;
use super::helpers::{ModelTurn, assistant_message, elapsed_ms, send_event};
use super::llm::call_model;
use super::types::RoundState;
use crate::error::BridgeError;
use crate::events::AgentEvent;
use crate::llm::{ChatRequest, Message};
use crate::tools::{Tool, ToolRegistry};
use crate::types::{AgentConfig, ToolResult};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Everything a round needs besides its mutable state.
pub(super) struct RoundContext<'a> {
    pub(super) instance: &'a AgentInstance,
    pub(super) tools: &'a ToolRegistry,
    pub(super) config: &'a AgentConfig,
    pub(super) tx: &'a mpsc::Sender<AgentEvent>,
}

impl RoundContext<'_> {
    /// Marks the invocation cancelled once nobody receives its events.
    pub(super) fn client_gone(&self, state: &mut RoundState) -> bool {
        if self.tx.is_closed() && !state.cancelled {
            info!("Client gone, stopping chat (round={})", state.iteration);
            state.cancelled = true;
        }
        state.cancelled
    }
}

/// Run one round: call the model, execute any tools it asks for, and call
/// it again with the results until it answers without tool use or the turn
/// bound is hit.
///
/// On return `state.tool_invoked` tells whether a tool ran and
/// `state.last_output` holds the final text, if any.
pub(super) async fn run_round(
    ctx: &RoundContext<'_>,
    state: &mut RoundState,
) -> Result<(), BridgeError> {
    let mut turn = 0;

    loop {
        if ctx.client_gone(state) {
            return Ok(());
        }
        turn += 1;
        let request = ChatRequest {
            system: ctx.instance.system_prompt.clone(),
            messages: state.messages.clone(),
            tools: (!ctx.instance.tool_definitions.is_empty())
                .then(|| ctx.instance.tool_definitions.clone()),
            max_tokens: ctx.config.max_tokens,
        };

        debug!("Calling LLM (round={}, turn={turn})", state.iteration);
        let response =
            call_model(ctx.instance.provider.as_ref(), request, ctx.config.streaming, ctx.tx)
                .await?;
        state.add_usage(&response.usage);

        let ModelTurn { text, calls } = ModelTurn::from_response(&response);

        if calls.is_empty() {
            if let Some(text) = &text {
                state.messages.push(Message::assistant(text.clone()));
            }
            state.last_output = text;
            info!("Round {} completed (no tool use, turn={turn})", state.iteration);
            return Ok(());
        }

        state.tool_invoked = true;
        state.messages.push(assistant_message(&response));

        for call in calls {
            if ctx.client_gone(state) {
                return Ok(());
            }
            let result = match ctx.tools.get(&call.name) {
                Some(tool) => execute_tool_call(tool, call.input, ctx.tx).await,
                None => {
                    warn!("Model requested unknown tool {}", call.name);
                    send_event(ctx.tx, AgentEvent::tool_call_start(&call.name, call.input)).await;
                    let result = ToolResult::error(format!("Unknown tool: {}", call.name));
                    send_event(
                        ctx.tx,
                        AgentEvent::tool_call_end(&call.name, false, &result.output),
                    )
                    .await;
                    result
                }
            };
            state.tool_calls += 1;
            state
                .messages
                .push(Message::tool_result(call.id, result.output, !result.success));
        }

        if turn >= ctx.config.max_tool_turns {
            warn!(
                "Max tool turns reached (round={}, max={})",
                state.iteration, ctx.config.max_tool_turns
            );
            return Ok(());
        }
    }
}

/// Invoke a tool, relaying `tool_call` start and end events around it.
///
/// Invocation errors become error results; they never abort the round.
pub(super) async fn execute_tool_call(
    tool: &Arc<dyn Tool>,
    input: Value,
    tx: &mpsc::Sender<AgentEvent>,
) -> ToolResult {
    let name = tool.describe().name.clone();
    info!("Executing tool {name}");
    send_event(tx, AgentEvent::tool_call_start(&name, input.clone())).await;

    let started = Instant::now();
    let result = match tool.invoke(input).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Tool {name} failed: {e}");
            ToolResult::error(format!("Tool error: {e}"))
        }
    };
    let result = match result.duration_ms {
        Some(_) => result,
        None => result.with_duration(elapsed_ms(started)),
    };

    send_event(
        tx,
        AgentEvent::tool_call_end(&name, result.success, &result.output),
    )
    .await;
    result
}
