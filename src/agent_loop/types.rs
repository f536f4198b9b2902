use crate::llm::{Message, Usage};

/// Mutable state of one chat invocation. Dropped when the invocation ends.
#[derive(Debug, Default)]
pub(super) struct RoundState {
    /// Rounds started so far, JSON-fallback rounds included
    pub(super) iteration: usize,
    /// Model-native conversation, grown as tools run
    pub(super) messages: Vec<Message>,
    /// Whether a tool ran in the current round
    pub(super) tool_invoked: bool,
    /// Final text of the last model response in the current round
    pub(super) last_output: Option<String>,
    pub(super) usage: Usage,
    pub(super) tool_calls: usize,
    pub(super) fallback_calls: usize,
    /// The client stopped listening; no further model or tool calls
    pub(super) cancelled: bool,
}

impl RoundState {
    pub(super) fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Clears per-round fields before the next round starts.
    pub(super) fn begin_round(&mut self) {
        self.iteration += 1;
        self.tool_invoked = false;
        self.last_output = None;
    }

    pub(super) fn add_usage(&mut self, usage: &Usage) {
        self.usage.accumulate(usage);
    }

    pub(super) fn summary(&self) -> ChatSummary {
        ChatSummary {
            rounds: self.iteration,
            tool_calls: self.tool_calls,
            fallback_calls: self.fallback_calls,
            usage: self.usage.clone(),
            cancelled: self.cancelled,
        }
    }
}

/// What a finished chat invocation did.
#[derive(Clone, Debug, Default)]
pub struct ChatSummary {
    /// Rounds executed
    pub rounds: usize,
    /// Tools invoked through structured tool calls
    pub tool_calls: usize,
    /// Tools invoked through JSON-fallback recovery
    pub fallback_calls: usize,
    pub usage: Usage,
    /// Stopped early because the client went away
    pub cancelled: bool,
}

/// Error type for stream processing.
pub(super) enum StreamError {
    Recoverable(String),
    Fatal(String),
}
