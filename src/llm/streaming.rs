//! Incremental model output.
//!
//! Providers yield [`StreamDelta`] values. The agent driver relays text
//! fragments as they arrive and folds every delta into a [`ResponseBuilder`],
//! which produces the same [`ChatResponse`] a non-streaming call would.

use crate::llm::{ChatResponse, ContentBlock, StopReason, Usage};
use futures::Stream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::pin::Pin;

#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// Assistant text for the block at `block_index`.
    TextDelta { delta: String, block_index: usize },

    /// Opens a tool call block; its arguments follow as `ToolInputDelta`s.
    ToolUseStart {
        id: String,
        name: String,
        block_index: usize,
    },

    /// A piece of the JSON arguments of tool call `id`.
    ToolInputDelta {
        id: String,
        delta: String,
        block_index: usize,
    },

    Usage(Usage),

    Done { stop_reason: Option<StopReason> },

    /// The backend gave up mid-response. `recoverable` marks rate limits and
    /// server-side failures.
    Error { message: String, recoverable: bool },
}

/// What [`crate::llm::LlmProvider::chat_stream`] returns.
pub type StreamBox<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<StreamDelta>> + Send + 'a>>;

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    Tool {
        id: String,
        name: String,
        arguments: String,
    },
}

impl PartialBlock {
    /// Tool arguments are parsed only here; an empty argument string means
    /// `{}` and unparsable arguments become `null`.
    fn finish(self) -> Option<ContentBlock> {
        match self {
            Self::Text(text) if text.is_empty() => None,
            Self::Text(text) => Some(ContentBlock::Text { text }),
            Self::Tool {
                id,
                name,
                arguments,
            } => {
                let input = if arguments.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&arguments).unwrap_or(Value::Null)
                };
                Some(ContentBlock::ToolUse { id, name, input })
            }
        }
    }
}

/// Assembles a [`ChatResponse`] from stream deltas. Blocks come out in
/// `block_index` order regardless of arrival order.
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    blocks: BTreeMap<usize, PartialBlock>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl ResponseBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::TextDelta { delta, block_index } => {
                if let PartialBlock::Text(text) = self
                    .blocks
                    .entry(*block_index)
                    .or_insert_with(|| PartialBlock::Text(String::new()))
                {
                    text.push_str(delta);
                }
            }
            StreamDelta::ToolUseStart {
                id,
                name,
                block_index,
            } => {
                self.blocks.insert(
                    *block_index,
                    PartialBlock::Tool {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    },
                );
            }
            StreamDelta::ToolInputDelta { id, delta, .. } => {
                let open_call = self.blocks.values_mut().find_map(|block| match block {
                    PartialBlock::Tool {
                        id: call_id,
                        arguments,
                        ..
                    } if call_id == id => Some(arguments),
                    _ => None,
                });
                if let Some(arguments) = open_call {
                    arguments.push_str(delta);
                }
            }
            StreamDelta::Usage(usage) => self.usage = usage.clone(),
            StreamDelta::Done { stop_reason } => self.stop_reason = *stop_reason,
            StreamDelta::Error { .. } => {}
        }
    }

    #[must_use]
    pub fn finish(self, model: impl Into<String>) -> ChatResponse {
        ChatResponse {
            id: String::new(),
            content: self
                .blocks
                .into_values()
                .filter_map(PartialBlock::finish)
                .collect(),
            model: model.into(),
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

/// The deltas a streaming backend would have sent for `response`.
pub(crate) fn replay_response(response: ChatResponse) -> Vec<StreamDelta> {
    let mut deltas = Vec::with_capacity(response.content.len() + 2);
    for (block_index, block) in response.content.into_iter().enumerate() {
        match block {
            ContentBlock::Text { text } => deltas.push(StreamDelta::TextDelta {
                delta: text,
                block_index,
            }),
            ContentBlock::ToolUse { id, name, input } => deltas.extend([
                StreamDelta::ToolUseStart {
                    id: id.clone(),
                    name,
                    block_index,
                },
                StreamDelta::ToolInputDelta {
                    id,
                    delta: input.to_string(),
                    block_index,
                },
            ]),
            ContentBlock::ToolResult { .. } => {}
        }
    }
    deltas.push(StreamDelta::Usage(response.usage));
    deltas.push(StreamDelta::Done {
        stop_reason: response.stop_reason,
    });
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(delta: &str, block_index: usize) -> StreamDelta {
        StreamDelta::TextDelta {
            delta: delta.to_string(),
            block_index,
        }
    }

    fn start(id: &str, name: &str, block_index: usize) -> StreamDelta {
        StreamDelta::ToolUseStart {
            id: id.to_string(),
            name: name.to_string(),
            block_index,
        }
    }

    fn args(id: &str, delta: &str) -> StreamDelta {
        StreamDelta::ToolInputDelta {
            id: id.to_string(),
            delta: delta.to_string(),
            block_index: 0,
        }
    }

    fn build(deltas: &[StreamDelta]) -> ChatResponse {
        let mut builder = ResponseBuilder::new();
        for delta in deltas {
            builder.push(delta);
        }
        builder.finish("m")
    }

    #[test]
    fn test_text_fragments_join_in_one_block() {
        let response = build(&[text("{\"keyword\"", 0), text(": \"cats\"}", 0)]);
        assert_eq!(response.content.len(), 1);
        assert_eq!(response.first_text(), Some(r#"{"keyword": "cats"}"#));
        assert_eq!(response.model, "m");
    }

    #[test]
    fn test_tool_arguments_assembled_from_fragments() {
        let mut deltas = vec![text("Searching.", 0), start("call_1", "search_feeds", 1)];
        deltas.extend([r#"{"keyw"#, r#"ord":"#, r#""cats"}"#].map(|p| args("call_1", p)));
        deltas.push(StreamDelta::Done {
            stop_reason: Some(StopReason::ToolUse),
        });

        let response = build(&deltas);
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(
            response.content[1],
            ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search_feeds".to_string(),
                input: json!({"keyword": "cats"}),
            }
        );
    }

    #[test]
    fn test_blocks_ordered_by_index_not_arrival() {
        let response = build(&[start("call_1", "list_feeds", 1), text("first", 0)]);
        assert_eq!(response.first_text(), Some("first"));
        assert!(matches!(response.content[0], ContentBlock::Text { .. }));
    }

    #[test]
    fn test_missing_or_broken_arguments() {
        let response = build(&[
            start("call_2", "list_feeds", 0),
            start("call_3", "get_feed_detail", 1),
            args("call_3", "{not json"),
        ]);
        assert!(matches!(&response.content[0], ContentBlock::ToolUse { input, .. } if input == &json!({})));
        assert!(matches!(&response.content[1], ContentBlock::ToolUse { input, .. } if input.is_null()));
    }

    #[test]
    fn test_replay_rebuilds_the_same_response() {
        let response = ChatResponse {
            id: "resp_1".to_string(),
            content: vec![
                ContentBlock::Text {
                    text: "Looking.".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "call_9".to_string(),
                    name: "get_feed_detail".to_string(),
                    input: json!({"feed_id": "abc"}),
                },
            ],
            model: "m".to_string(),
            stop_reason: Some(StopReason::ToolUse),
            usage: Usage {
                input_tokens: 3,
                output_tokens: 4,
            },
        };
        let expected = response.content.clone();

        let rebuilt = build(&replay_response(response));
        assert_eq!(rebuilt.usage.output_tokens, 4);
        assert_eq!(rebuilt.content, expected);
    }
}
