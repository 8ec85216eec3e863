//! Conversation and tool-calling types.
//!
//! Shaped after the Anthropic Messages API so the same values serialize
//! straight onto the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Block types we do not act on (e.g. thinking).
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// How the model may use the offered tools. `None` still lets a
/// conversation carry earlier tool blocks while forcing a text answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Any,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    pub temperature: f32,
}

impl GenerateRequest {
    /// Whether any message carries a `tool_use` or `tool_result` block.
    /// The Messages API rejects such requests unless tools are defined.
    pub fn has_tool_blocks(&self) -> bool {
        self.messages.iter().flat_map(|m| &m.content).any(|b| {
            matches!(
                b,
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. }
            )
        })
    }
}

/// What the model said: free text plus zero or more tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, id: &str, name: &str, input: Value) -> Self {
        self.tool_calls.push(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input,
        });
        self
    }

    pub fn from_blocks(blocks: Vec<ContentBlock>) -> Self {
        let mut response = Self::default();
        let mut texts = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text { text } => texts.push(text),
                ContentBlock::ToolUse { id, name, input } => {
                    response.tool_calls.push(ToolCall { id, name, input })
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Unsupported => {}
            }
        }
        response.text = texts.join("\n");
        response
    }

    /// The assistant turn to append to the conversation.
    pub fn to_message(&self) -> Message {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text {
                text: self.text.clone(),
            });
        }
        content.extend(self.tool_calls.iter().map(|c| ContentBlock::ToolUse {
            id: c.id.clone(),
            name: c.name.clone(),
            input: c.input.clone(),
        }));
        Message {
            role: Role::Assistant,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_serializes_in_wire_shape() {
        let msg = Message {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: "ok".into(),
                is_error: false,
            }],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "tool_result");
        assert_eq!(value["content"][0]["tool_use_id"], "toolu_1");
        assert!(value["content"][0].get("is_error").is_none());
    }

    #[test]
    fn response_blocks_split_into_text_and_calls() {
        let blocks: Vec<ContentBlock> = serde_json::from_value(json!([
            {"type": "thinking", "thinking": "hmm"},
            {"type": "text", "text": "Writing files"},
            {"type": "tool_use", "id": "t1", "name": "write_files", "input": {"files": []}}
        ]))
        .unwrap();
        let response = ModelResponse::from_blocks(blocks);
        assert_eq!(response.text, "Writing files");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "write_files");

        let message = response.to_message();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.text(), "Writing files");
    }

    #[test]
    fn request_omits_empty_tool_list() {
        let req = GenerateRequest {
            model: "m".into(),
            max_tokens: 10,
            system: "s".into(),
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            tool_choice: None,
            temperature: 0.5,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
        assert_eq!(value["messages"][0]["content"][0]["text"], "hi");
        assert!(!req.has_tool_blocks());
    }

    #[test]
    fn tool_choice_none_serializes_as_tagged_object() {
        let value = serde_json::to_value(ToolChoice::None).unwrap();
        assert_eq!(value, serde_json::json!({"type": "none"}));
    }
}
