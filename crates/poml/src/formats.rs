//! Output frames and the chat formats built from them.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{PomlError, Result};
use crate::ir::{IrNode, MediaPart};
use crate::schema::{SchemaObject, SchemaOutcome, ToolDefinition};
use crate::writer::{Content, Message, RichPart, ToolRequestPart, ToolResponsePart};

static CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

/// `maxTokens` -> `max_tokens`.
pub fn to_snake_case(key: &str) -> String {
    CAMEL_BOUNDARY
        .replace_all(key, "${1}_${2}")
        .to_lowercase()
        .replace('-', "_")
}

/// Everything a compiled document produces for a model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaObject>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub runtime: Map<String, JsonValue>,
}

impl Frame {
    pub fn new(messages: Vec<Message>, outcome: &SchemaOutcome) -> Self {
        Self {
            messages,
            schema: outcome.response_schema.clone(),
            tools: outcome.tools.clone(),
            runtime: outcome.runtime.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Raw,
    MessageDict,
    #[default]
    Dict,
    OpenAiChat,
    LangChain,
    Ir,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Raw => "raw",
            OutputFormat::MessageDict => "message_dict",
            OutputFormat::Dict => "dict",
            OutputFormat::OpenAiChat => "openai_chat",
            OutputFormat::LangChain => "langchain",
            OutputFormat::Ir => "ir",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = PomlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "raw" => Ok(OutputFormat::Raw),
            "message_dict" => Ok(OutputFormat::MessageDict),
            "dict" => Ok(OutputFormat::Dict),
            "openai_chat" => Ok(OutputFormat::OpenAiChat),
            "langchain" => Ok(OutputFormat::LangChain),
            "ir" => Ok(OutputFormat::Ir),
            _ => Err(PomlError::UnknownFormat(s.to_string())),
        }
    }
}

/// A formatted result: text for `raw` and `ir`, JSON otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Formatted {
    Text(String),
    Json(JsonValue),
}

impl Formatted {
    pub fn to_pretty_string(&self) -> Result<String> {
        match self {
            Formatted::Text(text) => Ok(text.clone()),
            Formatted::Json(value) => Ok(serde_json::to_string_pretty(value)?),
        }
    }
}

pub fn format(frame: &Frame, ir: &IrNode, format: OutputFormat) -> Result<Formatted> {
    tracing::debug!(format = %format, messages = frame.messages.len(), "formatting frame");
    Ok(match format {
        OutputFormat::Raw => Formatted::Text(raw(&frame.messages)),
        OutputFormat::MessageDict => Formatted::Json(serde_json::to_value(&frame.messages)?),
        OutputFormat::Dict => Formatted::Json(serde_json::to_value(frame)?),
        OutputFormat::OpenAiChat => Formatted::Json(openai_chat(frame)?),
        OutputFormat::LangChain => Formatted::Json(langchain(frame)?),
        OutputFormat::Ir => Formatted::Text(ir.to_markup()),
    })
}

/// A lone message is its text; several get a speaker banner each.
fn raw(messages: &[Message]) -> String {
    if let [message] = messages {
        return message.content.text();
    }
    messages
        .iter()
        .map(|m| format!("===== {} =====\n\n{}", m.speaker, m.content.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn data_url(media: &MediaPart) -> String {
    format!("data:{};base64,{}", media.media_type, media.base64)
}

fn audio_format(media_type: &str) -> &str {
    media_type
        .strip_prefix("audio/")
        .map_or(media_type, |sub| sub.trim_start_matches("x-"))
}

/// Message content and the tool parts pulled out of it.
struct Split {
    content: Vec<RichPart>,
    requests: Vec<ToolRequestPart>,
    responses: Vec<ToolResponsePart>,
}

fn split_tools(content: &Content) -> Split {
    let mut split = Split {
        content: Vec::new(),
        requests: Vec::new(),
        responses: Vec::new(),
    };
    for part in content.parts() {
        match part {
            RichPart::ToolRequest(request) => split.requests.push(request),
            RichPart::ToolResponse(response) => split.responses.push(response),
            RichPart::Text(ref text) if text.is_empty() => {}
            other => split.content.push(other),
        }
    }
    split
}

fn openai_content(parts: &[RichPart]) -> JsonValue {
    if let [RichPart::Text(text)] = parts {
        return JsonValue::String(text.clone());
    }
    let items: Vec<JsonValue> = parts
        .iter()
        .filter_map(|part| match part {
            RichPart::Text(text) => Some(json!({"type": "text", "text": text})),
            RichPart::Media(media) if media.media_type.starts_with("audio/") => Some(json!({
                "type": "input_audio",
                "input_audio": {"data": media.base64, "format": audio_format(&media.media_type)},
            })),
            RichPart::Media(media) => Some(json!({
                "type": "image_url",
                "image_url": {"url": data_url(media)},
            })),
            _ => None,
        })
        .collect();
    JsonValue::Array(items)
}

fn openai_chat(frame: &Frame) -> Result<JsonValue> {
    let mut messages: Vec<JsonValue> = Vec::new();
    for message in &frame.messages {
        let split = split_tools(&message.content);
        let role = message.speaker.role();
        if !split.content.is_empty() {
            messages.push(json!({"role": role, "content": openai_content(&split.content)}));
        }
        if !split.requests.is_empty() {
            let mut calls = Vec::with_capacity(split.requests.len());
            for request in &split.requests {
                calls.push(json!({
                    "id": request.id,
                    "type": "function",
                    "function": {
                        "name": request.name,
                        "arguments": serde_json::to_string(&request.parameters)?,
                    },
                }));
            }
            let merge = messages
                .last_mut()
                .filter(|m| m["role"] == "assistant" && m.get("tool_calls").is_none());
            match merge {
                Some(previous) => previous["tool_calls"] = JsonValue::Array(calls),
                None => messages.push(json!({"role": "assistant", "tool_calls": calls})),
            }
        }
        for response in split.responses {
            messages.push(json!({
                "role": "tool",
                "content": response.content,
                "tool_call_id": response.id,
            }));
        }
    }

    let mut out = Map::new();
    out.insert("messages".to_string(), JsonValue::Array(messages));
    if let Some(schema) = &frame.schema {
        out.insert(
            "response_format".to_string(),
            json!({
                "type": "json_schema",
                "json_schema": {"name": "schema", "schema": schema, "strict": true},
            }),
        );
    }
    if !frame.tools.is_empty() {
        let tools: Vec<JsonValue> = frame
            .tools
            .iter()
            .map(|tool| {
                let mut function = Map::new();
                function.insert("name".to_string(), json!(tool.name));
                if let Some(description) = &tool.description {
                    function.insert("description".to_string(), json!(description));
                }
                function.insert("parameters".to_string(), tool.parameters.as_json().clone());
                json!({"type": "function", "function": function})
            })
            .collect();
        out.insert("tools".to_string(), JsonValue::Array(tools));
    }
    for (key, value) in &frame.runtime {
        out.insert(to_snake_case(key), value.clone());
    }
    Ok(JsonValue::Object(out))
}

fn langchain_content(parts: &[RichPart]) -> JsonValue {
    if let [RichPart::Text(text)] = parts {
        return JsonValue::String(text.clone());
    }
    let items: Vec<JsonValue> = parts
        .iter()
        .filter_map(|part| match part {
            RichPart::Text(text) => Some(json!({"type": "text", "text": text})),
            RichPart::Media(media) => {
                let kind = if media.media_type.starts_with("audio/") { "audio" } else { "image" };
                Some(json!({
                    "type": kind,
                    "source_type": "base64",
                    "data": media.base64,
                    "mime_type": media.media_type,
                }))
            }
            _ => None,
        })
        .collect();
    JsonValue::Array(items)
}

fn langchain(frame: &Frame) -> Result<JsonValue> {
    let mut messages: Vec<JsonValue> = Vec::new();
    for message in &frame.messages {
        let split = split_tools(&message.content);
        if !split.content.is_empty() {
            messages.push(json!({
                "type": message.speaker.as_str(),
                "data": {"content": langchain_content(&split.content)},
            }));
        }
        if !split.requests.is_empty() {
            let calls: Vec<JsonValue> = split
                .requests
                .iter()
                .map(|r| json!({"id": r.id, "name": r.name, "args": r.parameters}))
                .collect();
            let merge = messages
                .last_mut()
                .filter(|m| m["type"] == "ai" && m["data"].get("tool_calls").is_none());
            match merge {
                Some(previous) => previous["data"]["tool_calls"] = JsonValue::Array(calls),
                None => messages.push(json!({"type": "ai", "data": {"tool_calls": calls}})),
            }
        }
        for response in split.responses {
            messages.push(json!({
                "type": "tool",
                "data": {
                    "content": response.content,
                    "tool_call_id": response.id,
                    "name": response.name,
                },
            }));
        }
    }

    let mut out = Map::new();
    out.insert("messages".to_string(), JsonValue::Array(messages));
    if let Some(schema) = &frame.schema {
        out.insert("schema".to_string(), serde_json::to_value(schema)?);
    }
    if !frame.tools.is_empty() {
        out.insert("tools".to_string(), serde_json::to_value(&frame.tools)?);
    }
    if !frame.runtime.is_empty() {
        out.insert("runtime".to_string(), JsonValue::Object(frame.runtime.clone()));
    }
    Ok(JsonValue::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Speaker;
    use poml_syntax::Span;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn text(speaker: Speaker, value: &str) -> Message {
        Message {
            speaker,
            content: Content::Text(value.to_string()),
        }
    }

    fn empty_ir() -> IrNode {
        IrNode::new(crate::ir::IrKind::Document, Span::new(0, 0))
    }

    #[rstest]
    #[case("maxTokens", "max_tokens")]
    #[case("temperature", "temperature")]
    #[case("topP", "top_p")]
    #[case("stop-sequences", "stop_sequences")]
    fn test_snake_case(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(to_snake_case(input), expected);
    }

    #[test]
    fn test_format_names() {
        assert_eq!("openai-chat".parse::<OutputFormat>().unwrap(), OutputFormat::OpenAiChat);
        assert!("markdown".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_openai_chat_roles_and_runtime() {
        let mut frame = Frame {
            messages: vec![text(Speaker::System, "Be brief."), text(Speaker::Human, "Hi")],
            ..Frame::default()
        };
        frame.runtime.insert("maxTokens".to_string(), json!(100));
        let out = format(&frame, &empty_ir(), OutputFormat::OpenAiChat).unwrap();
        assert_eq!(
            out,
            Formatted::Json(json!({
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "Hi"},
                ],
                "max_tokens": 100,
            }))
        );
    }

    #[test]
    fn test_tool_calls_merge_into_assistant_message() {
        let frame = Frame {
            messages: vec![
                text(Speaker::Ai, "Let me check."),
                Message {
                    speaker: Speaker::Ai,
                    content: Content::Rich(vec![RichPart::ToolRequest(ToolRequestPart {
                        id: "c1".to_string(),
                        name: "search".to_string(),
                        parameters: json!({"q": "rust"}),
                    })]),
                },
                Message {
                    speaker: Speaker::Tool,
                    content: Content::Rich(vec![RichPart::ToolResponse(ToolResponsePart {
                        id: "c1".to_string(),
                        name: "search".to_string(),
                        content: "found".to_string(),
                    })]),
                },
            ],
            ..Frame::default()
        };
        let Formatted::Json(out) = format(&frame, &empty_ir(), OutputFormat::OpenAiChat).unwrap() else {
            panic!("expected json");
        };
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["tool_calls"][0]["function"]["arguments"], "{\"q\":\"rust\"}");
        assert_eq!(messages[1], json!({"role": "tool", "content": "found", "tool_call_id": "c1"}));

        let Formatted::Json(out) = format(&frame, &empty_ir(), OutputFormat::LangChain).unwrap() else {
            panic!("expected json");
        };
        assert_eq!(out["messages"][0]["data"]["tool_calls"][0]["args"]["q"], "rust");
        assert_eq!(out["messages"][1]["type"], "tool");
    }

    #[test]
    fn test_media_parts() {
        let media = MediaPart {
            media_type: "image/png".to_string(),
            base64: "AAAA".to_string(),
            alt: None,
        };
        let frame = Frame {
            messages: vec![Message {
                speaker: Speaker::Human,
                content: Content::Rich(vec![
                    RichPart::Text("See".to_string()),
                    RichPart::Media(media),
                ]),
            }],
            ..Frame::default()
        };
        let Formatted::Json(out) = format(&frame, &empty_ir(), OutputFormat::OpenAiChat).unwrap() else {
            panic!("expected json");
        };
        assert_eq!(
            out["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        let Formatted::Json(out) = format(&frame, &empty_ir(), OutputFormat::LangChain).unwrap() else {
            panic!("expected json");
        };
        assert_eq!(out["messages"][0]["data"]["content"][1]["mime_type"], "image/png");
    }

    #[test]
    fn test_raw_banners() {
        let single = vec![text(Speaker::Human, "only")];
        assert_eq!(raw(&single), "only");
        let many = vec![text(Speaker::Human, "q"), text(Speaker::Ai, "a")];
        assert_eq!(raw(&many), "===== human =====\n\nq\n\n===== ai =====\n\na");
    }

    #[test]
    fn test_dict_omits_empty_keys() {
        let frame = Frame {
            messages: vec![text(Speaker::Human, "x")],
            ..Frame::default()
        };
        let out = format(&frame, &empty_ir(), OutputFormat::Dict).unwrap();
        assert_eq!(
            out,
            Formatted::Json(json!({"messages": [{"speaker": "human", "content": "x"}]}))
        );
    }
}
