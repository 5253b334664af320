//! Output formats for whole documents.

use poml::{Formatted, OutputFormat, Poml};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn format_json(source: &str, format: OutputFormat) -> Value {
    let compiled = Poml::parse(source).compile(json!({}));
    assert!(!compiled.has_errors(), "{:?}", compiled.diagnostics);
    match compiled.format(format, true).unwrap() {
        Formatted::Json(value) => value,
        Formatted::Text(text) => panic!("expected json, got {text:?}"),
    }
}

const IMAGE: &str = r#"<p>Image <img base64="iVBORw0KGgo=" type="image/png" alt="tiny"/></p>"#;

#[test]
fn text_before_inline_image_keeps_trailing_space() {
    let dict = format_json(IMAGE, OutputFormat::MessageDict);
    assert_eq!(dict[0]["speaker"], "human");
    assert_eq!(dict[0]["content"][0], "Image ");
    assert_eq!(dict[0]["content"][1]["type"], "image/png");
    assert_eq!(dict[0]["content"][1]["alt"], "tiny");

    let chat = format_json(IMAGE, OutputFormat::OpenAiChat);
    assert_eq!(chat["messages"][0]["content"][0], json!({"type": "text", "text": "Image "}));
    assert_eq!(
        chat["messages"][0]["content"][1]["image_url"]["url"],
        "data:image/png;base64,iVBORw0KGgo="
    );

    let langchain = format_json(IMAGE, OutputFormat::LangChain);
    assert_eq!(
        langchain["messages"][0]["data"]["content"][0],
        json!({"type": "text", "text": "Image "})
    );
}

#[test]
fn openai_tool_call_message_has_no_content_key() {
    let source = r#"<poml>
    <human-msg>Search for Python</human-msg>
    <tool-request id="call_123" name="search" parameters="{{ { query: 'Python' } }}" />
    <tool-response id="call_123" name="search">Python is a language.</tool-response>
    </poml>"#;
    let out = format_json(source, OutputFormat::OpenAiChat);
    let messages = out["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], json!({"role": "user", "content": "Search for Python"}));

    let assistant = messages[1].as_object().unwrap();
    let keys: Vec<&str> = assistant.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["role", "tool_calls"]);
    assert_eq!(assistant["role"], "assistant");
    let call = &assistant["tool_calls"][0];
    assert_eq!(call["id"], "call_123");
    assert_eq!(call["type"], "function");
    assert_eq!(call["function"]["name"], "search");
    let arguments: Value =
        serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(arguments, json!({"query": "Python"}));

    assert_eq!(
        messages[2],
        json!({"role": "tool", "content": "Python is a language.", "tool_call_id": "call_123"})
    );
}

#[test]
fn langchain_tool_call_data_is_only_tool_calls() {
    let source = r#"<poml>
    <tool-request id="call_456" name="calculate" parameters="{{ { expression: '2 + 2' } }}" />
    <tool-response id="call_456" name="calculate">4</tool-response>
    </poml>"#;
    let out = format_json(source, OutputFormat::LangChain);
    assert_eq!(
        out["messages"],
        json!([
            {
                "type": "ai",
                "data": {"tool_calls": [{"id": "call_456", "name": "calculate", "args": {"expression": "2 + 2"}}]},
            },
            {"type": "tool", "data": {"content": "4", "tool_call_id": "call_456", "name": "calculate"}},
        ])
    );
}

#[test]
fn dict_carries_schema_tools_and_runtime() {
    let source = r#"<poml>
    <output-schema>{"type": "object", "properties": {"answer": {"type": "string"}}, "required": ["answer"]}</output-schema>
    <tool-definition name="search" description="Search for information">
        {"type": "object", "properties": {"query": {"type": "string"}}}
    </tool-definition>
    <runtime temperature="0.5" max-tokens="150" />
    <p>What is AI?</p>
    </poml>"#;
    assert_eq!(
        format_json(source, OutputFormat::Dict),
        json!({
            "messages": [{"speaker": "human", "content": "What is AI?"}],
            "schema": {"type": "object", "properties": {"answer": {"type": "string"}}, "required": ["answer"]},
            "tools": [{
                "type": "function",
                "name": "search",
                "description": "Search for information",
                "parameters": {"type": "object", "properties": {"query": {"type": "string"}}},
            }],
            "runtime": {"temperature": 0.5, "maxTokens": 150},
        })
    );
}
