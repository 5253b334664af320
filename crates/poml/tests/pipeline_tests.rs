//! End-to-end properties of the compile pipeline.

use poml::ir::{IrKind, IrNode};
use poml::writer::RichPart;
use poml::{Content, OutputFormat, Poml, Severity, Speaker, Stage, WriteMode, Written};
use pretty_assertions::assert_eq;
use serde_json::json;

const PROMPT: &str = r#"<poml>
  <role>You are a {{ role }}.</role>
  <task caption="Steps" captionStyle="bold">
    <list listStyle="decimal">
      <item for="step in steps">{{ step }}</item>
    </list>
  </task>
  <p if="verbose">Explain your reasoning.</p>
  <table records="{{ people }}"/>
</poml>"#;

fn context() -> serde_json::Value {
    json!({
        "role": "careful reviewer",
        "steps": ["read", "comment", "approve"],
        "verbose": false,
        "people": [{"name": "Alice", "age": 30}, {"name": "Bob", "age": 25}],
    })
}

#[test]
fn output_is_deterministic() {
    let doc = Poml::parse(PROMPT);
    let first = doc.compile(context()).plain();
    for _ in 0..3 {
        assert_eq!(Poml::parse(PROMPT).compile(context()).plain(), first);
    }
}

#[test]
fn full_prompt_renders() {
    let compiled = Poml::parse(PROMPT).compile(context());
    assert!(compiled.diagnostics.is_empty(), "{:?}", compiled.diagnostics);
    assert_eq!(
        compiled.plain(),
        "# Role\n\nYou are a careful reviewer.\n\n\
         **Steps:**\n\n1. read\n2. comment\n3. approve\n\n\
         | name  | age |\n| ----- | --- |\n| Alice | 30  |\n| Bob   | 25  |"
    );
}

fn check_ranges(node: &IrNode, source: &str) {
    assert!(node.span.start <= node.span.end);
    assert!(node.span.end <= source.len(), "{:?} out of bounds", node.span);
    assert!(source.is_char_boundary(node.span.start));
    assert!(source.is_char_boundary(node.span.end));
    for child in &node.children {
        check_ranges(child, source);
    }
}

#[test]
fn ir_ranges_are_source_ranges() {
    let compiled = Poml::parse(PROMPT).compile(context());
    check_ranges(&compiled.ir, PROMPT);

    let role = compiled
        .ir
        .walk()
        .into_iter()
        .find(|n| matches!(&n.kind, IrKind::Captioned { caption, .. } if caption == "Role"))
        .expect("role block");
    assert!(PROMPT[role.span.start..role.span.end].starts_with("<role>"));
    assert!(PROMPT[role.span.start..role.span.end].ends_with("</role>"));
}

#[test]
fn source_map_covers_output_without_gaps() {
    let compiled = Poml::parse(PROMPT).compile(context());
    let mapped = compiled.write_with_source_map();
    assert_eq!(mapped.text, compiled.plain());

    let mut cursor = 0;
    for segment in &mapped.source_map.segments {
        assert_eq!(segment.output_start, cursor, "gap or overlap at {cursor}");
        assert!(segment.output_end > segment.output_start);
        assert!(segment.input_end <= PROMPT.len());
        cursor = segment.output_end;
    }
    assert_eq!(cursor, mapped.text.len());

    let at = mapped.text.find("careful").unwrap();
    let input = mapped.source_map.to_input(at).unwrap();
    assert!(PROMPT[input.start..input.end].contains("role"));
}

#[test]
fn for_loop_traces_each_iteration() {
    let source = r#"<p for="i in [1,2,3]">{{i}}</p>"#;
    let compiled = Poml::parse(source).compile(json!({}));
    assert_eq!(compiled.plain(), "1\n\n2\n\n3");

    let template = compiled
        .trace
        .records()
        .iter()
        .find(|r| r.expression == "i")
        .expect("template record");
    assert_eq!(template.values.len(), 3);
}

#[test]
fn false_condition_leaves_nothing() {
    let source = r#"<p>kept</p><section if="false"><p>{{ hidden }}</p></section>"#;
    let compiled = Poml::parse(source).compile(json!({}));
    assert_eq!(compiled.plain(), "kept");
    assert!(compiled.diagnostics.is_empty());
    assert!(compiled.trace.records().iter().all(|r| r.expression != "hidden"));
    assert!(compiled
        .ir
        .walk()
        .iter()
        .all(|n| !matches!(n.kind, IrKind::Section)));
}

#[test]
fn duplicate_response_schema_is_withheld() {
    let source = r#"<p>still here</p>
<output-schema>{"type": "object"}</output-schema>
<output-schema>{"type": "string"}</output-schema>"#;
    let compiled = Poml::parse(source).compile(json!({}));
    assert!(compiled.response_schema().is_none());
    assert!(compiled
        .diagnostics
        .iter()
        .any(|d| d.stage == Stage::Schema && d.severity == Severity::Error));
    assert_eq!(compiled.plain(), "still here");
}

#[test]
fn orphan_close_tag_is_recovered() {
    let source = "<p>before</p></x><p>after</p>";
    let compiled = Poml::parse(source).compile(json!({}));
    assert!(compiled
        .diagnostics
        .iter()
        .any(|d| d.stage == Stage::Parse));
    let text = compiled.plain();
    assert!(text.starts_with("before"));
    assert!(text.ends_with("after"));
}

#[test]
fn table_columns_fit_widest_cell() {
    let source = r#"<table records="{{ rows }}"/>"#;
    let compiled = Poml::parse(source).compile(json!({
        "rows": [{"name": "Alice", "age": 30}, {"name": "Bob", "age": 25}],
    }));
    let text = compiled.plain();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].chars().all(|c| matches!(c, '|' | '-' | ' ')));
    assert!(lines.iter().all(|line| line.len() == lines[0].len()));
    assert_eq!(lines[0], "| name  | age |");
}

#[test]
fn speaker_mode_groups_messages() {
    let source = r#"<system-msg>Be terse.</system-msg>
<human-msg>What is 2 + 2?</human-msg>
<ai-msg>4</ai-msg>
<ai-msg>Anything else?</ai-msg>"#;
    let compiled = Poml::parse(source).compile(json!({}));
    let Written::Messages(messages) = compiled.write(WriteMode::Speaker) else {
        panic!("expected messages");
    };
    let speakers: Vec<Speaker> = messages.iter().map(|m| m.speaker).collect();
    assert_eq!(speakers, vec![Speaker::System, Speaker::Human, Speaker::Ai]);
    assert_eq!(messages[2].content, Content::Text("4\n\nAnything else?".to_string()));
}

#[test]
fn openai_chat_format() {
    let source = r#"<system-msg>Be terse.</system-msg>
<human-msg>Hi</human-msg>
<runtime max-tokens="256" temperature="0.2"/>
<tool-definition name="lookup" description="Look a word up">
{"type": "object", "properties": {"word": {"type": "string"}}, "required": ["word"]}
</tool-definition>"#;
    let compiled = Poml::parse(source).compile(json!({}));
    assert!(!compiled.has_errors(), "{:?}", compiled.diagnostics);
    let out = compiled.format(OutputFormat::OpenAiChat, true).unwrap();
    let poml::Formatted::Json(value) = out else {
        panic!("expected json");
    };
    assert_eq!(
        value["messages"],
        json!([
            {"role": "system", "content": "Be terse."},
            {"role": "user", "content": "Hi"},
        ])
    );
    assert_eq!(value["max_tokens"], json!(256));
    assert_eq!(value["temperature"], json!(0.2));
    assert_eq!(value["tools"][0]["function"]["name"], "lookup");
    assert_eq!(value["tools"][0]["function"]["parameters"]["required"], json!(["word"]));
}

#[test]
fn media_stays_a_part_in_rich_mode() {
    let source = r#"<p>Look:</p><img base64="iVBORw0KGgo=" type="image/png" alt="a logo"/>"#;
    let compiled = Poml::parse(source).compile(json!({}));
    let Written::Rich(parts) = compiled.write(WriteMode::Rich) else {
        panic!("expected rich output");
    };
    assert_eq!(parts.len(), 2);
    assert!(matches!(&parts[1], RichPart::Media(m) if m.media_type == "image/png"));
    assert_eq!(compiled.plain(), "Look:\n\na logo");
}

#[test]
fn runaway_repeat_is_a_diagnostic() {
    let source = "<p>{{ 'ab'.repeat(1/0) }}</p><p>after</p>";
    let compiled = Poml::parse(source).compile(json!({}));
    assert!(compiled
        .diagnostics
        .iter()
        .any(|d| d.stage == Stage::Evaluate && d.severity == Severity::Error));
    assert_eq!(compiled.plain(), "after");
}

#[test]
fn deeply_nested_input_is_reported_not_fatal() {
    let parens = format!("<p>{{{{ {}1{} }}}}</p><p>after</p>", "(".repeat(20_000), ")".repeat(20_000));
    let compiled = Poml::parse(&parens).compile(json!({}));
    assert!(compiled
        .diagnostics
        .iter()
        .any(|d| d.stage == Stage::Evaluate && d.message.contains("too deeply")));
    assert_eq!(compiled.plain(), "after");

    let depth = 10_000;
    let elements = format!("{}x{}<p>after</p>", "<p>".repeat(depth), "</p>".repeat(depth));
    let compiled = Poml::parse(&elements).compile(json!({}));
    let parse_errors: Vec<_> = compiled
        .diagnostics
        .iter()
        .filter(|d| d.stage == Stage::Parse && d.severity == Severity::Error)
        .collect();
    assert_eq!(parse_errors.len(), 1, "{parse_errors:?}");
    assert!(compiled.plain().ends_with("after"));
}
