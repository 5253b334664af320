//! Lexer totality, range invariants and recovery on broken input.

use poml_syntax::{
    parse, tokenize, ElementBody, ElementContent, NodeKind, NodeRef, Severity, Span, Stage,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

const INPUTS: &[&str] = &[
    "",
    "plain text only",
    "<p>Hello {{ name }}</p>",
    "<task caption=\"A {{ x }} b\">body</task>",
    "<p for=\"item in items\" if=\"item.ok\">{{ item.name }}</p>",
    "<text><b>not markup</b> {{ nor this }}</text>",
    "<!-- note --><!-- @pragma components +ai-msg -->",
    "<p>unclosed",
    "</orphan><p>x</p>",
    "<a><b></a></b>",
    "<p>{{ }}</p>",
    "<p>{{ 'a }}' + \"}}\" }}</p>",
    "<p attr=\"unterminated></p>",
    "<<<>>>{{{{}}}}",
    "héllo <b>wörld</b> ✓",
];

fn check_contains_children(node: NodeRef<'_>) {
    for child in node.children() {
        assert!(
            node.span().contains_span(child.span()),
            "{:?} {:?} does not contain {:?} {:?}",
            node.kind(),
            node.span(),
            child.kind(),
            child.span()
        );
        check_contains_children(child);
    }
}

#[test]
fn tokens_cover_the_source() {
    for source in INPUTS {
        let tokens = tokenize(source);
        let mut cursor = 0;
        for token in &tokens {
            assert_eq!(token.span.start, cursor, "gap in {source:?}");
            assert_eq!(&source[token.span.start..token.span.end], token.text);
            cursor = token.span.end;
        }
        assert_eq!(cursor, source.len(), "tokens stop early in {source:?}");
    }
}

#[test]
fn node_ranges_nest() {
    for source in INPUTS {
        let result = parse(source);
        assert_eq!(result.root.span, Span::new(0, source.len()));
        check_contains_children(NodeRef::Root(&result.root));
    }
}

#[test]
fn literal_body_is_not_markup() {
    let result = parse("<text><b>kept</b> {{ raw }}</text>");
    assert!(result.diagnostics.is_empty());
    let ElementContent::Element(element) = &result.root.children[0] else {
        panic!("expected element");
    };
    match &element.body {
        ElementBody::Literal(text) => assert_eq!(text.value, "<b>kept</b> {{ raw }}"),
        other => panic!("expected literal body, got {other:?}"),
    }
}

#[test]
fn mismatched_close_is_text_at_current_depth() {
    let source = "<a><b></a></b>";
    let result = parse(source);
    let errors: Vec<_> = result.diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(!errors.is_empty());
    assert!(errors.iter().all(|d| d.stage == Stage::Parse));

    // `</a>` does not close `<a>`: it stays inside `<b>` as text, and `</b>`
    // closes `<b>`. `<a>` is left open.
    let ElementContent::Element(a) = &result.root.children[0] else {
        panic!("expected <a>");
    };
    assert!(a.close.is_none());
    let ElementContent::Element(b) = &a.children()[0] else {
        panic!("expected <b>");
    };
    assert!(b.close.is_some());
    assert!(matches!(&b.children()[0], ElementContent::Text(t) if t.value == "</a>"));
}

#[rstest]
#[case("</x><p>after</p>", 1)]
#[case("<p>before</p></x>", 1)]
#[case("<p>{{ }}</p>", 1)]
fn recovery_keeps_siblings(#[case] source: &str, #[case] expected_errors: usize) {
    let result = parse(source);
    let errors = result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    assert_eq!(errors, expected_errors, "{:?}", result.diagnostics);
    let elements = result
        .root
        .children
        .iter()
        .filter(|c| matches!(c, ElementContent::Element(_)))
        .count();
    assert_eq!(elements, 1);
}

#[test]
fn template_ignores_braces_in_strings() {
    let result = parse("<p>{{ 'a }}' + \"}}\" }}</p>");
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    let ElementContent::Element(p) = &result.root.children[0] else {
        panic!("expected element");
    };
    let ElementContent::Template(template) = &p.children()[0] else {
        panic!("expected template");
    };
    assert_eq!(template.expression, "'a }}' + \"}}\"");
}

#[test]
fn path_at_finds_innermost_node() {
    let source = "<p speaker=\"ai\">{{ x }}</p>";
    let result = parse(source);
    let root = NodeRef::Root(&result.root);

    let kinds = |offset: usize| -> Vec<NodeKind> {
        root.path_at(offset).iter().map(NodeRef::kind).collect()
    };
    assert_eq!(
        kinds(12),
        vec![
            NodeKind::Root,
            NodeKind::Element,
            NodeKind::OpenTagPartial,
            NodeKind::Attribute,
            NodeKind::Quoted,
        ]
    );
    assert_eq!(
        kinds(19),
        vec![NodeKind::Root, NodeKind::Element, NodeKind::Template]
    );
}
