//! Component registry: tag names to component definitions.
//!
//! Lookups are case-, hyphen- and underscore-insensitive and go through an
//! alias table, so `<OutputFormat>`, `<output-format>` and `<output_format>`
//! all resolve to the same definition.

use std::collections::{HashMap, HashSet};

use poml_syntax::normalize_tag_name;

use crate::ir::Speaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineStyle {
    Plain,
    Bold,
    Italic,
    Strikethrough,
    Underline,
}

/// What a component does when it is lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Document,
    Paragraph,
    Section,
    Header,
    CaptionedParagraph,
    LineBreak,
    Inline(InlineStyle),
    Code,
    /// Captioned intention block such as `task` or `role`.
    Intention,
    List,
    ListItem,
    Table,
    Object,
    Image,
    Audio,
    Message(Speaker),
    ToolRequest,
    ToolResponse,
    /// `<text>`: literal body, no markup.
    Text,
    Let,
    Include,
    OutputSchema,
    ToolDefinition,
    Runtime,
    Stylesheet,
    /// Fallback for unknown tags: renders its children.
    Generic,
}

impl ComponentKind {
    /// Meta elements are routed to the schema subsystem and produce no IR.
    pub fn is_meta(self) -> bool {
        matches!(
            self,
            ComponentKind::OutputSchema
                | ComponentKind::ToolDefinition
                | ComponentKind::Runtime
                | ComponentKind::Stylesheet
        )
    }
}

/// A prop a component understands, with its finite value set if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropDef {
    pub name: &'static str,
    pub values: &'static [&'static str],
    pub doc: &'static str,
}

const fn prop(name: &'static str, doc: &'static str) -> PropDef {
    PropDef {
        name,
        values: &[],
        doc,
    }
}

const fn choice(name: &'static str, values: &'static [&'static str], doc: &'static str) -> PropDef {
    PropDef { name, values, doc }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentDef {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: ComponentKind,
    pub props: &'static [PropDef],
    /// Caption shown when the element has no `caption` prop.
    pub default_caption: Option<&'static str>,
    pub doc: &'static str,
}

impl ComponentDef {
    /// Look up a prop by name, including the props every component accepts.
    pub fn prop(&self, name: &str) -> Option<&'static PropDef> {
        let key = normalize_tag_name(name);
        self.props
            .iter()
            .chain(COMMON_PROPS.iter())
            .find(|p| normalize_tag_name(p.name) == key)
    }

    /// Own props first, then the common ones.
    pub fn all_props(&self) -> impl Iterator<Item = &'static PropDef> {
        self.props.iter().chain(COMMON_PROPS.iter())
    }
}

pub const SYNTAXES: &[&str] = &["markdown", "html", "text", "json", "yaml", "xml", "multimedia"];
pub const SPEAKERS: &[&str] = &["human", "ai", "system"];

/// Props accepted by every component.
pub const COMMON_PROPS: &[PropDef] = &[
    choice("syntax", SYNTAXES, "Presentation used to render this element."),
    choice("speaker", SPEAKERS, "Speaker the content is attributed to."),
    prop("if", "Boolean expression; the element is omitted when false."),
    prop("for", "`item in expression`; repeats the element per item."),
    choice(
        "whiteSpace",
        &["pre", "filter", "trim"],
        "How whitespace in text is treated.",
    ),
];

const CAPTION_PROPS: &[PropDef] = &[
    prop("caption", "Caption text."),
    choice(
        "captionStyle",
        &["header", "bold", "plain", "hidden"],
        "How the caption is rendered.",
    ),
    choice(
        "captionEnding",
        &["colon", "newline", "none"],
        "Text placed after a bold or plain caption.",
    ),
];

const MEDIA_PROPS: &[PropDef] = &[
    prop("src", "Path of the media file."),
    prop("base64", "Base64 payload, used instead of src."),
    prop("type", "Media type such as image/png."),
    prop("alt", "Text used when media cannot be shown."),
];

macro_rules! intention {
    ($name:literal, $aliases:expr, $caption:expr, $doc:literal) => {
        ComponentDef {
            name: $name,
            aliases: $aliases,
            kind: ComponentKind::Intention,
            props: CAPTION_PROPS,
            default_caption: $caption,
            doc: $doc,
        }
    };
}

/// The document root; also wraps documents that have no `<poml>` element.
pub const DOCUMENT: ComponentDef = ComponentDef {
    name: "poml",
    aliases: &[],
    kind: ComponentKind::Document,
    props: &[],
    default_caption: None,
    doc: "Document root.",
};

/// The built-in components.
pub const CATALOGUE: &[ComponentDef] = &[
    DOCUMENT,
    ComponentDef {
        name: "p",
        aliases: &["paragraph"],
        kind: ComponentKind::Paragraph,
        props: &[],
        default_caption: None,
        doc: "A paragraph.",
    },
    ComponentDef {
        name: "section",
        aliases: &[],
        kind: ComponentKind::Section,
        props: &[],
        default_caption: None,
        doc: "Groups content; headers inside are one level deeper.",
    },
    ComponentDef {
        name: "h",
        aliases: &["header"],
        kind: ComponentKind::Header,
        props: &[],
        default_caption: None,
        doc: "A heading at the current section level.",
    },
    ComponentDef {
        name: "cp",
        aliases: &["captioned-paragraph"],
        kind: ComponentKind::CaptionedParagraph,
        props: CAPTION_PROPS,
        default_caption: None,
        doc: "A paragraph with a caption.",
    },
    ComponentDef {
        name: "br",
        aliases: &["newline"],
        kind: ComponentKind::LineBreak,
        props: &[],
        default_caption: None,
        doc: "A line break.",
    },
    ComponentDef {
        name: "span",
        aliases: &["inline"],
        kind: ComponentKind::Inline(InlineStyle::Plain),
        props: &[],
        default_caption: None,
        doc: "Inline text.",
    },
    ComponentDef {
        name: "b",
        aliases: &["bold"],
        kind: ComponentKind::Inline(InlineStyle::Bold),
        props: &[],
        default_caption: None,
        doc: "Bold text.",
    },
    ComponentDef {
        name: "i",
        aliases: &["italic"],
        kind: ComponentKind::Inline(InlineStyle::Italic),
        props: &[],
        default_caption: None,
        doc: "Italic text.",
    },
    ComponentDef {
        name: "s",
        aliases: &["strikethrough"],
        kind: ComponentKind::Inline(InlineStyle::Strikethrough),
        props: &[],
        default_caption: None,
        doc: "Struck-through text.",
    },
    ComponentDef {
        name: "u",
        aliases: &["underline"],
        kind: ComponentKind::Inline(InlineStyle::Underline),
        props: &[],
        default_caption: None,
        doc: "Underlined text.",
    },
    ComponentDef {
        name: "code",
        aliases: &[],
        kind: ComponentKind::Code,
        props: &[
            prop("lang", "Language tag of a fenced block."),
            choice("inline", &["true", "false"], "Render as inline code."),
        ],
        default_caption: None,
        doc: "Inline code or a fenced code block.",
    },
    intention!("role", &[], Some("Role"), "The role the model should take."),
    intention!("task", &[], Some("Task"), "The task to perform."),
    intention!(
        "output-format",
        &[],
        Some("Output Format"),
        "The expected output format."
    ),
    intention!("hint", &[], Some("Hint"), "A hint."),
    intention!("introducer", &[], None, "An introduction to what follows."),
    intention!(
        "stepwise-instructions",
        &[],
        Some("Stepwise Instructions"),
        "Ordered instructions."
    ),
    intention!("example", &[], Some("Example"), "A single example."),
    intention!("examples", &["example-set"], Some("Examples"), "A set of examples."),
    intention!("question", &[], Some("Question"), "A question."),
    intention!("input", &["example-input"], Some("Input"), "An example input."),
    intention!("output", &["example-output"], Some("Output"), "An example output."),
    ComponentDef {
        name: "list",
        aliases: &[],
        kind: ComponentKind::List,
        props: &[choice(
            "listStyle",
            &["dash", "star", "plus", "decimal", "latin"],
            "Marker used for items.",
        )],
        default_caption: None,
        doc: "A list of items.",
    },
    ComponentDef {
        name: "item",
        aliases: &["list-item"],
        kind: ComponentKind::ListItem,
        props: &[],
        default_caption: None,
        doc: "A list item.",
    },
    ComponentDef {
        name: "table",
        aliases: &[],
        kind: ComponentKind::Table,
        props: &[
            prop("records", "Rows: an array of objects or arrays."),
            prop("columns", "Column names or {field, header} objects."),
        ],
        default_caption: None,
        doc: "A table rendered from records.",
    },
    ComponentDef {
        name: "obj",
        aliases: &["object", "data-object"],
        kind: ComponentKind::Object,
        props: &[prop("data", "The value to serialize.")],
        default_caption: None,
        doc: "A serialized object.",
    },
    ComponentDef {
        name: "img",
        aliases: &["image"],
        kind: ComponentKind::Image,
        props: MEDIA_PROPS,
        default_caption: None,
        doc: "An image.",
    },
    ComponentDef {
        name: "audio",
        aliases: &[],
        kind: ComponentKind::Audio,
        props: MEDIA_PROPS,
        default_caption: None,
        doc: "An audio clip.",
    },
    ComponentDef {
        name: "human-msg",
        aliases: &["user-msg", "human-message", "user-message"],
        kind: ComponentKind::Message(Speaker::Human),
        props: &[],
        default_caption: None,
        doc: "A message from the human.",
    },
    ComponentDef {
        name: "ai-msg",
        aliases: &["assistant-msg", "ai-message", "assistant-message"],
        kind: ComponentKind::Message(Speaker::Ai),
        props: &[],
        default_caption: None,
        doc: "A message from the AI.",
    },
    ComponentDef {
        name: "system-msg",
        aliases: &["system-message"],
        kind: ComponentKind::Message(Speaker::System),
        props: &[],
        default_caption: None,
        doc: "A system message.",
    },
    ComponentDef {
        name: "tool-request",
        aliases: &["tool-call"],
        kind: ComponentKind::ToolRequest,
        props: &[
            prop("id", "Call id."),
            prop("name", "Tool name."),
            prop("parameters", "Arguments object."),
        ],
        default_caption: None,
        doc: "A tool call made by the AI.",
    },
    ComponentDef {
        name: "tool-response",
        aliases: &["tool-result"],
        kind: ComponentKind::ToolResponse,
        props: &[prop("id", "Call id."), prop("name", "Tool name.")],
        default_caption: None,
        doc: "The result of a tool call.",
    },
    ComponentDef {
        name: "text",
        aliases: &[],
        kind: ComponentKind::Text,
        props: &[],
        default_caption: None,
        doc: "Literal text; markup inside is not interpreted.",
    },
    ComponentDef {
        name: "let",
        aliases: &[],
        kind: ComponentKind::Let,
        props: &[
            prop("name", "Name to bind."),
            prop("value", "Expression to bind."),
            prop("src", "JSON or text file to load."),
            choice("type", &["string", "json", "number", "boolean"], "How to read the body."),
        ],
        default_caption: None,
        doc: "Binds a variable for the rest of the enclosing element.",
    },
    ComponentDef {
        name: "include",
        aliases: &[],
        kind: ComponentKind::Include,
        props: &[
            prop("src", "Path of the document to include."),
            prop("context", "Extra bindings for the included document."),
        ],
        default_caption: None,
        doc: "Includes another document.",
    },
    ComponentDef {
        name: "output-schema",
        aliases: &["response-schema"],
        kind: ComponentKind::OutputSchema,
        props: &[choice(
            "parser",
            &["json", "eval", "auto"],
            "How the body is interpreted.",
        )],
        default_caption: None,
        doc: "The response schema.",
    },
    ComponentDef {
        name: "tool-definition",
        aliases: &["tool"],
        kind: ComponentKind::ToolDefinition,
        props: &[
            prop("name", "Tool name."),
            prop("description", "Tool description."),
            choice(
                "parser",
                &["json", "eval", "auto"],
                "How the body is interpreted.",
            ),
        ],
        default_caption: None,
        doc: "A tool the model may call.",
    },
    ComponentDef {
        name: "runtime",
        aliases: &[],
        kind: ComponentKind::Runtime,
        props: &[],
        default_caption: None,
        doc: "Runtime parameters such as model or temperature.",
    },
    ComponentDef {
        name: "stylesheet",
        aliases: &[],
        kind: ComponentKind::Stylesheet,
        props: &[],
        default_caption: None,
        doc: "Default props per component, as JSON.",
    },
];

/// Definition used for tags that resolve to nothing.
pub const GENERIC: ComponentDef = ComponentDef {
    name: "generic",
    aliases: &[],
    kind: ComponentKind::Generic,
    props: &[],
    default_caption: None,
    doc: "Unknown element; its children are rendered as they are.",
};

/// Maps normalized tag names to definitions. Hosts may register more.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    defs: Vec<ComponentDef>,
    index: HashMap<String, usize>,
    disabled: HashSet<usize>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ComponentRegistry {
    pub fn empty() -> Self {
        Self {
            defs: Vec::new(),
            index: HashMap::new(),
            disabled: HashSet::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for def in CATALOGUE {
            registry.register(*def);
        }
        registry
    }

    /// Register a component. Its names replace earlier registrations.
    pub fn register(&mut self, def: ComponentDef) {
        let slot = self.defs.len();
        for name in std::iter::once(def.name).chain(def.aliases.iter().copied()) {
            self.index.insert(normalize_tag_name(name), slot);
        }
        self.defs.push(def);
    }

    /// Resolve an enabled component by tag name.
    pub fn lookup(&self, tag: &str) -> Option<&ComponentDef> {
        let slot = *self.index.get(&normalize_tag_name(tag))?;
        if self.disabled.contains(&slot) {
            return None;
        }
        self.defs.get(slot)
    }

    /// Enable or disable a component by any of its names. Returns false if
    /// the name is unknown.
    pub fn set_enabled(&mut self, tag: &str, enabled: bool) -> bool {
        let Some(&slot) = self.index.get(&normalize_tag_name(tag)) else {
            return false;
        };
        if enabled {
            self.disabled.remove(&slot);
        } else {
            self.disabled.insert(slot);
        }
        true
    }

    /// Enabled definitions, most recently registered last.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentDef> {
        self.defs
            .iter()
            .enumerate()
            .filter(|(slot, _)| !self.disabled.contains(slot))
            .filter(|(slot, def)| self.index.get(&normalize_tag_name(def.name)) == Some(slot))
            .map(|(_, def)| def)
    }

    /// Every enabled tag name and alias.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .iter()
            .flat_map(|def| std::iter::once(def.name).chain(def.aliases.iter().copied()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("output-format", "output-format")]
    #[case("OutputFormat", "output-format")]
    #[case("output_format", "output-format")]
    #[case("paragraph", "p")]
    #[case("Image", "img")]
    #[case("user-msg", "human-msg")]
    #[case("tool", "tool-definition")]
    fn test_lookup_is_insensitive(#[case] tag: &str, #[case] expected: &str) {
        let registry = ComponentRegistry::standard();
        assert_eq!(registry.lookup(tag).map(|d| d.name), Some(expected));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(ComponentRegistry::standard().lookup("blink").is_none());
    }

    #[test]
    fn test_disable_component() {
        let mut registry = ComponentRegistry::standard();
        assert!(registry.set_enabled("table", false));
        assert!(registry.lookup("table").is_none());
        assert!(!registry.names().contains(&"table"));
        assert!(registry.set_enabled("table", true));
        assert!(registry.lookup("table").is_some());
        assert!(!registry.set_enabled("nope", false));
    }

    #[test]
    fn test_host_registration_overrides() {
        let mut registry = ComponentRegistry::standard();
        registry.register(ComponentDef {
            name: "task",
            aliases: &["job"],
            kind: ComponentKind::Intention,
            props: &[],
            default_caption: Some("Job"),
            doc: "",
        });
        assert_eq!(
            registry.lookup("job").and_then(|d| d.default_caption),
            Some("Job")
        );
        assert_eq!(
            registry.lookup("task").and_then(|d| d.default_caption),
            Some("Job")
        );
        assert_eq!(registry.names().iter().filter(|n| **n == "task").count(), 1);
    }

    #[test]
    fn test_common_props() {
        let registry = ComponentRegistry::standard();
        let list = registry.lookup("list").unwrap();
        assert!(list.prop("list-style").is_some());
        assert_eq!(list.prop("speaker").map(|p| p.values), Some(SPEAKERS));
    }
}
