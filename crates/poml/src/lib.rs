//! POML - a markup-template compiler for structured prompts
//!
//! A document mixes literal markup, components, `for`/`if` directives,
//! `let` bindings and `{{ }}` expressions. Compiling it runs a fixed
//! pipeline:
//! - parse into a CST that survives malformed input
//! - evaluate against a scope into a component tree, tracing every expression
//! - lower into an IR whose nodes keep their source ranges
//! - write text, rich content or chat messages, optionally with a source map
//!
//! Problems are collected as diagnostics rather than returned as errors.
//! The convenience functions turn the first error into a [`PomlError`].
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//!
//! let text = poml::render(
//!     "<task>Greet {{ name }}.</task>",
//!     json!({"name": "Alice"}),
//! ).unwrap();
//!
//! assert_eq!(text, "# Task\n\nGreet Alice.");
//! ```

pub mod components;
pub mod editor;
pub mod error;
pub mod eval;
pub mod expr;
pub mod formats;
pub mod ir;
pub mod loader;
mod lower;
pub mod schema;
pub mod scope;
pub mod tree;
pub mod value;
pub mod writer;

pub use components::{ComponentDef, ComponentRegistry};
pub use error::{PomlError, Result};
pub use eval::{EvalOptions, ExpressionTrace, Stylesheet};
pub use formats::{Formatted, Frame, OutputFormat};
pub use ir::{IrNode, Speaker};
pub use loader::{FileLoader, FsLoader, MemoryLoader, DEFAULT_MAX_INCLUDE_DEPTH};
pub use poml_syntax::{Diagnostic, Diagnostics, LineIndex, Severity, Span, Stage};
pub use schema::{SchemaObject, SchemaOutcome, ToolDefinition};
pub use scope::Scope;
pub use value::Value;
pub use writer::{Content, MappedOutput, Message, RichPart, SourceMap, WriteMode, WriteOptions, Written};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use poml_syntax::{parse_with, ParseResult};

use crate::eval::Evaluation;
use crate::expr::FunctionTable;
use crate::loader::SourceLoader;

/// Settings for parsing and compiling a document.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    base_dir: PathBuf,
    loader: Arc<dyn FileLoader>,
    eval: EvalOptions,
    max_include_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            loader: Arc::new(FsLoader),
            eval: EvalOptions::default(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory `include`, `let src` and media paths are resolved against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_loader(mut self, loader: impl FileLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.eval.registry = registry;
        self
    }

    pub fn with_functions(mut self, functions: FunctionTable) -> Self {
        self.eval.functions = functions;
        self
    }

    pub fn with_stylesheet(mut self, stylesheet: Stylesheet) -> Self {
        self.eval.stylesheet = stylesheet;
        self
    }

    /// Treat `name` as a literal tag whose body is never parsed as markup.
    pub fn with_literal_tag(mut self, name: &str) -> Self {
        self.eval.lexer = self.eval.lexer.with_literal_tag(name);
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Read media files and embed them as base64 (on by default).
    pub fn with_embed_media(mut self, embed: bool) -> Self {
        self.eval.embed_media = embed;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.eval.registry
    }
}

/// A parsed document, ready to be compiled against any number of contexts.
#[derive(Debug, Clone)]
pub struct Poml {
    source: String,
    parsed: ParseResult,
    options: CompileOptions,
}

impl Poml {
    /// Parse with default options. Parsing never fails; problems become
    /// diagnostics of the compilation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use serde_json::json;
    ///
    /// let doc = poml::Poml::parse("<p for=\"n in [1, 2]\">{{ n }}</p>");
    /// let compiled = doc.compile(json!({}));
    /// assert_eq!(compiled.plain(), "1\n\n2");
    /// ```
    pub fn parse(source: &str) -> Self {
        Self::parse_with(source, CompileOptions::default())
    }

    pub fn parse_with(source: &str, options: CompileOptions) -> Self {
        let parsed = parse_with(source, &options.eval.lexer);
        tracing::debug!(
            bytes = source.len(),
            diagnostics = parsed.diagnostics.len(),
            "parsed document"
        );
        Self {
            source: source.to_string(),
            parsed,
            options,
        }
    }

    /// Read and parse a file. Relative paths inside it resolve against
    /// its directory.
    pub fn from_file(path: impl AsRef<Path>, options: CompileOptions) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let options = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => options.with_base_dir(dir),
            _ => options,
        };
        Ok(Self::parse_with(&source, options))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &poml_syntax::Root {
        &self.parsed.root
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Evaluate, lower and collect schema declarations.
    pub fn compile(&self, context: serde_json::Value) -> Compilation {
        self.compile_scope(Scope::from_json(context))
    }

    pub fn compile_scope(&self, scope: Scope) -> Compilation {
        let options = &self.options;
        let mut loader = SourceLoader::new(
            Arc::clone(&options.loader),
            options.base_dir.clone(),
            options.max_include_depth,
        );
        let Evaluation {
            tree,
            trace,
            schema,
            diagnostics: eval_diagnostics,
            single_speaker,
        } = eval::evaluate(&self.parsed.root, scope, &mut loader, &options.eval);

        let mut diagnostics = self.parsed.diagnostics.clone();
        diagnostics.extend(eval_diagnostics.into_vec());
        let ir = lower::lower(&tree, &mut diagnostics);
        tracing::debug!(
            diagnostics = diagnostics.len(),
            expressions = trace.len(),
            "compiled document"
        );

        Compilation {
            ir,
            trace,
            schema,
            diagnostics,
            single_speaker,
            line_index: LineIndex::new(&self.source),
        }
    }
}

/// Everything one compilation produced.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub ir: IrNode,
    pub trace: ExpressionTrace,
    pub schema: SchemaOutcome,
    /// Parse, evaluation, schema and write diagnostics in stage order.
    pub diagnostics: Diagnostics,
    pub single_speaker: bool,
    line_index: LineIndex,
}

impl Compilation {
    /// `None` whenever a schema error occurred.
    pub fn response_schema(&self) -> Option<&SchemaObject> {
        self.schema.response_schema.as_ref()
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.schema.tools
    }

    pub fn runtime(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.schema.runtime
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    pub fn write(&self, mode: WriteMode) -> Written {
        writer::write(
            &self.ir,
            &WriteOptions {
                mode,
                single_speaker: self.single_speaker,
            },
        )
    }

    pub fn plain(&self) -> String {
        writer::write_plain(&self.ir)
    }

    pub fn messages(&self) -> Vec<Message> {
        writer::write_messages(&self.ir, self.single_speaker)
    }

    pub fn write_with_source_map(&self) -> MappedOutput {
        writer::write_with_source_map(&self.ir)
    }

    /// The output frame. Without `chat` the whole document is one human
    /// message.
    pub fn frame(&self, chat: bool) -> Frame {
        let messages = if chat {
            self.messages()
        } else {
            vec![Message {
                speaker: Speaker::Human,
                content: Content::from_parts(writer::write_rich(&self.ir)),
            }]
        };
        Frame::new(messages, &self.schema)
    }

    pub fn format(&self, format: OutputFormat, chat: bool) -> Result<Formatted> {
        formats::format(&self.frame(chat), &self.ir, format)
    }

    /// The first error as a [`PomlError`], if any.
    pub fn first_error(&self) -> Option<PomlError> {
        self.diagnostics.first_error().map(|diagnostic| PomlError::Diagnostic {
            stage: diagnostic.stage,
            message: diagnostic.message.clone(),
            location: self.line_index.location(diagnostic.span.start),
        })
    }

    /// Fail on the first error diagnostic.
    pub fn into_result(self) -> Result<Self> {
        match self.first_error() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Convenience function: compile and write plain text, failing on the
/// first error diagnostic.
pub fn render(source: &str, context: serde_json::Value) -> Result<String> {
    Ok(Poml::parse(source).compile(context).into_result()?.plain())
}

/// Convenience function: compile to IR, failing on the first error.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
///
/// let ir = poml::read("<p>Hi</p>", json!({})).unwrap();
/// assert!(ir.to_markup().contains("original-start-index=\"0\""));
/// ```
pub fn read(source: &str, context: serde_json::Value) -> Result<IrNode> {
    Ok(Poml::parse(source).compile(context).into_result()?.ir)
}

/// Convenience function: compile to chat messages, failing on the first
/// error.
pub fn render_messages(source: &str, context: serde_json::Value) -> Result<Vec<Message>> {
    Ok(Poml::parse(source)
        .compile(context)
        .into_result()?
        .messages())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_document_reuse() {
        let doc = Poml::parse("<p>Hello, {{ name }}!</p>");
        assert_eq!(doc.compile(json!({"name": "Alice"})).plain(), "Hello, Alice!");
        assert_eq!(doc.compile(json!({"name": "Bob"})).plain(), "Hello, Bob!");
    }

    #[test]
    fn test_render_promotes_first_error() {
        let err = render("<p>{{ missing.field }}</p>", json!({})).unwrap_err();
        match err {
            PomlError::Diagnostic { stage, location, .. } => {
                assert_eq!(stage, Stage::Evaluate);
                assert_eq!(location.line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_frame_without_chat_is_one_message() {
        let compiled = Poml::parse("<ai-msg>a</ai-msg><user-msg>b</user-msg>").compile(json!({}));
        assert_eq!(compiled.messages().len(), 2);
        let frame = compiled.frame(false);
        assert_eq!(frame.messages.len(), 1);
        assert_eq!(frame.messages[0].speaker, Speaker::Human);
        assert_eq!(frame.messages[0].content, Content::Text("a\n\nb".to_string()));
    }

    #[test]
    fn test_memory_loader_include() {
        let loader = MemoryLoader::new().with_file("/docs/part.poml", "<p>from {{ who }}</p>");
        let options = CompileOptions::new()
            .with_base_dir("/docs")
            .with_loader(loader);
        let doc = Poml::parse_with("<include src=\"part.poml\"/>", options);
        let compiled = doc.compile(json!({"who": "part"}));
        assert!(compiled.diagnostics.is_empty(), "{:?}", compiled.diagnostics);
        assert_eq!(compiled.plain(), "from part");
    }
}
