//! `poml` command line front end.
//!
//! ```bash
//! poml -f prompt.poml --context-file ctx.json --format openai_chat
//! poml -f prompt.poml --context '{"name": "Alice"}' --format raw -o out.txt
//! poml -f prompt.poml --trace-dir traces/
//! ```

mod trace;

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use poml::{
    Compilation, CompileOptions, Formatted, LineIndex, OutputFormat, Poml, Severity, Stylesheet,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "poml")]
#[command(about = "Compile POML prompt markup into messages", long_about = None)]
#[command(version)]
struct Cli {
    /// Template file; standard input when omitted
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Context as an inline JSON object
    #[arg(long, value_name = "JSON", conflicts_with = "context_file")]
    context: Option<String>,

    /// Context read from a JSON file
    #[arg(long, value_name = "PATH")]
    context_file: Option<PathBuf>,

    /// Stylesheet read from a JSON file
    #[arg(long, value_name = "PATH")]
    stylesheet_file: Option<PathBuf>,

    /// Split the output into speaker messages
    #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
    chat: bool,

    /// raw, message_dict, dict, openai_chat, langchain or ir
    #[arg(long, value_name = "FORMAT", default_value = "dict")]
    format: String,

    /// Write the result here instead of standard output
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Also save the markup, context, stylesheet and result of this run
    #[arg(long, value_name = "DIR")]
    trace_dir: Option<PathBuf>,

    /// Print the plain text with its source map as JSON
    #[arg(long)]
    source_map: bool,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("POML_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_context(cli: &Cli) -> Result<serde_json::Value> {
    let text = match (&cli.context, &cli.context_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read context file {}", path.display()))?,
        (None, None) => return Ok(serde_json::Value::Object(Default::default())),
    };
    let value: serde_json::Value =
        serde_json::from_str(&text).context("context is not valid JSON")?;
    if !value.is_object() {
        bail!("context must be a JSON object");
    }
    Ok(value)
}

/// Compile options and the stylesheet text they were built from.
fn compile_options(cli: &Cli) -> Result<(CompileOptions, Option<String>)> {
    let mut options = CompileOptions::new();
    let Some(path) = &cli.stylesheet_file else {
        return Ok((options, None));
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read stylesheet {}", path.display()))?;
    let stylesheet = Stylesheet::parse(&text).map_err(anyhow::Error::msg)?;
    options = options.with_stylesheet(stylesheet);
    Ok((options, Some(text)))
}

fn load(cli: &Cli, options: CompileOptions) -> Result<(Poml, String)> {
    match &cli.file {
        Some(path) => {
            let doc = Poml::from_file(path, options)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok((doc, path.display().to_string()))
        }
        None => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("failed to read standard input")?;
            Ok((Poml::parse_with(&source, options), "<stdin>".to_string()))
        }
    }
}

/// `file:line:col: severity: message`, one per line.
fn report(compiled: &Compilation, source: &str, name: &str) {
    let index = LineIndex::new(source);
    let mut stderr = io::stderr().lock();
    for diagnostic in compiled.diagnostics.iter() {
        let location = index.location(diagnostic.span.start);
        let severity = match diagnostic.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "info",
            Severity::Hint => "hint",
        };
        let _ = writeln!(
            stderr,
            "{name}:{location}: {severity}: {}",
            diagnostic.message
        );
    }
}

fn emit(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{text}")?;
            Ok(())
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let context = read_context(cli)?;
    let (options, stylesheet) = compile_options(cli)?;
    let (doc, name) = load(cli, options)?;

    let compiled = doc.compile(context.clone());
    report(&compiled, doc.source(), &name);

    let (text, is_json) = if cli.source_map {
        (serde_json::to_string_pretty(&compiled.write_with_source_map())?, true)
    } else {
        let format: OutputFormat = cli.format.parse()?;
        let formatted = compiled.format(format, cli.chat)?;
        let is_json = matches!(formatted, Formatted::Json(_));
        (formatted.to_pretty_string()?, is_json)
    };
    if let Some(dir) = &cli.trace_dir {
        let run = trace::TraceRun {
            name: if cli.file.is_some() { name.as_str() } else { "stdin" },
            source: doc.source(),
            context: &context,
            stylesheet: stylesheet.as_deref(),
            result: &text,
            result_is_json: is_json,
        };
        trace::write(dir, &run)?;
    }
    emit(cli.output.as_deref(), &text)?;
    Ok(!compiled.has_errors())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
