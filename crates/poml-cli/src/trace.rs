//! Trace files for `--trace-dir`.
//!
//! Each run writes a numbered group of files into the directory:
//! `0001.prompt.poml`, `0001.prompt.context.json`, the stylesheet when one
//! was given, and `0001.prompt.result.json` (or `.result.txt` for text).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct TraceRun<'a> {
    /// File name the prefix is derived from; `stdin` when reading input.
    pub name: &'a str,
    pub source: &'a str,
    pub context: &'a serde_json::Value,
    pub stylesheet: Option<&'a str>,
    pub result: &'a str,
    pub result_is_json: bool,
}

/// Write one run into `dir`, creating it if needed. Returns the prefix
/// shared by the written files.
pub fn write(dir: &Path, run: &TraceRun<'_>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let index = next_index(dir)?;
    let prefix = dir.join(format!("{index:04}.{}", stem(run.name)));

    let mut files = vec![
        (".poml", run.source.to_string()),
        (".context.json", serde_json::to_string_pretty(run.context)?),
    ];
    if let Some(stylesheet) = run.stylesheet {
        files.push((".stylesheet.json", stylesheet.to_string()));
    }
    let result_suffix = if run.result_is_json { ".result.json" } else { ".result.txt" };
    files.push((result_suffix, run.result.to_string()));

    for (suffix, contents) in files {
        let path = with_suffix(&prefix, suffix);
        fs::write(&path, contents)
            .with_context(|| format!("failed to write trace file {}", path.display()))?;
    }
    tracing::info!(prefix = %prefix.display(), "wrote trace");
    Ok(prefix)
}

/// One past the highest numbered prefix already in `dir`.
fn next_index(dir: &Path) -> Result<u32> {
    let mut highest = 0;
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to list trace directory {}", dir.display()))?
    {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let digits = name.split('.').next().unwrap_or_default();
        if let Ok(index) = digits.parse::<u32>() {
            highest = highest.max(index);
        }
    }
    Ok(highest + 1)
}

fn stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("stdin");
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "stdin".to_string()
    } else {
        cleaned
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_runs_are_numbered() {
        let dir = TempDir::new().unwrap();
        let context = json!({"name": "Alice"});
        let run = TraceRun {
            name: "prompts/greet.poml",
            source: "<p>Hi {{ name }}</p>",
            context: &context,
            stylesheet: None,
            result: "Hi Alice",
            result_is_json: false,
        };
        let first = write(dir.path(), &run).unwrap();
        let second = write(dir.path(), &run).unwrap();
        assert_eq!(first, dir.path().join("0001.greet"));
        assert_eq!(second, dir.path().join("0002.greet"));
        assert_eq!(
            fs::read_to_string(dir.path().join("0002.greet.result.txt")).unwrap(),
            "Hi Alice"
        );
        assert!(!dir.path().join("0001.greet.stylesheet.json").exists());
    }

    #[test]
    fn test_stdin_prefix() {
        assert_eq!(stem("stdin"), "stdin");
        assert_eq!(stem("a b.poml"), "a_b");
    }
}
