//! File access for `include`, `let src` and media props.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{PomlError, Result};

/// Default bound on nested includes.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 16;

/// Host collaborator that returns raw file contents.
pub trait FileLoader: fmt::Debug + Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl FileLoader for FsLoader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

/// Serves files from memory; useful for editors holding unsaved buffers.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        self.files
            .insert(normalize_path(path.as_ref()), contents.into());
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl FileLoader for MemoryLoader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

/// Resolves relative paths against the including file, caches decoded
/// sources and guards against include cycles.
#[derive(Debug)]
pub struct SourceLoader {
    loader: Arc<dyn FileLoader>,
    base_dir: PathBuf,
    cache: HashMap<PathBuf, Arc<str>>,
    include_stack: Vec<PathBuf>,
    max_depth: usize,
}

impl SourceLoader {
    pub fn new(loader: Arc<dyn FileLoader>, base_dir: impl Into<PathBuf>, max_depth: usize) -> Self {
        Self {
            loader,
            base_dir: base_dir.into(),
            cache: HashMap::new(),
            include_stack: Vec::new(),
            max_depth,
        }
    }

    /// Directory relative paths are resolved against: the directory of the
    /// innermost included file, or the base directory.
    pub fn current_dir(&self) -> &Path {
        self.include_stack
            .last()
            .and_then(|path| path.parent())
            .unwrap_or(&self.base_dir)
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            normalize_path(candidate)
        } else {
            normalize_path(&self.current_dir().join(candidate))
        }
    }

    pub fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.loader.read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PomlError::IncludeError {
                message: format!("File not found: {}", path.display()),
            },
            _ => PomlError::IoError(e),
        })
    }

    /// Read a UTF-8 file, served from the cache after the first read.
    pub fn read_text(&mut self, path: &Path) -> Result<Arc<str>> {
        if let Some(text) = self.cache.get(path) {
            tracing::trace!(path = %path.display(), "source cache hit");
            return Ok(Arc::clone(text));
        }
        let bytes = self.read_bytes(path)?;
        let text: Arc<str> = String::from_utf8(bytes)
            .map_err(|e| PomlError::IncludeError {
                message: format!("{} is not valid UTF-8: {e}", path.display()),
            })?
            .into();
        self.cache.insert(path.to_path_buf(), Arc::clone(&text));
        Ok(text)
    }

    /// Enter an included file. Fails on cycles and on excessive nesting.
    pub fn push_include(&mut self, path: &Path) -> Result<()> {
        if self.include_stack.iter().any(|p| p == path) {
            return Err(PomlError::IncludeError {
                message: format!("Circular include detected: {}", path.display()),
            });
        }
        if self.include_stack.len() >= self.max_depth {
            return Err(PomlError::IncludeError {
                message: format!(
                    "Include depth limit of {} exceeded at {}",
                    self.max_depth,
                    path.display()
                ),
            });
        }
        self.include_stack.push(path.to_path_buf());
        Ok(())
    }

    pub fn pop_include(&mut self) {
        self.include_stack.pop();
    }

    pub fn include_depth(&self) -> usize {
        self.include_stack.len()
    }
}

/// Lexically resolve `.` and `..` so one file always has one cache key.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_loader() -> SourceLoader {
        let files = MemoryLoader::new()
            .with_file("/prompts/a.poml", "<p>A</p>")
            .with_file("/prompts/parts/b.poml", "<p>B</p>");
        SourceLoader::new(Arc::new(files), "/prompts", DEFAULT_MAX_INCLUDE_DEPTH)
    }

    #[test]
    fn test_resolve_relative_to_including_file() {
        let mut loader = memory_loader();
        assert_eq!(loader.resolve("a.poml"), PathBuf::from("/prompts/a.poml"));
        loader
            .push_include(Path::new("/prompts/parts/b.poml"))
            .unwrap();
        assert_eq!(
            loader.resolve("../a.poml"),
            PathBuf::from("/prompts/a.poml")
        );
    }

    #[test]
    fn test_read_text_and_missing_file() {
        let mut loader = memory_loader();
        let path = loader.resolve("a.poml");
        assert_eq!(&*loader.read_text(&path).unwrap(), "<p>A</p>");
        let missing = loader.resolve("nope.poml");
        assert!(matches!(
            loader.read_text(&missing),
            Err(PomlError::IncludeError { .. })
        ));
    }

    #[test]
    fn test_circular_include_detection() {
        let mut loader = memory_loader();
        let path = PathBuf::from("/prompts/a.poml");
        loader.push_include(&path).unwrap();
        assert!(matches!(
            loader.push_include(&path),
            Err(PomlError::IncludeError { .. })
        ));
        loader.pop_include();
        assert!(loader.push_include(&path).is_ok());
    }

    #[test]
    fn test_depth_limit() {
        let mut loader = SourceLoader::new(Arc::new(MemoryLoader::new()), "/", 2);
        loader.push_include(Path::new("/a")).unwrap();
        loader.push_include(Path::new("/b")).unwrap();
        assert!(loader.push_include(Path::new("/c")).is_err());
    }
}
