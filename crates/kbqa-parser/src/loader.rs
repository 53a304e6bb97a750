//! Directory loader - the raw document supplier
//!
//! Walks a directory and reads every file with a configured extension.
//! A file that cannot be read is reported and skipped; it never aborts
//! the batch.

use crate::{DocumentParser, ParserError, PlainTextParser, Result};
use kbqa_core::{Document, IngestionFailure};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file the loader could not turn into a document
#[derive(Debug)]
pub struct LoadFailure {
    pub source_path: String,
    pub error: ParserError,
}

/// Outcome of loading a directory
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Documents in path order
    pub documents: Vec<Document>,

    /// Files that were skipped
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    /// Failures in the shape used by ingestion reports
    pub fn failures_as_ingestion(&self) -> Vec<IngestionFailure> {
        self.failures
            .iter()
            .map(|f| IngestionFailure {
                source_path: f.source_path.clone(),
                reason: f.error.to_string(),
            })
            .collect()
    }
}

/// Loads documents from a directory tree
pub struct DirectoryLoader {
    root: PathBuf,
    extensions: Vec<String>,
    max_depth: usize,
    parser: PlainTextParser,
}

impl DirectoryLoader {
    /// Create a loader for `root` using the plain text parser
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["txt".to_string()],
            max_depth: usize::MAX,
            parser: PlainTextParser,
        }
    }

    /// Only pick up files with these extensions (case-insensitive)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Limit directory recursion (1 = only the root directory)
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Read a single file, subject to the same extension filter as `load`.
    ///
    /// The file does not have to live under the root.
    pub fn load_file(&self, path: &Path) -> Result<Document> {
        if !self.matches_extension(path) {
            return Err(ParserError::UnsupportedFormat(path.display().to_string()));
        }
        self.parser.parse(path)
    }

    /// Load every matching file under the root.
    ///
    /// Fails only when the root itself is missing or not a directory.
    pub fn load(&self) -> Result<LoadReport> {
        if !self.root.is_dir() {
            return Err(ParserError::IoError {
                path: self.root.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "document directory not found",
                ),
            });
        }

        let mut report = LoadReport::default();

        let walker = WalkDir::new(&self.root)
            .max_depth(self.max_depth)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| self.root.display().to_string());
                    tracing::warn!("Skipping unreadable entry {}: {}", path, e);
                    report.failures.push(LoadFailure {
                        source_path: path.clone(),
                        error: ParserError::WalkError {
                            path,
                            message: e.to_string(),
                        },
                    });
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !self.matches_extension(path) {
                continue;
            }

            match self.parser.parse(path) {
                Ok(document) => {
                    tracing::debug!("Loaded {} ({} bytes)", document.source_path, document.text.len());
                    report.documents.push(document);
                }
                Err(e) => {
                    tracing::warn!("Error loading {}: {}", path.display(), e);
                    report.failures.push(LoadFailure {
                        source_path: path.display().to_string(),
                        error: e,
                    });
                }
            }
        }

        tracing::info!(
            "Loaded {} documents from {} ({} failures)",
            report.documents.len(),
            self.root.display(),
            report.failures.len()
        );

        Ok(report)
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_loads_matching_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_tkinter.txt"), "Tkinter builds desktop GUIs").unwrap();
        fs::write(dir.path().join("a_lists.txt"), "Python lists are mutable sequences").unwrap();
        fs::write(dir.path().join("notes.pdf"), "binary").unwrap();

        let report = DirectoryLoader::new(dir.path()).load().unwrap();

        assert_eq!(report.documents.len(), 2);
        assert!(report.failures.is_empty());
        assert!(report.documents[0].source_path.ends_with("a_lists.txt"));
        assert_eq!(report.documents[1].text, "Tkinter builds desktop GUIs");
    }

    #[test]
    fn test_unreadable_file_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), "valid text").unwrap();
        // Invalid UTF-8 fails read_to_string
        fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, 0xfd]).unwrap();

        let report = DirectoryLoader::new(dir.path()).load().unwrap();

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].source_path.ends_with("bad.txt"));

        let failures = report.failures_as_ingestion();
        assert!(failures[0].reason.contains("IO error"));
    }

    #[test]
    fn test_extension_filter_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("top.md"), "# Top").unwrap();
        fs::write(dir.path().join("nested").join("deep.md"), "# Deep").unwrap();

        let all = DirectoryLoader::new(dir.path())
            .with_extensions([".MD"])
            .load()
            .unwrap();
        assert_eq!(all.documents.len(), 2);

        let shallow = DirectoryLoader::new(dir.path())
            .with_extensions(["md"])
            .with_max_depth(1)
            .load()
            .unwrap();
        assert_eq!(shallow.documents.len(), 1);
    }

    #[test]
    fn test_load_file_applies_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.md");
        let report = dir.path().join("report.pdf");
        fs::write(&notes, "# Lists").unwrap();
        fs::write(&report, "binary").unwrap();

        let loader = DirectoryLoader::new("/elsewhere").with_extensions(["md"]);

        let document = loader.load_file(&notes).unwrap();
        assert_eq!(document.text, "# Lists");
        assert!(matches!(
            loader.load_file(&report),
            Err(ParserError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let result = DirectoryLoader::new("/nonexistent/kbqa-data").load();
        assert!(matches!(result, Err(ParserError::IoError { .. })));
    }
}
