//! Locating a book's container file and unpacking what heading alignment
//! needs from it: the navigation document and one reflowed markup document.

use crate::epub::EpubExtractor;
use crate::mobi::{MobiExtractor, MOBI_EXTENSIONS};
use crate::models::Book;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

pub const REFLOWED_FILE_NAME: &str = "book.html";
pub const NAVIGATION_FILE_NAME: &str = "toc.ncx";

static ID_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\b(?:id|name)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

#[derive(Debug, Error, PartialEq)]
pub enum LookupError {
    #[error("No book file matches '{0}'")]
    NotFound(String),
    #[error("{count} book files match '{title}'")]
    Ambiguous { title: String, count: usize },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid container {path}: {details}")]
    Archive { path: String, details: String },
    #[error("Malformed {document}: {details}")]
    Xml { document: String, details: String },
    #[error("Container has no {0}")]
    Missing(&'static str),
    #[error("Unsupported container format: {0}")]
    Unsupported(String),
}

/// Files produced by an extraction, both inside the caller's work directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBook {
    pub navigation: PathBuf,
    pub markup: PathBuf,
}

impl ExtractedBook {
    pub fn markup_file_name(&self) -> String {
        self.markup
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Unpacks a container into `workdir`. The caller owns `workdir` and removes
/// it once the result has been read.
pub trait ContainerExtractor: Sync {
    fn extract(&self, container: &Path, workdir: &Path) -> Result<ExtractedBook, ExtractError>;
}

/// Lowercased ASCII alphanumerics only, for punctuation-insensitive matching.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
struct IndexEntry {
    path: PathBuf,
    /// Normalized file name, extension included.
    name: String,
    /// Normalized file stem, shared by copies of a book in other formats.
    stem: String,
    /// Position of the extension in the configured list.
    rank: usize,
}

/// Every container file found under a root directory.
#[derive(Debug, Clone, Default)]
pub struct ContainerIndex {
    entries: Vec<IndexEntry>,
}

impl ContainerIndex {
    pub fn scan(root: &Path, extensions: &[String]) -> Self {
        let entries = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let ext = e.path().extension()?.to_string_lossy().into_owned();
                let rank = extensions
                    .iter()
                    .position(|want| want.eq_ignore_ascii_case(&ext))?;
                let stem = e
                    .path()
                    .file_stem()
                    .map(|s| normalize_name(&s.to_string_lossy()))
                    .unwrap_or_default();
                Some(IndexEntry {
                    name: normalize_name(&e.file_name().to_string_lossy()),
                    path: e.into_path(),
                    stem,
                    rank,
                })
            })
            .collect();

        ContainerIndex { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Searches by title, then by author. Only a single book counts as a
    /// match; copies of it in several formats resolve to the format listed
    /// first.
    pub fn lookup(&self, book: &Book) -> Result<&Path, LookupError> {
        let mut ambiguous = None;

        for key in [&book.title, &book.author] {
            let needle = normalize_name(key);
            if needle.is_empty() {
                continue;
            }
            debug!(keyword = %needle, "Searching book file");

            let matches: Vec<&IndexEntry> = self
                .entries
                .iter()
                .filter(|entry| entry.name.contains(&needle))
                .collect();

            match matches.as_slice() {
                [] => {}
                [first, rest @ ..] if rest.iter().all(|e| e.stem == first.stem) => {
                    let preferred: &IndexEntry = matches
                        .iter()
                        .copied()
                        .min_by_key(|e| e.rank)
                        .unwrap_or(*first);
                    return Ok(preferred.path.as_path());
                }
                many => {
                    let candidates: Vec<&Path> = many.iter().map(|e| e.path.as_path()).collect();
                    debug!(keyword = %needle, candidates = ?candidates, "Ambiguous book file search");
                    ambiguous.get_or_insert(many.len());
                }
            }
        }

        match ambiguous {
            Some(count) => Err(LookupError::Ambiguous {
                title: book.title.clone(),
                count,
            }),
            None => Err(LookupError::NotFound(book.title.clone())),
        }
    }
}

/// Picks the extractor matching the container's file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatExtractor;

impl ContainerExtractor for FormatExtractor {
    fn extract(&self, container: &Path, workdir: &Path) -> Result<ExtractedBook, ExtractError> {
        match extension_of(container).as_deref() {
            Some("epub") => EpubExtractor.extract(container, workdir),
            Some(ext) if MOBI_EXTENSIONS.contains(&ext) => MobiExtractor.extract(container, workdir),
            _ => Err(ExtractError::Unsupported(container.display().to_string())),
        }
    }
}

/// Lowercased file extension.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Spine documents flattened into the single reflowed document. Each part
/// sits behind a marker element, and its `id`/`name` values are prefixed with
/// that marker so fragments stay unique across parts.
#[derive(Debug, Default)]
pub(crate) struct Reflow {
    markup: String,
}

impl Reflow {
    pub(crate) fn push_document(&mut self, path: &str, document: &str) {
        let marker = part_marker(path);
        let body = scope_ids(body_of(document), &marker);
        self.markup.push_str(&format!("<div id=\"{}\">", marker));
        self.markup.push_str(&body);
        self.markup.push_str("</div>\n");
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.markup.is_empty()
    }

    /// Writes the reflowed markup and the given navigation document.
    pub(crate) fn write(self, navigation: &str, workdir: &Path) -> Result<ExtractedBook, ExtractError> {
        let markup_path = workdir.join(REFLOWED_FILE_NAME);
        let navigation_path = workdir.join(NAVIGATION_FILE_NAME);
        write_file(&markup_path, &self.markup)?;
        write_file(&navigation_path, navigation)?;

        Ok(ExtractedBook {
            navigation: navigation_path,
            markup: markup_path,
        })
    }
}

/// Where a navigation reference to `path#fragment` lands in the reflowed
/// document. References without a fragment target the part marker.
pub(crate) fn reflowed_target(path: &str, fragment: Option<&str>) -> String {
    let marker = part_marker(path);
    match fragment.filter(|f| !f.is_empty()) {
        Some(fragment) => format!("{}#{}", REFLOWED_FILE_NAME, scoped_id(&marker, fragment)),
        None => format!("{}#{}", REFLOWED_FILE_NAME, marker),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ExtractError> {
    std::fs::write(path, contents).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn part_marker(path: &str) -> String {
    let slug: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("part-{}", slug)
}

fn scoped_id(marker: &str, id: &str) -> String {
    format!("{}--{}", marker, id)
}

fn scope_ids(body: &str, marker: &str) -> String {
    ID_ATTR_RE
        .replace_all(body, |caps: &Captures| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            format!("{}\"{}\"", &caps[1], scoped_id(marker, value))
        })
        .into_owned()
}

fn body_of(document: &str) -> &str {
    let lower = document.to_ascii_lowercase();
    let start = lower
        .find("<body")
        .and_then(|idx| lower[idx..].find('>').map(|end| idx + end + 1));
    let end = lower.rfind("</body");

    match (start, end) {
        (Some(start), Some(end)) if start <= end => &document[start..end],
        _ => document,
    }
}
