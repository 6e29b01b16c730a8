use crate::models::{Book, Highlight, Location};
use crate::normalize::normalize_header;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

pub const RECORD_DELIMITER: &str = "==========";

/// Layouts Kindle uses for the `Added on` fragment.
const DATE_FORMATS: &[&str] = &[
    "%A, %B %d, %Y %I:%M:%S %p",
    "%A, %d %B %Y %I:%M:%S %p",
    "%A, %d %B %Y %H:%M:%S",
    "%A, %B %d, %Y %H:%M:%S",
    "%B %d, %Y %I:%M:%S %p",
    "%d %B %Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read clippings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Clippings file {0} is not valid UTF-8")]
    Encoding(String),
}

/// Result of parsing a whole export.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedClippings {
    pub books: BTreeMap<String, Book>,
    /// Non-blank chunks found between delimiters.
    pub records: usize,
    /// Bookmarks and records that could not become a highlight.
    pub skipped: usize,
    /// Titles for which no author could be detected.
    pub authorless: BTreeSet<String>,
}

impl ParsedClippings {
    pub fn highlight_count(&self) -> usize {
        self.books.values().map(|b| b.highlights.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Metadata {
    page: Option<u32>,
    location: Option<Location>,
    timestamp: Option<NaiveDateTime>,
    is_note: bool,
}

/// Reads the export from disk. This is the only fatal failure of a run.
pub fn read_clippings(path: &Path) -> Result<String, ParseError> {
    let bytes = std::fs::read(path).map_err(|source| ParseError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let text =
        String::from_utf8(bytes).map_err(|_| ParseError::Encoding(path.display().to_string()))?;

    Ok(text.trim_start_matches('\u{feff}').to_string())
}

pub fn parse_clippings(raw: &str) -> ParsedClippings {
    let raw = raw.trim_start_matches('\u{feff}');
    let mut parsed = ParsedClippings::default();

    for record in split_records(raw) {
        parsed.records += 1;

        let lines: Vec<&str> = record
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();

        if lines.len() < 3 {
            parsed.skipped += 1;
            continue;
        }

        let header = normalize_header(lines[0]);
        if !header.author_marked && parsed.authorless.insert(header.title.clone()) {
            warn!(title = %header.title, "No author found");
        }

        let meta = parse_metadata_line(lines[1]);
        let text = lines[2..].join("\n");

        match Highlight::new(text, meta.page, meta.location, meta.timestamp, meta.is_note) {
            Ok(highlight) => parsed
                .books
                .entry(header.title.clone())
                .or_insert_with(|| Book::new(header.title, header.author))
                .highlights
                .push(highlight),
            Err(_) => parsed.skipped += 1,
        }
    }

    parsed.books.retain(|_, book| !book.highlights.is_empty());

    info!(
        records = parsed.records,
        books = parsed.books.len(),
        skipped = parsed.skipped,
        "Parsed clippings"
    );

    parsed
}

/// Groups lines between delimiter lines. Whitespace-only groups are dropped.
fn split_records(raw: &str) -> Vec<Vec<&str>> {
    let mut records = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.trim() == RECORD_DELIMITER {
            records.push(std::mem::take(&mut current));
        } else {
            current.push(line);
        }
    }
    records.push(current);

    records
        .into_iter()
        .filter(|r| r.iter().any(|l| !l.trim().is_empty()))
        .collect()
}

fn parse_metadata_line(line: &str) -> Metadata {
    let mut meta = Metadata::default();

    for fragment in line.split(" | ") {
        // ASCII lowering keeps byte offsets aligned with the original fragment.
        let lower = fragment.to_ascii_lowercase();

        if lower.contains("note") {
            meta.is_note = true;
        }
        if let Some(rest) = value_after(fragment, &lower, "page") {
            meta.page = rest.parse().ok();
        }
        if let Some(rest) = value_after(fragment, &lower, "location") {
            meta.location = parse_location(rest);
        }
        if let Some(rest) = value_after(fragment, &lower, "added on") {
            meta.timestamp = parse_timestamp(rest);
        }
    }

    meta
}

fn value_after<'a>(fragment: &'a str, lower: &str, keyword: &str) -> Option<&'a str> {
    lower
        .find(keyword)
        .map(|idx| fragment[idx + keyword.len()..].trim())
}

fn parse_location(value: &str) -> Option<Location> {
    let (start, end) = value.split_once('-')?;
    Location::new(start.trim().parse().ok()?, end.trim().parse().ok()?)
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}
