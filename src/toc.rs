//! Table-of-contents extraction from an NCX navigation document.
//!
//! Works in two passes: [`parse_navigation`] flattens the `navPoint` tree into
//! [`HeadingEntry`] values, then [`resolve_positions`] looks every anchor up in
//! the reflowed markup. [`ordered_headings`] keeps the resolved ones sorted by
//! offset, ready for alignment.

use crate::models::{Anchor, HeadingEntry, ResolvedHeading};
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum TocError {
    #[error("Malformed navigation document at byte {position}: {details}")]
    Xml { position: u64, details: String },
}

#[derive(Default)]
struct PendingEntry {
    label: Option<String>,
    src: Option<String>,
}

/// Flattens the navigation tree in document order. Nav points with neither a
/// label nor a content reference are dropped.
pub fn parse_navigation(content: &str) -> Result<Vec<HeadingEntry>, TocError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut pending: Vec<PendingEntry> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut in_label = false;
    let mut in_text = false;

    loop {
        let event = reader.read_event().map_err(|e| TocError::Xml {
            position: reader.buffer_position(),
            details: e.to_string(),
        })?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"navPoint" => {
                    open.push(pending.len());
                    pending.push(PendingEntry::default());
                }
                b"navLabel" => in_label = true,
                b"text" => in_text = in_label,
                b"content" => set_src(&e, &open, &mut pending),
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"content" {
                    set_src(&e, &open, &mut pending);
                }
            }
            Event::Text(e) => {
                if in_text {
                    if let Some(&idx) = open.last() {
                        let text = e.unescape().map_err(|err| TocError::Xml {
                            position: reader.buffer_position(),
                            details: err.to_string(),
                        })?;
                        pending[idx]
                            .label
                            .get_or_insert_with(String::new)
                            .push_str(&text);
                    }
                }
            }
            Event::CData(e) => {
                if in_text {
                    if let Some(&idx) = open.last() {
                        pending[idx]
                            .label
                            .get_or_insert_with(String::new)
                            .push_str(&String::from_utf8_lossy(&e));
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"navPoint" => {
                    open.pop();
                }
                b"navLabel" => in_label = false,
                b"text" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let entries = pending
        .into_iter()
        .filter_map(|p| {
            let label = p.label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
            let src = p.src.filter(|s| !s.trim().is_empty());
            if label.is_none() && src.is_none() {
                return None;
            }
            Some(HeadingEntry {
                title: label.unwrap_or_default(),
                anchor: parse_anchor(src.as_deref().unwrap_or_default()),
                position: None,
            })
        })
        .collect();

    Ok(entries)
}

fn set_src(e: &quick_xml::events::BytesStart, open: &[usize], pending: &mut [PendingEntry]) {
    let Some(&idx) = open.last() else {
        return;
    };
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"src" {
            if let Ok(value) = attr.unescape_value() {
                pending[idx].src = Some(value.into_owned());
            }
        }
    }
}

/// Splits `file[#fragment]`, percent-decoding both parts.
pub fn parse_anchor(src: &str) -> Anchor {
    let (file, fragment) = match src.split_once('#') {
        Some((file, fragment)) => (file, Some(fragment)),
        None => (src, None),
    };

    Anchor {
        file: percent_decode_str(file.trim()).decode_utf8_lossy().into_owned(),
        fragment: fragment
            .map(|f| percent_decode_str(f.trim()).decode_utf8_lossy().into_owned())
            .filter(|f| !f.is_empty()),
    }
}

/// Sets each entry's position to the byte offset of the first element whose
/// `id` or `name` equals the anchor fragment (case-insensitive). Entries
/// pointing at another file, or without a fragment, stay unresolved.
pub fn resolve_positions(entries: &mut [HeadingEntry], markup: &str, file_name: &str) {
    for entry in entries.iter_mut() {
        entry.position = None;

        let target = entry.anchor.file.rsplit('/').next().unwrap_or_default();
        if !target.is_empty() && target != file_name {
            debug!(heading = %entry.title, file = %entry.anchor.file, "Heading points to another file");
            continue;
        }

        let Some(fragment) = entry.anchor.fragment.as_deref() else {
            continue;
        };

        entry.position = find_anchor(markup, fragment);
    }
}

fn find_anchor(markup: &str, fragment: &str) -> Option<usize> {
    let escaped = regex::escape(fragment);
    let pattern = format!(
        r#"(?i)\b(?:id|name)\s*=\s*(?:"{0}"|'{0}')"#,
        escaped
    );
    let re = Regex::new(&pattern).ok()?;
    re.find(markup).map(|m| m.start())
}

/// Keeps resolved entries, ordered by position. Ties keep navigation order.
pub fn ordered_headings(entries: Vec<HeadingEntry>) -> Vec<ResolvedHeading> {
    let mut headings: Vec<ResolvedHeading> = entries
        .into_iter()
        .filter_map(|e| {
            e.position.map(|position| ResolvedHeading {
                title: e.title,
                position,
            })
        })
        .collect();
    headings.sort_by_key(|h| h.position);
    headings
}
