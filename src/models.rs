use chrono::NaiveDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub start: u32,
    pub end: u32,
}

impl Location {
    /// Returns `None` for reversed spans.
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start <= end).then_some(Location { start, end })
    }

    pub fn contains(&self, other: &Location) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub text: String,
    pub page: Option<u32>,
    pub location: Option<Location>,
    pub timestamp: Option<NaiveDateTime>,
    pub is_note: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct EmptyHighlightText;

impl Highlight {
    pub fn new(
        text: impl Into<String>,
        page: Option<u32>,
        location: Option<Location>,
        timestamp: Option<NaiveDateTime>,
        is_note: bool,
    ) -> Result<Self, EmptyHighlightText> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(EmptyHighlightText);
        }

        Ok(Highlight {
            text,
            page,
            location,
            timestamp,
            is_note,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub highlights: Vec<Highlight>,
}

impl Book {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Book {
            title: title.into(),
            author: author.into(),
            highlights: Vec::new(),
        }
    }

    /// Latest timestamp over all highlights, `None` when none carries one.
    pub fn last_highlighted(&self) -> Option<NaiveDateTime> {
        self.highlights.iter().filter_map(|h| h.timestamp).max()
    }
}

/// Target of a table-of-contents entry: `file[#fragment]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub file: String,
    pub fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingEntry {
    pub title: String,
    pub anchor: Anchor,
    /// Byte offset inside the reflowed markup, once resolved.
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHeading {
    pub title: String,
    pub position: usize,
}

/// One entry per highlight: index into the book's resolved headings.
pub type Alignment = Vec<Option<usize>>;

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedBook {
    pub book: Book,
    pub headings: Vec<ResolvedHeading>,
    pub alignment: Alignment,
}

impl AlignedBook {
    pub fn without_headings(book: Book) -> Self {
        let alignment = vec![None; book.highlights.len()];
        AlignedBook {
            book,
            headings: Vec::new(),
            alignment,
        }
    }

    pub fn heading_for(&self, index: usize) -> Option<&ResolvedHeading> {
        self.alignment
            .get(index)
            .copied()
            .flatten()
            .and_then(|h| self.headings.get(h))
    }

    /// True when highlight `index` opens a new run of highlights under the
    /// same heading.
    pub fn starts_heading_run(&self, index: usize) -> bool {
        let current = self.alignment.get(index).copied().flatten();
        if current.is_none() {
            return false;
        }
        let previous = match index {
            0 => None,
            i => self.alignment.get(i - 1).copied().flatten(),
        };
        current != previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlight(ts: Option<&str>) -> Highlight {
        Highlight::new(
            "text",
            None,
            Location::new(1, 2),
            ts.map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_location_rejects_reversed_span() {
        assert!(Location::new(200, 100).is_none());
        assert_eq!(Location::new(5, 5), Some(Location { start: 5, end: 5 }));
    }

    #[test]
    fn test_highlight_rejects_blank_text() {
        assert_eq!(
            Highlight::new("   ", None, None, None, false),
            Err(EmptyHighlightText)
        );
    }

    #[test]
    fn test_last_highlighted_is_max_timestamp() {
        let mut book = Book::new("Title", "Author");
        book.highlights.push(highlight(Some("2026-01-25 10:30:00")));
        book.highlights.push(highlight(None));
        book.highlights.push(highlight(Some("2026-02-01 08:00:00")));

        let last = book.last_highlighted().unwrap();

        assert_eq!(last.to_string(), "2026-02-01 08:00:00");
    }

    #[test]
    fn test_heading_runs() {
        let mut book = Book::new("Title", "Author");
        for _ in 0..5 {
            book.highlights.push(highlight(None));
        }
        let aligned = AlignedBook {
            book,
            headings: vec![
                ResolvedHeading {
                    title: "One".to_string(),
                    position: 10,
                },
                ResolvedHeading {
                    title: "Two".to_string(),
                    position: 20,
                },
            ],
            alignment: vec![None, Some(0), Some(0), Some(1), None],
        };

        let runs: Vec<bool> = (0..5).map(|i| aligned.starts_heading_run(i)).collect();

        assert_eq!(runs, vec![false, true, false, true, false]);
        assert_eq!(aligned.heading_for(2).unwrap().title, "One");
        assert!(aligned.heading_for(4).is_none());
    }
}
