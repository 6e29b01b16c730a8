use crate::models::{AlignedBook, Highlight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub include_location: bool,
    pub include_date: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            include_location: true,
            include_date: true,
        }
    }
}

/// One text block per highlight, ending with a blank line.
pub fn render_highlight(highlight: &Highlight, options: RenderOptions) -> String {
    let mut out = String::new();
    if highlight.is_note {
        out.push_str("> NOTE:\n");
    }
    out.push_str(&highlight.text);
    out.push('\n');

    if options.include_location {
        if let Some(page) = highlight.page {
            out.push_str(&format!("Page: {}, ", page));
        }
        if let Some(loc) = highlight.location {
            out.push_str(&format!("Location: {}-{}", loc.start, loc.end));
        }
    }
    if options.include_date {
        if let Some(ts) = highlight.timestamp {
            out.push_str(&format!(", Date Added: {}", ts.format("%d-%m-%Y, %H:%M:%S")));
        }
    }

    let mut out = out.trim().to_string();
    out.push_str("\n\n");
    out
}

/// Renders a whole book. A heading marker is written once before the first
/// highlight of each run under the same heading.
pub fn render_book(book: &AlignedBook, options: RenderOptions) -> String {
    let mut out = String::new();

    for (i, highlight) in book.book.highlights.iter().enumerate() {
        if book.starts_heading_run(i) {
            if let Some(heading) = book.heading_for(i) {
                out.push_str(&format!("## {}\n\n", heading.title));
            }
        }
        out.push_str(&render_highlight(highlight, options));
    }

    out
}
