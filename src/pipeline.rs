//! Whole-run orchestration: parse, prune, then per book the heading pipeline
//! (container lookup, extraction, navigation, alignment). Every per-book
//! failure degrades to "no heading information" for that book only.

use crate::align::{align_highlights, MatchParams};
use crate::container::{ContainerExtractor, ContainerIndex};
use crate::models::{AlignedBook, Book, ResolvedHeading};
use crate::parser::parse_clippings;
use crate::prune::{prune_subset_highlights, PruneReport};
use crate::toc::{ordered_headings, parse_navigation, resolve_positions};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

/// What happened to a book's heading alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadingStatus {
    Disabled,
    NoContainer(String),
    ExtractionFailed(String),
    NavigationFailed(String),
    NoHeadings,
    Aligned { headings: usize, unmatched: usize },
}

/// Everything the heading stage needs, shared by all workers.
pub struct HeadingContext<'a> {
    pub index: &'a ContainerIndex,
    pub extractor: &'a dyn ContainerExtractor,
    pub params: MatchParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookOutcome {
    pub aligned: AlignedBook,
    pub status: HeadingStatus,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub records: usize,
    pub skipped: usize,
    pub authorless: BTreeSet<String>,
    pub pruned: Vec<PruneReport>,
    pub books: Vec<BookOutcome>,
}

impl RunSummary {
    pub fn unmatched(&self) -> usize {
        self.books
            .iter()
            .map(|b| match b.status {
                HeadingStatus::Aligned { unmatched, .. } => unmatched,
                _ => 0,
            })
            .sum()
    }

    pub fn highlight_count(&self) -> usize {
        self.books
            .iter()
            .map(|b| b.aligned.book.highlights.len())
            .sum()
    }
}

pub fn process_clippings(
    raw: &str,
    headings: Option<&HeadingContext<'_>>,
    jobs: usize,
) -> RunSummary {
    let parsed = parse_clippings(raw);

    let mut pruned = Vec::new();
    let mut books: Vec<Book> = parsed.books.into_values().collect();
    for book in books.iter_mut() {
        if let Some(report) = prune_subset_highlights(book) {
            pruned.push(report);
        }
    }

    let books = match headings {
        Some(ctx) => align_all(books, ctx, jobs),
        None => books
            .into_iter()
            .map(|book| BookOutcome {
                aligned: AlignedBook::without_headings(book),
                status: HeadingStatus::Disabled,
            })
            .collect(),
    };

    let summary = RunSummary {
        records: parsed.records,
        skipped: parsed.skipped,
        authorless: parsed.authorless,
        pruned,
        books,
    };

    info!(
        books = summary.books.len(),
        highlights = summary.highlight_count(),
        skipped = summary.skipped,
        pruned_books = summary.pruned.len(),
        unmatched = summary.unmatched(),
        authorless = summary.authorless.len(),
        "Processed clippings"
    );

    summary
}

fn align_all(books: Vec<Book>, ctx: &HeadingContext<'_>, jobs: usize) -> Vec<BookOutcome> {
    if jobs <= 1 || books.len() <= 1 {
        return books.into_iter().map(|b| align_book(b, ctx)).collect();
    }

    let chunk_size = books.len().div_ceil(jobs);
    let mut chunks: Vec<Vec<Book>> = Vec::with_capacity(jobs);
    let mut remaining = books.into_iter().peekable();
    while remaining.peek().is_some() {
        chunks.push(remaining.by_ref().take(chunk_size).collect());
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .into_iter()
                        .map(|b| align_book(b, ctx))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    })
}

/// Runs the heading pipeline for one book.
pub fn align_book(book: Book, ctx: &HeadingContext<'_>) -> BookOutcome {
    let (headings, markup) = match load_headings(&book, ctx) {
        Ok(loaded) => loaded,
        Err(status) => {
            warn!(title = %book.title, status = ?status, "Skipping heading alignment");
            return BookOutcome {
                aligned: AlignedBook::without_headings(book),
                status,
            };
        }
    };

    let outcome = align_highlights(&book.highlights, &headings, &markup, ctx.params);
    if outcome.unmatched > 0 {
        info!(
            title = %book.title,
            unmatched = outcome.unmatched,
            "Some highlights were not found in the book"
        );
    }

    let status = HeadingStatus::Aligned {
        headings: headings.len(),
        unmatched: outcome.unmatched,
    };
    BookOutcome {
        aligned: AlignedBook {
            book,
            headings,
            alignment: outcome.alignment,
        },
        status,
    }
}

fn load_headings(
    book: &Book,
    ctx: &HeadingContext<'_>,
) -> Result<(Vec<ResolvedHeading>, String), HeadingStatus> {
    let container = ctx
        .index
        .lookup(book)
        .map_err(|e| HeadingStatus::NoContainer(e.to_string()))?;

    let workdir = tempfile::Builder::new()
        .prefix("clippings-")
        .tempdir()
        .map_err(|e| HeadingStatus::ExtractionFailed(e.to_string()))?;

    let loaded = extract_headings(container, workdir.path(), ctx.extractor);

    if let Err(e) = workdir.close() {
        warn!(title = %book.title, error = %e, "Failed to remove extraction directory");
    }

    loaded
}

fn extract_headings(
    container: &Path,
    workdir: &Path,
    extractor: &dyn ContainerExtractor,
) -> Result<(Vec<ResolvedHeading>, String), HeadingStatus> {
    let extracted = extractor
        .extract(container, workdir)
        .map_err(|e| HeadingStatus::ExtractionFailed(e.to_string()))?;

    let navigation = read_lossy(&extracted.navigation)
        .map_err(|e| HeadingStatus::ExtractionFailed(e.to_string()))?;
    let markup = read_lossy(&extracted.markup)
        .map_err(|e| HeadingStatus::ExtractionFailed(e.to_string()))?;

    let mut entries =
        parse_navigation(&navigation).map_err(|e| HeadingStatus::NavigationFailed(e.to_string()))?;
    resolve_positions(&mut entries, &markup, &extracted.markup_file_name());

    let headings = ordered_headings(entries);
    if headings.is_empty() {
        return Err(HeadingStatus::NoHeadings);
    }

    Ok((headings, markup))
}

fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
