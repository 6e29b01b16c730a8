use crate::models::{Book, Highlight};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub title: String,
    pub author: String,
    pub before: usize,
    pub after: usize,
}

impl PruneReport {
    pub fn pruned(&self) -> usize {
        self.before - self.after
    }
}

/// Drops highlights whose location span lies inside another highlight of the
/// same book. Kindle stores a note as a wide highlight plus a narrower extract,
/// so the narrower one is redundant.
///
/// Highlights without a location are always kept and placed after the located
/// ones, in their original order.
pub fn prune_subset_highlights(book: &mut Book) -> Option<PruneReport> {
    let before = book.highlights.len();

    let mut located = Vec::with_capacity(before);
    let mut unlocated = Vec::new();
    for highlight in book.highlights.drain(..) {
        match highlight.location {
            Some(loc) => located.push((loc, highlight)),
            None => unlocated.push(highlight),
        }
    }

    located.sort_by_key(|(loc, _)| (loc.start, std::cmp::Reverse(loc.end)));

    let mut max_end_seen: Option<u32> = None;
    let mut kept = Vec::with_capacity(before);

    for (loc, highlight) in located {
        if max_end_seen.map_or(true, |max| loc.end > max) {
            kept.push(highlight);
        }
        max_end_seen = Some(max_end_seen.map_or(loc.end, |max| max.max(loc.end)));
    }

    kept.extend(unlocated);
    book.highlights = kept;

    let after = book.highlights.len();
    if after < before {
        info!(
            title = %book.title,
            author = %book.author,
            before,
            after,
            "Pruned subset highlights"
        );
        return Some(PruneReport {
            title: book.title.clone(),
            author: book.author.clone(),
            before,
            after,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;

    fn highlight(text: &str, span: Option<(u32, u32)>) -> Highlight {
        Highlight::new(
            text,
            None,
            span.and_then(|(s, e)| Location::new(s, e)),
            None,
            false,
        )
        .unwrap()
    }

    fn book(highlights: Vec<Highlight>) -> Book {
        let mut book = Book::new("Title", "Author");
        book.highlights = highlights;
        book
    }

    fn texts(book: &Book) -> Vec<&str> {
        book.highlights.iter().map(|h| h.text.as_str()).collect()
    }

    #[test]
    fn test_prunes_contained_span() {
        let mut b = book(vec![
            highlight("narrow", Some((120, 150))),
            highlight("wide", Some((100, 200))),
        ]);

        let report = prune_subset_highlights(&mut b).unwrap();

        assert_eq!(texts(&b), vec!["wide"]);
        assert_eq!(report.before, 2);
        assert_eq!(report.after, 1);
        assert_eq!(report.pruned(), 1);
    }

    #[test]
    fn test_same_start_keeps_widest() {
        let mut b = book(vec![
            highlight("short", Some((10, 20))),
            highlight("long", Some((10, 40))),
        ]);

        prune_subset_highlights(&mut b);

        assert_eq!(texts(&b), vec!["long"]);
    }

    #[test]
    fn test_disjoint_spans_are_noop() {
        let mut b = book(vec![
            highlight("a", Some((1, 5))),
            highlight("b", Some((6, 9))),
            highlight("c", Some((20, 30))),
        ]);

        let report = prune_subset_highlights(&mut b);

        assert!(report.is_none());
        assert_eq!(texts(&b), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_overlapping_but_not_contained_are_kept() {
        let mut b = book(vec![
            highlight("a", Some((1, 10))),
            highlight("b", Some((5, 15))),
        ]);

        prune_subset_highlights(&mut b);

        assert_eq!(texts(&b), vec!["a", "b"]);
    }

    #[test]
    fn test_subset_of_earlier_highlight_after_gap() {
        // Both later spans sit inside the first one.
        let mut b = book(vec![
            highlight("outer", Some((1, 100))),
            highlight("inner", Some((40, 50))),
            highlight("later", Some((60, 70))),
        ]);

        prune_subset_highlights(&mut b);

        assert_eq!(texts(&b), vec!["outer"]);
    }

    #[test]
    fn test_unlocated_always_kept() {
        let mut b = book(vec![
            highlight("loose", None),
            highlight("wide", Some((100, 200))),
            highlight("narrow", Some((120, 150))),
        ]);

        prune_subset_highlights(&mut b);

        assert_eq!(texts(&b), vec!["wide", "loose"]);
    }

    #[test]
    fn test_no_kept_span_is_subset_of_another() {
        let spans = [(5, 9), (1, 3), (2, 3), (4, 12), (4, 6), (13, 13), (10, 20), (0, 1)];
        let mut b = book(
            spans
                .iter()
                .map(|&s| highlight("x", Some(s)))
                .collect(),
        );

        prune_subset_highlights(&mut b);

        assert!(b.highlights.len() <= spans.len());
        let kept: Vec<Location> = b.highlights.iter().filter_map(|h| h.location).collect();
        for (i, a) in kept.iter().enumerate() {
            for (j, other) in kept.iter().enumerate() {
                if i != j {
                    assert!(!other.contains(a), "{:?} inside {:?}", a, other);
                }
            }
        }
    }
}
