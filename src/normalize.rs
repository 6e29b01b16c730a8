//! Author and title disambiguation for clipping header lines.
//!
//! Kindle writes the header as `Title (Author)`, but authors are frequently
//! stored as `Last, First`, several authors may be joined with `; `, and some
//! titles carry a trailing `, The`. The rules below are heuristics and run in
//! a fixed order, each working on the output of the previous one.

use once_cell::sync::Lazy;
use regex::Regex;

/// Suffixes that may follow a comma in an author name without it being a
/// `Last, First` pair.
pub const ACADEMIC_TITLES: &[&str] = &[
    "A.A.", "A.S.", "A.A.A.", "A.A.S.", "A.B.", "A.D.N.", "A.M.", "A.M.T.", "C.E.", "Ch.E.",
    "D.A.", "D.A.S.", "D.B.A.", "D.C.", "D.D.", "D.Ed.", "D.L.S.", "D.M.D.", "D.M.S.",
    "D.P.A.", "D.P.H.", "D.R.E.", "D.S.W.", "D.Sc.", "D.V.M.", "Ed.D.", "Ed.S.", "E.E.",
    "E.M.", "E.Met.", "I.E.", "J.D.", "J.S.D.", "L.H.D.", "Litt.B.", "Litt.M.", "LL.B.",
    "LL.D.", "LL.M.", "M.A.", "M.Aero.E.", "M.B.A.", "M.C.S.", "M.D.", "M.Div.", "M.E.",
    "M.Ed.", "M.Eng.", "M.F.A.", "M.H.A.", "M.L.S.", "M.Mus.", "M.N.", "M.P.A.", "M.S.",
    "M.S.Ed.", "M.S.W.", "M.Th.", "Nuc.E.", "O.D.", "Pharm.D.", "Ph.B.", "Ph.D.", "S.B.",
    "Sc.D.", "S.J.D.", "S.Sc.D.", "Th.B.", "Th.D.", "Th.M.", "Jr.", "Sr.", "II", "III", "IV",
];

/// Separators that mark a multi-author list.
const AUTHOR_DELIMITERS: &[&str] = &["; ", " & ", " and "];

static PARENTHESIZED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(.*?\)").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHeader {
    pub title: String,
    pub author: String,
    /// Whether the header carried a parenthesized author group at all. An
    /// empty group such as `Notes ()` still counts.
    pub author_marked: bool,
}

/// Splits a raw header line into a normalized title and author.
pub fn normalize_header(line: &str) -> NormalizedHeader {
    let (author, title, author_marked) = split_author_and_title(line);
    let (author, title) = fix_author(author, title);
    let title = fix_title(title);

    NormalizedHeader {
        title,
        author,
        author_marked,
    }
}

fn split_author_and_title(line: &str) -> (String, String, bool) {
    let group = PARENTHESIZED_RE.find_iter(line).last();
    let author_marked = group.is_some();
    let author = group
        .map(|m| {
            let group = m.as_str();
            group[1..group.len() - 1].to_string()
        })
        .unwrap_or_default();

    let title = if author.is_empty() {
        line.trim().to_string()
    } else {
        line.replace(&author, "")
    };
    let title = title.trim().replace(" ()", "");

    (author, title, author_marked)
}

fn fix_author(mut author: String, mut title: String) -> (String, String) {
    // The lazy match stops at the first ')' so a nested group leaves the
    // author unbalanced and the title with a stray ')'.
    if author.contains('(') {
        author.push(')');
        if let Some(stripped) = title.strip_suffix(')') {
            title = stripped.to_string();
        }
    }

    if author.contains(", ") && AUTHOR_DELIMITERS.iter().all(|d| !author.contains(d)) {
        let after_comma = author.split(", ").nth(1).unwrap_or_default();
        if !ACADEMIC_TITLES.contains(&after_comma) {
            author = reverse_name(&author);
        }
    }

    if author.contains("; ") {
        author = author
            .split("; ")
            .map(reverse_name)
            .collect::<Vec<_>>()
            .join(", ");
    }

    (author, title)
}

fn reverse_name(name: &str) -> String {
    name.rsplit(", ").collect::<Vec<_>>().join(" ")
}

fn fix_title(title: String) -> String {
    if title.contains(", The") {
        format!("The {}", title.replace(", The", ""))
    } else {
        title
    }
}
