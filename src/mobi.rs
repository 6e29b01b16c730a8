//! MOBI and AZW3 containers, decoded with `boko`. Its table of contents is
//! written out as an NCX document pointing into the reflowed markup, so the
//! same navigation parser serves every format.

use crate::container::{
    extension_of, reflowed_target, ContainerExtractor, ExtractError, ExtractedBook, Reflow,
};
use quick_xml::escape::escape;
use std::path::Path;
use tracing::debug;

pub const MOBI_EXTENSIONS: &[&str] = &["mobi", "azw", "azw3"];

#[derive(Debug, Clone, Copy, Default)]
pub struct MobiExtractor;

impl ContainerExtractor for MobiExtractor {
    fn extract(&self, container: &Path, workdir: &Path) -> Result<ExtractedBook, ExtractError> {
        let supported = extension_of(container)
            .map(|ext| MOBI_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);
        if !supported {
            return Err(ExtractError::Unsupported(container.display().to_string()));
        }

        let ebook = boko::read_mobi(container).map_err(|e| ExtractError::Archive {
            path: container.display().to_string(),
            details: e.to_string(),
        })?;
        debug!(
            container = %container.display(),
            parts = ebook.spine.len(),
            toc_entries = ebook.toc.len(),
            "Decoded Kindle container"
        );

        flatten(&ebook, workdir)
    }
}

fn flatten(ebook: &boko::Book, workdir: &Path) -> Result<ExtractedBook, ExtractError> {
    let mut reflow = Reflow::default();
    for item in &ebook.spine {
        let Some(resource) = ebook.resources.get(&item.href) else {
            continue;
        };
        reflow.push_document(&item.href, &String::from_utf8_lossy(&resource.data));
    }
    if reflow.is_empty() {
        return Err(ExtractError::Missing("spine documents"));
    }

    reflow.write(&navigation_document(&ebook.toc), workdir)
}

fn navigation_document(toc: &[boko::TocEntry]) -> String {
    let mut ncx = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\"><navMap>\n",
    );
    push_nav_points(&mut ncx, toc);
    ncx.push_str("</navMap></ncx>\n");
    ncx
}

fn push_nav_points(out: &mut String, entries: &[boko::TocEntry]) {
    for entry in entries {
        let (file, fragment) = match entry.href.split_once('#') {
            Some((file, fragment)) => (file, Some(fragment)),
            None => (entry.href.as_str(), None),
        };
        out.push_str(&format!(
            "<navPoint><navLabel><text>{}</text></navLabel><content src=\"{}\"/>",
            escape(entry.title.as_str()),
            escape(reflowed_target(file, fragment).as_str()),
        ));
        push_nav_points(out, &entry.children);
        out.push_str("</navPoint>\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toc::{ordered_headings, parse_navigation, resolve_positions};
    use boko::TocEntry;

    fn kindle_book() -> boko::Book {
        let mut ebook = boko::Book::new();
        ebook.add_resource(
            "part0000.html",
            b"<html><body><h1 id=\"start\">Prologue</h1><p>The ship left at dawn.</p></body></html>".to_vec(),
            "application/xhtml+xml",
        );
        ebook.add_resource(
            "part0001.html",
            b"<html><body><h1 id=\"start\">Storm &amp; Sea</h1><p>Waves broke over the deck.</p></body></html>".to_vec(),
            "application/xhtml+xml",
        );
        ebook.add_spine_item("part0000", "part0000.html", "application/xhtml+xml");
        ebook.add_spine_item("part0001", "part0001.html", "application/xhtml+xml");

        let mut storm = TocEntry::new("Storm & Sea", "part0001.html");
        storm.children.push(TocEntry::new("Landfall", "part0001.html#start"));
        ebook.toc.push(TocEntry::new("Prologue", "part0000.html#start"));
        ebook.toc.push(storm);
        ebook
    }

    #[test]
    fn test_flatten_kindle_book() {
        let workdir = tempfile::tempdir().unwrap();

        let extracted = flatten(&kindle_book(), workdir.path()).unwrap();

        let markup = std::fs::read_to_string(&extracted.markup).unwrap();
        let navigation = std::fs::read_to_string(&extracted.navigation).unwrap();
        let mut entries = parse_navigation(&navigation).unwrap();
        resolve_positions(&mut entries, &markup, &extracted.markup_file_name());
        let headings = ordered_headings(entries);

        let titles: Vec<&str> = headings.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["Prologue", "Storm & Sea", "Landfall"]);
        let deck = markup.find("Waves broke").unwrap();
        assert!(headings[0].position < markup.find("The ship left").unwrap());
        assert!(headings[2].position < deck);
        assert!(headings[0].position < headings[2].position);
    }

    #[test]
    fn test_flatten_without_spine_documents() {
        let workdir = tempfile::tempdir().unwrap();
        let mut ebook = boko::Book::new();
        ebook.add_spine_item("missing", "missing.html", "application/xhtml+xml");

        let result = flatten(&ebook, workdir.path());

        assert!(matches!(result, Err(ExtractError::Missing(_))));
    }

    #[test]
    fn test_navigation_document_escapes_labels() {
        let ncx = navigation_document(&[TocEntry::new("Q&A <1>", "part0002.html")]);

        assert!(ncx.contains("<text>Q&amp;A &lt;1&gt;</text>"));
        assert!(ncx.contains("src=\"book.html#part-part0002-html\""));
    }

    #[test]
    fn test_extract_rejects_other_formats() {
        let workdir = tempfile::tempdir().unwrap();

        let result = MobiExtractor.extract(Path::new("book.epub"), workdir.path());

        assert!(matches!(result, Err(ExtractError::Unsupported(_))));
    }

    #[test]
    fn test_extract_rejects_unreadable_container() {
        let dir = tempfile::tempdir().unwrap();
        let mobi = dir.path().join("broken.mobi");
        std::fs::write(&mobi, b"not a kindle book").unwrap();
        let workdir = tempfile::tempdir().unwrap();

        let result = MobiExtractor.extract(&mobi, workdir.path());

        assert!(matches!(result, Err(ExtractError::Archive { .. })));
    }
}
