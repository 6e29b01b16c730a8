//! EPUB containers. Spine documents are read straight from the zip archive
//! and the NCX is rewritten to point into the reflowed document.

use crate::container::{
    reflowed_target, ContainerExtractor, ExtractError, ExtractedBook, Reflow,
};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

static NCX_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\bsrc\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

/// Reads `META-INF/container.xml`, then the package document, then the NCX.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubExtractor;

struct Package {
    manifest: HashMap<String, (String, String)>,
    spine: Vec<String>,
    toc_id: Option<String>,
}

impl ContainerExtractor for EpubExtractor {
    fn extract(&self, container: &Path, workdir: &Path) -> Result<ExtractedBook, ExtractError> {
        let is_epub = container
            .extension()
            .map(|e| e.eq_ignore_ascii_case("epub"))
            .unwrap_or(false);
        if !is_epub {
            return Err(ExtractError::Unsupported(container.display().to_string()));
        }

        let file = File::open(container).map_err(|source| ExtractError::Io {
            path: container.display().to_string(),
            source,
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive {
            path: container.display().to_string(),
            details: e.to_string(),
        })?;

        let container_xml = read_entry(&mut archive, "META-INF/container.xml")?;
        let opf_path = parse_rootfile(&container_xml)?;
        let opf_dir = parent_dir(&opf_path);
        let package = parse_package(&read_entry(&mut archive, &opf_path)?)?;

        let ncx_href = package
            .toc_id
            .as_ref()
            .and_then(|id| package.manifest.get(id))
            .or_else(|| {
                package
                    .manifest
                    .values()
                    .find(|(_, media_type)| media_type == NCX_MEDIA_TYPE)
            })
            .map(|(href, _)| href.clone())
            .ok_or(ExtractError::Missing("NCX navigation document"))?;
        let ncx_path = resolve_href(&opf_dir, &ncx_href);

        let mut reflow = Reflow::default();
        for idref in &package.spine {
            let Some((href, _)) = package.manifest.get(idref) else {
                continue;
            };
            let path = resolve_href(&opf_dir, href);
            reflow.push_document(&path, &read_entry(&mut archive, &path)?);
        }
        if reflow.is_empty() {
            return Err(ExtractError::Missing("spine documents"));
        }

        let ncx = read_entry(&mut archive, &ncx_path)?;
        let navigation = retarget_navigation(&ncx, &parent_dir(&ncx_path));

        reflow.write(&navigation, workdir)
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String, ExtractError> {
    let mut entry = archive.by_name(name).map_err(|e| ExtractError::Archive {
        path: name.to_string(),
        details: e.to_string(),
    })?;

    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|source| ExtractError::Io {
            path: name.to_string(),
            source,
        })?;

    let text = String::from_utf8_lossy(&buf);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn xml_error(document: &str, details: impl ToString) -> ExtractError {
    ExtractError::Xml {
        document: document.to_string(),
        details: details.to_string(),
    }
}

fn parse_rootfile(content: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        let value = attr
                            .unescape_value()
                            .map_err(|err| xml_error("container.xml", err))?;
                        return Ok(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("container.xml", e)),
            _ => {}
        }
    }

    Err(ExtractError::Missing("rootfile in container.xml"))
}

fn parse_package(content: &str) -> Result<Package, ExtractError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut package = Package {
        manifest: HashMap::new(),
        spine: Vec::new(),
        toc_id: None,
    };

    loop {
        let event = reader
            .read_event()
            .map_err(|e| xml_error("package document", e))?;
        let element = match event {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };

        let mut attrs: HashMap<Vec<u8>, String> = HashMap::new();
        for attr in element.attributes().flatten() {
            let value = attr
                .unescape_value()
                .map_err(|err| xml_error("package document", err))?;
            attrs.insert(attr.key.local_name().as_ref().to_vec(), value.into_owned());
        }

        match element.local_name().as_ref() {
            b"item" => {
                if let (Some(id), Some(href)) =
                    (attrs.remove(b"id".as_slice()), attrs.remove(b"href".as_slice()))
                {
                    let media_type = attrs.remove(b"media-type".as_slice()).unwrap_or_default();
                    package.manifest.insert(id, (href, media_type));
                }
            }
            b"itemref" => {
                if let Some(idref) = attrs.remove(b"idref".as_slice()) {
                    package.spine.push(idref);
                }
            }
            b"spine" => package.toc_id = attrs.remove(b"toc".as_slice()),
            _ => {}
        }
    }

    Ok(package)
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Resolves a percent-encoded relative href against a directory inside the
/// archive.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let decoded = percent_decode_str(href).decode_utf8_lossy();
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();

    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join("/")
}

/// Points every NCX `src` at the reflowed document.
fn retarget_navigation(ncx: &str, ncx_dir: &str) -> String {
    NCX_SRC_RE
        .replace_all(ncx, |caps: &Captures| {
            let src = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let (file, fragment) = match src.split_once('#') {
                Some((file, fragment)) => (file, Some(fragment)),
                None => (src, None),
            };
            let target = reflowed_target(&resolve_href(ncx_dir, file), fragment);
            format!("{}\"{}\"", &caps[1], target)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{fuzzy_find, heading_at};
    use crate::container::REFLOWED_FILE_NAME;
    use crate::models::ResolvedHeading;
    use crate::toc::{ordered_headings, parse_navigation, resolve_positions};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c1" href="text/chapter%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/chapter2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;

    const NCX: &str = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/">
  <navMap>
    <navPoint id="n1"><navLabel><text>Chapter 1</text></navLabel><content src="text/chapter%201.xhtml"/></navPoint>
    <navPoint id="n2"><navLabel><text>Chapter 2</text></navLabel><content src="text/chapter2.xhtml"/></navPoint>
    <navPoint id="n3"><navLabel><text>Coda</text></navLabel><content src="text/chapter2.xhtml#coda"/></navPoint>
  </navMap>
</ncx>"#;

    const CHAPTER_1: &str = "<html><head><title>x</title></head><body><p>It was a dark night.</p></body></html>";
    const CHAPTER_2: &str = "<html><body class=\"c\"><p>Morning came.</p><h2 id=\"coda\">Coda</h2><p>The end.</p></body></html>";

    fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_epub(path: &Path) {
        write_archive(
            path,
            &[
                ("mimetype", "application/epub+zip"),
                ("META-INF/container.xml", CONTAINER_XML),
                ("OEBPS/content.opf", OPF),
                ("OEBPS/toc.ncx", NCX),
                ("OEBPS/text/chapter 1.xhtml", CHAPTER_1),
                ("OEBPS/text/chapter2.xhtml", CHAPTER_2),
            ],
        );
    }

    fn extract_headings(epub: &Path) -> (Vec<ResolvedHeading>, String) {
        let workdir = tempfile::tempdir().unwrap();
        let extracted = EpubExtractor.extract(epub, workdir.path()).unwrap();
        let markup = std::fs::read_to_string(&extracted.markup).unwrap();
        let navigation = std::fs::read_to_string(&extracted.navigation).unwrap();
        let mut entries = parse_navigation(&navigation).unwrap();
        resolve_positions(&mut entries, &markup, &extracted.markup_file_name());
        (ordered_headings(entries), markup)
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS", "text/a%20b.xhtml"), "OEBPS/text/a b.xhtml");
        assert_eq!(resolve_href("OEBPS/text", "../toc.ncx"), "OEBPS/toc.ncx");
        assert_eq!(resolve_href("", "content.opf"), "content.opf");
    }

    #[test]
    fn test_extract_epub() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        write_epub(&epub);

        let (headings, markup) = extract_headings(&epub);

        assert!(markup.find("dark night").unwrap() < markup.find("Morning came").unwrap());
        let titles: Vec<&str> = headings.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["Chapter 1", "Chapter 2", "Coda"]);
    }

    #[test]
    fn test_extract_epub_writes_into_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        write_epub(&epub);
        let workdir = tempfile::tempdir().unwrap();

        let extracted = EpubExtractor.extract(&epub, workdir.path()).unwrap();

        assert_eq!(extracted.markup_file_name(), REFLOWED_FILE_NAME);
        assert!(extracted.markup.starts_with(workdir.path()));
        assert!(extracted.navigation.starts_with(workdir.path()));
    }

    #[test]
    fn test_repeated_ids_resolve_within_their_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("repeated.epub");
        write_archive(
            &epub,
            &[
                ("META-INF/container.xml", CONTAINER_XML),
                (
                    "OEBPS/content.opf",
                    r#"<package><manifest>
<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
<item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/>
<item id="c2" href="c2.xhtml" media-type="application/xhtml+xml"/>
</manifest><spine toc="ncx"><itemref idref="c1"/><itemref idref="c2"/></spine></package>"#,
                ),
                (
                    "OEBPS/toc.ncx",
                    r#"<ncx><navMap>
<navPoint><navLabel><text>One</text></navLabel><content src="c1.xhtml#title"/></navPoint>
<navPoint><navLabel><text>Two</text></navLabel><content src="c2.xhtml#title"/></navPoint>
</navMap></ncx>"#,
                ),
                (
                    "OEBPS/c1.xhtml",
                    r#"<html><body><h1 id="title">One</h1><p>alpha beta gamma delta</p></body></html>"#,
                ),
                (
                    "OEBPS/c2.xhtml",
                    r#"<html><body><h1 id="title">Two</h1><p>epsilon zeta eta theta</p></body></html>"#,
                ),
            ],
        );

        let (headings, markup) = extract_headings(&epub);

        assert_eq!(headings.len(), 2);
        assert!(headings[0].position < headings[1].position);
        let first = fuzzy_find("alpha beta gamma delta", &markup, 2).unwrap();
        let second = fuzzy_find("epsilon zeta eta theta", &markup, 2).unwrap();
        assert_eq!(headings[heading_at(&headings, first).unwrap()].title, "One");
        assert_eq!(headings[heading_at(&headings, second).unwrap()].title, "Two");
    }

    #[test]
    fn test_retarget_navigation() {
        let ncx = r#"<content src="text/a%20b.xhtml#x"/><content src='text/c.xhtml'/>"#;

        assert_eq!(
            retarget_navigation(ncx, "OEBPS"),
            r#"<content src="book.html#part-OEBPS-text-a-b-xhtml--x"/><content src="book.html#part-OEBPS-text-c-xhtml"/>"#
        );
    }

    #[test]
    fn test_extract_rejects_other_formats() {
        let workdir = tempfile::tempdir().unwrap();

        let result = EpubExtractor.extract(Path::new("book.mobi"), workdir.path());

        assert!(matches!(result, Err(ExtractError::Unsupported(_))));
    }

    #[test]
    fn test_extract_rejects_broken_archive() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("broken.epub");
        std::fs::write(&epub, b"not a zip").unwrap();
        let workdir = tempfile::tempdir().unwrap();

        let result = EpubExtractor.extract(&epub, workdir.path());

        assert!(matches!(result, Err(ExtractError::Archive { .. })));
    }
}
