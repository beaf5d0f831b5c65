//! End-to-end export tests against the bundled style library

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Write};

use odtexport::test_utils::{
    create_template, read_entries, read_entry_string, write_png, TemplateOptions, THUMBNAIL_BYTES,
};
use odtexport::{
    DirectoryResources, DocumentCompiler, ExportConfig, ImageFetcher, NoSiteResources, OdtError,
    OdtExporter, OdtPackage, StyleLibrary, ODT_MIME_TYPE,
};
use tempfile::TempDir;

const BASE: &str = "http://example.org/trac";

struct CountingFetcher {
    png: Vec<u8>,
    calls: RefCell<usize>,
}

impl CountingFetcher {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote.png");
        write_png(&path, 48, 48);
        Self {
            png: fs::read(path).unwrap(),
            calls: RefCell::new(0),
        }
    }
}

impl ImageFetcher for CountingFetcher {
    fn fetch(&self, _url: &str, dest: &mut dyn Write) -> odtexport::Result<()> {
        *self.calls.borrow_mut() += 1;
        dest.write_all(&self.png)?;
        Ok(())
    }
}

fn config() -> ExportConfig {
    ExportConfig::from_toml_str(&format!("base_url = \"{}/\"", BASE)).unwrap()
}

fn library() -> StyleLibrary {
    StyleLibrary::bundled()
}

fn marker_template() -> Vec<u8> {
    create_template(&TemplateOptions {
        body_text: Some("TRAC-ODT-INSERT".to_string()),
        ..Default::default()
    })
}

fn page(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>WikiStart</title></head><body>{}</body></html>"#,
        body
    )
}

/// Style, list style and font names declared more than once in a part
fn duplicate_style_names(xml: &str) -> Vec<String> {
    let mut duplicates = Vec::new();
    for prefix in [
        "<style:style style:name=\"",
        "<text:list-style style:name=\"",
        "<style:font-face style:name=\"",
    ] {
        let mut seen = HashSet::new();
        for chunk in xml.split(prefix).skip(1) {
            let name = chunk.split('"').next().unwrap_or_default().to_string();
            if !seen.insert(name.clone()) {
                duplicates.push(name);
            }
        }
    }
    duplicates
}

#[test]
fn test_bundled_library_loads() {
    let library = library();
    assert_eq!(library.styles().count(), 24);
    assert_eq!(library.fonts().count(), 2);
    assert!(library.style("Heading").unwrap().is_main);
    assert!(!library.style("sup").unwrap().is_main);
    assert_eq!(
        library.style("Preformatted_20_Text").unwrap().required_font.as_deref(),
        Some("DejaVu Sans Mono")
    );
}

#[test]
fn test_full_export() {
    let library = library();
    let config = config();
    let site = TempDir::new().unwrap();
    fs::create_dir_all(site.path().join("wiki/WikiStart")).unwrap();
    write_png(&site.path().join("wiki/WikiStart/chart.png"), 192, 96);
    let resources = DirectoryResources::new().with_attachments(site.path());
    let fetcher = CountingFetcher::new();

    let xhtml = page(concat!(
        "<h1 id=\"Title\">Title</h1>",
        "<p>Some <strong>bold</strong> and <code>code</code>&nbsp;text.</p>",
        "<ul><li>one</li><li>two</li></ul>",
        "<pre class=\"wiki\">\nfn main() {}\n</pre>",
        "<p><img src=\"http://example.org/trac/raw-attachment/wiki/WikiStart/chart.png\" alt=\"chart\"/></p>",
        "<p><img src=\"https://images.example.com/logo.png\"/></p>",
    ));

    let odt = OdtExporter::new(&library, &config, &resources)
        .with_fetcher(&fetcher)
        .export_bytes(&marker_template(), &xhtml)
        .unwrap();

    let content = read_entry_string(&odt, "content.xml");
    let styles = read_entry_string(&odt, "styles.xml");

    // Body inserted at the marker, between the template paragraphs
    assert!(!content.contains("TRAC-ODT-INSERT"));
    let intro = content.find("Intro").unwrap();
    let heading = content.find(r#"<text:h text:style-name="Heading_20_1""#).unwrap();
    let outro = content.find("Outro").unwrap();
    assert!(intro < heading && heading < outro);
    assert!(content.contains(r#"<text:list text:style-name="List_20_1">"#));
    assert!(content.contains(r#"<text:p text:style-name="Preformatted_20_Text">fn main() {}</text:p>"#));
    assert!(content.contains("code</text:span>\u{a0}text."));

    // Both images embedded, the local one without a download
    assert_eq!(*fetcher.calls.borrow(), 1);
    let entries = read_entries(&odt);
    let pictures: Vec<&String> = entries.keys().filter(|k| k.starts_with("Pictures/")).collect();
    assert_eq!(pictures.len(), 2);
    assert!(content.contains(r#"svg:width="5.08cm" svg:height="2.54cm""#));
    for picture in pictures {
        assert!(content.contains(&format!(r#"xlink:href="{}""#, picture)));
    }

    // Styles the body uses were merged, with their parents and fonts
    for name in ["Heading_20_1", "Heading", "Strong_20_Emphasis", "Source_20_Text", "List_20_1", "Numbering_20_1"] {
        assert!(styles.contains(&format!(r#"style:name="{}""#, name)), "missing {}", name);
    }
    assert!(styles.contains(r#"<style:font-face style:name="DejaVu Sans Mono""#));
    assert!(content.contains(r#"<style:font-face style:name="DejaVu Sans Mono""#));
    assert!(content.contains(r#"style:name="Graphics""#));
    // Styles nobody references stay out
    assert!(!styles.contains(r#"style:name="Quotations""#));

    assert!(duplicate_style_names(&content).is_empty());
    assert!(duplicate_style_names(&styles).is_empty());
}

#[test]
fn test_untouched_entries_roundtrip() {
    let library = library();
    let config = config();
    let template = marker_template();

    let odt = OdtExporter::new(&library, &config, &NoSiteResources)
        .with_fetcher(&CountingFetcher::new())
        .export_bytes(&template, &page("<p>x</p>"))
        .unwrap();

    let before = read_entries(&template);
    let after = read_entries(&odt);
    assert_eq!(after["Thumbnails/thumbnail.png"], THUMBNAIL_BYTES);
    for name in ["mimetype", "META-INF/manifest.xml", "Thumbnails/thumbnail.png"] {
        assert_eq!(before[name], after[name], "{} changed", name);
    }
    assert_eq!(after["mimetype"], ODT_MIME_TYPE.as_bytes());
}

#[test]
fn test_export_without_marker_appends() {
    let library = library();
    let config = config();
    let odt = OdtExporter::new(&library, &config, &NoSiteResources)
        .with_fetcher(&CountingFetcher::new())
        .export_bytes(&create_template(&TemplateOptions::default()), &page("<p>Appended</p>"))
        .unwrap();

    let content = read_entry_string(&odt, "content.xml");
    assert!(content.contains(
        r#"Intro</text:p><text:p text:style-name="Text_20_body">Appended</text:p></office:text>"#
    ));
}

#[test]
fn test_export_from_file() {
    let dir = TempDir::new().unwrap();
    let template = dir.path().join("template.odt");
    fs::write(&template, marker_template()).unwrap();

    let library = library();
    let config = config();
    let odt = OdtExporter::new(&library, &config, &NoSiteResources)
        .with_fetcher(&CountingFetcher::new())
        .export(&template, &page("<p>From file</p>"))
        .unwrap();
    assert!(read_entry_string(&odt, "content.xml").contains("From file"));

    let missing = OdtExporter::new(&library, &config, &NoSiteResources)
        .with_fetcher(&CountingFetcher::new())
        .export(dir.path().join("missing.odt"), "<p/>");
    assert!(matches!(missing, Err(OdtError::PackageRead(_))));
}

#[test]
fn test_remote_images_disabled() {
    let library = library();
    let mut config = config();
    config.images.get_remote_images = false;
    let fetcher = CountingFetcher::new();

    let odt = OdtExporter::new(&library, &config, &NoSiteResources)
        .with_fetcher(&fetcher)
        .export_bytes(
            &marker_template(),
            &page(r#"<p><img src="https://images.example.com/logo.png" width="10"/></p>"#),
        )
        .unwrap();

    assert_eq!(*fetcher.calls.borrow(), 0);
    let content = read_entry_string(&odt, "content.xml");
    assert!(content.contains(r#"xlink:href="https://images.example.com/logo.png""#));
    assert!(content.contains(r#"svg:width="10px""#));
    assert!(!read_entries(&odt).keys().any(|k| k.starts_with("Pictures/")));
}

#[test]
fn test_scratch_removed_after_failure() {
    let library = library();
    let config = config();
    let package = OdtPackage::from_reader(Cursor::new(marker_template())).unwrap();
    let scratch = package.scratch_dir().to_path_buf();
    assert!(scratch.exists());

    let fetcher = CountingFetcher::new();
    let mut compiler = DocumentCompiler::new(package, &library, &config, &NoSiteResources, &fetcher);
    let result = compiler.import_xhtml("<html><body><p>unclosed</body></html>");
    assert!(matches!(result, Err(OdtError::MalformedMarkup(_))));

    drop(compiler);
    assert!(!scratch.exists());
}

#[test]
fn test_missing_anchor_reported() {
    let library = library();
    let config = config();
    let mut package = OdtPackage::from_reader(Cursor::new(marker_template())).unwrap();
    package.set_content(
        r#"<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0"><office:body/></office:document-content>"#,
    );

    let fetcher = CountingFetcher::new();
    let mut compiler = DocumentCompiler::new(package, &library, &config, &NoSiteResources, &fetcher);
    let result = compiler.import_xhtml(&page("<p>x</p>"));
    assert!(matches!(result, Err(OdtError::MissingAnchor(_))));
}

#[test]
fn test_second_import_adds_no_duplicates() {
    let library = library();
    let config = config();
    let package = OdtPackage::from_reader(Cursor::new(marker_template())).unwrap();
    let fetcher = CountingFetcher::new();
    let mut compiler = DocumentCompiler::new(package, &library, &config, &NoSiteResources, &fetcher);

    compiler.import_xhtml(&page("<h2>A</h2><p><sup>1</sup></p>")).unwrap();
    compiler.import_xhtml(&page("<h2>B</h2><p><sup>2</sup></p>")).unwrap();
    let odt = compiler.finalize().unwrap();

    let content = read_entry_string(&odt, "content.xml");
    let styles = read_entry_string(&odt, "styles.xml");
    assert!(content.contains(">A</text:h>") && content.contains(">B</text:h>"));
    assert!(duplicate_style_names(&content).is_empty());
    assert!(duplicate_style_names(&styles).is_empty());
}

#[test]
fn test_xml_entities_survive_export() {
    let library = library();
    let config = config();
    let odt = OdtExporter::new(&library, &config, &NoSiteResources)
        .with_fetcher(&CountingFetcher::new())
        .export_bytes(
            &marker_template(),
            &page(r#"<p>Tom &amp; Jerry <a href="http://x.org/?a=1&amp;b=2">q</a></p>"#),
        )
        .unwrap();

    let content = read_entry_string(&odt, "content.xml");
    assert!(content.contains("Tom &amp; Jerry "));
    assert!(content.contains(r#"xlink:href="http://x.org/?a=1&amp;b=2""#));
}

#[test]
fn test_table_names_stay_unique() {
    let library = library();
    let config = config();
    let mut package = OdtPackage::from_reader(Cursor::new(marker_template())).unwrap();
    let content = package.content().replace(
        "<text:p text:style-name=\"Standard\">Intro</text:p>",
        r#"<table:table table:name="Table1"><table:table-column/><table:table-row><table:table-cell/></table:table-row></table:table>"#,
    );
    package.set_content(content);

    let fetcher = CountingFetcher::new();
    let mut compiler = DocumentCompiler::new(package, &library, &config, &NoSiteResources, &fetcher);
    let table = page("<table><tr><td>x</td></tr></table>");
    compiler.import_xhtml(&table).unwrap();
    compiler.import_xhtml(&table).unwrap();
    let content = read_entry_string(&compiler.finalize().unwrap(), "content.xml");

    for name in ["Table1", "Table2", "Table3"] {
        let attr = format!(r#"table:name="{}""#, name);
        assert_eq!(content.matches(&attr).count(), 1, "{}", name);
    }
}

#[test]
fn test_invalid_config_rejected() {
    let library = library();
    let mut config = config();
    config.images.dpi = 0;

    let result = OdtExporter::new(&library, &config, &NoSiteResources)
        .with_fetcher(&CountingFetcher::new())
        .export_bytes(&marker_template(), &page("<p>x</p>"));
    assert!(matches!(result, Err(OdtError::Config(_))));
}
