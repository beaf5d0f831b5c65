//! Shared test utilities for odtexport
//!
//! This module provides common fixtures and helpers used across tests.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Namespace declarations shared by both template parts
pub const OFFICE_NAMESPACES: &str = concat!(
    r#"xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" "#,
    r#"xmlns:style="urn:oasis:names:tc:opendocument:xmlns:style:1.0" "#,
    r#"xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" "#,
    r#"xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" "#,
    r#"xmlns:draw="urn:oasis:names:tc:opendocument:xmlns:drawing:1.0" "#,
    r#"xmlns:fo="urn:oasis:names:tc:opendocument:xmlns:xsl-fo-compatible:1.0" "#,
    r#"xmlns:xlink="http://www.w3.org/1999/xlink" "#,
    r#"xmlns:svg="urn:oasis:names:tc:opendocument:xmlns:svg-compatible:1.0" "#,
    r#"office:version="1.2""#
);

/// Bytes of a non-XML entry used to check pass-through fidelity
pub const THUMBNAIL_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR-not-really";

/// Knobs for [`create_template`]
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    /// Include `styles.xml`
    pub include_styles: bool,
    /// Paragraph text placed in the body, e.g. the insertion marker
    pub body_text: Option<String>,
    /// Write `<office:automatic-styles/>` instead of an open section
    pub empty_automatic_styles: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            include_styles: true,
            body_text: None,
            empty_automatic_styles: false,
        }
    }
}

/// `content.xml` of the test template
pub fn template_content_xml(options: &TemplateOptions) -> String {
    let automatic = if options.empty_automatic_styles {
        "<office:automatic-styles/>".to_string()
    } else {
        r#"<office:automatic-styles><style:style style:name="P1" style:family="paragraph"/></office:automatic-styles>"#
            .to_string()
    };
    let body = match &options.body_text {
        Some(text) => format!(
            r#"<text:p text:style-name="Standard">Intro</text:p><text:p text:style-name="Standard">{}</text:p><text:p text:style-name="Standard">Outro</text:p>"#,
            text
        ),
        None => r#"<text:p text:style-name="Standard">Intro</text:p>"#.to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content {ns}><office:font-face-decls><style:font-face style:name="Liberation Serif" svg:font-family="'Liberation Serif'"/></office:font-face-decls>{automatic}<office:body><office:text>{body}</office:text></office:body></office:document-content>"#,
        ns = OFFICE_NAMESPACES,
        automatic = automatic,
        body = body
    )
}

/// `styles.xml` of the test template
pub fn template_styles_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-styles {ns}><office:font-face-decls><style:font-face style:name="Liberation Serif" svg:font-family="'Liberation Serif'"/></office:font-face-decls><office:styles><style:style style:name="Standard" style:family="paragraph"/><style:style style:name="Text_20_body" style:display-name="Text body" style:family="paragraph" style:parent-style-name="Standard"/></office:styles><office:automatic-styles/><office:master-styles><style:master-page style:name="Standard"/></office:master-styles></office:document-styles>"#,
        ns = OFFICE_NAMESPACES
    )
}

/// Create an ODT template archive for testing
///
/// Contains a stored `mimetype`, `META-INF/manifest.xml`, a binary
/// thumbnail, `content.xml` and (optionally) `styles.xml`.
pub fn create_template(options: &TemplateOptions) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(&mut buffer);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(b"application/vnd.oasis.opendocument.text")
        .unwrap();

    zip.add_directory("META-INF/", stored).unwrap();
    zip.start_file("META-INF/manifest.xml", deflated).unwrap();
    zip.write_all(
        br#"<?xml version="1.0" encoding="UTF-8"?>
<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0">
 <manifest:file-entry manifest:media-type="application/vnd.oasis.opendocument.text" manifest:full-path="/"/>
 <manifest:file-entry manifest:media-type="text/xml" manifest:full-path="content.xml"/>
 <manifest:file-entry manifest:media-type="text/xml" manifest:full-path="styles.xml"/>
</manifest:manifest>"#,
    )
    .unwrap();

    zip.start_file("Thumbnails/thumbnail.png", deflated).unwrap();
    zip.write_all(THUMBNAIL_BYTES).unwrap();

    zip.start_file("content.xml", deflated).unwrap();
    zip.write_all(template_content_xml(options).as_bytes())
        .unwrap();

    if options.include_styles {
        zip.start_file("styles.xml", deflated).unwrap();
        zip.write_all(template_styles_xml().as_bytes()).unwrap();
    }

    zip.finish().unwrap();
    buffer.into_inner()
}

/// Read every file entry of an archive into a map
pub fn read_entries(bytes: &[u8]) -> HashMap<String, Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = HashMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        if file.is_dir() {
            continue;
        }
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        entries.insert(file.name().to_string(), contents);
    }
    entries
}

/// Read one entry of an archive as a string
pub fn read_entry_string(bytes: &[u8], name: &str) -> String {
    let entries = read_entries(bytes);
    String::from_utf8(entries[name].clone()).unwrap()
}

/// Write a blank PNG of the given pixel size
pub fn write_png(path: &Path, width: u32, height: u32) {
    image::RgbImage::new(width, height).save(path).unwrap();
}

/// Write a small style library directory
///
/// Contains paragraph, text and table styles, one font and the two list
/// level templates.
pub fn write_style_library(dir: &Path) {
    let fragments: &[(&str, &str)] = &[
        (
            "text_body.txt",
            r#"<style:style style:name="Text_20_body" style:display-name="Text body" style:family="paragraph" style:parent-style-name="Standard" style:class="text"/>"#,
        ),
        (
            "heading.txt",
            r#"<style:style style:name="Heading" style:family="paragraph" style:parent-style-name="Standard" style:class="text"/>"#,
        ),
        (
            "heading_1.txt",
            r#"<style:style style:name="Heading_20_1" style:display-name="Heading 1" style:family="paragraph" style:parent-style-name="Heading" style:default-outline-level="1"/>"#,
        ),
        (
            "preformatted.txt",
            r#"<style:style style:name="Preformatted_20_Text" style:display-name="Preformatted Text" style:family="paragraph"><style:text-properties style:font-name="DejaVu Sans Mono"/></style:style>"#,
        ),
        (
            "strong.txt",
            r#"<style:style style:name="Strong_20_Emphasis" style:display-name="Strong Emphasis" style:family="text"><style:text-properties fo:font-weight="bold"/></style:style>"#,
        ),
        (
            "sup.txt",
            r#"<style:style style:name="sup" style:family="text"><style:text-properties style:text-position="super 58%"/></style:style>"#,
        ),
        (
            "font_dejavu_sans_mono.txt",
            r#"<style:font-face style:name="DejaVu Sans Mono" svg:font-family="'DejaVu Sans Mono'" style:font-pitch="fixed"/>"#,
        ),
        ("README.txt", "Fragments without a style name are ignored."),
        (
            "list_level.txt",
            r#"<text:list-level-style-bullet text:level="{level}" text:bullet-char="•"><style:list-level-properties text:space-before="{space}cm" text:min-label-width="0.4cm"/></text:list-level-style-bullet>"#,
        ),
        (
            "numbering_level.txt",
            r#"<text:list-level-style-number text:level="{level}" style:num-format="1"><style:list-level-properties text:space-before="{space}cm" text:min-label-width="0.5cm"/></text:list-level-style-number>"#,
        ),
    ];
    for (name, xml) in fragments {
        std::fs::write(dir.join(name), xml).unwrap();
    }
}
