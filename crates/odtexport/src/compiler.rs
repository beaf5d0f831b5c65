//! Document compilation
//!
//! Inserts a transformed body fragment into the template's `content.xml`
//! and merges the style library definitions the result needs into both XML
//! parts. Both operations are single passes over the quick-xml event
//! stream; the template markup they do not touch is written back unchanged.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::archive::OdtPackage;
use crate::config::ExportConfig;
use crate::error::{OdtError, Result};
use crate::image::{ImageFetcher, ImageResolver, SiteResources};
use crate::library::{PendingMerge, StyleLibrary};
use crate::transform::{transform, TransformOptions, TEXT_BODY};
use crate::xml::{element_name, into_string, write_event, write_raw};

const OFFICE_TEXT: &str = "office:text";
const FONT_FACE_DECLS: &str = "office:font-face-decls";
const STYLES: &str = "office:styles";
const AUTOMATIC_STYLES: &str = "office:automatic-styles";
const MASTER_STYLES: &str = "office:master-styles";
const BODY: &str = "office:body";

fn malformed(e: quick_xml::Error) -> OdtError {
    OdtError::MalformedMarkup(e.to_string())
}

/// Insert a body fragment into `content.xml`
///
/// The first occurrence of `marker` in text inside `office:text` is
/// replaced by the fragment: the enclosing paragraph (and any span open
/// inside it) is closed before the fragment and reopened after it, the
/// reopened paragraph using `Text_20_body`. Every other occurrence in the
/// document text is removed.
/// Without a marker the fragment is appended at the end of `office:text`.
pub fn insert_content(content: &str, fragment: &str, marker: &str) -> Result<String> {
    let mut reader = Reader::from_str(content);
    let mut writer = Writer::new(Vec::new());
    let mut stack: Vec<BytesStart<'static>> = Vec::new();
    let mut inserted = false;

    loop {
        let event = reader.read_event().map_err(malformed)?;
        match event {
            Event::Start(e) => {
                write_event(&mut writer, Event::Start(e.clone()))?;
                stack.push(e.into_owned());
            }
            Event::End(_) => {
                let open = stack
                    .pop()
                    .ok_or_else(|| OdtError::MalformedMarkup("unbalanced end tag".to_string()))?;
                let name = element_name(&open);
                if name == OFFICE_TEXT && !inserted {
                    write_raw(&mut writer, fragment);
                    inserted = true;
                }
                // Written from the stack: a split heading may have been
                // reopened as a paragraph
                write_event(&mut writer, Event::End(BytesEnd::new(name)))?;
            }
            Event::Empty(e) if element_name(&e) == OFFICE_TEXT && !inserted => {
                write_event(&mut writer, Event::Start(e.clone()))?;
                write_raw(&mut writer, fragment);
                write_event(&mut writer, Event::End(e.to_end()))?;
                inserted = true;
            }
            Event::Text(e) if !marker.is_empty() => {
                let text = e.unescape().map_err(malformed)?;
                if !text.contains(marker) {
                    write_event(&mut writer, Event::Text(e))?;
                    continue;
                }
                if inserted || !inside(&stack, OFFICE_TEXT) {
                    write_text(&mut writer, &text.replace(marker, ""))?;
                    continue;
                }

                let (before, after) = text.split_once(marker).unwrap_or((text.as_ref(), ""));
                write_text(&mut writer, before)?;
                splice_fragment(&mut writer, &mut stack, fragment)?;
                write_text(&mut writer, &after.replace(marker, ""))?;
                inserted = true;
                log::debug!("Inserted content at marker {}", marker);
            }
            Event::Eof => break,
            event => write_event(&mut writer, event)?,
        }
    }

    if !inserted {
        return Err(OdtError::MissingAnchor(format!(
            "neither \"{}\" nor <{}> found in content",
            marker, OFFICE_TEXT
        )));
    }
    into_string(writer)
}

fn inside(stack: &[BytesStart], name: &str) -> bool {
    stack.iter().any(|e| element_name(e) == name)
}

fn write_text(writer: &mut Writer<Vec<u8>>, text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    write_event(writer, Event::Text(BytesText::new(text)))
}

/// Close the enclosing paragraph, write the fragment and reopen
fn splice_fragment(
    writer: &mut Writer<Vec<u8>>,
    stack: &mut [BytesStart<'static>],
    fragment: &str,
) -> Result<()> {
    let paragraph = stack
        .iter()
        .rposition(|e| matches!(element_name(e).as_str(), "text:p" | "text:h"));
    let Some(index) = paragraph else {
        write_raw(writer, fragment);
        return Ok(());
    };

    for open in stack[index..].iter().rev() {
        write_event(writer, Event::End(open.to_end()))?;
    }
    write_raw(writer, fragment);

    let mut reopened = BytesStart::new("text:p");
    reopened.push_attribute(("text:style-name", TEXT_BODY));
    stack[index] = reopened;
    for open in stack[index..].iter() {
        write_event(writer, Event::Start(open.clone()))?;
    }
    Ok(())
}

/// Serialized sections to add to one XML part
#[derive(Debug, Default)]
struct Additions {
    fonts: String,
    main: String,
    automatic: String,
}

impl Additions {
    fn for_section(&self, name: &str) -> Option<&str> {
        let xml = match name {
            FONT_FACE_DECLS => &self.fonts,
            STYLES => &self.main,
            AUTOMATIC_STYLES => &self.automatic,
            _ => return None,
        };
        (!xml.is_empty()).then_some(xml.as_str())
    }
}

/// Merge selected library definitions into both XML parts
///
/// Returns the new `(content, styles)`. Automatic styles and fonts go into
/// both parts, main styles into the styles part only. A missing section is
/// created at its schema position.
pub fn merge_styles(
    content: &str,
    styles: &str,
    pending: &PendingMerge<'_>,
) -> Result<(String, String)> {
    if pending.is_empty() {
        return Ok((content.to_string(), styles.to_string()));
    }

    let fonts: String = pending.fonts().map(|f| f.xml.as_str()).collect();
    let automatic: String = pending.automatic_styles().map(|s| s.xml.as_str()).collect();
    let main: String = pending.main_styles().map(|s| s.xml.as_str()).collect();

    let content = merge_part(
        content,
        &Additions {
            fonts: fonts.clone(),
            main: String::new(),
            automatic: automatic.clone(),
        },
    )?;
    let styles = merge_part(
        styles,
        &Additions {
            fonts,
            main,
            automatic,
        },
    )?;
    Ok((content, styles))
}

/// Sections of an office document root, in schema order
const SECTION_ORDER: [&str; 3] = [FONT_FACE_DECLS, STYLES, AUTOMATIC_STYLES];

fn merge_part(xml: &str, additions: &Additions) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut seen = [false; 3];

    loop {
        let event = reader.read_event().map_err(malformed)?;
        match event {
            Event::Start(e) => {
                if depth == 1 {
                    let name = element_name(&e);
                    create_missing(&mut writer, &name, &mut seen, additions)?;
                    mark_seen(&name, &mut seen);
                }
                depth += 1;
                write_event(&mut writer, Event::Start(e))?;
            }
            Event::Empty(e) if depth == 1 => {
                let name = element_name(&e);
                create_missing(&mut writer, &name, &mut seen, additions)?;
                mark_seen(&name, &mut seen);
                match additions.for_section(&name) {
                    Some(extra) => {
                        write_event(&mut writer, Event::Start(e.clone()))?;
                        write_raw(&mut writer, extra);
                        write_event(&mut writer, Event::End(e.to_end()))?;
                    }
                    None => write_event(&mut writer, Event::Empty(e))?,
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let Some(extra) = additions.for_section(&name) {
                        write_raw(&mut writer, extra);
                    }
                } else if depth == 0 {
                    // Root closing: append whatever never found a place
                    create_missing(&mut writer, "", &mut seen, additions)?;
                }
                write_event(&mut writer, Event::End(e))?;
            }
            Event::Eof => break,
            event => write_event(&mut writer, event)?,
        }
    }

    into_string(writer)
}

fn mark_seen(name: &str, seen: &mut [bool; 3]) {
    if let Some(i) = SECTION_ORDER.iter().position(|s| *s == name) {
        seen[i] = true;
    }
}

/// Create absent sections that must precede `next`
///
/// An empty `next` creates every absent section.
fn create_missing(
    writer: &mut Writer<Vec<u8>>,
    next: &str,
    seen: &mut [bool; 3],
    additions: &Additions,
) -> Result<()> {
    let position = match next {
        "" | MASTER_STYLES | BODY => SECTION_ORDER.len(),
        name => match SECTION_ORDER.iter().position(|s| *s == name) {
            Some(i) => i,
            None => return Ok(()),
        },
    };
    for (i, section) in SECTION_ORDER.iter().enumerate().take(position) {
        if seen[i] {
            continue;
        }
        if let Some(extra) = additions.for_section(section) {
            log::debug!("Creating missing <{}>", section);
            write_raw(writer, &format!("<{}>{}</{}>", section, extra, section));
            seen[i] = true;
        }
    }
    Ok(())
}

/// Compiles one document out of a template package
///
/// Borrows the shared style library and site collaborators; owns the
/// package until [`finalize`](Self::finalize) serializes it.
pub struct DocumentCompiler<'a> {
    package: OdtPackage,
    library: &'a StyleLibrary,
    config: &'a ExportConfig,
    resources: &'a dyn SiteResources,
    fetcher: &'a dyn ImageFetcher,
}

impl<'a> DocumentCompiler<'a> {
    /// Create a compiler over an opened template
    pub fn new(
        package: OdtPackage,
        library: &'a StyleLibrary,
        config: &'a ExportConfig,
        resources: &'a dyn SiteResources,
        fetcher: &'a dyn ImageFetcher,
    ) -> Self {
        Self {
            package,
            library,
            config,
            resources,
            fetcher,
        }
    }

    /// The package being compiled
    pub fn package(&self) -> &OdtPackage {
        &self.package
    }

    /// Import an XHTML page: embed its images, convert it, insert it at the
    /// marker and merge the styles it uses
    pub fn import_xhtml(&mut self, xhtml: &str) -> Result<()> {
        let resolver = ImageResolver::new(
            &self.package,
            &self.config.images,
            &self.config.base_url,
            self.resources,
            self.fetcher,
        )?;
        let xhtml = resolver.rewrite(xhtml)?;

        let options =
            TransformOptions::from_config(self.config).numbered_after(self.package.content());
        let fragment = transform(&xhtml, &options)?;
        let content = insert_content(
            self.package.content(),
            &fragment,
            &self.config.replace_keyword,
        )?;
        self.package.set_content(content);

        self.merge_library_styles()
    }

    /// Merge the library styles the current content needs
    pub fn merge_library_styles(&mut self) -> Result<()> {
        let pending = self
            .library
            .select(self.package.content(), self.package.styles());
        if pending.is_empty() {
            return Ok(());
        }
        let (content, styles) =
            merge_styles(self.package.content(), self.package.styles(), &pending)?;
        self.package.set_content(content);
        self.package.set_styles(styles);
        Ok(())
    }

    /// Serialize the finished document
    pub fn finalize(self) -> Result<Vec<u8>> {
        self.package.save()
    }
}
