//! Style library
//!
//! A directory of XML fragments, each holding one named style or font-face
//! definition. After the page body has been inserted, the library decides
//! which of its definitions the document actually references and the
//! template does not yet define.
//!
//! Two fragments are special: `list_level.txt` and `numbering_level.txt` hold
//! a single list level with `{level}` and `{space}` placeholders. They are
//! expanded ten levels deep into the `List 1` and `Numbering 1` list styles,
//! with the indent growing at every level.
//!
//! Detection of references and existing definitions is done on the literal
//! `style-name="…"` / `style:name="…"` markers.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use glob::{glob, Pattern};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{OdtError, Result};
use crate::xml::{element_name, get_attr};

/// Name of the bullet list style synthesized from `list_level.txt`
pub const LIST_STYLE_NAME: &str = "List_20_1";

/// Name of the numbered list style synthesized from `numbering_level.txt`
pub const NUMBERING_STYLE_NAME: &str = "Numbering_20_1";

const LIST_LEVEL_TEMPLATE: &str = "list_level";
const NUMBERING_LEVEL_TEMPLATE: &str = "numbering_level";

/// Number of nesting levels in a synthesized list style
pub const LIST_LEVELS: usize = 10;

/// Indent step of the bullet list style, in centimeters
const LIST_INDENT_STEP: f64 = 0.4;

/// Indent step of the numbered list style, in centimeters
const NUMBERING_INDENT_STEP: f64 = 0.5;

/// Fragments of the style library compiled into the crate
const BUNDLED_FRAGMENTS: &[&str] = &[
    include_str!("../templates/styles/emphasis.txt"),
    include_str!("../templates/styles/font_dejavu_sans.txt"),
    include_str!("../templates/styles/font_dejavu_sans_mono.txt"),
    include_str!("../templates/styles/graphics.txt"),
    include_str!("../templates/styles/heading.txt"),
    include_str!("../templates/styles/heading_1.txt"),
    include_str!("../templates/styles/heading_2.txt"),
    include_str!("../templates/styles/heading_3.txt"),
    include_str!("../templates/styles/heading_4.txt"),
    include_str!("../templates/styles/heading_5.txt"),
    include_str!("../templates/styles/heading_6.txt"),
    include_str!("../templates/styles/horizontal_line.txt"),
    include_str!("../templates/styles/list_contents.txt"),
    include_str!("../templates/styles/preformatted_text.txt"),
    include_str!("../templates/styles/quotations.txt"),
    include_str!("../templates/styles/source_text.txt"),
    include_str!("../templates/styles/strike.txt"),
    include_str!("../templates/styles/strong_emphasis.txt"),
    include_str!("../templates/styles/sub.txt"),
    include_str!("../templates/styles/sup.txt"),
    include_str!("../templates/styles/table_contents.txt"),
    include_str!("../templates/styles/table_default.txt"),
    include_str!("../templates/styles/table_default_cell.txt"),
    include_str!("../templates/styles/table_heading.txt"),
    include_str!("../templates/styles/text_body.txt"),
    include_str!("../templates/styles/underline.txt"),
];
const BUNDLED_LIST_LEVEL: &str = include_str!("../templates/styles/list_level.txt");
const BUNDLED_NUMBERING_LEVEL: &str = include_str!("../templates/styles/numbering_level.txt");

/// A named style fragment
#[derive(Debug, Clone, PartialEq)]
pub struct StyleDefinition {
    /// Value of `style:name`
    pub name: String,
    /// The fragment, inserted verbatim
    pub xml: String,
    /// Belongs in `office:styles` rather than `office:automatic-styles`
    pub is_main: bool,
    /// Font face the style refers to through `style:font-name`
    pub required_font: Option<String>,
    /// Value of `style:parent-style-name`
    pub parent: Option<String>,
}

/// A named `<style:font-face>` fragment
#[derive(Debug, Clone, PartialEq)]
pub struct FontDefinition {
    /// Value of `style:name`
    pub name: String,
    /// The fragment, inserted verbatim
    pub xml: String,
}

/// A parsed library fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Style(StyleDefinition),
    Font(FontDefinition),
}

impl Fragment {
    /// Classify a fragment; `None` when no style name can be extracted
    pub fn parse(xml: &str) -> Option<Self> {
        let mut reader = Reader::from_str(xml);
        let mut root: Option<(String, Option<String>, bool, Option<String>)> = None;
        let mut required_font = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    if root.is_none() {
                        root = Some((
                            element_name(e),
                            get_attr(e, b"style:name"),
                            get_attr(e, b"style:display-name").is_some(),
                            get_attr(e, b"style:parent-style-name"),
                        ));
                    }
                    if required_font.is_none() {
                        required_font = get_attr(e, b"style:font-name");
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    log::debug!("Skipping unparsable style fragment: {}", e);
                    return None;
                }
                _ => {}
            }
        }

        let (element, name, is_main, parent) = root?;
        let name = name?;
        let xml = xml.trim().to_string();
        if element == "style:font-face" {
            return Some(Fragment::Font(FontDefinition { name, xml }));
        }
        Some(Fragment::Style(StyleDefinition {
            name,
            xml,
            is_main,
            required_font,
            parent,
        }))
    }
}

/// Styles and fonts selected for merging into one document
///
/// Both maps borrow from the [`StyleLibrary`] and are keyed by name, so a
/// definition can be selected at most once.
#[derive(Debug, Clone, Default)]
pub struct PendingMerge<'lib> {
    /// Selected styles, by name
    pub styles: BTreeMap<&'lib str, &'lib StyleDefinition>,
    /// Selected fonts, by name
    pub fonts: BTreeMap<&'lib str, &'lib FontDefinition>,
}

impl<'lib> PendingMerge<'lib> {
    /// Nothing to merge
    pub fn is_empty(&self) -> bool {
        self.styles.is_empty() && self.fonts.is_empty()
    }

    /// Selected styles destined for `office:styles`
    pub fn main_styles(&self) -> impl Iterator<Item = &'lib StyleDefinition> + '_ {
        self.styles.values().copied().filter(|s| s.is_main)
    }

    /// Selected styles destined for `office:automatic-styles`
    pub fn automatic_styles(&self) -> impl Iterator<Item = &'lib StyleDefinition> + '_ {
        self.styles.values().copied().filter(|s| !s.is_main)
    }

    /// Selected font faces
    pub fn fonts(&self) -> impl Iterator<Item = &'lib FontDefinition> + '_ {
        self.fonts.values().copied()
    }
}

/// Name-indexed table of style and font definitions
///
/// Loaded once and shared read-only between conversions.
#[derive(Debug, Clone, Default)]
pub struct StyleLibrary {
    styles: BTreeMap<String, StyleDefinition>,
    fonts: BTreeMap<String, FontDefinition>,
    /// Synthesized list styles, merged into every document
    list_styles: Vec<StyleDefinition>,
}

impl StyleLibrary {
    /// Load every `*.txt` fragment from a directory
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(OdtError::StyleLibrary(format!(
                "not a directory: {}",
                dir.display()
            )));
        }

        let pattern = format!("{}/*.txt", Pattern::escape(&dir.to_string_lossy()));
        let mut fragments = Vec::new();
        let mut list_level = None;
        let mut numbering_level = None;

        for entry in glob(&pattern).map_err(|e| OdtError::StyleLibrary(e.to_string()))? {
            let path = entry.map_err(|e| OdtError::Io(e.into()))?;
            let xml = fs::read_to_string(&path)?;
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(LIST_LEVEL_TEMPLATE) => list_level = Some(xml),
                Some(NUMBERING_LEVEL_TEMPLATE) => numbering_level = Some(xml),
                _ => fragments.push(xml),
            }
        }

        let list_level = list_level.ok_or_else(|| {
            OdtError::StyleLibrary(format!("{}.txt not found", LIST_LEVEL_TEMPLATE))
        })?;
        let numbering_level = numbering_level.ok_or_else(|| {
            OdtError::StyleLibrary(format!("{}.txt not found", NUMBERING_LEVEL_TEMPLATE))
        })?;

        let library = Self::from_fragments(fragments, &list_level, &numbering_level);
        log::debug!(
            "Loaded style library from {}: {} styles, {} fonts",
            dir.display(),
            library.styles.len(),
            library.fonts.len()
        );
        Ok(library)
    }

    /// The style library shipped with the crate
    pub fn bundled() -> Self {
        Self::from_fragments(
            BUNDLED_FRAGMENTS.iter().copied(),
            BUNDLED_LIST_LEVEL,
            BUNDLED_NUMBERING_LEVEL,
        )
    }

    /// Build from in-memory fragments and the two list level templates
    pub fn from_fragments<I, S>(fragments: I, list_level: &str, numbering_level: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut library = Self::default();
        for xml in fragments {
            match Fragment::parse(xml.as_ref()) {
                Some(Fragment::Style(style)) => {
                    library.styles.insert(style.name.clone(), style);
                }
                Some(Fragment::Font(font)) => {
                    library.fonts.insert(font.name.clone(), font);
                }
                None => log::debug!("Ignoring style fragment without a style name"),
            }
        }

        library.list_styles = vec![
            expand_list_style(LIST_STYLE_NAME, "List 1", list_level, LIST_INDENT_STEP),
            expand_list_style(
                NUMBERING_STYLE_NAME,
                "Numbering 1",
                numbering_level,
                NUMBERING_INDENT_STEP,
            ),
        ];
        library
    }

    /// Get a style by name
    pub fn style(&self, name: &str) -> Option<&StyleDefinition> {
        self.styles.get(name)
    }

    /// Get a font face by name
    pub fn font(&self, name: &str) -> Option<&FontDefinition> {
        self.fonts.get(name)
    }

    /// All fragment styles, ordered by name
    pub fn styles(&self) -> impl Iterator<Item = &StyleDefinition> {
        self.styles.values()
    }

    /// All font faces, ordered by name
    pub fn fonts(&self) -> impl Iterator<Item = &FontDefinition> {
        self.fonts.values()
    }

    /// The synthesized list styles
    pub fn list_styles(&self) -> &[StyleDefinition] {
        &self.list_styles
    }

    /// Select the definitions a document needs
    ///
    /// A library style is selected when `content` references it and neither
    /// part defines it yet; its parent style and its font follow it. The
    /// list styles are selected unless already defined.
    pub fn select<'lib>(&'lib self, content: &str, styles: &str) -> PendingMerge<'lib> {
        let mut pending = PendingMerge::default();
        let parts = [content, styles];

        for style in self.styles.values() {
            if !is_referenced(content, &style.name) {
                continue;
            }
            self.select_style(style, &parts, &mut pending);
        }
        for style in &self.list_styles {
            self.select_style(style, &parts, &mut pending);
        }

        log::debug!(
            "Selected {} styles and {} fonts for merging",
            pending.styles.len(),
            pending.fonts.len()
        );
        pending
    }

    fn select_style<'lib>(
        &'lib self,
        style: &'lib StyleDefinition,
        parts: &[&str],
        pending: &mut PendingMerge<'lib>,
    ) {
        if let Some(font) = &style.required_font {
            self.select_font(font, parts, pending);
        }

        if pending.styles.contains_key(style.name.as_str()) {
            return;
        }
        if parts.iter().any(|xml| is_defined(xml, &style.name)) {
            return;
        }
        pending.styles.insert(&style.name, style);

        if let Some(parent) = &style.parent {
            if let Some(parent_style) = self.styles.get(parent) {
                self.select_style(parent_style, parts, pending);
            }
        }
    }

    fn select_font<'lib>(&'lib self, name: &str, parts: &[&str], pending: &mut PendingMerge<'lib>) {
        if pending.fonts.contains_key(name) {
            return;
        }
        if parts.iter().any(|xml| is_font_declared(xml, name)) {
            return;
        }
        match self.fonts.get(name) {
            Some(font) => {
                pending.fonts.insert(&font.name, font);
            }
            None => log::warn!("Font \"{}\" is required but missing from the style library", name),
        }
    }
}

/// Expand a list level template into a complete `<text:list-style>`
fn expand_list_style(name: &str, display_name: &str, template: &str, step: f64) -> StyleDefinition {
    let template = template.trim();
    let mut xml = format!(
        r#"<text:list-style style:name="{}" style:display-name="{}">"#,
        name, display_name
    );
    for i in 0..LIST_LEVELS {
        let space = format!("{:.1}", step * i as f64);
        xml.push_str(
            &template
                .replace("{level}", &(i + 1).to_string())
                .replace("{space}", &space),
        );
    }
    xml.push_str("</text:list-style>");

    match Fragment::parse(&xml) {
        Some(Fragment::Style(style)) => style,
        _ => {
            log::warn!("List level template for {} is not well-formed", name);
            StyleDefinition {
                name: name.to_string(),
                xml,
                is_main: true,
                required_font: None,
                parent: None,
            }
        }
    }
}

fn is_referenced(xml: &str, name: &str) -> bool {
    xml.contains(&format!("style-name=\"{}\"", name))
}

fn is_defined(xml: &str, name: &str) -> bool {
    xml.contains(&format!("style:name=\"{}\"", name))
}

fn is_font_declared(xml: &str, name: &str) -> bool {
    xml.contains(&format!("<style:font-face style:name=\"{}\"", name))
}
