//! XHTML to ODT body transformation
//!
//! The XHTML page is parsed into a small owned tree, then rendered into
//! `office:text` body markup. Paragraph-level output always lands inside a
//! `text:p`, `text:h`, `text:list` or `table:table`; loose inline content at
//! block level is wrapped into a paragraph of the current context style
//! (`Text_20_body`, `List_20_Contents`, `Quotations`, table cell styles).

use std::sync::OnceLock;

use quick_xml::encoding::Decoder;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::config::ExportConfig;
use crate::error::{OdtError, Result};
use crate::library::{LIST_STYLE_NAME, NUMBERING_STYLE_NAME};
use crate::xml::escape_xml;

/// Default paragraph style
pub const TEXT_BODY: &str = "Text_20_body";
const LIST_CONTENTS: &str = "List_20_Contents";
const QUOTATIONS: &str = "Quotations";
const PREFORMATTED: &str = "Preformatted_20_Text";
const HORIZONTAL_LINE: &str = "Horizontal_20_Line";
const TABLE_STYLE: &str = "Table_20_default";
const TABLE_CELL_STYLE: &str = "Table_20_default.cell";
const TABLE_CONTENTS: &str = "Table_20_Contents";
const TABLE_HEADING: &str = "Table_20_Heading";
const GRAPHICS: &str = "Graphics";

/// Elements whose content never reaches the document
const DROPPED: &[&str] = &["head", "script", "style", "title", "noscript"];

/// Block containers rendered in the current paragraph context
const CONTAINERS: &[&str] = &[
    "html", "body", "div", "p", "dt", "dd", "dl", "li", "section", "article", "header",
    "footer", "nav", "main", "aside", "center", "form", "fieldset", "address", "figure",
    "figcaption", "caption",
];

/// Inline elements, collected into the surrounding paragraph
const INLINE: &[&str] = &[
    "a", "abbr", "acronym", "b", "big", "br", "cite", "code", "del", "dfn", "em", "font", "i",
    "img", "ins", "kbd", "label", "q", "s", "samp", "small", "span", "strike", "strong", "sub",
    "sup", "tt", "u", "var",
];

/// Options of one transformation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions {
    /// Absolute URL of the site root, used to resolve relative links
    pub root_url: String,
    /// Levels subtracted from `h1`–`h6` (the result is at least 1)
    pub heading_minus_level: u8,
    /// Highest `Table{n}` number already used in the target document
    pub last_table: usize,
    /// Highest `Image{n}` number already used in the target document
    pub last_image: usize,
}

impl TransformOptions {
    /// Options matching an export configuration
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            root_url: format!("{}/", config.base_url.trim_end_matches('/')),
            heading_minus_level: config.heading_minus_level,
            ..Default::default()
        }
    }

    /// Continue table and frame numbering after the names in `content`
    pub fn numbered_after(mut self, content: &str) -> Self {
        static TABLE_RE: OnceLock<Regex> = OnceLock::new();
        static IMAGE_RE: OnceLock<Regex> = OnceLock::new();
        let table_re =
            TABLE_RE.get_or_init(|| Regex::new(r#"\btable:name="Table(\d+)""#).unwrap());
        let image_re =
            IMAGE_RE.get_or_init(|| Regex::new(r#"\bdraw:name="Image(\d+)""#).unwrap());

        self.last_table = self.last_table.max(highest_number(table_re, content));
        self.last_image = self.last_image.max(highest_number(image_re, content));
        self
    }
}

fn highest_number(re: &Regex, content: &str) -> usize {
    re.captures_iter(content)
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

/// Transform an XHTML document into ODT body markup
pub fn transform(xhtml: &str, options: &TransformOptions) -> Result<String> {
    let roots = parse(xhtml)?;
    let body = roots
        .iter()
        .find_map(|node| node.find("body"))
        .map(|body| body.children.as_slice())
        .unwrap_or(roots.as_slice());

    let mut renderer = Renderer::new(options);
    let mut out = String::new();
    renderer.blocks(body, TEXT_BODY, &mut out);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Element {
    /// Lowercase local name
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Node {
    fn find(&self, name: &str) -> Option<&Element> {
        match self {
            Node::Element(el) if el.name == name => Some(el),
            Node::Element(el) => el.children.iter().find_map(|c| c.find(name)),
            Node::Text(_) => None,
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Node::Text(text) if text.trim_matches(|c: char| c.is_ascii_whitespace()).is_empty())
    }
}

impl Element {
    fn from_start(e: &BytesStart, decoder: Decoder) -> Result<Self> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| OdtError::MalformedMarkup(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_ascii_lowercase();
            let value = attr
                .decode_and_unescape_value_with(decoder, resolve_html_entity)
                .map_err(|e| OdtError::MalformedMarkup(e.to_string()))?;
            attributes.push((key, value.into_owned()));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn parse(xhtml: &str) -> Result<Vec<Node>> {
    let mut reader = Reader::from_str(xhtml);
    reader.config_mut().check_end_names = true;

    let mut stack: Vec<Element> = Vec::new();
    let mut roots: Vec<Node> = Vec::new();

    fn attach(stack: &mut [Element], roots: &mut Vec<Node>, node: Node) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    loop {
        let event = reader.read_event().map_err(|e| {
            OdtError::MalformedMarkup(format!("{} at byte {}", e, reader.buffer_position()))
        })?;
        match event {
            Event::Start(e) => stack.push(Element::from_start(&e, reader.decoder())?),
            Event::Empty(e) => {
                let element = Element::from_start(&e, reader.decoder())?;
                attach(&mut stack, &mut roots, Node::Element(element));
            }
            Event::End(e) => {
                let element = stack.pop().ok_or_else(|| {
                    OdtError::MalformedMarkup(format!(
                        "unexpected </{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    ))
                })?;
                attach(&mut stack, &mut roots, Node::Element(element));
            }
            Event::Text(e) => {
                if stack.is_empty() {
                    continue;
                }
                let text = e
                    .unescape_with(resolve_html_entity)
                    .map_err(|e| OdtError::MalformedMarkup(e.to_string()))?;
                attach(&mut stack, &mut roots, Node::Text(text.into_owned()));
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                attach(&mut stack, &mut roots, Node::Text(text));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(OdtError::MalformedMarkup(format!(
            "unclosed element <{}>",
            open.name
        )));
    }
    if !roots.iter().any(|n| matches!(n, Node::Element(_))) {
        return Err(OdtError::MalformedMarkup("no root element".to_string()));
    }
    Ok(roots)
}

/// Named HTML entities that survive tidying, plus the XML ones
fn resolve_html_entity(name: &str) -> Option<&'static str> {
    let text = match name {
        "nbsp" => "\u{a0}",
        "shy" => "\u{ad}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "deg" => "\u{b0}",
        "sect" => "\u{a7}",
        "para" => "\u{b6}",
        "middot" => "\u{b7}",
        "times" => "\u{d7}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "bull" => "\u{2022}",
        "euro" => "\u{20ac}",
        "larr" => "\u{2190}",
        "rarr" => "\u{2192}",
        _ => return resolve_predefined_entity(name),
    };
    Some(text)
}

/// Line state while rendering preformatted text
#[derive(Debug, Clone, Copy)]
struct Preformatted {
    line_start: bool,
}

struct Renderer<'o> {
    options: &'o TransformOptions,
    list_depth: usize,
    tables: usize,
    frames: usize,
    pre: Option<Preformatted>,
}

impl<'o> Renderer<'o> {
    fn new(options: &'o TransformOptions) -> Self {
        Self {
            options,
            list_depth: 0,
            tables: options.last_table,
            frames: options.last_image,
            pre: None,
        }
    }

    /// Render nodes at block level, wrapping inline runs in `style` paragraphs
    fn blocks(&mut self, nodes: &[Node], style: &str, out: &mut String) {
        let mut run: Vec<&Node> = Vec::new();
        self.collect_blocks(nodes, style, &mut run, out);
        self.flush(&run, style, out);
    }

    fn collect_blocks<'n>(
        &mut self,
        nodes: &'n [Node],
        style: &str,
        run: &mut Vec<&'n Node>,
        out: &mut String,
    ) {
        for node in nodes {
            let Node::Element(el) = node else {
                run.push(node);
                continue;
            };
            let name = el.name.as_str();
            if DROPPED.contains(&name) {
                continue;
            }
            if INLINE.contains(&name) {
                run.push(node);
                continue;
            }

            if let Some(level) = heading_level(name) {
                self.flush_run(run, style, out);
                self.heading(el, level, out);
            } else if CONTAINERS.contains(&name) {
                self.flush_run(run, style, out);
                self.blocks(&el.children, style, out);
            } else {
                match name {
                    "ul" | "ol" => {
                        self.flush_run(run, style, out);
                        self.list(el, out);
                    }
                    "pre" => {
                        self.flush_run(run, style, out);
                        self.preformatted(el, out);
                    }
                    "blockquote" => {
                        self.flush_run(run, style, out);
                        self.blocks(&el.children, QUOTATIONS, out);
                    }
                    "hr" => {
                        self.flush_run(run, style, out);
                        out.push_str(&format!(r#"<text:p text:style-name="{}"/>"#, HORIZONTAL_LINE));
                    }
                    "table" => {
                        self.flush_run(run, style, out);
                        self.table(el, style, out);
                    }
                    // Unknown elements are transparent
                    _ => self.collect_blocks(&el.children, style, run, out),
                }
            }
        }
    }

    fn flush_run(&mut self, run: &mut Vec<&Node>, style: &str, out: &mut String) {
        self.flush(run, style, out);
        run.clear();
    }

    fn flush(&mut self, run: &[&Node], style: &str, out: &mut String) {
        if run.iter().all(|n| n.is_blank()) {
            return;
        }
        let mut content = String::new();
        for node in run {
            self.inline(node, &mut content);
        }
        let content = content.trim_matches(' ');
        if content.is_empty() {
            return;
        }
        out.push_str(&format!(
            r#"<text:p text:style-name="{}">{}</text:p>"#,
            style, content
        ));
    }

    fn heading(&mut self, el: &Element, level: u8, out: &mut String) {
        let level = level
            .saturating_sub(self.options.heading_minus_level)
            .max(1);
        let mut content = String::new();
        for child in &el.children {
            self.inline(child, &mut content);
        }
        out.push_str(&format!(
            r#"<text:h text:style-name="Heading_20_{level}" text:outline-level="{level}">{}</text:h>"#,
            content.trim_matches(' '),
            level = level
        ));
    }

    fn list(&mut self, el: &Element, out: &mut String) {
        if self.list_depth == 0 {
            let style = if el.name == "ol" {
                NUMBERING_STYLE_NAME
            } else {
                LIST_STYLE_NAME
            };
            out.push_str(&format!(r#"<text:list text:style-name="{}">"#, style));
        } else {
            out.push_str("<text:list>");
        }
        self.list_depth += 1;

        for child in &el.children {
            if child.is_blank() {
                continue;
            }
            out.push_str("<text:list-item>");
            match child {
                Node::Element(item) if item.name == "ul" || item.name == "ol" => {
                    self.list(item, out);
                }
                Node::Element(item) if item.name == "li" => {
                    self.cell_blocks(&item.children, LIST_CONTENTS, out);
                }
                other => self.cell_blocks(std::slice::from_ref(other), LIST_CONTENTS, out),
            }
            out.push_str("</text:list-item>");
        }

        self.list_depth -= 1;
        out.push_str("</text:list>");
    }

    /// Block content that must hold at least one paragraph
    fn cell_blocks(&mut self, nodes: &[Node], style: &str, out: &mut String) {
        let start = out.len();
        self.blocks(nodes, style, out);
        if out.len() == start {
            out.push_str(&format!(r#"<text:p text:style-name="{}"/>"#, style));
        }
    }

    fn preformatted(&mut self, el: &Element, out: &mut String) {
        let outer = self.pre.replace(Preformatted { line_start: true });
        let mut content = String::new();
        for child in &el.children {
            self.inline(child, &mut content);
        }
        self.pre = outer;

        while let Some(stripped) = content.strip_suffix("<text:line-break/>") {
            content.truncate(stripped.len());
        }
        out.push_str(&format!(
            r#"<text:p text:style-name="{}">{}</text:p>"#,
            PREFORMATTED, content
        ));
    }

    fn table(&mut self, el: &Element, style: &str, out: &mut String) {
        let mut header_rows: Vec<&Element> = Vec::new();
        let mut body_rows: Vec<&Element> = Vec::new();
        let mut captions: Vec<&Element> = Vec::new();

        for child in &el.children {
            let Node::Element(section) = child else {
                continue;
            };
            match section.name.as_str() {
                "tr" => body_rows.push(section),
                "thead" => header_rows.extend(rows_of(section)),
                "tbody" | "tfoot" => body_rows.extend(rows_of(section)),
                "caption" => captions.push(section),
                _ => {}
            }
        }

        for caption in captions {
            self.blocks(&caption.children, style, out);
        }

        let columns = header_rows
            .iter()
            .chain(body_rows.iter())
            .map(|row| cells_of(row).map(|(_, span)| span).sum::<usize>())
            .max()
            .unwrap_or(0)
            .max(1);

        self.tables += 1;
        out.push_str(&format!(
            r#"<table:table table:name="Table{}" table:style-name="{}"><table:table-column table:number-columns-repeated="{}"/>"#,
            self.tables, TABLE_STYLE, columns
        ));
        if !header_rows.is_empty() {
            out.push_str("<table:table-header-rows>");
            for row in &header_rows {
                self.table_row(row, columns, out);
            }
            out.push_str("</table:table-header-rows>");
        }
        for row in &body_rows {
            self.table_row(row, columns, out);
        }
        if header_rows.is_empty() && body_rows.is_empty() {
            out.push_str("<table:table-row>");
            self.table_cell(&[], TABLE_CONTENTS, 1, out);
            out.push_str("</table:table-row>");
        }
        out.push_str("</table:table>");
    }

    fn table_row(&mut self, row: &Element, columns: usize, out: &mut String) {
        out.push_str("<table:table-row>");
        let mut used = 0;
        for (cell, span) in cells_of(row) {
            let style = if cell.name == "th" {
                TABLE_HEADING
            } else {
                TABLE_CONTENTS
            };
            self.table_cell(&cell.children, style, span, out);
            used += span;
        }
        for _ in used..columns {
            self.table_cell(&[], TABLE_CONTENTS, 1, out);
        }
        out.push_str("</table:table-row>");
    }

    fn table_cell(&mut self, nodes: &[Node], style: &str, span: usize, out: &mut String) {
        out.push_str(&format!(
            r#"<table:table-cell table:style-name="{}" office:value-type="string""#,
            TABLE_CELL_STYLE
        ));
        if span > 1 {
            out.push_str(&format!(r#" table:number-columns-spanned="{}""#, span));
        }
        out.push('>');
        self.cell_blocks(nodes, style, out);
        out.push_str("</table:table-cell>");
        for _ in 1..span {
            out.push_str("<table:covered-table-cell/>");
        }
    }

    /// Render a node inside a paragraph
    fn inline(&mut self, node: &Node, out: &mut String) {
        let el = match node {
            Node::Text(text) => {
                self.text(text, out);
                return;
            }
            Node::Element(el) => el,
        };

        match el.name.as_str() {
            name if DROPPED.contains(&name) => {}
            "strong" | "b" => self.span("Strong_20_Emphasis", el, out),
            "em" | "i" => self.span("Emphasis", el, out),
            "code" | "tt" | "kbd" | "samp" => self.span("Source_20_Text", el, out),
            "sub" => self.span("sub", el, out),
            "sup" => self.span("sup", el, out),
            "del" | "s" | "strike" => self.span("strike", el, out),
            "u" | "ins" => self.span("underline", el, out),
            "br" => {
                out.push_str("<text:line-break/>");
                if let Some(pre) = self.pre.as_mut() {
                    pre.line_start = true;
                }
            }
            "a" => match el.attr("href") {
                Some(href) => {
                    let href = resolve_href(&self.options.root_url, href);
                    out.push_str(&format!(
                        r#"<text:a xlink:type="simple" xlink:href="{}">"#,
                        escape_xml(&href)
                    ));
                    self.inline_children(el, out);
                    out.push_str("</text:a>");
                }
                None => self.inline_children(el, out),
            },
            "img" => self.image(el, out),
            _ => self.inline_children(el, out),
        }
    }

    fn inline_children(&mut self, el: &Element, out: &mut String) {
        for child in &el.children {
            self.inline(child, out);
        }
    }

    fn span(&mut self, style: &str, el: &Element, out: &mut String) {
        out.push_str(&format!(r#"<text:span text:style-name="{}">"#, style));
        self.inline_children(el, out);
        out.push_str("</text:span>");
    }

    fn image(&mut self, el: &Element, out: &mut String) {
        let Some(src) = el.attr("src") else {
            return;
        };
        self.frames += 1;
        out.push_str(&format!(
            r#"<draw:frame draw:style-name="{}" draw:name="Image{}" text:anchor-type="as-char""#,
            GRAPHICS, self.frames
        ));
        if let Some(width) = el.attr("width").and_then(odf_length) {
            out.push_str(&format!(r#" svg:width="{}""#, width));
        }
        if let Some(height) = el.attr("height").and_then(odf_length) {
            out.push_str(&format!(r#" svg:height="{}""#, height));
        }
        out.push_str(&format!(
            r#"><draw:image xlink:href="{}" xlink:type="simple" xlink:show="embed" xlink:actuate="onLoad"/></draw:frame>"#,
            escape_xml(src)
        ));
        if let Some(pre) = self.pre.as_mut() {
            pre.line_start = false;
        }
    }

    fn text(&mut self, text: &str, out: &mut String) {
        match self.pre.as_mut() {
            Some(pre) => push_preformatted(text, pre, out),
            None => push_collapsed(text, out),
        }
    }
}

fn heading_level(name: &str) -> Option<u8> {
    match name.as_bytes() {
        [b'h', d @ b'1'..=b'6'] => Some(d - b'0'),
        _ => None,
    }
}

fn rows_of(section: &Element) -> impl Iterator<Item = &Element> {
    section.children.iter().filter_map(|child| match child {
        Node::Element(row) if row.name == "tr" => Some(row),
        _ => None,
    })
}

/// Cells of a row with their column span
fn cells_of(row: &Element) -> impl Iterator<Item = (&Element, usize)> {
    row.children.iter().filter_map(|child| match child {
        Node::Element(cell) if cell.name == "td" || cell.name == "th" => {
            let span = cell
                .attr("colspan")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(1)
                .max(1);
            Some((cell, span))
        }
        _ => None,
    })
}

/// Turn an HTML size attribute into an ODF length
fn odf_length(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.ends_with('%') {
        return None;
    }
    if value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Some(format!("{}px", value));
    }
    let unit_start = value.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = value.split_at(unit_start);
    let known = matches!(unit, "cm" | "mm" | "in" | "pt" | "pc" | "px");
    (known && number.parse::<f64>().is_ok()).then(|| value.to_string())
}

/// Resolve a link target against the site root
fn resolve_href(root_url: &str, href: &str) -> String {
    let href = href.trim();
    let has_scheme = href
        .split_once(':')
        .is_some_and(|(scheme, _)| {
            !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
        });
    if root_url.is_empty() || has_scheme || href.starts_with('#') || href.starts_with("//") {
        return href.to_string();
    }
    if let Some(path) = href.strip_prefix('/') {
        return format!("{}/{}", origin(root_url), path);
    }
    format!("{}/{}", root_url.trim_end_matches('/'), href)
}

/// `scheme://host[:port]` part of an absolute URL
fn origin(url: &str) -> &str {
    match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            match rest.find('/') {
                Some(j) => &url[..i + 3 + j],
                None => url,
            }
        }
        None => url.trim_end_matches('/'),
    }
}

fn push_collapsed(text: &str, out: &mut String) {
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
            continue;
        }
        in_space = false;
        push_escaped(c, out);
    }
}

fn push_preformatted(text: &str, pre: &mut Preformatted, out: &mut String) {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {}
            '\n' => {
                out.push_str("<text:line-break/>");
                pre.line_start = true;
            }
            '\t' => {
                out.push_str("<text:tab/>");
                pre.line_start = false;
            }
            ' ' => {
                let mut count = 1;
                while chars.next_if_eq(&' ').is_some() {
                    count += 1;
                }
                if pre.line_start {
                    push_spaces(count, out);
                } else {
                    out.push(' ');
                    push_spaces(count - 1, out);
                }
                pre.line_start = false;
            }
            c => {
                push_escaped(c, out);
                pre.line_start = false;
            }
        }
    }
}

fn push_spaces(count: usize, out: &mut String) {
    match count {
        0 => {}
        1 => out.push_str("<text:s/>"),
        n => out.push_str(&format!(r#"<text:s text:c="{}"/>"#, n)),
    }
}

fn push_escaped(c: char, out: &mut String) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        c => out.push(c),
    }
}
