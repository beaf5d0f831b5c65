//! Export pipeline
//!
//! [`OdtExporter`] turns one rendered page into an ODT document: it opens
//! the template, cleans up the XHTML, runs it through a
//! [`DocumentCompiler`] and serializes the result.
//!
//! ```no_run
//! use odtexport::{DirectoryResources, ExportConfig, OdtExporter, StyleLibrary};
//!
//! let library = StyleLibrary::load("styles")?;
//! let config = ExportConfig::load("odtexport.toml")?;
//! let resources = DirectoryResources::new().with_attachments("attachments");
//!
//! let xhtml = std::fs::read_to_string("WikiStart.xhtml")?;
//! let odt = OdtExporter::new(&library, &config, &resources).export("template.odt", &xhtml)?;
//! std::fs::write("WikiStart.odt", odt)?;
//! # Ok::<(), odtexport::OdtError>(())
//! ```

use std::io::Cursor;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::archive::OdtPackage;
use crate::compiler::DocumentCompiler;
use crate::config::ExportConfig;
use crate::error::Result;
use crate::image::{HttpFetcher, ImageFetcher, SiteResources};
use crate::library::StyleLibrary;

/// Media type of the produced documents
pub const ODT_MIME_TYPE: &str = "application/vnd.oasis.opendocument.text";

/// Wiki macros removed before rendering
const REMOVED_MACROS: &[&str] = &["PageOutline", "TracGuideToc"];

/// Converts rendered pages into ODT documents
pub struct OdtExporter<'a> {
    library: &'a StyleLibrary,
    config: &'a ExportConfig,
    resources: &'a dyn SiteResources,
    fetcher: Option<&'a dyn ImageFetcher>,
}

impl<'a> OdtExporter<'a> {
    /// Create an exporter downloading remote images over HTTP
    pub fn new(
        library: &'a StyleLibrary,
        config: &'a ExportConfig,
        resources: &'a dyn SiteResources,
    ) -> Self {
        Self {
            library,
            config,
            resources,
            fetcher: None,
        }
    }

    /// Use a custom fetcher for remote images
    pub fn with_fetcher(mut self, fetcher: &'a dyn ImageFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Export a page using the template at `template`
    pub fn export<P: AsRef<Path>>(&self, template: P, xhtml: &str) -> Result<Vec<u8>> {
        let template = template.as_ref();
        log::debug!("Using template {}", template.display());
        self.compile(OdtPackage::open(template)?, xhtml)
    }

    /// Export a page using an in-memory template
    pub fn export_bytes(&self, template: &[u8], xhtml: &str) -> Result<Vec<u8>> {
        self.compile(OdtPackage::from_reader(Cursor::new(template))?, xhtml)
    }

    fn compile(&self, package: OdtPackage, xhtml: &str) -> Result<Vec<u8>> {
        self.config.validate()?;
        let http;
        let fetcher: &dyn ImageFetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                http = HttpFetcher::new(self.config.images.remote_timeout())?;
                &http
            }
        };

        let xhtml = prepare_xhtml(xhtml);
        let mut compiler =
            DocumentCompiler::new(package, self.library, self.config, self.resources, fetcher);
        compiler.import_xhtml(&xhtml)?;
        let odt = compiler.finalize()?;
        log::info!("Exported document: {} bytes", odt.len());
        Ok(odt)
    }
}

/// Clean up tidied XHTML before it is transformed
///
/// Removes external link icons, writes non-breaking spaces as `&#160;` and
/// drops the newline tidy puts right after `<pre>`.
pub fn prepare_xhtml(xhtml: &str) -> String {
    static ICON_RE: OnceLock<Regex> = OnceLock::new();
    static PRE_RE: OnceLock<Regex> = OnceLock::new();
    let icon_re = ICON_RE.get_or_init(|| Regex::new(r#"<span class="icon">[^<]*</span>"#).unwrap());
    let pre_re = PRE_RE.get_or_init(|| Regex::new(r"(<pre[^>]*>)\r?\n").unwrap());

    let xhtml = icon_re.replace_all(xhtml, "");
    let xhtml = xhtml.replace('\u{a0}', "&#160;").replace("&nbsp;", "&#160;");
    pre_re.replace_all(&xhtml, "$1").into_owned()
}

/// Prepare wiki text of `page` for rendering
///
/// Drops the outline macros, which make no sense in a printed document, and
/// qualifies `[[Image(file)]]` with the page name so attachments resolve.
pub fn strip_wiki_macros(text: &str, page: &str) -> String {
    static IMAGE_RE: OnceLock<Regex> = OnceLock::new();
    let image_re = IMAGE_RE.get_or_init(|| Regex::new(r"\[\[Image\(([^:)]+)\)\]\]").unwrap());

    let mut text = text.to_string();
    for name in REMOVED_MACROS {
        text = text.replace(&format!("[[{}]]", name), "");
    }
    image_re
        .replace_all(&text, |caps: &regex::Captures| {
            format!("[[Image({}:{})]]", page, &caps[1])
        })
        .into_owned()
}
