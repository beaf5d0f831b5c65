//! Image resolution and embedding
//!
//! Every `<img>` element of the rendered page is classified by its `src`:
//!
//! 1. `{base}/raw-attachment/{realm}/{parent…}/{file}`: a wiki attachment
//! 2. `{base}/chrome/{prefix}/{path}`: a theme asset served from an htdocs
//!    directory
//! 3. `http(s)://…`: a remote image, downloaded when enabled
//!
//! A local lookup that fails falls back to downloading the same URL. The
//! resolved file is copied into the package's `Pictures/` directory and the
//! tag is rewritten to point at it, with its print size in centimeters.
//!
//! # Unit Conversions
//!
//! `size_cm = pixels / dpi * 2.54`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::archive::{OdtPackage, PICTURES_DIR};
use crate::config::ImageSettings;
use crate::error::{OdtError, Result};
use crate::xml::{element_name, into_string, write_event};

/// Centimeters per inch
pub const INCH_TO_CM: f64 = 2.54;

/// Length of the digest prefix used for embedded picture names
const DIGEST_NAME_LEN: usize = 32;

/// Convert a pixel length to centimeters at the given resolution
pub fn pixels_to_cm(pixels: u32, dpi: u32) -> f64 {
    pixels as f64 / dpi as f64 * INCH_TO_CM
}

/// Origin of an image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    /// Wiki attachment: realm plus `parent…/file` path
    Attachment { realm: String, path: String },
    /// Theme asset below `/chrome/`
    ThemeAsset { path: String },
    /// Absolute http(s) URL
    Remote,
    /// Anything else, left untouched
    Other,
}

/// Site lookups the resolver depends on
pub trait SiteResources {
    /// Local path of an attachment, if the site stores one
    fn attachment_path(&self, realm: &str, parent_id: &str, filename: &str) -> Option<PathBuf>;

    /// Directories serving theme assets under the given prefix
    fn theme_asset_dirs(&self, prefix: &str) -> Vec<PathBuf>;
}

/// A site without local attachments or theme assets
///
/// Every image is treated as remote.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSiteResources;

impl SiteResources for NoSiteResources {
    fn attachment_path(&self, _realm: &str, _parent_id: &str, _filename: &str) -> Option<PathBuf> {
        None
    }

    fn theme_asset_dirs(&self, _prefix: &str) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Site resources backed by plain directories
///
/// Attachments live at `{attachments}/{realm}/{parent}/{file}`; theme assets
/// are served from one or more directories per prefix.
#[derive(Debug, Clone, Default)]
pub struct DirectoryResources {
    attachments: Option<PathBuf>,
    htdocs: Vec<(String, PathBuf)>,
}

impl DirectoryResources {
    /// Resources with no attachments and no theme directories
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attachment root directory
    pub fn with_attachments(mut self, dir: impl Into<PathBuf>) -> Self {
        self.attachments = Some(dir.into());
        self
    }

    /// Register a theme asset directory for a prefix
    pub fn with_htdocs(mut self, prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.htdocs.push((prefix.into(), dir.into()));
        self
    }
}

impl SiteResources for DirectoryResources {
    fn attachment_path(&self, realm: &str, parent_id: &str, filename: &str) -> Option<PathBuf> {
        let root = self.attachments.as_ref()?;
        let mut path = root.join(realm);
        for segment in parent_id.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(filename);
        Some(path)
    }

    fn theme_asset_dirs(&self, prefix: &str) -> Vec<PathBuf> {
        self.htdocs
            .iter()
            .filter(|(p, _)| p == prefix)
            .map(|(_, dir)| dir.clone())
            .collect()
    }
}

/// Downloads remote images
pub trait ImageFetcher {
    /// Write the body found at `url` into `dest`
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<()>;
}

/// [`ImageFetcher`] over blocking HTTP
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher; `None` means no request timeout
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<()> {
        log::debug!("Downloading image: {}", url);
        let mut response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(OdtError::Fetch(format!("{} returned {}", url, status)));
        }
        response.copy_to(dest)?;
        Ok(())
    }
}

/// URL patterns derived from the site's base URL
#[derive(Debug, Clone)]
struct UrlPatterns {
    attachment: Regex,
    theme: Regex,
    remote: Regex,
}

impl UrlPatterns {
    fn new(base_url: &str) -> Result<Self> {
        let base = regex::escape(base_url.trim_end_matches('/'));
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| OdtError::Config(format!("invalid base URL: {}", e)))
        };
        Ok(Self {
            attachment: compile(format!("^{}/raw-attachment/([^/]+)(?:/(.*))?$", base))?,
            theme: compile(format!("^{}/chrome/(.+)$", base))?,
            remote: compile("^https?://".to_string())?,
        })
    }

    fn classify(&self, src: &str) -> ImageOrigin {
        if let Some(caps) = self.attachment.captures(src) {
            return ImageOrigin::Attachment {
                realm: caps[1].to_string(),
                path: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            };
        }
        if let Some(caps) = self.theme.captures(src) {
            return ImageOrigin::ThemeAsset {
                path: caps[1].to_string(),
            };
        }
        if self.remote.is_match(src) {
            return ImageOrigin::Remote;
        }
        ImageOrigin::Other
    }
}

/// Result of embedding one image into the package
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    /// Package-relative path, e.g. `Pictures/0a1b….png`
    pub src: String,
    /// Print size in centimeters, when the pixel size could be read
    pub size_cm: Option<(f64, f64)>,
}

/// Rewrites `<img>` references into embedded package pictures
pub struct ImageResolver<'a> {
    package: &'a OdtPackage,
    settings: &'a ImageSettings,
    resources: &'a dyn SiteResources,
    fetcher: &'a dyn ImageFetcher,
    patterns: UrlPatterns,
}

impl<'a> ImageResolver<'a> {
    /// Create a resolver embedding into `package`
    pub fn new(
        package: &'a OdtPackage,
        settings: &'a ImageSettings,
        base_url: &str,
        resources: &'a dyn SiteResources,
        fetcher: &'a dyn ImageFetcher,
    ) -> Result<Self> {
        Ok(Self {
            package,
            settings,
            resources,
            fetcher,
            patterns: UrlPatterns::new(base_url)?,
        })
    }

    /// Classify an image source
    pub fn classify(&self, src: &str) -> ImageOrigin {
        self.patterns.classify(src)
    }

    /// Rewrite every `<img>` element of an XHTML document
    pub fn rewrite(&self, xhtml: &str) -> Result<String> {
        let mut reader = Reader::from_str(xhtml);
        let mut writer = Writer::new(Vec::new());

        loop {
            let event = reader
                .read_event()
                .map_err(|e| OdtError::MalformedMarkup(e.to_string()))?;
            match event {
                Event::Start(e) if e.local_name().as_ref() == b"img" => {
                    let img = self.rewrite_img(&e)?.unwrap_or(e);
                    write_event(&mut writer, Event::Start(img))?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"img" => {
                    let img = self.rewrite_img(&e)?.unwrap_or(e);
                    write_event(&mut writer, Event::Empty(img))?;
                }
                Event::Eof => break,
                event => write_event(&mut writer, event)?,
            }
        }

        into_string(writer)
    }

    /// Build the replacement tag, or `None` to keep the original
    fn rewrite_img(&self, e: &BytesStart) -> Result<Option<BytesStart<'static>>> {
        let mut src = None;
        for attr in e.attributes() {
            let attr = attr.map_err(|e| OdtError::MalformedMarkup(e.to_string()))?;
            if attr.key.as_ref() == b"src" {
                let value = attr
                    .unescape_value()
                    .map_err(|e| OdtError::MalformedMarkup(e.to_string()))?;
                src = Some(value.into_owned());
            }
        }
        let Some(src) = src else {
            return Ok(None);
        };
        let Some(embedded) = self.resolve(&src)? else {
            return Ok(None);
        };

        let sized = embedded.size_cm.is_some();
        let mut img = BytesStart::new(element_name(e));
        for attr in e.attributes().filter_map(|a| a.ok()) {
            match attr.key.as_ref() {
                b"src" => continue,
                b"width" | b"height" if sized => continue,
                _ => img.push_attribute(attr),
            }
        }
        img.push_attribute(("src", embedded.src.as_str()));
        if let Some((width, height)) = embedded.size_cm {
            img.push_attribute(("width", format!("{}cm", width).as_str()));
            img.push_attribute(("height", format!("{}cm", height).as_str()));
        }
        Ok(Some(img))
    }

    /// Resolve one source URL, following the fallback chain
    pub fn resolve(&self, src: &str) -> Result<Option<EmbeddedImage>> {
        match self.classify(src) {
            ImageOrigin::Attachment { realm, path } => {
                log::debug!("Handling attached image: {}", src);
                match self.attachment_file(&realm, &path) {
                    Some(local) => self.embed_image(&local, &file_name_hint(&local)).map(Some),
                    None => self.resolve_remote(src),
                }
            }
            ImageOrigin::ThemeAsset { path } => {
                log::debug!("Handling theme image: {}", src);
                match self.theme_file(&path) {
                    Some(local) => self.embed_image(&local, &file_name_hint(&local)).map(Some),
                    None => self.resolve_remote(src),
                }
            }
            ImageOrigin::Remote => self.resolve_remote(src),
            ImageOrigin::Other => Ok(None),
        }
    }

    fn attachment_file(&self, realm: &str, path: &str) -> Option<PathBuf> {
        let (parent_id, filename) = path.rsplit_once('/')?;
        if filename.is_empty() {
            return None;
        }
        let local = self.resources.attachment_path(realm, parent_id, filename)?;
        if local.is_file() {
            Some(local)
        } else {
            log::debug!("Attachment {} not found locally", local.display());
            None
        }
    }

    fn theme_file(&self, path: &str) -> Option<PathBuf> {
        let Some(normalized) = normalize_url_path(path) else {
            log::warn!("Rejecting theme asset path outside its root: {}", path);
            return None;
        };
        let (prefix, relative) = normalized.split_once('/')?;
        self.resources
            .theme_asset_dirs(prefix)
            .iter()
            .find_map(|dir| resolve_within(dir, relative))
    }

    fn resolve_remote(&self, src: &str) -> Result<Option<EmbeddedImage>> {
        if !self.patterns.remote.is_match(src) {
            return Ok(None);
        }
        if !self.settings.get_remote_images {
            log::debug!("Remote images disabled, keeping {}", src);
            return Ok(None);
        }

        log::debug!("Handling remote image: {}", src);
        // Deleted when dropped, on success and on error alike
        let mut download = NamedTempFile::new()?;
        self.fetcher.fetch(src, download.as_file_mut())?;
        download.as_file_mut().flush()?;
        self.embed_image(download.path(), url_name_hint(src))
            .map(Some)
    }

    /// Copy a local image into `Pictures/` and compute its print size
    ///
    /// `name_hint` only contributes the file extension; the stored name is
    /// derived from the image bytes, so distinct images never collide and
    /// identical ones are stored once.
    pub fn embed_image(&self, path: &Path, name_hint: &str) -> Result<EmbeddedImage> {
        if !path.exists() {
            return Err(OdtError::ImageNotFound(path.to_path_buf()));
        }
        log::debug!("Importing image: {}", path.display());

        let bytes = fs::read(path)?;
        let name = embedded_name(&bytes, name_hint);
        let target = self.package.pictures_dir()?.join(&name);
        if !target.exists() {
            fs::write(&target, &bytes)?;
        }

        let size_cm = match read_dimensions(path) {
            Ok((width, height)) => {
                log::debug!("Detected size: {}px x {}px", width, height);
                let dpi = self.settings.dpi;
                Some((pixels_to_cm(width, dpi), pixels_to_cm(height, dpi)))
            }
            Err(e) => {
                log::warn!("Failed to identify image {}: {}", path.display(), e);
                None
            }
        };

        Ok(EmbeddedImage {
            src: format!("{}/{}", PICTURES_DIR, name),
            size_cm,
        })
    }
}

/// Read the pixel size of an image file, sniffing its format
fn read_dimensions(path: &Path) -> std::result::Result<(u32, u32), image::ImageError> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    reader.into_dimensions()
}

/// Picture name: digest prefix of the content plus the hint's extension
fn embedded_name(bytes: &[u8], name_hint: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    let stem = &digest[..DIGEST_NAME_LEN];
    let extension = Path::new(name_hint)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

fn file_name_hint(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Last path segment of a URL, without query or fragment
fn url_name_hint(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Collapse `.` and `..` segments and duplicate slashes of a URL path
///
/// Returns `None` when `..` would climb above the first segment.
pub fn normalize_url_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

/// Resolve `relative` inside `dir`, accepting only files strictly below it
pub fn resolve_within(dir: &Path, relative: &str) -> Option<PathBuf> {
    let root = dir.canonicalize().ok()?;
    let candidate = root.join(relative).canonicalize().ok()?;
    if candidate == root || !candidate.starts_with(&root) {
        log::warn!(
            "Rejecting {} outside of {}",
            candidate.display(),
            root.display()
        );
        return None;
    }
    candidate.is_file().then_some(candidate)
}
