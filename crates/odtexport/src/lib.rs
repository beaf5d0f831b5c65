//! # odtexport
//!
//! Wiki page export to OpenDocument Text.
//!
//! This crate turns the rendered XHTML of a wiki page into an ODT document
//! based on a template:
//! - Unpack the template package and rewrite only `content.xml` and
//!   `styles.xml`
//! - Embed attachments, theme assets and remote images with print sizes
//! - Transform XHTML into ODT body markup
//! - Merge the styles and fonts the body uses from a style library
//!
//! ## Example
//!
//! ```no_run
//! use odtexport::{ExportConfig, NoSiteResources, OdtExporter, StyleLibrary};
//!
//! let library = StyleLibrary::bundled();
//! let config = ExportConfig::default();
//! let odt = OdtExporter::new(&library, &config, &NoSiteResources)
//!     .export("template.odt", "<html><body><p>Hello</p></body></html>")?;
//! # Ok::<(), odtexport::OdtError>(())
//! ```

pub mod archive;
pub mod compiler;
pub mod config;
pub mod error;
pub mod export;
pub mod image;
pub mod library;
pub mod transform;
mod xml;

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;

pub use crate::archive::OdtPackage;
pub use crate::compiler::{insert_content, merge_styles, DocumentCompiler};
pub use crate::config::{ExportConfig, ImageSettings};
pub use crate::error::{OdtError, Result};
pub use crate::export::{prepare_xhtml, strip_wiki_macros, OdtExporter, ODT_MIME_TYPE};
pub use crate::image::{
    DirectoryResources, EmbeddedImage, HttpFetcher, ImageFetcher, ImageOrigin, ImageResolver,
    NoSiteResources, SiteResources,
};
pub use crate::library::{FontDefinition, PendingMerge, StyleDefinition, StyleLibrary};
pub use crate::transform::{transform, TransformOptions};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
