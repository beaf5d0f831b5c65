//! odtexport CLI - Command-line interface library
//!
//! This library provides the CLI functionality for odtexport:
//! - Convert: Export a rendered XHTML page into an ODT document
//! - Styles: List the definitions of a style library
//! - InitConfig: Write a default configuration file
//!
//! # Binary Usage
//!
//! ```bash
//! # Convert a page using a template and a site's attachment directory
//! odtexport convert WikiStart.xhtml --template template.odt \
//!     --base-url http://example.org/trac --attachments /srv/trac/files/attachments
//!
//! # Show what the bundled style library provides
//! odtexport styles
//! ```

pub mod app;

pub use app::{
    convert_command, init_config_command, resolve_config, run_cli, styles_command, ConvertArgs,
};
