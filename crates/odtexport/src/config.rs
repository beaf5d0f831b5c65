//! Export configuration
//!
//! Settings are loaded from a TOML file:
//!
//! ```toml
//! base_url = "http://example.org/trac"
//! replace_keyword = "TRAC-ODT-INSERT"
//!
//! [images]
//! dpi = 96
//! get_remote_images = true
//! remote_timeout_secs = 30
//! ```
//!
//! Every key is optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OdtError, Result};

/// Default insertion marker looked up in the template body
pub const DEFAULT_REPLACE_KEYWORD: &str = "TRAC-ODT-INSERT";

/// Default print resolution for embedded images
pub const DEFAULT_DPI: u32 = 96;

/// Top-level export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Absolute URL of the site root, without trailing slash
    pub base_url: String,
    /// Marker replaced by the page content; empty disables marker lookup
    pub replace_keyword: String,
    /// Character encoding of the rendered page
    pub charset: String,
    /// Number of levels to subtract from XHTML heading levels
    pub heading_minus_level: u8,
    /// Image handling
    pub images: ImageSettings,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            replace_keyword: DEFAULT_REPLACE_KEYWORD.to_string(),
            charset: "utf-8".to_string(),
            heading_minus_level: 0,
            images: ImageSettings::default(),
        }
    }
}

impl ExportConfig {
    /// Parse and validate settings from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)
            .map_err(|e| OdtError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            OdtError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize to a TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| OdtError::Config(format!("Failed to serialize configuration: {}", e)))
    }

    /// Strip the trailing slash from the base URL
    pub fn normalize(&mut self) {
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.images.dpi == 0 {
            return Err(OdtError::Config("images.dpi must be positive".to_string()));
        }
        if !self.charset.eq_ignore_ascii_case("utf-8") && !self.charset.eq_ignore_ascii_case("utf8")
        {
            log::warn!(
                "Charset {} requested, XML parts are always written as UTF-8",
                self.charset
            );
        }
        Ok(())
    }
}

/// Image sizing and download settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Maximum image width in pixels (0 = unlimited); reserved, not enforced
    pub img_max_x: u32,
    /// Maximum image height in pixels (0 = unlimited); reserved, not enforced
    pub img_max_y: u32,
    /// Print resolution used to convert pixels to centimeters
    pub dpi: u32,
    /// Download and embed images referenced by absolute http(s) URLs
    pub get_remote_images: bool,
    /// Timeout for remote image downloads, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_timeout_secs: Option<u64>,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            img_max_x: 0,
            img_max_y: 0,
            dpi: DEFAULT_DPI,
            get_remote_images: true,
            remote_timeout_secs: None,
        }
    }
}

impl ImageSettings {
    /// Remote download timeout, if configured
    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExportConfig::default();
        assert_eq!(config.replace_keyword, "TRAC-ODT-INSERT");
        assert_eq!(config.images.dpi, 96);
        assert!(config.images.get_remote_images);
        assert_eq!(config.images.remote_timeout(), None);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ExportConfig::from_toml_str("").unwrap();
        assert_eq!(config, ExportConfig::default());
    }

    #[test]
    fn test_parse_toml() {
        let config = ExportConfig::from_toml_str(
            r#"
base_url = "http://example.org/trac/"
replace_keyword = "INSERT-HERE"

[images]
dpi = 300
get_remote_images = false
remote_timeout_secs = 5
"#,
        )
        .unwrap();

        assert_eq!(config.base_url, "http://example.org/trac");
        assert_eq!(config.replace_keyword, "INSERT-HERE");
        assert_eq!(config.images.dpi, 300);
        assert!(!config.images.get_remote_images);
        assert_eq!(config.images.remote_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_dpi_rejected() {
        let result = ExportConfig::from_toml_str("[images]\ndpi = 0\n");
        assert!(matches!(result, Err(OdtError::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let result = ExportConfig::from_toml_str("base_url = [");
        assert!(matches!(result, Err(OdtError::Config(_))));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ExportConfig {
            base_url: "http://example.org".to_string(),
            ..Default::default()
        };
        let restored = ExportConfig::from_toml_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(restored, config);
    }
}
