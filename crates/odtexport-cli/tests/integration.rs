//! Integration tests for the odtexport CLI
//!
//! These drive the command functions end to end on files in a temporary
//! directory: template + XHTML page -> ODT document.

use std::fs;
use std::path::PathBuf;

use odtexport::test_utils::{create_template, read_entries, read_entry_string, write_png, TemplateOptions};
use odtexport_cli::{convert_command, init_config_command, styles_command, ConvertArgs};
use tempfile::TempDir;

const PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Guide</title></head><body>
<h2>Installation</h2>
<p>Run <code>make install</code>.</p>
<p><img src="http://example.org/trac/raw-attachment/wiki/Guide/screen.png" alt="screen"/></p>
<p><img src="http://example.org/trac/chrome/common/trac_logo.png" alt="logo"/></p>
</body></html>"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let template = create_template(&TemplateOptions {
            body_text: Some("TRAC-ODT-INSERT".to_string()),
            ..Default::default()
        });
        fs::write(dir.path().join("template.odt"), template).unwrap();
        fs::write(dir.path().join("Guide.xhtml"), PAGE).unwrap();

        fs::create_dir_all(dir.path().join("attachments/wiki/Guide")).unwrap();
        write_png(&dir.path().join("attachments/wiki/Guide/screen.png"), 96, 96);
        fs::create_dir_all(dir.path().join("htdocs")).unwrap();
        write_png(&dir.path().join("htdocs/trac_logo.png"), 48, 24);
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn args(&self) -> ConvertArgs {
        ConvertArgs {
            input: self.path("Guide.xhtml"),
            output: None,
            template: self.path("template.odt"),
            config: None,
            styles: None,
            base_url: Some("http://example.org/trac".to_string()),
            no_remote_images: true,
            dpi: None,
            attachments: Some(self.path("attachments")),
            htdocs: vec![("common".to_string(), self.path("htdocs"))],
        }
    }
}

#[test]
fn test_convert_writes_document() {
    let workspace = Workspace::new();
    convert_command(&workspace.args()).unwrap();

    let odt = fs::read(workspace.path("Guide.odt")).unwrap();
    let content = read_entry_string(&odt, "content.xml");
    assert!(content.contains(
        r#"<text:h text:style-name="Heading_20_2" text:outline-level="2">Installation</text:h>"#
    ));
    assert!(content.contains(r#"<text:span text:style-name="Source_20_Text">make install</text:span>"#));
    assert!(content.contains(r#"svg:width="2.54cm" svg:height="2.54cm""#));
    assert!(content.contains(r#"svg:width="1.27cm" svg:height="0.635cm""#));

    let pictures = read_entries(&odt)
        .keys()
        .filter(|name| name.starts_with("Pictures/"))
        .count();
    assert_eq!(pictures, 2);

    let styles = read_entry_string(&odt, "styles.xml");
    assert!(styles.contains(r#"style:name="Heading_20_2""#));
}

#[test]
fn test_convert_explicit_output_and_config() {
    let workspace = Workspace::new();
    fs::write(
        workspace.path("odtexport.toml"),
        "replace_keyword = \"NOT-THERE\"\nheading_minus_level = 1\n",
    )
    .unwrap();

    let mut args = workspace.args();
    args.output = Some(workspace.path("out/guide.odt"));
    args.config = Some(workspace.path("odtexport.toml"));
    fs::create_dir_all(workspace.path("out")).unwrap();
    convert_command(&args).unwrap();

    let odt = fs::read(workspace.path("out/guide.odt")).unwrap();
    let content = read_entry_string(&odt, "content.xml");
    // Marker from the configuration is absent: content goes to the end
    assert!(content.contains("TRAC-ODT-INSERT"));
    assert!(content.contains(r#"text:outline-level="1">Installation"#));
}

#[test]
fn test_convert_missing_input() {
    let workspace = Workspace::new();
    let mut args = workspace.args();
    args.input = workspace.path("Missing.xhtml");

    let err = convert_command(&args).unwrap_err();
    assert!(err.to_string().contains("Input file not found"));
}

#[test]
fn test_convert_bad_template() {
    let workspace = Workspace::new();
    fs::write(workspace.path("broken.odt"), b"not a zip").unwrap();
    let mut args = workspace.args();
    args.template = workspace.path("broken.odt");

    let err = convert_command(&args).unwrap_err();
    assert!(format!("{:#}", err).contains("Cannot read template package"));
    assert!(!workspace.path("Guide.odt").exists());
}

#[test]
fn test_styles_command() {
    styles_command(None).unwrap();
    assert!(styles_command(Some(std::path::Path::new("/nonexistent/styles"))).is_err());
}

#[test]
fn test_init_config() {
    let workspace = Workspace::new();
    let path = workspace.path("odtexport.toml");
    init_config_command(&path).unwrap();

    let config = odtexport::ExportConfig::load(&path).unwrap();
    assert_eq!(config, odtexport::ExportConfig::default());
    // Existing files are left alone
    assert!(init_config_command(&path).is_err());
}
