//! CLI Application logic
//!
//! Contains the command-line interface implementation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use odtexport::{DirectoryResources, ExportConfig, OdtExporter, StyleLibrary};

#[derive(Parser)]
#[command(name = "odtexport")]
#[command(author, version, about = "Export wiki pages to OpenDocument Text", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a rendered XHTML page into an ODT document
    Convert(ConvertArgs),

    /// List the definitions of a style library
    Styles {
        /// Style library directory (defaults to the bundled library)
        #[arg(short, long)]
        styles: Option<PathBuf>,
    },

    /// Write a configuration file with the default settings
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "odtexport.toml")]
        output: PathBuf,
    },
}

/// Options of the convert command
#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Input XHTML file
    pub input: PathBuf,

    /// Output ODT file (defaults to the input name with .odt)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Template ODT file
    #[arg(short, long)]
    pub template: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Style library directory
    #[arg(short, long)]
    pub styles: Option<PathBuf>,

    /// Site base URL, overriding the configuration
    #[arg(long)]
    pub base_url: Option<String>,

    /// Do not download remote images
    #[arg(long)]
    pub no_remote_images: bool,

    /// Image resolution, overriding the configuration
    #[arg(long)]
    pub dpi: Option<u32>,

    /// Attachment root directory ({realm}/{parent}/{file})
    #[arg(long)]
    pub attachments: Option<PathBuf>,

    /// Theme asset directory for a prefix, as PREFIX=DIR (repeatable)
    #[arg(long, value_parser = parse_htdocs)]
    pub htdocs: Vec<(String, PathBuf)>,
}

fn parse_htdocs(value: &str) -> std::result::Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((prefix, dir)) if !prefix.is_empty() && !dir.is_empty() => {
            Ok((prefix.to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected PREFIX=DIR, got \"{}\"", value)),
    }
}

/// Run the CLI application
///
/// This is the main entry point for the command-line interface.
/// It parses arguments and dispatches to the appropriate command.
pub fn run_cli() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert(args) => {
            convert_command(&args)?;
        }
        Commands::Styles { styles } => {
            styles_command(styles.as_deref())?;
        }
        Commands::InitConfig { output } => {
            init_config_command(&output)?;
        }
    }

    Ok(())
}

/// Install the log subscriber; `RUST_LOG` overrides the default level
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // A second initialization (e.g. from tests) is not an error
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Settings from the configuration file with command-line overrides applied
pub fn resolve_config(args: &ConvertArgs) -> Result<ExportConfig> {
    let mut config = match &args.config {
        Some(path) => ExportConfig::load(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => ExportConfig::default(),
    };

    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if args.no_remote_images {
        config.images.get_remote_images = false;
    }
    if let Some(dpi) = args.dpi {
        config.images.dpi = dpi;
    }
    config.normalize();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// The style library in `dir`, or the bundled one
fn load_library(dir: Option<&Path>) -> Result<StyleLibrary> {
    match dir {
        Some(dir) => StyleLibrary::load(dir)
            .with_context(|| format!("Failed to load style library: {}", dir.display())),
        None => Ok(StyleLibrary::bundled()),
    }
}

/// Execute the convert command
pub fn convert_command(args: &ConvertArgs) -> Result<()> {
    println!("odtexport v{}", odtexport::VERSION);
    println!("Converting: {}", args.input.display());

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let config = resolve_config(args)?;
    log::debug!("Effective configuration: {:?}", config);
    let library = load_library(args.styles.as_deref())?;

    let mut resources = DirectoryResources::new();
    if let Some(dir) = &args.attachments {
        resources = resources.with_attachments(dir);
    }
    for (prefix, dir) in &args.htdocs {
        resources = resources.with_htdocs(prefix, dir);
    }

    let xhtml = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read input file: {}", args.input.display()))?;

    let odt = OdtExporter::new(&library, &config, &resources)
        .export(&args.template, &xhtml)
        .with_context(|| format!("Failed to export {}", args.input.display()))?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("odt"));
    fs::write(&output, &odt)
        .with_context(|| format!("Failed to write output file: {}", output.display()))?;

    println!("  Created: {} ({} bytes)", output.display(), odt.len());
    Ok(())
}

/// Execute the styles command
pub fn styles_command(dir: Option<&Path>) -> Result<()> {
    let library = load_library(dir)?;

    println!("Styles:");
    for style in library.styles() {
        let kind = if style.is_main { "main" } else { "automatic" };
        match &style.required_font {
            Some(font) => println!("  {} ({}, font: {})", style.name, kind, font),
            None => println!("  {} ({})", style.name, kind),
        }
    }
    for style in library.list_styles() {
        println!("  {} (list)", style.name);
    }

    println!("Fonts:");
    for font in library.fonts() {
        println!("  {}", font.name);
    }
    Ok(())
}

/// Execute the init-config command
pub fn init_config_command(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!("Refusing to overwrite {}", output.display());
    }
    let toml = ExportConfig::default()
        .to_toml()
        .context("Failed to serialize configuration")?;
    fs::write(output, toml)
        .with_context(|| format!("Failed to write config file: {}", output.display()))?;
    println!("Created: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ConvertArgs {
        let mut argv = vec!["odtexport", "convert", "page.xhtml", "--template", "t.odt"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Convert(args) => args,
            _ => panic!("Expected convert"),
        }
    }

    #[test]
    fn test_parse_convert() {
        let args = args(&[
            "--htdocs",
            "common=/srv/htdocs",
            "--htdocs",
            "site=/srv/site",
            "--no-remote-images",
        ]);
        assert_eq!(args.input, PathBuf::from("page.xhtml"));
        assert_eq!(args.template, PathBuf::from("t.odt"));
        assert_eq!(
            args.htdocs,
            vec![
                ("common".to_string(), PathBuf::from("/srv/htdocs")),
                ("site".to_string(), PathBuf::from("/srv/site")),
            ]
        );
        assert!(args.no_remote_images);
    }

    #[test]
    fn test_parse_htdocs_rejects_missing_prefix() {
        assert!(parse_htdocs("=/srv").is_err());
        assert!(parse_htdocs("common").is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let config = resolve_config(&args(&[
            "--base-url",
            "http://example.org/trac/",
            "--dpi",
            "300",
            "--no-remote-images",
        ]))
        .unwrap();
        assert_eq!(config.base_url, "http://example.org/trac");
        assert_eq!(config.images.dpi, 300);
        assert!(!config.images.get_remote_images);
    }

    #[test]
    fn test_zero_dpi_rejected() {
        assert!(resolve_config(&args(&["--dpi", "0"])).is_err());
    }

    #[test]
    fn test_config_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odtexport.toml");
        fs::write(&path, "base_url = \"http://a.org\"\n[images]\ndpi = 150\n").unwrap();

        let config = resolve_config(&args(&["--config", path.to_str().unwrap(), "--dpi", "72"]))
            .unwrap();
        assert_eq!(config.base_url, "http://a.org");
        assert_eq!(config.images.dpi, 72);
    }
}
