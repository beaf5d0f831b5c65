//! Archive handling for ODT packages
//!
//! An ODT file is a ZIP archive of XML parts and resources. The package is
//! unpacked into a scratch directory so that resources such as pictures can
//! be added with plain file operations. Only `content.xml` and `styles.xml`
//! are held in memory and rewritten; every other entry passes through
//! unchanged.
//!
//! The scratch directory belongs to the [`OdtPackage`] and is removed when
//! the package is saved or dropped, whichever comes first.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::read::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::error::{OdtError, Result};

/// Path of the document body part
pub const CONTENT_XML: &str = "content.xml";

/// Path of the shared styles part
pub const STYLES_XML: &str = "styles.xml";

/// Directory holding embedded pictures
pub const PICTURES_DIR: &str = "Pictures";

/// Media type entry, stored uncompressed as the first entry
const MIMETYPE: &str = "mimetype";

/// An unpacked ODT template being turned into a new document
#[derive(Debug)]
pub struct OdtPackage {
    /// Scratch directory holding every extracted entry
    scratch: TempDir,
    /// In-memory `content.xml`
    content: String,
    /// In-memory `styles.xml`
    styles: String,
}

impl OdtPackage {
    /// Open and unpack an ODT file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| OdtError::PackageRead(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }

    /// Unpack from any reader that implements Read + Seek
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive =
            ZipArchive::new(reader).map_err(|e| OdtError::PackageRead(e.to_string()))?;
        let scratch = tempfile::Builder::new().prefix("odtexport").tempdir()?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| OdtError::PackageRead(e.to_string()))?;

            // Refuse absolute paths and `..` components
            let relative = entry.enclosed_name().ok_or_else(|| {
                OdtError::PackageRead(format!("unsafe entry name: {}", entry.name()))
            })?;
            let target = scratch.path().join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
        }

        let content = read_part(scratch.path(), CONTENT_XML)?;
        let styles = read_part(scratch.path(), STYLES_XML)?;
        log::debug!(
            "Unpacked {} entries into {}",
            archive.len(),
            scratch.path().display()
        );

        Ok(Self {
            scratch,
            content,
            styles,
        })
    }

    /// The in-memory `content.xml`
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The in-memory `styles.xml`
    pub fn styles(&self) -> &str {
        &self.styles
    }

    /// Replace the in-memory `content.xml`
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    /// Replace the in-memory `styles.xml`
    pub fn set_styles(&mut self, styles: impl Into<String>) {
        self.styles = styles.into();
    }

    /// Root of the scratch directory
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Picture directory inside the package, created on first use
    pub fn pictures_dir(&self) -> Result<PathBuf> {
        let dir = self.scratch.path().join(PICTURES_DIR);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Relative paths of every file currently in the package, sorted
    pub fn entry_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        collect_files(self.scratch.path(), self.scratch.path(), &mut names)?;
        names.sort();
        Ok(names)
    }

    /// Write both XML buffers over their extracted files
    pub fn write_parts(&self) -> Result<()> {
        fs::write(self.scratch.path().join(CONTENT_XML), &self.content)?;
        fs::write(self.scratch.path().join(STYLES_XML), &self.styles)?;
        Ok(())
    }

    /// Serialize the package into a new archive and release the scratch
    /// directory
    pub fn save(self) -> Result<Vec<u8>> {
        self.write_parts()?;
        let bytes = self.write_archive()?;
        self.scratch.close()?;
        Ok(bytes)
    }

    fn write_archive(&self) -> Result<Vec<u8>> {
        let mut names = self.entry_names()?;
        if let Some(pos) = names.iter().position(|n| n == MIMETYPE) {
            let mimetype = names.remove(pos);
            names.insert(0, mimetype);
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for name in &names {
            let options = if name == MIMETYPE { stored } else { deflated };
            zip.start_file(name.as_str(), options)?;
            let mut file = File::open(self.scratch.path().join(name))?;
            io::copy(&mut file, &mut zip)?;
        }

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}

/// Read one of the two mutable XML parts from the scratch directory
fn read_part(root: &Path, name: &str) -> Result<String> {
    let bytes = match fs::read(root.join(name)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(OdtError::PackageRead(format!("missing {}", name)));
        }
        Err(e) => return Err(e.into()),
    };
    String::from_utf8(bytes).map_err(|_| OdtError::PackageRead(format!("{} is not UTF-8", name)))
}

/// Recursively list files below `dir` as `/`-separated paths relative to `root`
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
    }
    Ok(())
}
