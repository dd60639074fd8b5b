//! Catalog entry model - ROM files and the games that own them

mod group;

pub use group::RomFileGroup;

use serde::Serialize;

/// Extensions treated as archives that contain other files
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z"];

/// One expected (catalog) or observed (scanned) file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RomFile {
    /// Catalog-relative name, filesystem path, or path inside `container`
    pub path: String,
    /// CRC32 checksum (lowercase hex)
    pub crc32: Option<String>,
    /// SHA1 checksum (lowercase hex)
    pub sha1: Option<String>,
    /// MD5 checksum (lowercase hex)
    pub md5: Option<String>,
    pub size: Option<u64>,
    /// Path of the archive this file lives in, if any
    pub container: Option<String>,
    pub is_dir: bool,
    /// Set when the source was broken or unreadable (e.g. a damaged archive)
    pub error: Option<String>,
}

impl RomFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            crc32: None,
            sha1: None,
            md5: None,
            size: None,
            container: None,
            is_dir: false,
            error: None,
        }
    }

    pub fn with_crc32(mut self, crc32: &str) -> Self {
        self.crc32 = normalize_hex(crc32);
        self
    }

    pub fn with_sha1(mut self, sha1: &str) -> Self {
        self.sha1 = normalize_hex(sha1);
        self
    }

    pub fn with_md5(mut self, md5: &str) -> Self {
        self.md5 = normalize_hex(md5);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn directory(mut self) -> Self {
        self.is_dir = true;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// True for directories and archives
    pub fn has_children(&self) -> bool {
        self.is_dir
            || extension(&self.path)
                .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    }

    pub fn is_archive_member(&self) -> bool {
        self.container.is_some()
    }

    /// Path including the containing archive, e.g. `roms/set.zip/game.bin`
    pub fn pretty_path(&self) -> String {
        match &self.container {
            Some(container) => format!("{}/{}", container, self.path),
            None => self.path.clone(),
        }
    }

    /// Final path component
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }

    pub fn matches_crc_and_size(&self, crc32: &str, size: u64) -> bool {
        self.size == Some(size) && self.crc32.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(crc32))
    }
}

/// A named catalog unit (one release) owning its files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Game {
    pub name: String,
    pub files: RomFileGroup,
}

impl Game {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: RomFileGroup::new(),
        }
    }

    pub fn add_file(&mut self, file: RomFile) {
        self.files.add(file);
    }

    pub fn file_by_sha1(&self, sha1: &str) -> Option<&RomFile> {
        self.files
            .iter()
            .find(|f| f.sha1.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(sha1)))
    }

    pub fn file_by_crc(&self, crc32: &str, size: u64) -> Option<&RomFile> {
        self.files.iter().find(|f| f.matches_crc_and_size(crc32, size))
    }
}

fn normalize_hex(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_ascii_lowercase())
    }
}

/// Last component of a `/` or `\` separated path
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Extension of the final path component, without the dot
pub(crate) fn extension(path: &str) -> Option<&str> {
    file_name(path).rsplit_once('.').map(|(_, ext)| ext)
}
