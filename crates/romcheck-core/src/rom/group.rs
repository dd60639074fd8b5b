use super::{RomFile, extension, file_name};
use serde::Serialize;

/// An ordered set of files, kept sorted by path.
///
/// Queries return new groups and never modify `self`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RomFileGroup {
    files: Vec<RomFile>,
}

impl RomFileGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file at its sorted position (after any file with the same path)
    pub fn add(&mut self, file: RomFile) {
        let idx = self.files.partition_point(|f| f.path <= file.path);
        self.files.insert(idx, file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RomFile> {
        self.files.iter()
    }

    pub fn as_slice(&self) -> &[RomFile] {
        &self.files
    }

    /// Files whose name minus extension is `basename`.
    ///
    /// A non-empty `extensions` list restricts matches to those extensions.
    /// Archive members are skipped unless `include_archive_contents` is set.
    pub fn find_by_basename(
        &self,
        basename: &str,
        extensions: &[&str],
        include_archive_contents: bool,
    ) -> RomFileGroup {
        self.filtered(|f| {
            let name = f.file_name();
            let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
            if stem != basename {
                return false;
            }
            if !extensions.is_empty() {
                let Some(ext) = extension(&f.path) else {
                    return false;
                };
                if !extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                    return false;
                }
            }
            include_archive_contents || !f.is_archive_member()
        })
    }

    /// Files inside the archive at `container`
    pub fn archive_files(&self, container: &str) -> RomFileGroup {
        self.filtered(|f| f.container.as_deref() == Some(container))
    }

    /// First file with the same file name as `filename` (directories in
    /// `filename` are ignored)
    pub fn find_by_filename(&self, filename: &str, include_archive_contents: bool) -> Option<&RomFile> {
        let wanted = file_name(filename);
        self.files.iter().find(|f| {
            f.file_name() == wanted && (include_archive_contents || !f.is_archive_member())
        })
    }

    /// Files with the given CRC32 and size
    pub fn find_by_crc_and_size(&self, crc32: &str, size: u64, exclude_archives: bool) -> RomFileGroup {
        self.filtered(|f| {
            !(exclude_archives && f.is_archive_member()) && f.matches_crc_and_size(crc32, size)
        })
    }

    /// Remove the file at `path` and every file inside an archive at `path`
    pub fn delete_by_path(&mut self, path: &str) {
        self.files
            .retain(|f| f.path != path && f.container.as_deref() != Some(path));
    }

    /// Remove every file with the given CRC32
    pub fn delete_by_crc(&mut self, crc32: &str) {
        self.files.retain(|f| {
            !f.crc32
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(crc32))
        });
    }

    /// Files whose path starts with `prefix`
    pub fn sub_path(&self, prefix: &str) -> RomFileGroup {
        self.filtered(|f| f.path.starts_with(prefix))
    }

    fn filtered<F>(&self, keep: F) -> RomFileGroup
    where
        F: Fn(&RomFile) -> bool,
    {
        // Already sorted, so the subset is too
        RomFileGroup {
            files: self.files.iter().filter(|f| keep(f)).cloned().collect(),
        }
    }
}

impl FromIterator<RomFile> for RomFileGroup {
    fn from_iter<I: IntoIterator<Item = RomFile>>(iter: I) -> Self {
        let mut files: Vec<RomFile> = iter.into_iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self { files }
    }
}

impl Extend<RomFile> for RomFileGroup {
    fn extend<I: IntoIterator<Item = RomFile>>(&mut self, iter: I) {
        for file in iter {
            self.add(file);
        }
    }
}

impl IntoIterator for RomFileGroup {
    type Item = RomFile;
    type IntoIter = std::vec::IntoIter<RomFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl<'a> IntoIterator for &'a RomFileGroup {
    type Item = &'a RomFile;
    type IntoIter = std::slice::Iter<'a, RomFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}
