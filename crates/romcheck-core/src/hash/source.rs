//! File access seam for the fingerprint engine

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;
use std::time::SystemTime;

/// A readable, seekable byte stream.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// The metadata the fingerprint cache keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub modified_ns: i64,
    pub is_dir: bool,
}

/// Where file bytes and metadata come from.
///
/// Shared across worker threads, so implementations must be `Sync`.
pub trait FileSource: Send + Sync {
    fn metadata(&self, path: &Path) -> io::Result<FileMeta>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>>;
}

/// The local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSource for LocalFs {
    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        let metadata = fs::metadata(path)?;
        let modified_ns = modified_ns(metadata.modified()?)?;
        Ok(FileMeta {
            size: metadata.len(),
            modified_ns,
            is_dir: metadata.is_dir(),
        })
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>> {
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Nanoseconds between the Unix epoch and `time`, negative before the epoch
fn modified_ns(time: SystemTime) -> io::Result<i64> {
    let (nanos, before_epoch) = match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (d.as_nanos(), false),
        Err(e) => (e.duration().as_nanos(), true),
    };
    let nanos = i64::try_from(nanos)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "modification time out of range"))?;
    Ok(if before_epoch { -nanos } else { nanos })
}

impl<T: FileSource + ?Sized> FileSource for &T {
    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        (**self).metadata(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>> {
        (**self).open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_local_metadata() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abcdef").unwrap();

        let meta = LocalFs.metadata(file.path()).unwrap();
        assert_eq!(meta.size, 6);
        assert!(!meta.is_dir);
        assert!(meta.modified_ns > 0);
    }

    #[test]
    fn test_modified_ns_around_epoch() {
        use std::time::Duration;

        let after = SystemTime::UNIX_EPOCH + Duration::from_nanos(1_500);
        assert_eq!(modified_ns(after).unwrap(), 1_500);
        let before = SystemTime::UNIX_EPOCH - Duration::from_secs(2);
        assert_eq!(modified_ns(before).unwrap(), -2_000_000_000);
    }

    #[test]
    fn test_modified_ns_out_of_range_is_error() {
        use std::time::Duration;

        // i64 nanoseconds only reach about 292 years past the epoch
        let Some(far) = SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(600 * 365 * 86_400))
        else {
            return;
        };
        let err = modified_ns(far).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_local_metadata_directory() {
        let dir = TempDir::new().unwrap();
        assert!(LocalFs.metadata(dir.path()).unwrap().is_dir);
    }

    #[test]
    fn test_local_open_reads_content() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let mut reader = LocalFs.open(file.path()).unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
    }
}
