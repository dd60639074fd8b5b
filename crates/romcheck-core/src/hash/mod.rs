//! Fingerprint engine - sample fingerprints, CRC32/SHA1, parallel batches

mod source;

#[cfg(test)]
pub(crate) use source::counting;
pub use source::{FileMeta, FileSource, LocalFs, ReadSeek};

use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files at or below this size are fingerprinted in full.
/// Kept a multiple of [`BLOCK_SIZE`].
pub const TOTAL_SAMPLE_SIZE: u64 = 10 * 1024 * 1024;

/// Number of evenly spaced samples taken from a large file
pub const SAMPLE_COUNT: u64 = 20;

/// Sample offsets are aligned to this block size
pub const BLOCK_SIZE: u64 = 4096;

const CHUNK_SIZE: usize = 64 * 1024;

/// Per-path results of a batch operation. A file that failed keeps its error.
pub type BatchResults<T> = BTreeMap<PathBuf, Result<T>>;

/// Full-content fingerprints of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprints {
    /// SHA1 (lowercase hex)
    pub sha1: String,
    /// CRC32 (lowercase hex, 8 digits)
    pub crc32: String,
    /// Number of bytes the checksums cover
    pub size: u64,
}

/// Computes sample and strong fingerprints through a [`FileSource`].
#[derive(Debug, Clone)]
pub struct Fingerprinter<S = LocalFs> {
    source: S,
    threads: usize,
}

impl Default for Fingerprinter<LocalFs> {
    fn default() -> Self {
        Self::new(LocalFs)
    }
}

impl<S: FileSource> Fingerprinter<S> {
    /// Create an engine that uses one worker per CPU for batches
    pub fn new(source: S) -> Self {
        Self {
            source,
            threads: num_cpus::get().max(1),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn metadata(&self, path: &Path) -> Result<FileMeta> {
        self.source.metadata(path).map_err(|e| Error::io(path, e))
    }

    /// Cheap proxy digest used as the cache key.
    ///
    /// Files no larger than [`TOTAL_SAMPLE_SIZE`] get the SHA1 of their full
    /// content. Larger files get the SHA1 of [`SAMPLE_COUNT`] block-aligned
    /// samples spread evenly across the file, so the cost does not grow with
    /// file size.
    pub fn sample_fingerprint(&self, path: &Path) -> Result<String> {
        let meta = self.file_metadata(path)?;
        let mut reader = self.source.open(path).map_err(|e| Error::io(path, e))?;

        if meta.size <= TOTAL_SAMPLE_SIZE {
            log::debug!("{} is below the sample size, hashing in full", path.display());
            let mut sha = Sha1::new();
            stream_chunks(&mut reader, path, |chunk| sha.update(chunk))?;
            return Ok(format!("{:x}", sha.finalize()));
        }

        log::debug!("Sampling {}", path.display());
        let blocks = meta.size.div_ceil(BLOCK_SIZE);
        let sample_size = TOTAL_SAMPLE_SIZE / SAMPLE_COUNT;
        let stride = blocks / SAMPLE_COUNT;

        let mut sha = Sha1::new();
        let mut buf = Vec::with_capacity(sample_size as usize);
        let mut offset = 0u64;
        while offset <= meta.size - sample_size {
            reader
                .seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io(path, e))?;
            buf.clear();
            let n = reader
                .by_ref()
                .take(sample_size)
                .read_to_end(&mut buf)
                .map_err(|e| Error::io(path, e))?;
            if n == 0 {
                break;
            }
            sha.update(&buf);
            offset += stride * BLOCK_SIZE;
        }

        Ok(format!("{:x}", sha.finalize()))
    }

    /// CRC32 and SHA1 of the full file content, computed in a single read
    pub fn strong_fingerprints(&self, path: &Path) -> Result<Fingerprints> {
        self.file_metadata(path)?;
        let mut reader = self.source.open(path).map_err(|e| Error::io(path, e))?;

        log::debug!("Running checksums for {}", path.display());
        let mut crc = crc32fast::Hasher::new();
        let mut sha = Sha1::new();
        let mut size = 0u64;
        stream_chunks(&mut reader, path, |chunk| {
            crc.update(chunk);
            sha.update(chunk);
            size += chunk.len() as u64;
        })?;

        Ok(Fingerprints {
            sha1: format!("{:x}", sha.finalize()),
            crc32: format!("{:08x}", crc.finalize()),
            size,
        })
    }

    /// [`sample_fingerprint`](Self::sample_fingerprint) for many files in parallel
    pub fn sample_fingerprints(&self, paths: &[PathBuf]) -> Result<BatchResults<String>> {
        self.run_batch(paths, |path| self.sample_fingerprint(path))
    }

    /// [`strong_fingerprints`](Self::strong_fingerprints) for many files in parallel
    pub fn strong_fingerprints_many(&self, paths: &[PathBuf]) -> Result<BatchResults<Fingerprints>> {
        self.run_batch(paths, |path| self.strong_fingerprints(path))
    }

    /// Run `job` for every path on a pool scoped to this call.
    /// Results are keyed by path, so completion order does not matter.
    fn run_batch<T, F>(&self, paths: &[PathBuf], job: F) -> Result<BatchResults<T>>
    where
        T: Send,
        F: Fn(&Path) -> Result<T> + Sync,
    {
        if paths.is_empty() {
            return Ok(BatchResults::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;
        let results: Vec<Result<T>> =
            pool.install(|| paths.par_iter().map(|path| job(path)).collect());

        Ok(paths.iter().cloned().zip(results).collect())
    }

    fn file_metadata(&self, path: &Path) -> Result<FileMeta> {
        let meta = self.metadata(path)?;
        if meta.is_dir {
            return Err(Error::NotAFile(path.to_path_buf()));
        }
        Ok(meta)
    }
}

/// Feed a reader to `update` in fixed-size chunks until EOF
fn stream_chunks<R, F>(reader: &mut R, path: &Path, mut update: F) -> Result<()>
where
    R: Read + ?Sized,
    F: FnMut(&[u8]),
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| Error::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        update(&buffer[..bytes_read]);
    }
    Ok(())
}

/// Entries found beneath a root by [`expand_root`]
#[derive(Debug, Default)]
pub struct RootListing {
    /// Every non-directory entry, in walk order
    pub files: Vec<PathBuf>,
    /// Entries that could not be visited (dangling links, unreadable
    /// subdirectories, link loops), keyed by their path
    pub failed: BTreeMap<PathBuf, Error>,
}

/// Recursively list every non-directory entry beneath `root`.
///
/// An entry that cannot be visited is recorded in [`RootListing::failed`]
/// and the walk continues. Only a failure to read `root` itself is an error.
pub fn expand_root(root: &Path) -> Result<RootListing> {
    let mut listing = RootListing::default();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_dir() {
                    listing.files.push(entry.into_path());
                }
            }
            Err(e) => match e.path() {
                Some(path) if e.depth() > 0 => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    listing.failed.insert(path.to_path_buf(), Error::Walk(e));
                }
                _ => return Err(Error::Walk(e)),
            },
        }
    }
    Ok(listing)
}
