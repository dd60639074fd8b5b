//! Cached fingerprint queries over the engine and the store

use crate::db::{FingerprintStore, InsertOutcome};
use crate::error::{Error, Result};
use crate::hash::{self, BatchResults, FileMeta, FileSource, Fingerprinter, Fingerprints, LocalFs};
use crate::services::progress::{FingerprintEvent, ProgressSink};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Answers fingerprint queries, computing strong fingerprints only for files
/// the store has not seen with the same sample fingerprint, size and mtime.
///
/// The store is only touched from the calling thread; workers just hash.
pub struct FingerprintService<S: FileSource = LocalFs, P: ProgressSink<FingerprintEvent> = ()> {
    engine: Fingerprinter<S>,
    store: FingerprintStore,
    sink: P,
}

impl<S: FileSource> FingerprintService<S, ()> {
    pub fn new(engine: Fingerprinter<S>, store: FingerprintStore) -> Self {
        Self::with_sink(engine, store, ())
    }
}

impl<S: FileSource, P: ProgressSink<FingerprintEvent>> FingerprintService<S, P> {
    pub fn with_sink(engine: Fingerprinter<S>, store: FingerprintStore, sink: P) -> Self {
        Self {
            engine,
            store,
            sink,
        }
    }

    pub fn engine(&self) -> &Fingerprinter<S> {
        &self.engine
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Fingerprints of one file, from the store when possible
    pub fn fingerprints_of(&mut self, path: &Path) -> Result<Fingerprints> {
        let sample = self.engine.sample_fingerprint(path)?;
        let meta = self.engine.metadata(path)?;

        if let Some(cached) = self.store.lookup(&sample, meta.size, meta.modified_ns)? {
            log::debug!("Got cache entry for {}", path.display());
            self.sink.emit(FingerprintEvent::CacheHit {
                path: path.to_path_buf(),
            });
            return Ok(cached.fingerprints());
        }

        let sums = self.engine.strong_fingerprints(path)?;
        self.record(path, &sample, &sums, meta)?;
        Ok(sums)
    }

    /// Fingerprints of every file in `paths`.
    ///
    /// Directories are skipped. Sample fingerprints are computed for all files
    /// in parallel first; strong fingerprints are then computed in parallel
    /// only for files missing from the store. Every remaining path gets an
    /// entry, holding its error if it could not be fingerprinted.
    pub fn fingerprints_of_many(
        &mut self,
        paths: &[PathBuf],
    ) -> Result<BatchResults<Fingerprints>> {
        self.run_batch(paths, BatchResults::new())
    }

    /// Fingerprints of every file beneath `root`.
    ///
    /// Entries the walk could not visit are reported under their own path
    /// alongside the files that were fingerprinted.
    pub fn fingerprints_under(&mut self, root: &Path) -> Result<BatchResults<Fingerprints>> {
        if !self.engine.metadata(root)?.is_dir {
            return Err(Error::io(
                root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "Not a directory"),
            ));
        }
        let listing = hash::expand_root(root)?;
        let unvisited = listing
            .failed
            .into_iter()
            .map(|(path, e)| (path, Err(e)))
            .collect();
        self.run_batch(&listing.files, unvisited)
    }

    fn run_batch(
        &mut self,
        paths: &[PathBuf],
        mut results: BatchResults<Fingerprints>,
    ) -> Result<BatchResults<Fingerprints>> {
        let started = Instant::now();
        let files: Vec<PathBuf> = paths
            .iter()
            .filter(|path| !matches!(self.engine.metadata(path), Ok(meta) if meta.is_dir))
            .cloned()
            .collect();
        self.sink.emit(FingerprintEvent::BatchStarted {
            files: (files.len() + results.len()) as u64,
        });
        log::debug!("Fingerprinting {} files", files.len());

        let mut to_hash: Vec<(PathBuf, String, FileMeta)> = Vec::new();
        let mut cached = 0u64;

        for (path, sample) in self.engine.sample_fingerprints(&files)? {
            let found = sample.and_then(|sample| Ok((sample, self.engine.metadata(&path)?)));
            let (sample, meta) = match found {
                Ok(found) => found,
                Err(e) => {
                    results.insert(path, Err(e));
                    continue;
                }
            };

            match self.store.lookup(&sample, meta.size, meta.modified_ns)? {
                Some(entry) => {
                    log::debug!("Got cache entry for {}", path.display());
                    cached += 1;
                    self.sink.emit(FingerprintEvent::CacheHit { path: path.clone() });
                    results.insert(path, Ok(entry.fingerprints()));
                }
                None => to_hash.push((path, sample, meta)),
            }
        }

        let mut hashed = 0u64;
        if !to_hash.is_empty() {
            log::info!("Hashing {} uncached files", to_hash.len());
            let pending: Vec<PathBuf> = to_hash.iter().map(|(path, _, _)| path.clone()).collect();
            let mut computed = self.engine.strong_fingerprints_many(&pending)?;

            for (path, sample, meta) in to_hash {
                let Some(result) = computed.remove(&path) else {
                    continue;
                };
                let result = match result {
                    Ok(sums) => {
                        self.record(&path, &sample, &sums, meta)?;
                        hashed += 1;
                        Ok(sums)
                    }
                    Err(e) => Err(e),
                };
                results.insert(path, result);
            }
        }

        let failed = results.values().filter(|r| r.is_err()).count() as u64;
        self.sink.emit(FingerprintEvent::BatchCompleted {
            files: results.len() as u64,
            cached,
            hashed,
            failed,
            duration_ms: started.elapsed().as_millis(),
        });
        Ok(results)
    }

    fn record(
        &mut self,
        path: &Path,
        sample: &str,
        sums: &Fingerprints,
        meta: FileMeta,
    ) -> Result<()> {
        let outcome = self
            .store
            .insert(sample, sums, meta.size, meta.modified_ns)?;
        if outcome == InsertOutcome::Replaced {
            self.sink.emit(FingerprintEvent::CacheReplaced {
                path: path.to_path_buf(),
            });
        }
        self.sink.emit(FingerprintEvent::Hashed {
            path: path.to_path_buf(),
            size: meta.size,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::counting::CountingFs;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn service(source: &CountingFs) -> FingerprintService<&CountingFs> {
        FingerprintService::new(
            Fingerprinter::new(source).with_threads(2),
            FingerprintStore::open_in_memory().unwrap(),
        )
    }

    #[test]
    fn test_fingerprints_of_known_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.bin");
        fs::write(&path, "test content").unwrap();

        let mut service = FingerprintService::new(
            Fingerprinter::default(),
            FingerprintStore::open_in_memory().unwrap(),
        );
        let sums = service.fingerprints_of(&path).unwrap();
        assert_eq!(sums.crc32, "57f4675d");
        assert_eq!(sums.sha1, "1eebdf4fdc9fc7bf283031b93f9aef3338de9052");
        assert_eq!(service.store().len().unwrap(), 1);
    }

    #[test]
    fn test_cache_hit_skips_full_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.bin");
        fs::write(&path, "some rom data").unwrap();
        let source = CountingFs::default();
        let mut service = service(&source);

        let first = service.fingerprints_of(&path).unwrap();
        // sample pass + strong pass
        assert_eq!(source.opens(&path), 2);

        let second = service.fingerprints_of(&path).unwrap();
        // sample pass only
        assert_eq!(source.opens(&path), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_changed_file_is_rehashed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.bin");
        fs::write(&path, "version one").unwrap();
        let source = CountingFs::default();
        let mut service = service(&source);

        let before = service.fingerprints_of(&path).unwrap();
        fs::write(&path, "version two").unwrap();
        let after = service.fingerprints_of(&path).unwrap();

        assert_ne!(before, after);
        assert_eq!(source.opens(&path), 4);
        assert_eq!(service.store().len().unwrap(), 2);
    }

    #[test]
    fn test_fingerprints_of_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let source = CountingFs::default();
        let mut service = service(&source);

        let err = service.fingerprints_of(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotAFile(_)));
        assert_eq!(source.total_opens(), 0);
    }

    #[test]
    fn test_scan_directory_with_one_cached_file() {
        let dir = TempDir::new().unwrap();
        let cached = dir.path().join("cached.bin");
        let new_a = dir.path().join("new_a.bin");
        let new_b = dir.path().join("sub").join("new_b.bin");
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(&cached, "already seen").unwrap();
        fs::write(&new_a, "first new file").unwrap();
        fs::write(&new_b, "second new file").unwrap();

        let source = CountingFs::default();
        let mut service = service(&source);
        let expected = service.fingerprints_of(&cached).unwrap();
        assert_eq!(source.opens(&cached), 2);

        let results = service.fingerprints_under(dir.path()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[&cached].as_ref().unwrap(), &expected);
        assert!(results[&new_a].is_ok());
        assert!(results[&new_b].is_ok());

        // Only the sample pass touched the cached file
        assert_eq!(source.opens(&cached), 3);
        assert_eq!(source.opens(&new_a), 2);
        assert_eq!(source.opens(&new_b), 2);
        assert_eq!(service.store().len().unwrap(), 3);
    }

    #[test]
    fn test_many_matches_single_queries() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| {
                let path = dir.path().join(format!("rom{i}.bin"));
                fs::write(&path, format!("content {i}")).unwrap();
                path
            })
            .collect();

        let source = CountingFs::default();
        let mut batch_service = service(&source);
        let batch = batch_service.fingerprints_of_many(&paths).unwrap();

        let engine = Fingerprinter::default();
        for path in &paths {
            let expected = engine.strong_fingerprints(path).unwrap();
            assert_eq!(batch[path].as_ref().unwrap(), &expected);
        }
    }

    #[test]
    fn test_many_skips_directories_and_keeps_failures() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.bin");
        fs::write(&good, "data").unwrap();
        let missing = dir.path().join("missing.bin");
        let subdir = dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();

        let source = CountingFs::default();
        let mut service = service(&source);
        let results = service
            .fingerprints_of_many(&[good.clone(), missing.clone(), subdir.clone()])
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[&good].is_ok());
        assert!(matches!(results[&missing], Err(Error::Io { .. })));
        assert!(!results.contains_key(&subdir));
        assert_eq!(service.store().len().unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_fingerprints_under_reports_dangling_link_per_path() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.bin");
        let broken = dir.path().join("broken.bin");
        fs::write(&good, "data").unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing.bin"), &broken).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&events);
        let mut service = FingerprintService::with_sink(
            Fingerprinter::default(),
            FingerprintStore::open_in_memory().unwrap(),
            move |event: FingerprintEvent| recorded.lock().unwrap().push(event),
        );
        let results = service.fingerprints_under(dir.path()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[&good].as_ref().unwrap().size, 4);
        assert!(matches!(results[&broken], Err(Error::Walk(_))));
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            FingerprintEvent::BatchCompleted { files: 2, failed: 1, .. }
        )));
    }

    #[test]
    fn test_cached_result_carries_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.bin");
        fs::write(&path, "twelve bytes").unwrap();
        let source = CountingFs::default();
        let mut service = service(&source);

        let computed = service.fingerprints_of(&path).unwrap();
        let cached = service.fingerprints_of_many(&[path.clone()]).unwrap();
        assert_eq!(computed.size, 12);
        assert_eq!(cached[&path].as_ref().unwrap(), &computed);
        assert_eq!(source.opens(&path), 3);
    }

    #[test]
    fn test_fingerprints_under_requires_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.bin");
        fs::write(&file, "data").unwrap();

        let source = CountingFs::default();
        let mut service = service(&source);
        assert!(service.fingerprints_under(&file).is_err());
    }

    #[test]
    fn test_events_report_hits_and_hashes() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, "aaa").unwrap();
        fs::write(&b, "bbb").unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&events);
        let mut service = FingerprintService::with_sink(
            Fingerprinter::default().with_threads(2),
            FingerprintStore::open_in_memory().unwrap(),
            move |event: FingerprintEvent| recorded.lock().unwrap().push(event),
        );

        service.fingerprints_of(&a).unwrap();
        service.fingerprints_of_many(&[a.clone(), b.clone()]).unwrap();

        let events = events.lock().unwrap();
        assert!(events.iter().any(
            |e| matches!(e, FingerprintEvent::CacheHit { path } if path == &a)
        ));
        assert!(events.iter().any(
            |e| matches!(e, FingerprintEvent::Hashed { path, size: 3 } if path == &b)
        ));
        let completed = events
            .iter()
            .rev()
            .find_map(|e| match e {
                FingerprintEvent::BatchCompleted {
                    files,
                    cached,
                    hashed,
                    failed,
                    ..
                } => Some((*files, *cached, *hashed, *failed)),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed, (2, 1, 1, 0));
    }
}
