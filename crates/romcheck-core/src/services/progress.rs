use serde::Serialize;
use std::path::PathBuf;

/// Events emitted while fingerprinting files
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum FingerprintEvent {
    BatchStarted {
        files: u64,
    },
    CacheHit {
        path: PathBuf,
    },
    Hashed {
        path: PathBuf,
        size: u64,
    },
    /// The store held different fingerprints for the same key
    CacheReplaced {
        path: PathBuf,
    },
    BatchCompleted {
        files: u64,
        cached: u64,
        hashed: u64,
        failed: u64,
        duration_ms: u128,
    },
}

pub trait ProgressSink<E>: Send + Sync + 'static {
    fn emit(&self, event: E);
}

impl<E> ProgressSink<E> for ()
where
    E: Send,
{
    fn emit(&self, _event: E) {}
}

impl<E, F> ProgressSink<E> for F
where
    E: Send,
    F: Fn(E) + Send + Sync + 'static,
{
    fn emit(&self, event: E) {
        (self)(event);
    }
}
