pub mod fingerprints;
pub mod progress;
