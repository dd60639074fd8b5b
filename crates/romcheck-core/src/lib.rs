//! Romcheck - ROM verification against DAT catalogs
//!
//! Core library providing cached file fingerprinting, DAT parsing, and
//! catalog lookups.

pub mod dat;
pub mod db;
pub mod error;
pub mod hash;
pub mod rom;
pub mod services;

pub use dat::{Catalog, CountryFilter, DatFormat};
pub use db::{CacheEntry, FingerprintStore, InsertOutcome};
pub use error::{Error, Result};
pub use hash::{Fingerprinter, Fingerprints};
pub use rom::{Game, RomFile, RomFileGroup};
pub use services::fingerprints::FingerprintService;
