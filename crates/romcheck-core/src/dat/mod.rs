//! DAT catalog - Logiqx XML and ClrMamePro parsing, checksum indices

mod clrmamepro;
mod xml;

use crate::error::{Error, Result};
use crate::rom::Game;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// First-line marker of the ClrMamePro format
const CLRMAMEPRO_MARKER: &str = "clrmamepro";

/// Source format of a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatFormat {
    Logiqx,
    ClrMamePro,
}

impl fmt::Display for DatFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatFormat::Logiqx => write!(f, "Logiqx XML"),
            DatFormat::ClrMamePro => write!(f, "ClrMamePro"),
        }
    }
}

/// Parser output before filtering and indexing
#[derive(Debug, Default)]
struct ParsedDat {
    name: Option<String>,
    version: Option<String>,
    games: Vec<Game>,
}

/// Country allow/deny lists, matched against `(Country)` markers in game names
#[derive(Debug, Clone, Default)]
pub struct CountryFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl CountryFilter {
    /// A filter that keeps every game
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// With a non-empty include list, a game must carry one of its markers.
    /// A game carrying any excluded marker is always dropped.
    pub fn keeps(&self, game_name: &str) -> bool {
        let has_marker = |country: &String| game_name.contains(&format!("({country})"));
        if !self.include.is_empty() && !self.include.iter().any(has_marker) {
            return false;
        }
        !self.exclude.iter().any(has_marker)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// A parsed catalog of games with lookup indices.
///
/// Indices are built after filtering, so games removed by the country
/// filter are unreachable through every query.
#[derive(Debug)]
pub struct Catalog {
    name: Option<String>,
    version: Option<String>,
    format: DatFormat,
    /// Sorted by name
    games: Vec<Game>,
    /// CRC32 → (size, game index), sizes disambiguate CRC collisions
    by_crc32: HashMap<String, Vec<(Option<u64>, usize)>>,
    /// MD5 → game indices
    by_md5: HashMap<String, Vec<usize>>,
    /// SHA1 → game indices
    by_sha1: HashMap<String, Vec<usize>>,
}

impl Catalog {
    /// Load a DAT file, detecting its format from the first line
    pub fn load(path: &Path, filter: &CountryFilter) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        log::info!("Loading DAT {}", path.display());
        Self::parse(&content, filter)
    }

    /// Parse DAT content, detecting its format from the first line
    pub fn parse(content: &str, filter: &CountryFilter) -> Result<Self> {
        // Strip UTF-8 BOM if present
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        let format = detect_format(content);
        log::debug!("Parsing DAT as {format}");
        let parsed = match format {
            DatFormat::ClrMamePro => clrmamepro::parse(content)?,
            DatFormat::Logiqx => xml::parse(content)?,
        };

        Ok(Self::build(parsed, format, filter))
    }

    fn build(parsed: ParsedDat, format: DatFormat, filter: &CountryFilter) -> Self {
        let ParsedDat {
            name,
            version,
            mut games,
        } = parsed;
        log::info!("Parsed {} total games", games.len());

        let before = games.len();
        games.retain(|g| filter.keeps(&g.name));
        let removed = before - games.len();
        if removed > 0 {
            log::info!("Removed {removed} games due to country include/exclude settings");
        }
        games.sort_by(|a, b| a.name.cmp(&b.name));

        let mut catalog = Self {
            name,
            version,
            format,
            games,
            by_crc32: HashMap::new(),
            by_md5: HashMap::new(),
            by_sha1: HashMap::new(),
        };
        catalog.build_indices();
        catalog
    }

    fn build_indices(&mut self) {
        for (gi, game) in self.games.iter().enumerate() {
            for rom in &game.files {
                if let Some(ref crc) = rom.crc32 {
                    let entries = self.by_crc32.entry(crc.clone()).or_default();
                    if !entries.contains(&(rom.size, gi)) {
                        entries.push((rom.size, gi));
                    }
                }
                if let Some(ref md5) = rom.md5 {
                    push_unique(self.by_md5.entry(md5.clone()).or_default(), gi);
                }
                if let Some(ref sha1) = rom.sha1 {
                    push_unique(self.by_sha1.entry(sha1.clone()).or_default(), gi);
                }
            }
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn format(&self) -> DatFormat {
        self.format
    }

    /// Games sorted by name
    pub fn games(&self) -> &[Game] {
        &self.games
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Total number of ROM entries across all games
    pub fn rom_count(&self) -> usize {
        self.games.iter().map(|g| g.files.len()).sum()
    }

    /// Games with a ROM matching both CRC32 and size
    pub fn find_games_by_checksum(&self, crc32: &str, size: u64) -> Vec<&Game> {
        let Some(entries) = self.by_crc32.get(&crc32.to_ascii_lowercase()) else {
            return Vec::new();
        };
        let mut indices: Vec<usize> = Vec::new();
        for &(rom_size, gi) in entries {
            if rom_size == Some(size) {
                push_unique(&mut indices, gi);
            }
        }
        self.resolve(&indices)
    }

    pub fn find_games_by_md5(&self, md5: &str) -> Vec<&Game> {
        self.lookup(&self.by_md5, md5)
    }

    pub fn find_games_by_sha1(&self, sha1: &str) -> Vec<&Game> {
        self.lookup(&self.by_sha1, sha1)
    }

    /// Games with a ROM matching an MD5 (32 hex digits) or SHA1 (40 hex digits)
    pub fn find_games_by_hash(&self, hash: &str) -> Vec<&Game> {
        match hash.len() {
            32 => self.find_games_by_md5(hash),
            40 => self.find_games_by_sha1(hash),
            _ => Vec::new(),
        }
    }

    /// First game with exactly this name
    pub fn find_game_by_name(&self, name: &str) -> Option<&Game> {
        self.games.iter().find(|g| g.name == name)
    }

    fn lookup(&self, index: &HashMap<String, Vec<usize>>, hash: &str) -> Vec<&Game> {
        index
            .get(&hash.to_ascii_lowercase())
            .map(|indices| self.resolve(indices))
            .unwrap_or_default()
    }

    fn resolve(&self, indices: &[usize]) -> Vec<&Game> {
        indices.iter().map(|&gi| &self.games[gi]).collect()
    }
}

fn detect_format(content: &str) -> DatFormat {
    let first_line = content.lines().next().unwrap_or_default();
    if first_line.trim_start().starts_with(CLRMAMEPRO_MARKER) {
        DatFormat::ClrMamePro
    } else {
        DatFormat::Logiqx
    }
}

fn push_unique(indices: &mut Vec<usize>, gi: usize) {
    if indices.last() != Some(&gi) {
        indices.push(gi);
    }
}
