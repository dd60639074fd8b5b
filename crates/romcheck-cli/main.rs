use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

use romcheck_core::hash::{BatchResults, LocalFs};
use romcheck_core::services::progress::{FingerprintEvent, ProgressSink};
use romcheck_core::{
    Catalog, CountryFilter, FingerprintService, FingerprintStore, Fingerprinter, Fingerprints,
    Game, RomFile, RomFileGroup,
};

type Service = FingerprintService<LocalFs, CliProgressSink>;

#[derive(Parser)]
#[command(name = "romcheck")]
#[command(about = "ROM verification - cached fingerprints matched against DAT catalogs")]
struct Cli {
    /// Show debug logging (cache hits, per-file hashing, etc.)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Emit progress events as JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    progress_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct HashOptions {
    /// Number of worker threads (default: all cores)
    #[arg(long, short = 't')]
    threads: Option<usize>,

    /// Fingerprint store location (default: ~/.romcheck/fingerprints.db)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint files or directories (directories are walked recursively)
    Hash {
        /// Files or directories to fingerprint
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        options: HashOptions,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Match files against a DAT catalog
    Match {
        /// DAT file (Logiqx XML or ClrMamePro)
        #[arg(long)]
        dat: PathBuf,

        /// Only keep games tagged with one of these countries, e.g. "USA"
        #[arg(long = "include-country")]
        include_countries: Vec<String>,

        /// Drop games tagged with any of these countries
        #[arg(long = "exclude-country")]
        exclude_countries: Vec<String>,

        /// Files or directories to match
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        options: HashOptions,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let progress_sink = CliProgressSink::new(cli.progress_json);

    match cli.command {
        Commands::Hash {
            paths,
            options,
            json,
        } => cmd_hash(&paths, &options, json, progress_sink),
        Commands::Match {
            dat,
            include_countries,
            exclude_countries,
            paths,
            options,
        } => {
            let filter = CountryFilter::new(include_countries, exclude_countries);
            cmd_match(&dat, &filter, &paths, &options, progress_sink)
        }
    }
}

fn open_service(options: &HashOptions, sink: CliProgressSink) -> Result<Service> {
    let store = match &options.db {
        Some(path) => FingerprintStore::open(path),
        None => FingerprintStore::open_default(),
    }
    .context("Failed to open fingerprint store")?;

    let threads = options.threads.unwrap_or_else(num_cpus::get);
    let engine = Fingerprinter::default().with_threads(threads);
    log::debug!("Fingerprinting with {} threads", engine.threads());

    Ok(FingerprintService::with_sink(engine, store, sink))
}

/// Fingerprint every path; directories contribute every file beneath them
fn fingerprint_paths(
    service: &mut Service,
    paths: &[PathBuf],
) -> Result<BatchResults<Fingerprints>> {
    let mut results = BatchResults::new();
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            results.extend(service.fingerprints_under(path)?);
        } else {
            files.push(path.clone());
        }
    }
    results.extend(service.fingerprints_of_many(&files)?);
    Ok(results)
}

#[derive(Serialize)]
struct HashRecord<'a> {
    path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha1: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crc32: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn cmd_hash(
    paths: &[PathBuf],
    options: &HashOptions,
    json: bool,
    sink: CliProgressSink,
) -> Result<()> {
    let mut service = open_service(options, sink)?;
    let results = fingerprint_paths(&mut service, paths)?;

    if json {
        let records: Vec<HashRecord> = results
            .iter()
            .map(|(path, result)| match result {
                Ok(sums) => HashRecord {
                    path,
                    sha1: Some(&sums.sha1),
                    crc32: Some(&sums.crc32),
                    size: Some(sums.size),
                    error: None,
                },
                Err(e) => HashRecord {
                    path,
                    sha1: None,
                    crc32: None,
                    size: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let mut failed = 0;
    for (path, result) in &results {
        match result {
            Ok(sums) => println!("{}  {}  {}", sums.crc32, sums.sha1, path.display()),
            Err(e) => {
                failed += 1;
                eprintln!("  Failed: {} - {}", path.display(), e);
            }
        }
    }

    eprintln!();
    eprintln!("Hashed {} files ({} failed)", results.len(), failed);
    Ok(())
}

fn cmd_match(
    dat_path: &Path,
    filter: &CountryFilter,
    paths: &[PathBuf],
    options: &HashOptions,
    sink: CliProgressSink,
) -> Result<()> {
    let catalog = Catalog::load(dat_path, filter)
        .with_context(|| format!("Failed to load DAT {}", dat_path.display()))?;

    eprintln!(
        "Loaded {} ({}): {} games, {} ROMs",
        catalog.name().unwrap_or("unnamed DAT"),
        catalog.format(),
        catalog.len(),
        catalog.rom_count()
    );

    let mut service = open_service(options, sink)?;
    let results = fingerprint_paths(&mut service, paths)?;
    let scanned = scanned_group(&results);

    let mut matched = 0;
    let mut misnamed = 0;
    let mut unmatched = Vec::new();
    let mut broken = Vec::new();

    for file in &scanned {
        if let Some(error) = &file.error {
            broken.push((file.pretty_path(), error.clone()));
            continue;
        }

        let games = games_for(&catalog, file);
        let Some(game) = games.first() else {
            unmatched.push(file.pretty_path());
            continue;
        };

        matched += 1;
        let expected = file
            .sha1
            .as_deref()
            .and_then(|sha1| game.file_by_sha1(sha1))
            .or_else(|| {
                let crc = file.crc32.as_deref()?;
                game.file_by_crc(crc, file.size?)
            });

        match expected {
            Some(rom) if rom.file_name() != file.file_name() => {
                misnamed += 1;
                println!(
                    "MISNAMED  {}  [{}]  expected {}",
                    file.pretty_path(),
                    game.name,
                    rom.file_name()
                );
            }
            _ => println!("OK        {}  [{}]", file.pretty_path(), game.name),
        }
        if games.len() > 1 {
            log::debug!("{} matches {} games", file.pretty_path(), games.len());
        }
    }

    for path in &unmatched {
        println!("UNKNOWN   {}", path);
    }
    for (path, error) in &broken {
        eprintln!("  Failed: {} - {}", path, error);
    }

    eprintln!();
    eprintln!(
        "Matched {} of {} files ({} misnamed, {} unknown, {} failed)",
        matched,
        scanned.len(),
        misnamed,
        unmatched.len(),
        broken.len()
    );
    Ok(())
}

/// Build the working set of scanned files from fingerprint results
fn scanned_group(results: &BatchResults<Fingerprints>) -> RomFileGroup {
    results
        .iter()
        .map(|(path, result)| {
            let file = RomFile::new(path.to_string_lossy());
            match result {
                Ok(sums) => file
                    .with_crc32(&sums.crc32)
                    .with_sha1(&sums.sha1)
                    .with_size(sums.size),
                Err(e) => file.with_error(e.to_string()),
            }
        })
        .collect()
}

/// Games containing `file`, by SHA1 first and then by CRC32 + size
fn games_for<'a>(catalog: &'a Catalog, file: &RomFile) -> Vec<&'a Game> {
    if let Some(sha1) = file.sha1.as_deref() {
        let games = catalog.find_games_by_sha1(sha1);
        if !games.is_empty() {
            return games;
        }
    }
    match (file.crc32.as_deref(), file.size) {
        (Some(crc), Some(size)) => catalog.find_games_by_checksum(crc, size),
        _ => Vec::new(),
    }
}

#[derive(Clone)]
struct CliProgressSink {
    json: bool,
}

impl CliProgressSink {
    fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit_json<T: Serialize>(&self, stream: &str, event: &T) {
        if !self.json {
            return;
        }

        match serde_json::to_string(&json!({ "stream": stream, "event": event })) {
            Ok(line) => eprintln!("{}", line),
            Err(err) => eprintln!("{{\"stream\":\"logger\",\"error\":\"{}\"}}", err),
        }
    }
}

impl ProgressSink<FingerprintEvent> for CliProgressSink {
    fn emit(&self, event: FingerprintEvent) {
        self.emit_json("fingerprint", &event);
    }
}
