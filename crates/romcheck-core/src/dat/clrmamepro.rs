//! ClrMamePro line-oriented format
//!
//! ```text
//! clrmamepro (
//!     name "System Name"
//!     version 20240101-000000
//! )
//!
//! game (
//!     name "Game Name (Region)"
//!     rom ( name "Game Name (Region).ext" size 12345 crc AABBCCDD sha1 ... )
//! )
//! ```
//!
//! `rom` records are always on a single line.

use super::ParsedDat;
use crate::error::{Error, Result};
use crate::rom::{Game, RomFile};

enum State {
    Idle,
    InHeader,
    InGame(Game),
    /// Any other top-level block (e.g. `resource (`), skipped
    InOther,
}

pub(super) fn parse(content: &str) -> Result<ParsedDat> {
    let mut dat = ParsedDat::default();
    let mut state = State::Idle;
    let mut opened_at = 0;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed == ")" {
            match std::mem::replace(&mut state, State::Idle) {
                State::Idle => {
                    return Err(Error::parse(format!("Line {line_no}: unmatched ')'")));
                }
                State::InGame(game) => {
                    if game.name.is_empty() {
                        return Err(Error::parse(format!(
                            "Game starting at line {opened_at} has no name"
                        )));
                    }
                    dat.games.push(game);
                }
                State::InHeader | State::InOther => {}
            }
            continue;
        }

        if let Some(block) = block_start(trimmed) {
            if !matches!(state, State::Idle) {
                return Err(Error::parse(format!(
                    "Line {line_no}: '{block} (' opened inside another block"
                )));
            }
            state = match block.as_str() {
                "clrmamepro" => State::InHeader,
                "game" | "machine" => State::InGame(Game::new("")),
                _ => State::InOther,
            };
            opened_at = line_no;
            continue;
        }

        let tokens = tokenize(trimmed);
        let Some(key) = tokens.first() else {
            continue;
        };

        match &mut state {
            State::Idle => {
                log::debug!("Ignoring line {line_no} outside any block: {trimmed}");
            }
            State::InHeader => match key.as_str() {
                "name" => dat.name = tokens.get(1).cloned(),
                "version" => dat.version = tokens.get(1).cloned(),
                _ => {}
            },
            State::InGame(game) => match key.as_str() {
                "name" => {
                    game.name = tokens.get(1).cloned().ok_or_else(|| {
                        Error::parse(format!("Line {line_no}: name without a value"))
                    })?;
                }
                "rom" => {
                    let rom = parse_rom(&tokens[1..])
                        .map_err(|msg| Error::parse(format!("Line {line_no}: {msg}")))?;
                    game.add_file(rom);
                }
                _ => {}
            },
            State::InOther => {}
        }
    }

    if !matches!(state, State::Idle) {
        return Err(Error::parse(format!(
            "Block opened at line {opened_at} is never closed"
        )));
    }

    Ok(dat)
}

/// Detect a block start like `clrmamepro (` or `game (`
fn block_start(line: &str) -> Option<String> {
    let block = line.strip_suffix('(')?.trim();
    if !block.is_empty() && block.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Some(block.to_lowercase())
    } else {
        None
    }
}

/// Parse the tokens after `rom`: `( name "x" size 1 crc AABBCCDD ... )`
fn parse_rom(tokens: &[String]) -> std::result::Result<RomFile, String> {
    let inner = tokens
        .strip_prefix(&["(".to_string()])
        .and_then(|t| t.strip_suffix(&[")".to_string()]))
        .ok_or("rom record must be a single '( ... )' line")?;

    let mut name = None;
    let mut size = None;
    let mut crc = None;
    let (mut md5, mut sha1) = ("", "");

    for pair in inner.chunks(2) {
        let [key, value] = pair else {
            return Err(format!("rom field '{}' has no value", pair[0]));
        };
        match key.as_str() {
            "name" => name = Some(value.as_str()),
            "size" => {
                size = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid rom size '{value}'"))?,
                );
            }
            "crc" => crc = Some(value.as_str()),
            "md5" => md5 = value.as_str(),
            "sha1" => sha1 = value.as_str(),
            _ => {}
        }
    }

    let name = name.ok_or("rom record without a name")?;
    let size = size.ok_or("rom record without a size")?;
    let crc = crc.ok_or("rom record without a crc")?;

    Ok(RomFile::new(name)
        .with_size(size)
        .with_crc32(crc)
        .with_md5(md5)
        .with_sha1(sha1))
}

/// Split on whitespace, keeping double-quoted strings together (quotes removed)
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut token = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }

    tokens
}
