//! Logiqx XML format (used by No-Intro, Redump, TOSEC)

use super::ParsedDat;
use crate::error::{Error, Result};
use crate::rom::{Game, RomFile};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

pub(super) fn parse(xml: &str) -> Result<ParsedDat> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut dat = ParsedDat::default();
    let mut buf = Vec::new();
    let mut in_header = false;
    let mut current_text_target: Option<&str> = None;
    let mut current_game: Option<Game> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            Error::parse(format!(
                "Error parsing XML at position {}: {}",
                reader.error_position(),
                e
            ))
        })?;

        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"header" => in_header = true,
                b"name" if in_header => current_text_target = Some("name"),
                b"version" if in_header => current_text_target = Some("version"),
                b"game" | b"machine" => current_game = Some(start_game(&e)?),
                b"rom" | b"file" => add_rom(current_game.as_mut(), &e)?,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"game" | b"machine" => dat.games.push(start_game(&e)?),
                b"rom" | b"file" => add_rom(current_game.as_mut(), &e)?,
                _ => {}
            },
            Event::Text(e) => {
                if let Some(target) = current_text_target {
                    let text = e
                        .unescape()
                        .map_err(|e| Error::parse(format!("Invalid header text: {e}")))?
                        .to_string();
                    match target {
                        "name" => dat.name = Some(text),
                        "version" => dat.version = Some(text),
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                match e.name().as_ref() {
                    b"header" => in_header = false,
                    b"game" | b"machine" => {
                        if let Some(game) = current_game.take() {
                            dat.games.push(game);
                        }
                    }
                    _ => {}
                }
                current_text_target = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(game) = current_game {
        return Err(Error::parse(format!("Game '{}' is never closed", game.name)));
    }

    Ok(dat)
}

fn start_game(e: &BytesStart<'_>) -> Result<Game> {
    let name = attribute(e, b"name")?
        .ok_or_else(|| Error::parse("Game element without a name attribute"))?;
    Ok(Game::new(name))
}

/// Parse a rom element into the current game. Roms outside a game are ignored.
fn add_rom(game: Option<&mut Game>, e: &BytesStart<'_>) -> Result<()> {
    let Some(game) = game else {
        return Ok(());
    };

    let mut rom: Option<RomFile> = None;
    let mut size = None;
    let (mut crc, mut md5, mut sha1) = (String::new(), String::new(), String::new());

    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::parse(format!("Invalid attribute: {e}")))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::parse(format!("Invalid attribute value: {e}")))?
            .to_string();

        match attr.key.as_ref() {
            b"name" => rom = Some(RomFile::new(value)),
            b"size" => {
                size = Some(value.parse::<u64>().map_err(|_| {
                    Error::parse(format!("Invalid ROM size '{value}' in game '{}'", game.name))
                })?);
            }
            b"crc" => crc = value,
            b"md5" => md5 = value,
            b"sha1" => sha1 = value,
            _ => {}
        }
    }

    let rom = rom.ok_or_else(|| {
        Error::parse(format!("ROM without a name attribute in game '{}'", game.name))
    })?;
    let mut rom = rom.with_crc32(&crc).with_md5(&md5).with_sha1(&sha1);
    if let Some(size) = size {
        rom = rom.with_size(size);
    }
    game.add_file(rom);
    Ok(())
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::parse(format!("Invalid attribute: {e}")))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::parse(format!("Invalid attribute value: {e}")))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_dat() {
        let xml = r#"<?xml version="1.0"?>
<datafile>
  <header>
    <name>Test DAT</name>
    <version>2025-01-30</version>
  </header>
  <game name="Test Game">
    <description>Test Game</description>
    <rom name="test.rom" size="1024" crc="ABCD1234" md5="1234567890ABCDEF1234567890ABCDEF" sha1="abc123"/>
  </game>
</datafile>"#;

        let dat = parse(xml).unwrap();
        assert_eq!(dat.name.as_deref(), Some("Test DAT"));
        assert_eq!(dat.version.as_deref(), Some("2025-01-30"));
        assert_eq!(dat.games.len(), 1);

        let game = &dat.games[0];
        assert_eq!(game.name, "Test Game");
        let rom = game.files.iter().next().unwrap();
        assert_eq!(rom.path, "test.rom");
        assert_eq!(rom.size, Some(1024));
        assert_eq!(rom.crc32.as_deref(), Some("abcd1234"));
        assert_eq!(rom.md5.as_deref(), Some("1234567890abcdef1234567890abcdef"));
        assert_eq!(rom.sha1.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_multi_rom_game() {
        let xml = r#"<datafile>
  <game name="Multi Disk Game">
    <rom name="disk2.adf" size="901120" crc="22222222"/>
    <rom name="disk1.adf" size="901120" crc="11111111"/>
    <rom name="disk3.adf" size="901120" crc="33333333"></rom>
  </game>
</datafile>"#;

        let dat = parse(xml).unwrap();
        let names: Vec<&str> = dat.games[0].files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(names, vec!["disk1.adf", "disk2.adf", "disk3.adf"]);
    }

    #[test]
    fn test_parse_machine_with_file_elements() {
        let xml = r#"<datafile>
  <machine name="Pac-Man (Midway)">
    <file name="pacman.6e" size="4096" crc="C1E6AB10"/>
    <file name="pacman.6f" size="4096" crc="1A6FB2D4"></file>
  </machine>
  <machine name="Empty Board"/>
</datafile>"#;

        let dat = parse(xml).unwrap();
        assert_eq!(dat.games.len(), 2);

        let pacman = &dat.games[0];
        assert_eq!(pacman.name, "Pac-Man (Midway)");
        assert_eq!(pacman.files.len(), 2);
        let rom = pacman.file_by_crc("c1e6ab10", 4096).unwrap();
        assert_eq!(rom.path, "pacman.6e");

        assert_eq!(dat.games[1].name, "Empty Board");
        assert!(dat.games[1].files.is_empty());
    }

    #[test]
    fn test_missing_fields_default_to_none() {
        let xml = r#"<datafile><game name="Sparse"><rom name="a.bin"/></game></datafile>"#;

        let dat = parse(xml).unwrap();
        let rom = dat.games[0].files.iter().next().unwrap();
        assert_eq!(rom.size, None);
        assert_eq!(rom.crc32, None);
        assert_eq!(rom.md5, None);
        assert_eq!(rom.sha1, None);
    }

    #[test]
    fn test_escaped_names() {
        let xml = r#"<datafile><game name="Tom &amp; Jerry (USA)"><rom name="Tom &amp; Jerry (USA).gb" size="1" crc="00000000"/></game></datafile>"#;

        let dat = parse(xml).unwrap();
        assert_eq!(dat.games[0].name, "Tom & Jerry (USA)");
        assert_eq!(dat.games[0].files.iter().next().unwrap().path, "Tom & Jerry (USA).gb");
    }

    #[test]
    fn test_game_without_name_is_error() {
        let xml = r#"<datafile><game><rom name="a.bin" size="1"/></game></datafile>"#;
        assert!(matches!(parse(xml), Err(Error::Parse(_))));
    }

    #[test]
    fn test_rom_without_name_is_error() {
        let xml = r#"<datafile><game name="G"><rom size="1"/></game></datafile>"#;
        assert!(matches!(parse(xml), Err(Error::Parse(_))));
    }

    #[test]
    fn test_invalid_size_is_error() {
        let xml = r#"<datafile><game name="G"><rom name="a" size="big"/></game></datafile>"#;
        assert!(matches!(parse(xml), Err(Error::Parse(_))));
    }

    #[test]
    fn test_mismatched_tags_are_error() {
        let xml = r#"<datafile><game name="G"><rom name="a" size="1"/></datafile>"#;
        assert!(matches!(parse(xml), Err(Error::Parse(_))));
    }
}
