use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// A single `KEY = VALUE / comment` card, or a commentary/history line with
/// no `=`, which is read but not indexed.
#[derive(Debug, Clone)]
struct Card {
    name: String,
    value: String,
}

/// The primary header unit's cards. We never read pixel data: the guide
/// worker only needs the keywords that make up the observing key plus the
/// declination string.
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    cards: Vec<Card>,
}

const BLOCK_LEN: usize = 2880;
const CARD_LEN: usize = 80;

impl FitsHeader {
    /// Reads just the primary header of a FITS file, stopping at `END`.
    /// Pixel data is never touched.
    pub fn read_from_path(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        Self::read(&mut BufReader::new(file))
    }

    pub fn read(stream: &mut impl Read) -> anyhow::Result<Self> {
        let mut buf = [0u8; BLOCK_LEN];
        let mut cards = Vec::new();
        loop {
            stream.read_exact(&mut buf)?;
            let mut ended = false;
            for line in buf.chunks(CARD_LEN) {
                let line = std::str::from_utf8(line)?.trim_end();
                if line.trim() == "END" {
                    ended = true;
                    continue;
                }
                if let Some((key, value_and_comment)) = line.split_once('=') {
                    let value_and_comment = value_and_comment.trim();
                    let (value, _comment) = value_and_comment
                        .split_once('/')
                        .unwrap_or((value_and_comment, ""));
                    cards.push(Card { name: key.trim().to_string(), value: value.trim().to_string() });
                }
            }
            if ended {
                break;
            }
        }
        Ok(Self { cards })
    }

    fn get<T: FromStr>(&self, key: &str) -> Option<T> {
        self.cards.iter()
            .find(|card| card.name.eq_ignore_ascii_case(key))
            .and_then(|card| card.value.parse().ok())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)
    }

    /// String-valued cards are single-quoted in FITS; this strips the
    /// quotes and surrounding whitespace.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let raw = self.cards.iter()
            .find(|card| card.name.eq_ignore_ascii_case(key))?
            .value.as_str();
        let trimmed = raw.trim();
        let unquoted = if trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2 {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        };
        Some(unquoted.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_header(cards: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for card in cards {
            let mut line = card.to_string();
            line.truncate(CARD_LEN);
            while line.len() < CARD_LEN {
                line.push(' ');
            }
            out.extend_from_slice(line.as_bytes());
        }
        let mut end_line = "END".to_string();
        while end_line.len() < CARD_LEN {
            end_line.push(' ');
        }
        out.extend_from_slice(end_line.as_bytes());
        while out.len() % BLOCK_LEN != 0 {
            out.push(b' ');
        }
        out
    }

    #[test]
    fn parses_keyword_value_pairs() {
        let bytes = fake_header(&[
            "OBJECT  = 'M31'                / target field",
            "XBINNING= 2",
            "DEC     = '42 30 15.00'",
        ]);
        let mut cursor = std::io::Cursor::new(bytes);
        let header = FitsHeader::read(&mut cursor).unwrap();
        assert_eq!(header.get_str("OBJECT").unwrap(), "M31");
        assert_eq!(header.get_i64("XBINNING"), Some(2));
        assert_eq!(header.get_str("DEC").unwrap(), "42 30 15.00");
    }

    #[test]
    fn missing_keyword_returns_none() {
        let bytes = fake_header(&["OBJECT  = 'M31'"]);
        let mut cursor = std::io::Cursor::new(bytes);
        let header = FitsHeader::read(&mut cursor).unwrap();
        assert!(header.get_i64("NOPE").is_none());
    }

    #[test]
    fn header_spanning_multiple_blocks_is_read_fully() {
        let mut cards = Vec::new();
        for i in 0..50 {
            cards.push(format!("KEY{i:03}  = {i}"));
        }
        let card_refs: Vec<&str> = cards.iter().map(String::as_str).collect();
        let bytes = fake_header(&card_refs);
        assert!(bytes.len() > BLOCK_LEN, "test fixture should span multiple 2880-byte blocks");
        let mut cursor = std::io::Cursor::new(bytes);
        let header = FitsHeader::read(&mut cursor).unwrap();
        assert_eq!(header.get_i64("KEY049"), Some(49));
    }
}
