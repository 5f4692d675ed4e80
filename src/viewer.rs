//! Text and hex renderings of file contents

use crate::fs::{Explorer, ExplorerError, FileMode};

/// Bytes shown per hex dump line
pub const HEX_BYTES_PER_LINE: usize = 16;

/// Largest span rendered by a single view request
pub const MAX_VIEW_SIZE: usize = 0x10000;

/// Detected text encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl TextEncoding {
    /// Guess the encoding of `data`, or None if it does not look like text
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        match data {
            [0xEF, 0xBB, 0xBF, ..] => return Some(Self::Utf8Bom),
            [0xFF, 0xFE, ..] => return Some(Self::Utf16Le),
            [0xFE, 0xFF, ..] => return Some(Self::Utf16Be),
            _ => {}
        }

        let printable = |b: u8| b.is_ascii_graphic() || b.is_ascii_whitespace();
        let ratio = |count: usize| count as f64 / data.len() as f64;

        if std::str::from_utf8(data).is_ok() {
            let ascii = data.iter().filter(|&&b| printable(b) || b >= 0x80).count();
            if ratio(ascii) > 0.85 {
                return Some(Self::Utf8);
            }
        }

        let latin1 = data.iter().filter(|&&b| printable(b) || b >= 0xA0).count();
        if ratio(latin1) > 0.85 {
            return Some(Self::Latin1);
        }
        None
    }

    pub fn decode(&self, data: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Self::Utf8Bom => String::from_utf8_lossy(&data[3.min(data.len())..]).into_owned(),
            Self::Utf16Le | Self::Utf16Be => {
                let units: Vec<u16> = data[2.min(data.len())..]
                    .chunks_exact(2)
                    .map(|pair| match self {
                        Self::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                        _ => u16::from_be_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Self::Latin1 => data.iter().map(|&b| b as char).collect(),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf8Bom => "UTF-8 (BOM)",
            Self::Utf16Le => "UTF-16 LE",
            Self::Utf16Be => "UTF-16 BE",
            Self::Latin1 => "Latin-1",
        }
    }
}

/// Format `data` as offset / hex / ASCII columns
pub fn hex_dump(data: &[u8], offset: u64) -> Vec<String> {
    data.chunks(HEX_BYTES_PER_LINE)
        .enumerate()
        .map(|(index, line)| {
            let mut hex = String::with_capacity(HEX_BYTES_PER_LINE * 3 + 1);
            for column in 0..HEX_BYTES_PER_LINE {
                if column == 8 {
                    hex.push(' ');
                }
                match line.get(column) {
                    Some(byte) => hex.push_str(&format!("{:02X} ", byte)),
                    None => hex.push_str("   "),
                }
            }
            let ascii: String = line
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!(
                "{:08X}  {} {}",
                offset + (index * HEX_BYTES_PER_LINE) as u64,
                hex,
                ascii
            )
        })
        .collect()
}

/// Read up to `length` bytes at `offset` through a scoped handle
pub fn read_span(
    explorer: &dyn Explorer,
    path: &str,
    offset: u64,
    length: usize,
) -> Result<Vec<u8>, ExplorerError> {
    let size = explorer.get_file_size(path)?;
    if offset >= size {
        return Ok(Vec::new());
    }
    let length = length.min(MAX_VIEW_SIZE).min((size - offset) as usize);
    let mut handle = explorer.open_file(path, FileMode::Read)?;
    handle.read_exact_at(offset, length)
}
