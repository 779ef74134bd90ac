// Segment dump writers for the CLI `dump` flag: raw binary words in the
// configured endianness, hexadecimal text one word per line, or an ascii
// rendering of each word's bytes.

use crate::memory::{Endian, Memory};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    Binary,
    HexText,
    AsciiText,
}

impl DumpFormat {
    pub fn from_name(name: &str) -> Option<DumpFormat> {
        match name.to_ascii_lowercase().as_str() {
            "binary" => Some(DumpFormat::Binary),
            "hextext" => Some(DumpFormat::HexText),
            "asciitext" => Some(DumpFormat::AsciiText),
            _ => None,
        }
    }
}

/// Write the words in [first, last) to `path`.
pub fn dump_segment(
    memory: &mut Memory,
    first: u32,
    last: u32,
    format: DumpFormat,
    path: &Path,
) -> io::Result<()> {
    let mut file = File::create(path)?;
    let mut address = first;
    while address < last {
        let word = memory
            .get_word(address, false)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        match format {
            DumpFormat::Binary => {
                let bytes = match memory.endian() {
                    Endian::Little => (word as u32).to_le_bytes(),
                    Endian::Big => (word as u32).to_be_bytes(),
                };
                file.write_all(&bytes)?;
            }
            DumpFormat::HexText => {
                writeln!(file, "{:08x}", word as u32)?;
            }
            DumpFormat::AsciiText => {
                let rendered: String = (word as u32)
                    .to_le_bytes()
                    .iter()
                    .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                    .collect();
                writeln!(file, "{:08x}  {:08x}  {}", address, word as u32, rendered)?;
            }
        }
        address += 4;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Endian, Memory, MemoryLayout};

    #[test]
    fn format_names() {
        assert_eq!(DumpFormat::from_name("Binary"), Some(DumpFormat::Binary));
        assert_eq!(DumpFormat::from_name("HexText"), Some(DumpFormat::HexText));
        assert_eq!(DumpFormat::from_name("elf"), None);
    }

    #[test]
    fn hex_dump_contents() {
        let dir = std::env::temp_dir().join("emips-dump-test.txt");
        let mut memory = Memory::new(MemoryLayout::default_layout(), Endian::Little, false);
        memory.store_word(0x1001_0000, 0x0040_0004, false).unwrap();
        dump_segment(&mut memory, 0x1001_0000, 0x1001_0004, DumpFormat::HexText, &dir).unwrap();
        let text = std::fs::read_to_string(&dir).unwrap();
        assert_eq!(text.trim(), "00400004");
        let _ = std::fs::remove_file(&dir);
    }
}
