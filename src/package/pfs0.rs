//! PFS0 (NSP) container reader

use super::{is_plain_entry_name, Package, PackageEntry, PackageError};
use crate::fs::{Explorer, FileHandle, FileMode};

/// PFS0 header size
const HEADER_SIZE: u64 = 0x10;

/// Size of one file entry in the entry table
const ENTRY_SIZE: u64 = 0x18;

/// Upper bound on the entry count accepted from a header
const MAX_ENTRIES: u32 = 0x1000;

/// PFS0 container opened through a scoped explorer handle
pub struct Pfs0Package<'a> {
    handle: FileHandle<'a>,
    entries: Vec<PackageEntry>,
    data_offset: u64,
}

impl<'a> Pfs0Package<'a> {
    /// Parse the header and entry table of the container at `path`
    pub fn open(explorer: &'a dyn Explorer, path: &str) -> Result<Self, PackageError> {
        let file_size = explorer.get_file_size(path)?;
        let mut handle = explorer.open_file(path, FileMode::Read)?;

        if file_size < HEADER_SIZE {
            return Err(PackageError::Truncated(format!("{} is {} bytes", path, file_size)));
        }
        let header = handle.read_exact_at(0, HEADER_SIZE as usize)?;
        if &header[0..4] != b"PFS0" {
            return Err(PackageError::InvalidMagic(path.to_string()));
        }

        let entry_count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let string_table_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if entry_count > MAX_ENTRIES {
            return Err(PackageError::Invalid(format!(
                "{} declares {} entries",
                path, entry_count
            )));
        }

        let table_size = entry_count as u64 * ENTRY_SIZE;
        let data_offset = HEADER_SIZE + table_size + string_table_size as u64;
        if data_offset > file_size {
            return Err(PackageError::Truncated(format!(
                "{}: header needs {} bytes, file has {}",
                path, data_offset, file_size
            )));
        }

        let table = handle.read_exact_at(HEADER_SIZE, table_size as usize)?;
        let strings = handle.read_exact_at(HEADER_SIZE + table_size, string_table_size as usize)?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for raw in table.chunks_exact(ENTRY_SIZE as usize) {
            let offset = u64::from_le_bytes([
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ]);
            let size = u64::from_le_bytes([
                raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
            ]);
            let name_offset = u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]) as usize;

            let name = read_name(&strings, name_offset).ok_or_else(|| {
                PackageError::Invalid(format!("{}: bad name offset {}", path, name_offset))
            })?;
            if !is_plain_entry_name(&name) {
                return Err(PackageError::Invalid(format!("{}: unsafe entry name {:?}", path, name)));
            }
            if entries.iter().any(|e: &PackageEntry| e.name == name) {
                return Err(PackageError::Invalid(format!("{}: duplicate entry {}", path, name)));
            }

            let end = data_offset
                .checked_add(offset)
                .and_then(|start| start.checked_add(size));
            if end.map_or(true, |end| end > file_size) {
                return Err(PackageError::Truncated(format!(
                    "{}: entry {} extends past end of file",
                    path, name
                )));
            }

            entries.push(PackageEntry { name, size, offset });
        }

        log::debug!("Opened PFS0 {} with {} entries", path, entries.len());

        Ok(Self {
            handle,
            entries,
            data_offset,
        })
    }
}

fn read_name(strings: &[u8], offset: usize) -> Option<String> {
    let tail = strings.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    let name = String::from_utf8_lossy(&tail[..end]).to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

impl Package for Pfs0Package<'_> {
    fn source_path(&self) -> &str {
        self.handle.path()
    }

    fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    fn read_entry(
        &mut self,
        index: usize,
        offset: u64,
        buffer: &mut [u8],
    ) -> Result<usize, PackageError> {
        let entry = self
            .entries
            .get(index)
            .ok_or(PackageError::EntryOutOfRange(index))?;
        if offset >= entry.size {
            return Ok(0);
        }
        let length = buffer.len().min((entry.size - offset) as usize);
        let position = self.data_offset + entry.offset + offset;
        Ok(self.handle.read_block(position, &mut buffer[..length])?)
    }
}
