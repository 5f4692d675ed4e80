//! Package container module
//!
//! Installable packages come either as a PFS0 container (`.nsp`) or as an
//! unpacked directory holding the same entries. Both are read through the
//! explorer that hosts them.

pub mod directory;
pub mod pfs0;

pub use directory::DirectoryPackage;
pub use pfs0::Pfs0Package;

use thiserror::Error;

use crate::fs::{Explorer, ExplorerError, FileKind};

/// Errors that can occur while reading a package
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("Not a PFS0 container: {0}")]
    InvalidMagic(String),

    #[error("Truncated package: {0}")]
    Truncated(String),

    #[error("Invalid package: {0}")]
    Invalid(String),

    #[error("Package entry out of range: {0}")]
    EntryOutOfRange(usize),
}

/// A file stored inside a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    pub size: u64,
    /// Offset relative to the container's data region (0 for directories)
    pub offset: u64,
}

impl PackageEntry {
    pub fn kind(&self) -> FileKind {
        FileKind::from_name(&self.name)
    }
}

/// Check that an entry name is a single plain path component
pub fn is_plain_entry_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Read access to the entries of a package
pub trait Package {
    /// Real path of the package on its explorer
    fn source_path(&self) -> &str;

    fn entries(&self) -> &[PackageEntry];

    /// Read part of an entry, returning the bytes read (0 past the end)
    fn read_entry(
        &mut self,
        index: usize,
        offset: u64,
        buffer: &mut [u8],
    ) -> Result<usize, PackageError>;

    /// Index of the first entry of the given kind
    fn find_kind(&self, kind: FileKind) -> Option<usize> {
        self.entries().iter().position(|entry| entry.kind() == kind)
    }

    /// Read a whole entry into memory
    fn read_entry_to_end(&mut self, index: usize) -> Result<Vec<u8>, PackageError> {
        let size = self
            .entries()
            .get(index)
            .ok_or(PackageError::EntryOutOfRange(index))?
            .size as usize;
        let mut data = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let read = self.read_entry(index, filled as u64, &mut data[filled..])?;
            if read == 0 {
                return Err(PackageError::Truncated(format!(
                    "{}: entry {} ended after {} of {} bytes",
                    self.source_path(),
                    index,
                    filled,
                    size
                )));
            }
            filled += read;
        }
        Ok(data)
    }

    /// Sum of the entry sizes
    fn content_size(&self) -> u64 {
        self.entries().iter().map(|entry| entry.size).sum()
    }
}

/// Open the package at `path`, as a container file or an unpacked directory
pub fn open_package<'a>(
    explorer: &'a dyn Explorer,
    path: &str,
) -> Result<Box<dyn Package + 'a>, PackageError> {
    if explorer.is_directory(path) {
        Ok(Box::new(DirectoryPackage::open(explorer, path)?))
    } else {
        Ok(Box::new(Pfs0Package::open(explorer, path)?))
    }
}

/// Build a PFS0 image in memory
#[cfg(test)]
pub(crate) fn build_pfs0(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut string_table = Vec::new();
    let mut entry_table = Vec::new();
    let mut data = Vec::new();
    for (name, content) in files {
        entry_table.extend_from_slice(&(data.len() as u64).to_le_bytes());
        entry_table.extend_from_slice(&(content.len() as u64).to_le_bytes());
        entry_table.extend_from_slice(&(string_table.len() as u32).to_le_bytes());
        entry_table.extend_from_slice(&0u32.to_le_bytes());
        string_table.extend_from_slice(name.as_bytes());
        string_table.push(0);
        data.extend_from_slice(content);
    }
    while string_table.len() % 0x20 != 0 {
        string_table.push(0);
    }

    let mut image = Vec::new();
    image.extend_from_slice(b"PFS0");
    image.extend_from_slice(&(files.len() as u32).to_le_bytes());
    image.extend_from_slice(&(string_table.len() as u32).to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&entry_table);
    image.extend_from_slice(&string_table);
    image.extend_from_slice(&data);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::SdCardExplorer;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_plain_entry_names() {
        assert!(is_plain_entry_name("0123.cnmt.nca"));
        assert!(is_plain_entry_name("..hidden.nca"));
        for name in ["", ".", "..", "../x.nca", "a/b.nca", "a\\b.nca", "/tmp/x.nca"] {
            assert!(!is_plain_entry_name(name), "{:?} accepted", name);
        }
    }

    #[test]
    fn test_open_package_selects_format() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("game.nsp"),
            build_pfs0(&[("a.nca", b"aaaa"), ("a.tik", b"tt")]),
        )
        .unwrap();
        fs::create_dir(dir.path().join("unpacked")).unwrap();
        fs::write(dir.path().join("unpacked/a.nca"), b"aaaa").unwrap();
        fs::write(dir.path().join("unpacked/a.tik"), b"tt").unwrap();

        let explorer = SdCardExplorer::new(dir.path().to_str().unwrap());
        for name in ["game.nsp", "unpacked"] {
            let mut package = open_package(&explorer, &explorer.full_path_for(name)).unwrap();
            assert_eq!(package.entries().len(), 2);
            assert_eq!(package.content_size(), 6);
            let tik = package.find_kind(FileKind::Tik).unwrap();
            assert_eq!(package.read_entry_to_end(tik).unwrap(), b"tt");
            assert!(package.find_kind(FileKind::Cert).is_none());
        }
    }
}
