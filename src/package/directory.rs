//! Unpacked package directory reader

use super::{Package, PackageEntry, PackageError};
use crate::fs::{join_path, Explorer, FileHandle, FileMode};

/// Package whose entries are the files of a directory
pub struct DirectoryPackage<'a> {
    explorer: &'a dyn Explorer,
    path: String,
    entries: Vec<PackageEntry>,
    /// Handle on the entry read last, kept for sequential block reads
    open: Option<(usize, FileHandle<'a>)>,
}

impl<'a> DirectoryPackage<'a> {
    pub fn open(explorer: &'a dyn Explorer, path: &str) -> Result<Self, PackageError> {
        let path = explorer.cursor().resolve(path)?;
        let mut entries = Vec::new();
        for name in explorer.list_files(&path) {
            let size = explorer.get_file_size(&join_path(&path, &name))?;
            entries.push(PackageEntry {
                name,
                size,
                offset: 0,
            });
        }
        if entries.is_empty() {
            return Err(PackageError::Invalid(format!("{} contains no files", path)));
        }
        Ok(Self {
            explorer,
            path,
            entries,
            open: None,
        })
    }
}

impl Package for DirectoryPackage<'_> {
    fn source_path(&self) -> &str {
        &self.path
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

        if !matches!(self.open, Some((current, _)) if current == index) {
            let explorer = self.explorer;
            let file_path = join_path(&self.path, &entry.name);
            // Replacing the slot drops (and releases) the previous handle
            self.open = Some((index, explorer.open_file(&file_path, FileMode::Read)?));
        }

        let length = buffer.len().min((entry.size - offset) as usize);
        match self.open.as_mut() {
            Some((_, handle)) => Ok(handle.read_block(offset, &mut buffer[..length])?),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::SdCardExplorer;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_entries_sorted_and_readable() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/b.nca"), b"bbbb").unwrap();
        fs::write(dir.path().join("pkg/A.tik"), b"ticket").unwrap();
        fs::create_dir(dir.path().join("pkg/nested")).unwrap();

        let explorer = SdCardExplorer::new(dir.path().to_str().unwrap());
        let mut package = DirectoryPackage::open(&explorer, "pkg").unwrap();
        let names: Vec<&str> = package.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A.tik", "b.nca"]);

        let mut buf = [0u8; 3];
        assert_eq!(package.read_entry(1, 1, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"bbb");
        assert_eq!(package.read_entry(0, 0, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"tic");
        assert_eq!(package.read_entry_to_end(0).unwrap(), b"ticket");
    }

    #[test]
    fn test_empty_directory_is_invalid() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        let explorer = SdCardExplorer::new(dir.path().to_str().unwrap());
        assert!(matches!(
            DirectoryPackage::open(&explorer, "empty"),
            Err(PackageError::Invalid(_))
        ));
    }
}
