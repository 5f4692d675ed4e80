//! Backend trait and implementations for the storage primitives
//!
//! A backend only knows how to act on its own real paths. Navigation,
//! root confinement and write policy live in the explorer layer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Type of an existing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Access mode requested when opening a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    /// Create or truncate
    Write,
    /// Create or append
    Append,
}

/// An open file on a backend
pub trait BackendFile: Send {
    /// Read up to `buf.len()` bytes at `offset`, returning the number read
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Append data at the current write position
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush pending writes
    fn flush(&mut self) -> io::Result<()>;
}

/// Primitive filesystem operations over a backend's real paths
pub trait Backend: Send {
    /// Type of the entry at `path`, or None if nothing is there
    fn kind(&self, path: &str) -> Option<EntryKind>;

    /// Names (not paths) of the entries directly inside `path`
    fn read_dir(&self, path: &str) -> io::Result<Vec<String>>;

    /// Size in bytes of the file at `path`
    fn file_size(&self, path: &str) -> io::Result<u64>;

    /// Open the file at `path`
    fn open(&self, path: &str, mode: FileMode) -> io::Result<Box<dyn BackendFile>>;

    /// Create a directory (parents included)
    fn create_directory(&self, path: &str) -> io::Result<()>;

    /// Delete a single file
    fn delete_file(&self, path: &str) -> io::Result<()>;

    /// Delete a directory and everything below it
    fn delete_directory(&self, path: &str) -> io::Result<()>;

    /// Move an entry, without any collision check
    fn rename(&self, old: &str, new: &str) -> io::Result<()>;
}

/// File opened on the host filesystem
struct HostFile {
    file: File,
}

impl BackendFile for HostFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let read = self.file.read(&mut buf[total..])?;
            if read == 0 {
                break;
            }
            total += read;
        }
        Ok(total)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_host_file(path: &Path, mode: FileMode) -> io::Result<Box<dyn BackendFile>> {
    let file = match mode {
        FileMode::Read => File::open(path)?,
        FileMode::Write => File::create(path)?,
        FileMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
    };
    Ok(Box::new(HostFile { file }))
}

fn host_kind(path: &Path) -> Option<EntryKind> {
    let metadata = fs::metadata(path).ok()?;
    if metadata.is_dir() {
        Some(EntryKind::Directory)
    } else {
        Some(EntryKind::File)
    }
}

fn host_read_dir(path: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

/// Backend over host paths, used by the firmware partitions
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl Backend for LocalBackend {
    fn kind(&self, path: &str) -> Option<EntryKind> {
        host_kind(Path::new(path))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        host_read_dir(Path::new(path))
    }

    fn file_size(&self, path: &str) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn open(&self, path: &str, mode: FileMode) -> io::Result<Box<dyn BackendFile>> {
        open_host_file(Path::new(path), mode)
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn delete_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn delete_directory(&self, path: &str) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn rename(&self, old: &str, new: &str) -> io::Result<()> {
        fs::rename(old, new)
    }
}

/// Marker file flagging a card directory as a split file
pub const ARCHIVE_MARKER: &str = ".archive";

/// Part file names of a split file (`00`, `01`, ...), in order
fn split_parts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    loop {
        let part = dir.join(format!("{:02}", parts.len()));
        if !part.is_file() {
            break;
        }
        parts.push(part);
    }
    Ok(parts)
}

/// Parts of a split file read back to back
struct SplitFile {
    parts: Vec<(File, u64)>,
}

impl BackendFile for SplitFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        let mut start = 0u64;
        for (file, size) in &mut self.parts {
            let end = start + *size;
            let position = offset + total as u64;
            if total == buf.len() {
                break;
            }
            if position < end {
                file.seek(SeekFrom::Start(position - start))?;
                let want = (buf.len() - total).min((end - position) as usize);
                file.read_exact(&mut buf[total..total + want])?;
                total += want;
            }
            start = end;
        }
        Ok(total)
    }

    fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "split files are read only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Backend over a FAT card directory
///
/// A directory holding the archive marker is a split file: it is listed as
/// a file whose content is its numbered parts concatenated.
#[derive(Debug, Clone, Copy, Default)]
pub struct CardBackend;

impl CardBackend {
    fn is_split(path: &Path) -> bool {
        path.join(ARCHIVE_MARKER).is_file()
    }

    /// Flag the directory at `path` as a split file
    pub fn set_archive_bit(&self, path: &str) -> io::Result<()> {
        let dir = Path::new(path);
        if split_parts(dir)?.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no 00 part", path),
            ));
        }
        File::create(dir.join(ARCHIVE_MARKER))?;
        Ok(())
    }
}

impl Backend for CardBackend {
    fn kind(&self, path: &str) -> Option<EntryKind> {
        let path = Path::new(path);
        match host_kind(path)? {
            EntryKind::Directory if Self::is_split(path) => Some(EntryKind::File),
            kind => Some(kind),
        }
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = host_read_dir(Path::new(path))?;
        names.retain(|name| name != ARCHIVE_MARKER);
        Ok(names)
    }

    fn file_size(&self, path: &str) -> io::Result<u64> {
        let path = Path::new(path);
        if !Self::is_split(path) {
            return Ok(fs::metadata(path)?.len());
        }
        let mut total = 0;
        for part in split_parts(path)? {
            total += fs::metadata(part)?.len();
        }
        Ok(total)
    }

    fn open(&self, path: &str, mode: FileMode) -> io::Result<Box<dyn BackendFile>> {
        let dir = Path::new(path);
        if !Self::is_split(dir) {
            return open_host_file(dir, mode);
        }
        if mode != FileMode::Read {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is a split file and cannot be written", path),
            ));
        }
        let mut parts = Vec::new();
        for part in split_parts(dir)? {
            let size = fs::metadata(&part)?.len();
            parts.push((File::open(part)?, size));
        }
        Ok(Box::new(SplitFile { parts }))
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn delete_file(&self, path: &str) -> io::Result<()> {
        if Self::is_split(Path::new(path)) {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn delete_directory(&self, path: &str) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn rename(&self, old: &str, new: &str) -> io::Result<()> {
        fs::rename(old, new)
    }
}

/// Remote host mount exposed under a drive-style name (e.g. `C:`)
///
/// Real paths look like `C:/games/title.nsp` and are translated onto a
/// directory of the machine running the link.
#[derive(Debug, Clone)]
pub struct MountedHost {
    mount: String,
    directory: PathBuf,
}

impl MountedHost {
    /// Create a new mount translating `mount:/...` onto `directory`
    pub fn new(mount: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.into().trim_end_matches(['/', ':']).to_string(),
            directory: directory.into(),
        }
    }

    /// Mount name without the trailing colon
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Real root path of the mount (e.g. `C:/`)
    pub fn root(&self) -> String {
        format!("{}:/", self.mount)
    }

    fn translate(&self, path: &str) -> io::Result<PathBuf> {
        let prefix = format!("{}:", self.mount);
        let rest = path.strip_prefix(&prefix).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Path {} is not on mount {}", path, prefix),
            )
        })?;

        let mut local = self.directory.clone();
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            if component == ".." {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Parent components are not allowed: {}", path),
                ));
            }
            local.push(component);
        }
        Ok(local)
    }
}

impl Backend for MountedHost {
    fn kind(&self, path: &str) -> Option<EntryKind> {
        host_kind(&self.translate(path).ok()?)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        host_read_dir(&self.translate(path)?)
    }

    fn file_size(&self, path: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.translate(path)?)?.len())
    }

    fn open(&self, path: &str, mode: FileMode) -> io::Result<Box<dyn BackendFile>> {
        open_host_file(&self.translate(path)?, mode)
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.translate(path)?)
    }

    fn delete_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.translate(path)?)
    }

    fn delete_directory(&self, path: &str) -> io::Result<()> {
        fs::remove_dir_all(self.translate(path)?)
    }

    fn rename(&self, old: &str, new: &str) -> io::Result<()> {
        fs::rename(self.translate(old)?, self.translate(new)?)
    }
}
