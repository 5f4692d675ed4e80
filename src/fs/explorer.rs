//! Explorer trait and the per-backend explorer variants
//!
//! An explorer binds the backend primitives to a root, a current directory
//! and a write-access policy. Callers only ever see `dyn Explorer`.

use std::io;
use std::marker::PhantomData;

use log::{debug, info, warn};
use thiserror::Error;

use super::backend::{
    Backend, BackendFile, CardBackend, EntryKind, FileMode, LocalBackend, MountedHost,
};
use super::{is_binary_data, join_path, Partition, BINARY_PROBE_SIZE};

/// Block size used when streaming between explorers
const COPY_BLOCK_SIZE: usize = 0x100000;

/// Errors that can occur during explorer operations
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Path is outside of the explorer root: {0}")]
    OutsideRoot(String),

    #[error("Entry already present: {0}")]
    EntryAlreadyPresent(String),

    #[error("Write access to {0} was not confirmed")]
    WriteAccessDenied(String),
}

/// Identity of the backend an explorer is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Backing {
    Partition(Partition),
    /// Remote host mount, by name (e.g. `C:`)
    Remote(String),
}

impl Backing {
    /// Display name of the backend
    pub fn display_name(&self) -> String {
        match self {
            Backing::Partition(partition) => partition.display_name().to_string(),
            Backing::Remote(mount) => format!("Remote drive {}", mount),
        }
    }
}

/// Current directory of an explorer in real and presentable form
///
/// Only the real path is stored; the presentable form is derived from it,
/// so both always denote the same entry.
#[derive(Debug, Clone)]
pub struct Cursor {
    root: String,
    presentable_root: String,
    cwd: String,
    back: Vec<String>,
}

impl Cursor {
    /// Create a cursor positioned at `root`
    pub fn new(root: impl Into<String>, presentable_root: impl Into<String>) -> Self {
        let root = normalize(&root.into());
        let mut presentable_root = presentable_root.into();
        if !presentable_root.ends_with('/') {
            presentable_root.push('/');
        }
        Self {
            cwd: root.clone(),
            root,
            presentable_root,
            back: Vec::new(),
        }
    }

    /// Real root path
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Real current directory
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Presentable current directory
    pub fn presentable_cwd(&self) -> String {
        self.presentable_for(&self.cwd)
            .unwrap_or_else(|| self.presentable_root.clone())
    }

    /// Whether the cursor sits at the backend root
    pub fn is_at_root(&self) -> bool {
        self.cwd == self.root
    }

    /// Path relative to the root (no leading slash), if inside it
    pub fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let trimmed = path.trim_end_matches('/');
        if normalize(trimmed) == self.root {
            return Some("");
        }
        let rest = if self.root.ends_with('/') {
            trimmed.strip_prefix(self.root.as_str())?
        } else {
            trimmed.strip_prefix(self.root.as_str())?.strip_prefix('/')?
        };
        if rest.split('/').any(|component| component == "..") {
            return None;
        }
        Some(rest)
    }

    /// Presentable form of a real path inside the root
    pub fn presentable_for(&self, path: &str) -> Option<String> {
        self.relative(path)
            .map(|rel| format!("{}{}", self.presentable_root, rel))
    }

    /// Resolve a real path or a bare entry name of the current directory
    pub fn resolve(&self, path: &str) -> Result<String, ExplorerError> {
        if self.relative(path).is_some() {
            return Ok(normalize(path));
        }
        if !path.is_empty() && !path.contains('/') && !path.contains(':') {
            return Ok(join_path(&self.cwd, path));
        }
        Err(ExplorerError::OutsideRoot(path.to_string()))
    }

    fn enter(&mut self, path: String) {
        let previous = std::mem::replace(&mut self.cwd, path);
        self.back.push(previous);
    }

    fn leave(&mut self) -> bool {
        if let Some(previous) = self.back.pop() {
            self.cwd = previous;
            return true;
        }
        if self.is_at_root() {
            return false;
        }
        self.cwd = normalize(super::get_base_directory(&self.cwd));
        true
    }

    fn jump(&mut self, path: String) {
        self.back.clear();
        self.cwd = path;
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.ends_with(':') {
        format!("{}/", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// A directory listing entry
///
/// Only the name is stored; type queries go back to the explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Check if this entry is a directory in `explorer`'s current directory
    pub fn is_directory(&self, explorer: &dyn Explorer) -> bool {
        explorer.is_directory(&explorer.full_path_for(&self.name))
    }

    /// Check if this entry is a binary file in `explorer`'s current directory
    pub fn is_binary(&self, explorer: &dyn Explorer) -> bool {
        explorer.is_file_binary(&explorer.full_path_for(&self.name))
    }
}

/// Scoped file handle, released when dropped
pub struct FileHandle<'a> {
    file: Box<dyn BackendFile>,
    path: String,
    mode: FileMode,
    position: u64,
    _explorer: PhantomData<&'a ()>,
}

impl<'a> FileHandle<'a> {
    fn new(file: Box<dyn BackendFile>, path: String, mode: FileMode) -> Self {
        debug!("Acquired {:?} handle on {}", mode, path);
        Self {
            file,
            path,
            mode,
            position: 0,
            _explorer: PhantomData,
        }
    }

    /// Real path of the open file
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Read a block at `offset` into `buffer`, returning the bytes read
    pub fn read_block(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize, ExplorerError> {
        Ok(self.file.read_at(offset, buffer)?)
    }

    /// Read exactly `length` bytes at `offset`
    pub fn read_exact_at(&mut self, offset: u64, length: usize) -> Result<Vec<u8>, ExplorerError> {
        let mut buffer = vec![0u8; length];
        let read = self.file.read_at(offset, &mut buffer)?;
        if read != length {
            return Err(ExplorerError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{}: wanted {} bytes at {}, got {}", self.path, length, offset, read),
            )));
        }
        Ok(buffer)
    }

    /// Append data to a file opened for writing
    pub fn write(&mut self, data: &[u8]) -> Result<(), ExplorerError> {
        if self.mode == FileMode::Read {
            return Err(ExplorerError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is open for reading only", self.path),
            )));
        }
        self.file.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Bytes written through this handle
    pub fn written(&self) -> u64 {
        self.position
    }

    /// Flush and release the handle, reporting any flush failure
    pub fn close(mut self) -> Result<(), ExplorerError> {
        if self.mode != FileMode::Read {
            self.file.flush()?;
        }
        Ok(())
    }
}

impl Drop for FileHandle<'_> {
    fn drop(&mut self) {
        if self.mode != FileMode::Read {
            if let Err(e) = self.file.flush() {
                warn!("Failed to flush {}: {}", self.path, e);
            }
        }
        debug!("Released {:?} handle on {}", self.mode, self.path);
    }
}

/// Abstraction over the storage backends of the device
///
/// Implementors provide the backend, the cursor and the write policy;
/// every browsing and mutating operation is built on those.
pub trait Explorer: Send {
    /// Backend primitives
    fn backend(&self) -> &dyn Backend;

    fn cursor(&self) -> &Cursor;

    fn cursor_mut(&mut self) -> &mut Cursor;

    /// Identity of the backend
    fn backing(&self) -> Backing;

    /// Whether mutations must be confirmed by the user first
    fn should_warn_on_write_access(&self) -> bool;

    /// Mark a directory as a concatenated (split) file
    ///
    /// Returns false on backends without the attribute.
    fn set_archive_bit(&mut self, path: &str) -> Result<bool, ExplorerError> {
        let path = self.cursor().resolve(path)?;
        if !self.is_directory(&path) {
            return Err(ExplorerError::NotADirectory(path));
        }
        debug!("{} has no archive attribute, ignoring {}", self.backing().display_name(), path);
        Ok(false)
    }

    /// Real current directory
    fn cwd(&self) -> &str {
        self.cursor().cwd()
    }

    /// Presentable current directory
    fn presentable_cwd(&self) -> String {
        self.cursor().presentable_cwd()
    }

    /// List the current directory, directories first then files
    ///
    /// An unreadable directory yields an empty listing.
    fn list_contents(&self) -> Vec<DirectoryEntry> {
        let cwd = self.cwd().to_string();
        let names = match self.backend().read_dir(&cwd) {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list {}: {}", cwd, e);
                return Vec::new();
            }
        };

        let mut entries: Vec<(bool, String)> = names
            .into_iter()
            .map(|name| {
                let is_dir = self.backend().kind(&join_path(&cwd, &name)) == Some(EntryKind::Directory);
                (is_dir, name)
            })
            .collect();

        entries.sort_by(|a, b| match (a.0, b.0) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.1.to_lowercase().cmp(&b.1.to_lowercase()),
        });

        entries.into_iter().map(|(_, name)| DirectoryEntry::new(name)).collect()
    }

    /// Names of the files directly inside `dir`
    fn list_files(&self, dir: &str) -> Vec<String> {
        self.list_of_kind(dir, EntryKind::File)
    }

    /// Names of the directories directly inside `dir`
    fn list_directories(&self, dir: &str) -> Vec<String> {
        self.list_of_kind(dir, EntryKind::Directory)
    }

    #[doc(hidden)]
    fn list_of_kind(&self, dir: &str, kind: EntryKind) -> Vec<String> {
        let Ok(dir) = self.cursor().resolve(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = match self.backend().read_dir(&dir) {
            Ok(names) => names
                .into_iter()
                .filter(|name| self.backend().kind(&join_path(&dir, name)) == Some(kind))
                .collect(),
            Err(e) => {
                warn!("Failed to list {}: {}", dir, e);
                Vec::new()
            }
        };
        names.sort_by_key(|name| name.to_lowercase());
        names
    }

    fn is_directory(&self, path: &str) -> bool {
        self.cursor()
            .resolve(path)
            .map(|path| self.backend().kind(&path) == Some(EntryKind::Directory))
            .unwrap_or(false)
    }

    fn is_file(&self, path: &str) -> bool {
        self.cursor()
            .resolve(path)
            .map(|path| self.backend().kind(&path) == Some(EntryKind::File))
            .unwrap_or(false)
    }

    /// Check the first bytes of a file for binary content
    fn is_file_binary(&self, path: &str) -> bool {
        if !self.is_file(path) {
            return false;
        }
        let probe = self.open_file(path, FileMode::Read).and_then(|mut handle| {
            let mut buffer = vec![0u8; BINARY_PROBE_SIZE];
            let read = handle.read_block(0, &mut buffer)?;
            buffer.truncate(read);
            Ok(buffer)
        });
        match probe {
            Ok(prefix) => is_binary_data(&prefix),
            Err(e) => {
                warn!("Failed to probe {}: {}", path, e);
                true
            }
        }
    }

    /// Real path of an entry of the current directory
    fn full_path_for(&self, name: &str) -> String {
        join_path(self.cwd(), name)
    }

    /// Presentable path of an entry of the current directory
    fn full_presentable_path_for(&self, name: &str) -> String {
        join_path(&self.presentable_cwd(), name)
    }

    /// Descend into `path` if it is a directory
    fn navigate_forward(&mut self, path: &str) -> bool {
        let Ok(path) = self.cursor().resolve(path) else {
            return false;
        };
        if !self.is_directory(&path) {
            return false;
        }
        debug!("Navigating into {}", path);
        self.cursor_mut().enter(path);
        true
    }

    /// Return to the previous directory; false at the root
    fn navigate_back(&mut self) -> bool {
        let moved = self.cursor_mut().leave();
        if moved {
            debug!("Navigated back to {}", self.cwd());
        }
        moved
    }

    /// Make `dir` current without recording history
    fn navigate_to(&mut self, dir: &str) -> Result<(), ExplorerError> {
        let dir = self.cursor().resolve(dir)?;
        if !self.is_directory(&dir) {
            return Err(ExplorerError::NotADirectory(dir));
        }
        self.cursor_mut().jump(dir);
        Ok(())
    }

    fn get_file_size(&self, path: &str) -> Result<u64, ExplorerError> {
        let path = self.cursor().resolve(path)?;
        Ok(self.backend().file_size(&path)?)
    }

    /// Recursive size of every file below `path`
    fn get_directory_size(&self, path: &str) -> Result<u64, ExplorerError> {
        let path = self.cursor().resolve(path)?;
        let mut total = 0;
        for name in self.backend().read_dir(&path)? {
            let child = join_path(&path, &name);
            match self.backend().kind(&child) {
                Some(EntryKind::Directory) => total += self.get_directory_size(&child)?,
                Some(EntryKind::File) => total += self.backend().file_size(&child)?,
                None => {}
            }
        }
        Ok(total)
    }

    /// Read a whole file into memory
    fn read_file(&self, path: &str) -> Result<Vec<u8>, ExplorerError> {
        let size = self.get_file_size(path)? as usize;
        let mut handle = self.open_file(path, FileMode::Read)?;
        handle.read_exact_at(0, size)
    }

    /// Open a scoped handle on a file
    fn open_file(&self, path: &str, mode: FileMode) -> Result<FileHandle<'_>, ExplorerError> {
        let path = self.cursor().resolve(path)?;
        if mode == FileMode::Read && !self.backend().kind(&path).is_some_and(|k| k == EntryKind::File) {
            return Err(ExplorerError::NotFound(path));
        }
        let file = self.backend().open(&path, mode)?;
        Ok(FileHandle::new(file, path, mode))
    }

    /// Create or replace a file with `data`
    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), ExplorerError> {
        let mut handle = self.open_file(path, FileMode::Write)?;
        handle.write(data)?;
        handle.close()
    }

    fn create_directory(&self, path: &str) -> Result<(), ExplorerError> {
        let path = self.cursor().resolve(path)?;
        self.backend().create_directory(&path)?;
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<(), ExplorerError> {
        let path = self.cursor().resolve(path)?;
        if !self.is_file(&path) {
            return Err(ExplorerError::NotFound(path));
        }
        self.backend().delete_file(&path)?;
        info!("Deleted file {}", path);
        Ok(())
    }

    /// Delete a directory recursively (never the root)
    fn delete_directory(&self, path: &str) -> Result<(), ExplorerError> {
        let path = self.cursor().resolve(path)?;
        if path == self.cursor().root() {
            return Err(ExplorerError::OutsideRoot(path));
        }
        if !self.is_directory(&path) {
            return Err(ExplorerError::NotADirectory(path));
        }
        self.backend().delete_directory(&path)?;
        info!("Deleted directory {}", path);
        Ok(())
    }

    /// Rename a file; fails if `new` already exists
    fn rename_file(&self, old: &str, new: &str) -> Result<(), ExplorerError> {
        let old = self.cursor().resolve(old)?;
        if !self.is_file(&old) {
            return Err(ExplorerError::NotFound(old));
        }
        self.rename_entry(&old, new)
    }

    /// Rename a directory; fails if `new` already exists
    fn rename_directory(&self, old: &str, new: &str) -> Result<(), ExplorerError> {
        let old = self.cursor().resolve(old)?;
        if !self.is_directory(&old) {
            return Err(ExplorerError::NotADirectory(old));
        }
        self.rename_entry(&old, new)
    }

    #[doc(hidden)]
    fn rename_entry(&self, old: &str, new: &str) -> Result<(), ExplorerError> {
        let new = self.cursor().resolve(new)?;
        if self.backend().kind(&new).is_some() {
            return Err(ExplorerError::EntryAlreadyPresent(new));
        }
        self.backend().rename(old, &new)?;
        info!("Renamed {} to {}", old, new);
        Ok(())
    }

    /// Copy a file from `source` (possibly another explorer) to `dest`
    fn copy_file_from(
        &self,
        source: &dyn Explorer,
        source_path: &str,
        dest: &str,
    ) -> Result<u64, ExplorerError> {
        let dest = self.cursor().resolve(dest)?;
        if self.backend().kind(&dest).is_some() {
            return Err(ExplorerError::EntryAlreadyPresent(dest));
        }

        let size = source.get_file_size(source_path)?;
        let mut input = source.open_file(source_path, FileMode::Read)?;
        let mut output = self.open_file(&dest, FileMode::Write)?;
        let mut buffer = vec![0u8; COPY_BLOCK_SIZE.min(size as usize).max(1)];
        let mut offset = 0;
        while offset < size {
            let read = input.read_block(offset, &mut buffer)?;
            if read == 0 {
                break;
            }
            output.write(&buffer[..read])?;
            offset += read as u64;
        }
        output.close()?;
        debug!("Copied {} bytes from {} to {}", offset, source_path, dest);
        Ok(offset)
    }

    /// Copy a directory tree from `source` to `dest`
    fn copy_directory_from(
        &self,
        source: &dyn Explorer,
        source_path: &str,
        dest: &str,
    ) -> Result<u64, ExplorerError> {
        let dest = self.cursor().resolve(dest)?;
        if self.backend().kind(&dest).is_some() {
            return Err(ExplorerError::EntryAlreadyPresent(dest));
        }
        self.backend().create_directory(&dest)?;

        let mut total = 0;
        for name in source.list_directories(source_path) {
            total += self.copy_directory_from(source, &join_path(source_path, &name), &join_path(&dest, &name))?;
        }
        for name in source.list_files(source_path) {
            total += self.copy_file_from(source, &join_path(source_path, &name), &join_path(&dest, &name))?;
        }
        Ok(total)
    }
}

/// Explorer over the removable SD card
pub struct SdCardExplorer {
    backend: CardBackend,
    cursor: Cursor,
}

impl SdCardExplorer {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            backend: CardBackend,
            cursor: Cursor::new(root, Partition::SdCard.presentable_root()),
        }
    }
}

impl Explorer for SdCardExplorer {
    fn backend(&self) -> &dyn Backend {
        &self.backend
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn backing(&self) -> Backing {
        Backing::Partition(Partition::SdCard)
    }

    fn should_warn_on_write_access(&self) -> bool {
        false
    }

    fn set_archive_bit(&mut self, path: &str) -> Result<bool, ExplorerError> {
        let path = self.cursor.resolve(path)?;
        if !self.is_directory(&path) {
            return Err(ExplorerError::NotADirectory(path));
        }
        self.backend.set_archive_bit(&path)?;
        info!("Set archive bit on {}", path);
        Ok(true)
    }
}

/// Explorer over the NAND system partition
pub struct NandSystemExplorer {
    backend: LocalBackend,
    cursor: Cursor,
}

impl NandSystemExplorer {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            backend: LocalBackend,
            cursor: Cursor::new(root, Partition::NANDSystem.presentable_root()),
        }
    }
}

impl Explorer for NandSystemExplorer {
    fn backend(&self) -> &dyn Backend {
        &self.backend
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn backing(&self) -> Backing {
        Backing::Partition(Partition::NANDSystem)
    }

    fn should_warn_on_write_access(&self) -> bool {
        true
    }
}

/// Explorer over the NAND user partition
pub struct NandUserExplorer {
    backend: LocalBackend,
    cursor: Cursor,
}

impl NandUserExplorer {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            backend: LocalBackend,
            cursor: Cursor::new(root, Partition::NANDUser.presentable_root()),
        }
    }
}

impl Explorer for NandUserExplorer {
    fn backend(&self) -> &dyn Backend {
        &self.backend
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn backing(&self) -> Backing {
        Backing::Partition(Partition::NANDUser)
    }

    fn should_warn_on_write_access(&self) -> bool {
        false
    }
}

/// Explorer over the NAND safe partition
pub struct NandSafeExplorer {
    backend: LocalBackend,
    cursor: Cursor,
}

impl NandSafeExplorer {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            backend: LocalBackend,
            cursor: Cursor::new(root, Partition::NANDSafe.presentable_root()),
        }
    }
}

impl Explorer for NandSafeExplorer {
    fn backend(&self) -> &dyn Backend {
        &self.backend
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn backing(&self) -> Backing {
        Backing::Partition(Partition::NANDSafe)
    }

    fn should_warn_on_write_access(&self) -> bool {
        true
    }
}

/// Explorer over the factory configuration partition
pub struct ProdInfoFExplorer {
    backend: LocalBackend,
    cursor: Cursor,
}

impl ProdInfoFExplorer {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            backend: LocalBackend,
            cursor: Cursor::new(root, Partition::PRODINFOF.presentable_root()),
        }
    }
}

impl Explorer for ProdInfoFExplorer {
    fn backend(&self) -> &dyn Backend {
        &self.backend
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn backing(&self) -> Backing {
        Backing::Partition(Partition::PRODINFOF)
    }

    fn should_warn_on_write_access(&self) -> bool {
        true
    }
}

/// Explorer over a drive of the tethered remote host
pub struct RemoteHostExplorer {
    mount: String,
    backend: Box<dyn Backend>,
    cursor: Cursor,
}

impl RemoteHostExplorer {
    /// Create an explorer over `mount` (e.g. `C:`) served by `backend`
    pub fn new(mount: impl Into<String>, backend: Box<dyn Backend>) -> Self {
        let mount = mount.into().trim_end_matches(['/', ':']).to_string();
        let root = format!("{}:/", mount);
        Self {
            cursor: Cursor::new(root.clone(), root),
            mount,
            backend,
        }
    }

    /// Create an explorer over a host directory mount
    pub fn mounted(host: MountedHost) -> Self {
        let mount = host.mount().to_string();
        Self::new(mount, Box::new(host))
    }
}

impl Explorer for RemoteHostExplorer {
    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    fn backing(&self) -> Backing {
        Backing::Remote(self.mount.clone())
    }

    fn should_warn_on_write_access(&self) -> bool {
        false
    }
}
