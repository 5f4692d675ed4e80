//! Browser views over explorers
//!
//! A `BrowserView` owns one active explorer, its last listing, the
//! selected index and a selection memory stack. Collaborators shared by
//! every view (clipboard, platform services, confirmation dialog) live in
//! a `Session` passed to the operations that need them.

use log::{debug, info};
use thiserror::Error;

use crate::clipboard::Clipboard;
use crate::fs::{
    format_size, get_base_directory, get_file_name, Backing, DirectoryEntry, Explorer,
    ExplorerError, FileKind, Partition,
};
use crate::install::{
    BatchReport, InstallError, InstallOutcome, InstallRequest, Installer, INSTALL_DESTINATIONS,
};
use crate::nacp::{NacpError, NacpInfo};
use crate::platform::{confirm_write_access, Confirm, ExplorerProvider, Platform};
use crate::ticket::{CertificateChain, TicketError, TicketImporter};
use crate::viewer::{self, TextEncoding, MAX_VIEW_SIZE};

/// Errors reported by browser operations
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error(transparent)]
    Explorer(#[from] ExplorerError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Nacp(#[from] NacpError),

    #[error("Nothing to paste")]
    ClipboardEmpty,

    #[error("Cannot paste {0} into itself")]
    PasteIntoItself(String),

    #[error("{0} does not look like a text file")]
    NotText(String),

    #[error("Cancelled")]
    Cancelled,
}

const YES_CANCEL: [&str; 2] = ["Yes", "Cancel"];

/// Shared state of one browsing session
pub struct Session {
    pub clipboard: Clipboard,
    pub platform: Platform,
    pub certificate_chain: CertificateChain,
    pub provider: Box<dyn ExplorerProvider>,
    pub confirm: Box<dyn Confirm>,
    /// Preferred NACP language slot
    pub nacp_language: usize,
}

impl Session {
    pub fn new(
        platform: Platform,
        certificate_chain: CertificateChain,
        provider: Box<dyn ExplorerProvider>,
        confirm: Box<dyn Confirm>,
    ) -> Self {
        Self {
            clipboard: Clipboard::new(),
            platform,
            certificate_chain,
            provider,
            confirm,
            nacp_language: 0,
        }
    }

    /// Ask the user where to install; None on cancel
    pub fn choose_destination(&mut self) -> Option<Partition> {
        let choice = self.confirm.confirm(
            "Install location",
            "Where would you like to install the content?",
            &["SD card", "Console memory", "Cancel"],
        )?;
        INSTALL_DESTINATIONS.get(choice).copied()
    }
}

/// Indices selected before each descent, innermost last
#[derive(Debug, Clone, Default)]
pub struct SelectionMemory {
    stack: Vec<usize>,
}

impl SelectionMemory {
    pub fn push(&mut self, index: usize) {
        self.stack.push(index);
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.stack.pop()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Actions offered for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Install,
    ImportTicket,
    ViewNacp,
    ViewText,
    ViewHex,
    Copy,
    Delete,
    Rename,
}

impl FileAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Install => "Install",
            Self::ImportTicket => "Import ticket",
            Self::ViewNacp => "View NACP",
            Self::ViewText => "View as text",
            Self::ViewHex => "View as hex",
            Self::Copy => "Copy",
            Self::Delete => "Delete",
            Self::Rename => "Rename",
        }
    }

    /// Kind specific action first, then the common ones
    pub fn menu_for(kind: FileKind, binary: bool) -> Vec<FileAction> {
        let primary = match kind {
            FileKind::Nsp => Some(Self::Install),
            FileKind::Tik => Some(Self::ImportTicket),
            FileKind::Nacp => Some(Self::ViewNacp),
            // Launching, theme and payload handling belong to the platform
            FileKind::Nro | FileKind::NxTheme | FileKind::Jpeg | FileKind::Bin => None,
            FileKind::Cert | FileKind::Nca | FileKind::Other if !binary => Some(Self::ViewText),
            FileKind::Cert | FileKind::Nca | FileKind::Other => None,
        };
        primary
            .into_iter()
            .chain([Self::ViewHex, Self::Copy, Self::Delete, Self::Rename])
            .collect()
    }
}

/// Actions offered for a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryAction {
    Copy,
    Delete,
    Rename,
    SetArchiveBit,
    InstallAll,
}

impl DirectoryAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Copy => "Copy",
            Self::Delete => "Delete",
            Self::Rename => "Rename",
            Self::SetArchiveBit => "Set archive bit",
            Self::InstallAll => "Install all NSPs",
        }
    }
}

/// Details shown when a file is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub presentable_path: String,
    pub kind: FileKind,
    pub size: u64,
    pub binary: bool,
    pub actions: Vec<FileAction>,
}

impl FileInfo {
    pub fn summary(&self) -> String {
        format!(
            "{}\nType: {}\nSize: {}",
            self.presentable_path,
            self.kind.description(),
            format_size(self.size)
        )
    }
}

/// Details shown for a directory's action menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    /// `.nsp` files directly inside
    pub packages: Vec<String>,
    pub actions: Vec<DirectoryAction>,
}

/// Result of opening an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The view descended into a directory
    Entered,
    /// A file was selected
    File(FileInfo),
}

/// One browser view
pub struct BrowserView {
    explorer: Box<dyn Explorer>,
    entries: Vec<DirectoryEntry>,
    selected: usize,
    memory: SelectionMemory,
}

impl BrowserView {
    pub fn new(explorer: Box<dyn Explorer>) -> Self {
        let mut view = Self {
            explorer,
            entries: Vec::new(),
            selected: 0,
            memory: SelectionMemory::default(),
        };
        view.refresh(Some(0));
        view
    }

    /// Open a view on `backing` through the session's provider
    pub fn open(session: &Session, backing: &Backing) -> Result<Self, BrowserError> {
        Ok(Self::new(session.provider.open(backing)?))
    }

    /// Replace the active explorer
    pub fn switch(&mut self, session: &Session, backing: &Backing) -> Result<(), BrowserError> {
        self.explorer = session.provider.open(backing)?;
        self.memory.clear();
        self.refresh(Some(0));
        info!("Switched to {}", self.explorer.presentable_cwd());
        Ok(())
    }

    pub fn explorer(&self) -> &dyn Explorer {
        self.explorer.as_ref()
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_entry(&self) -> Option<&DirectoryEntry> {
        self.entries.get(self.selected)
    }

    pub fn select(&mut self, index: usize) {
        if index < self.entries.len() {
            self.selected = index;
        }
    }

    pub fn memory_depth(&self) -> usize {
        self.memory.depth()
    }

    /// Re-list the current directory
    ///
    /// An explicit index out of range selects 0; without one the
    /// remembered index is restored.
    pub fn refresh(&mut self, index: Option<usize>) {
        self.entries = self.explorer.list_contents();
        self.selected = match index {
            Some(index) if index < self.entries.len() => index,
            Some(_) => 0,
            None => self
                .memory
                .pop()
                .unwrap_or(0)
                .min(self.entries.len().saturating_sub(1)),
        };
    }

    /// Descend into a directory, or describe a file
    pub fn activate(&mut self, name: &str) -> Result<Activation, BrowserError> {
        let path = self.explorer.full_path_for(name);
        if self.explorer.navigate_forward(&path) {
            self.memory.push(self.selected);
            self.refresh(Some(0));
            return Ok(Activation::Entered);
        }
        if !self.explorer.is_file(&path) {
            return Err(ExplorerError::NotFound(path).into());
        }

        let kind = FileKind::from_name(name);
        let binary = self.explorer.is_file_binary(&path);
        Ok(Activation::File(FileInfo {
            name: name.to_string(),
            presentable_path: self.explorer.full_presentable_path_for(name),
            size: self.explorer.get_file_size(&path)?,
            kind,
            binary,
            actions: FileAction::menu_for(kind, binary),
            path,
        }))
    }

    /// Describe a directory of the current listing
    pub fn inspect_directory(&self, name: &str) -> Result<DirectoryInfo, BrowserError> {
        let path = self.explorer.full_path_for(name);
        if !self.explorer.is_directory(&path) {
            return Err(ExplorerError::NotADirectory(path).into());
        }
        let packages: Vec<String> = self
            .explorer
            .list_files(&path)
            .into_iter()
            .filter(|file| FileKind::from_name(file) == FileKind::Nsp)
            .collect();
        let mut actions = vec![
            DirectoryAction::Copy,
            DirectoryAction::Delete,
            DirectoryAction::Rename,
            DirectoryAction::SetArchiveBit,
        ];
        if !packages.is_empty() {
            actions.push(DirectoryAction::InstallAll);
        }
        Ok(DirectoryInfo {
            name: name.to_string(),
            size: self.explorer.get_directory_size(&path)?,
            path,
            packages,
            actions,
        })
    }

    /// Go to the previous directory; false at the root
    pub fn go_back(&mut self) -> bool {
        if !self.explorer.navigate_back() {
            return false;
        }
        self.refresh(None);
        true
    }

    /// Show the directory holding `path` with that entry selected
    pub fn jump_to(&mut self, path: &str) -> Result<(), BrowserError> {
        self.explorer.navigate_to(get_base_directory(path))?;
        self.memory.clear();
        self.refresh(Some(0));
        let name = get_file_name(path);
        if let Some(index) = self.entries.iter().position(|entry| entry.name == name) {
            self.selected = index;
        }
        debug!("Jumped to {} (index {})", path, self.selected);
        Ok(())
    }

    fn guard_write(&self, session: &mut Session) -> Result<(), BrowserError> {
        if !self.explorer.should_warn_on_write_access() {
            return Ok(());
        }
        let target = self.explorer.presentable_cwd();
        if confirm_write_access(session.confirm.as_mut(), &target) {
            Ok(())
        } else {
            Err(ExplorerError::WriteAccessDenied(target).into())
        }
    }

    fn ask(session: &mut Session, title: &str, message: &str) -> Result<(), BrowserError> {
        match session.confirm.confirm(title, message, &YES_CANCEL) {
            Some(0) => Ok(()),
            _ => Err(BrowserError::Cancelled),
        }
    }

    /// Put an entry of the current directory on the clipboard
    pub fn copy(&self, session: &mut Session, name: &str) {
        session
            .clipboard
            .set(self.explorer.backing(), self.explorer.full_path_for(name));
    }

    /// Copy the clipboard entry into the current directory
    pub fn paste(&mut self, session: &mut Session) -> Result<u64, BrowserError> {
        let item = session
            .clipboard
            .consume()
            .cloned()
            .ok_or(BrowserError::ClipboardEmpty)?;
        let dest = self.explorer.full_path_for(get_file_name(&item.path));
        let same_backing = item.backing == self.explorer.backing();
        if same_backing && dest.starts_with(&format!("{}/", item.path)) {
            return Err(BrowserError::PasteIntoItself(item.path));
        }
        self.guard_write(session)?;

        let opened;
        let source: &dyn Explorer = if same_backing {
            self.explorer.as_ref()
        } else {
            opened = session.provider.open(&item.backing)?;
            opened.as_ref()
        };
        let copied = if source.is_directory(&item.path) {
            self.explorer.copy_directory_from(source, &item.path, &dest)?
        } else {
            self.explorer.copy_file_from(source, &item.path, &dest)?
        };
        info!("Pasted {} to {} ({} bytes)", item.path, dest, copied);
        self.refresh(Some(self.selected));
        Ok(copied)
    }

    /// Delete a file or directory after confirmation
    pub fn delete(&mut self, session: &mut Session, name: &str) -> Result<(), BrowserError> {
        let path = self.explorer.full_path_for(name);
        let is_directory = self.explorer.is_directory(&path);
        if !is_directory && !self.explorer.is_file(&path) {
            return Err(ExplorerError::NotFound(path).into());
        }
        self.guard_write(session)?;

        let presentable = self.explorer.full_presentable_path_for(name);
        if is_directory {
            Self::ask(session, "Delete directory", &format!("Delete {} and everything inside it?", presentable))?;
            self.explorer.delete_directory(&path)?;
        } else {
            Self::ask(session, "Delete file", &format!("Delete {}?", presentable))?;
            self.explorer.delete_file(&path)?;
        }
        self.refresh(Some(self.selected.saturating_sub(1)));
        Ok(())
    }

    /// Rename an entry; returns false when the name is unchanged
    pub fn rename(
        &mut self,
        session: &mut Session,
        name: &str,
        new_name: &str,
    ) -> Result<bool, BrowserError> {
        if new_name.is_empty() || new_name == name {
            return Ok(false);
        }
        let old = self.explorer.full_path_for(name);
        let new = self.explorer.full_path_for(new_name);
        if self.explorer.is_file(&new) || self.explorer.is_directory(&new) {
            return Err(ExplorerError::EntryAlreadyPresent(new).into());
        }
        self.guard_write(session)?;

        if self.explorer.is_directory(&old) {
            self.explorer.rename_directory(&old, &new)?;
        } else {
            self.explorer.rename_file(&old, &new)?;
        }
        self.refresh(Some(self.selected));
        Ok(true)
    }

    /// Mark a directory as a split file; false if the backend has no such bit
    pub fn set_archive_bit(&mut self, session: &mut Session, name: &str) -> Result<bool, BrowserError> {
        let path = self.explorer.full_path_for(name);
        if !self.explorer.is_directory(&path) {
            return Err(ExplorerError::NotADirectory(path).into());
        }
        self.guard_write(session)?;
        let set = self.explorer.set_archive_bit(&path)?;
        self.refresh(Some(self.selected));
        Ok(set)
    }

    /// Install a package of the current directory to a chosen destination
    pub fn install(&mut self, session: &mut Session, name: &str) -> Result<InstallOutcome, BrowserError> {
        let destination = session.choose_destination().ok_or(BrowserError::Cancelled)?;
        let request = InstallRequest::new(self.explorer.full_path_for(name), destination);
        let outcome = Installer::new(&mut session.platform, &session.certificate_chain).start_install(
            &request,
            self.explorer.as_ref(),
            session.confirm.as_mut(),
        )?;
        self.refresh(Some(self.selected));
        Ok(outcome)
    }

    /// Install every package of a directory to one chosen destination
    pub fn install_all(&mut self, session: &mut Session, name: &str) -> Result<BatchReport, BrowserError> {
        let destination = session.choose_destination().ok_or(BrowserError::Cancelled)?;
        let path = self.explorer.full_path_for(name);
        let report = Installer::new(&mut session.platform, &session.certificate_chain).install_batch(
            self.explorer.as_ref(),
            &path,
            destination,
            session.confirm.as_mut(),
        )?;
        self.refresh(Some(self.selected));
        Ok(report)
    }

    /// Import a `.tik` file with the session's certificate chain
    pub fn import_ticket(&self, session: &mut Session, name: &str) -> Result<(), BrowserError> {
        let path = self.explorer.full_path_for(name);
        Self::ask(
            session,
            "Import ticket",
            &format!("Import the ticket {}?", self.explorer.full_presentable_path_for(name)),
        )?;
        TicketImporter::new(session.platform.rights.as_mut(), &session.certificate_chain)
            .import_file(self.explorer.as_ref(), &path)?;
        Ok(())
    }

    pub fn view_nacp(&self, session: &Session, name: &str) -> Result<NacpInfo, BrowserError> {
        let path = self.explorer.full_path_for(name);
        Ok(NacpInfo::read_from(self.explorer.as_ref(), &path, session.nacp_language)?)
    }

    /// Decode the start of a file as text
    pub fn view_text(&self, name: &str) -> Result<String, BrowserError> {
        let path = self.explorer.full_path_for(name);
        let data = viewer::read_span(self.explorer.as_ref(), &path, 0, MAX_VIEW_SIZE)?;
        let encoding = TextEncoding::detect(&data).ok_or_else(|| BrowserError::NotText(path.clone()))?;
        debug!("Viewing {} as {}", path, encoding.display_name());
        Ok(encoding.decode(&data))
    }

    /// Hex dump of a file starting at `offset`
    pub fn view_hex(&self, name: &str, offset: u64) -> Result<Vec<String>, BrowserError> {
        let path = self.explorer.full_path_for(name);
        let data = viewer::read_span(self.explorer.as_ref(), &path, offset, MAX_VIEW_SIZE)?;
        Ok(viewer::hex_dump(&data, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, MountConfig};
    use crate::package::build_pfs0;
    use crate::platform::host::{host_platform, HostExplorers, CONTENT_DIRECTORY};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Answers dialogs from a script, recording every title
    #[derive(Clone, Default)]
    struct Script {
        answers: Rc<RefCell<VecDeque<Option<usize>>>>,
        titles: Rc<RefCell<Vec<String>>>,
    }

    impl Script {
        fn answer(&self, answers: &[Option<usize>]) {
            self.answers.borrow_mut().extend(answers.iter().copied());
        }
    }

    impl Confirm for Script {
        fn confirm(&mut self, title: &str, _message: &str, _options: &[&str]) -> Option<usize> {
            self.titles.borrow_mut().push(title.to_string());
            self.answers.borrow_mut().pop_front().flatten()
        }
    }

    struct Fixture {
        dir: TempDir,
        session: Session,
        script: Script,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = AppConfig::default();
            let mount = |name: &str| MountConfig {
                root: dir.path().join(name),
                capacity: 1 << 24,
            };
            config.partitions.sd_card = mount("sd");
            config.partitions.nand_user = mount("user");
            config.partitions.nand_system = mount("system");
            config.partitions.nand_safe = mount("safe");
            config.partitions.prodinfof = mount("prodinfof");
            for name in ["sd", "user", "system", "safe", "prodinfof"] {
                fs::create_dir_all(dir.path().join(name)).unwrap();
            }

            let script = Script::default();
            let session = Session::new(
                host_platform(&config),
                CertificateChain::from_bytes(b"CHAIN".to_vec()),
                Box::new(HostExplorers::new(config)),
                Box::new(script.clone()),
            );
            Self { dir, session, script }
        }

        fn path(&self, relative: &str) -> std::path::PathBuf {
            self.dir.path().join(relative)
        }

        fn write(&self, relative: &str, data: &[u8]) {
            let path = self.path(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, data).unwrap();
        }

        fn view(&self, partition: Partition) -> BrowserView {
            BrowserView::open(&self.session, &Backing::Partition(partition)).unwrap()
        }
    }

    fn names(view: &BrowserView) -> Vec<&str> {
        view.entries().iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_back_restores_selection() {
        let fixture = Fixture::new();
        for dir in ["a", "b", "c"] {
            fixture.write(&format!("sd/{}/inner/file.txt", dir), b"x");
        }
        let mut view = fixture.view(Partition::SdCard);
        assert_eq!(names(&view), vec!["a", "b", "c"]);

        view.select(2);
        assert_eq!(view.activate("c").unwrap(), Activation::Entered);
        assert_eq!(view.selected(), 0);
        assert_eq!(view.activate("inner").unwrap(), Activation::Entered);
        assert_eq!(view.memory_depth(), 2);

        assert!(view.go_back());
        assert_eq!(view.selected(), 0);
        assert!(view.go_back());
        assert_eq!(view.selected(), 2);
        assert_eq!(view.explorer().presentable_cwd(), "sdmc:/");
        assert!(!view.go_back());
        assert_eq!(view.selected(), 2);
    }

    #[test]
    fn test_switch_and_refresh_reset_selection() {
        let mut fixture = Fixture::new();
        fixture.write("sd/a/f", b"x");
        fixture.write("sd/b", b"x");
        let mut view = fixture.view(Partition::SdCard);
        view.select(1);
        view.activate("a").unwrap();

        view.switch(&fixture.session, &Backing::Partition(Partition::NANDUser)).unwrap();
        assert_eq!(view.memory_depth(), 0);
        assert_eq!(view.explorer().presentable_cwd(), "@User:/");

        view.switch(&fixture.session, &Backing::Partition(Partition::SdCard)).unwrap();
        view.refresh(Some(7));
        assert_eq!(view.selected(), 0);
        view.refresh(Some(1));
        assert_eq!(view.selected(), 1);

        // Session stays usable after the views
        fixture.session.clipboard.clear();
    }

    #[test]
    fn test_file_activation_menus() {
        let fixture = Fixture::new();
        fixture.write("sd/game.nsp", &build_pfs0(&[("x.nca", b"data")]));
        fixture.write("sd/notes.txt", b"plain text notes");
        fixture.write("sd/blob.dat", &[0u8, 1, 2, 3]);
        fixture.write("sd/title.tik", &[0u8; 16]);
        let mut view = fixture.view(Partition::SdCard);

        let Activation::File(nsp) = view.activate("game.nsp").unwrap() else {
            panic!("expected a file");
        };
        assert_eq!(nsp.presentable_path, "sdmc:/game.nsp");
        assert_eq!(
            nsp.actions,
            vec![FileAction::Install, FileAction::ViewHex, FileAction::Copy, FileAction::Delete, FileAction::Rename]
        );

        let Activation::File(text) = view.activate("notes.txt").unwrap() else {
            panic!("expected a file");
        };
        assert!(!text.binary);
        assert_eq!(text.actions[0], FileAction::ViewText);
        assert_eq!(view.view_text("notes.txt").unwrap(), "plain text notes");

        let Activation::File(blob) = view.activate("blob.dat").unwrap() else {
            panic!("expected a file");
        };
        assert!(blob.binary);
        assert_eq!(blob.actions[0], FileAction::ViewHex);
        assert!(matches!(view.view_text("blob.dat"), Err(BrowserError::NotText(_))));
        assert_eq!(view.view_hex("blob.dat", 0).unwrap().len(), 1);

        let Activation::File(tik) = view.activate("title.tik").unwrap() else {
            panic!("expected a file");
        };
        assert_eq!(tik.actions[0], FileAction::ImportTicket);
        assert!(view.activate("missing").is_err());
    }

    #[test]
    fn test_delete_moves_selection_back() {
        let mut fixture = Fixture::new();
        for name in ["a", "b", "c"] {
            fixture.write(&format!("sd/{}", name), b"x");
        }
        let mut view = fixture.view(Partition::SdCard);
        view.select(2);

        fixture.script.answer(&[Some(1)]);
        assert!(matches!(view.delete(&mut fixture.session, "c"), Err(BrowserError::Cancelled)));
        assert!(fixture.path("sd/c").exists());

        fixture.script.answer(&[Some(0)]);
        view.delete(&mut fixture.session, "c").unwrap();
        assert!(!fixture.path("sd/c").exists());
        assert_eq!(view.selected(), 1);
        assert_eq!(names(&view), vec!["a", "b"]);
    }

    #[test]
    fn test_protected_partition_requires_confirmation() {
        let mut fixture = Fixture::new();
        fixture.write("system/save/8000000000000120", b"system save");
        let mut view = fixture.view(Partition::NANDSystem);
        view.activate("save").unwrap();

        fixture.script.answer(&[Some(1)]);
        let result = view.delete(&mut fixture.session, "8000000000000120");
        assert!(matches!(result, Err(BrowserError::Explorer(ExplorerError::WriteAccessDenied(_)))));
        assert!(fixture.path("system/save/8000000000000120").exists());
        assert_eq!(*fixture.script.titles.borrow(), vec!["Write access"]);

        fixture.script.answer(&[Some(0), Some(0)]);
        view.delete(&mut fixture.session, "8000000000000120").unwrap();
        assert!(!fixture.path("system/save/8000000000000120").exists());
    }

    #[test]
    fn test_rename_rules() {
        let mut fixture = Fixture::new();
        fixture.write("sd/old.txt", b"old");
        fixture.write("sd/taken.txt", b"taken");
        fixture.write("sd/folder/inner", b"x");
        let mut view = fixture.view(Partition::SdCard);

        assert!(!view.rename(&mut fixture.session, "old.txt", "old.txt").unwrap());
        assert!(matches!(
            view.rename(&mut fixture.session, "old.txt", "taken.txt"),
            Err(BrowserError::Explorer(ExplorerError::EntryAlreadyPresent(_)))
        ));
        assert_eq!(fs::read(fixture.path("sd/old.txt")).unwrap(), b"old");
        assert_eq!(fs::read(fixture.path("sd/taken.txt")).unwrap(), b"taken");

        assert!(view.rename(&mut fixture.session, "old.txt", "new.txt").unwrap());
        assert!(view.rename(&mut fixture.session, "folder", "renamed").unwrap());
        assert!(fixture.path("sd/renamed/inner").exists());
        assert_eq!(names(&view), vec!["renamed", "new.txt", "taken.txt"]);
    }

    #[test]
    fn test_copy_paste_across_views() {
        let mut fixture = Fixture::new();
        fixture.write("sd/game.nsp", b"package bytes");
        fixture.write("sd/dir/sub/deep.bin", b"deep");
        let sd = fixture.view(Partition::SdCard);
        let mut user = fixture.view(Partition::NANDUser);

        sd.copy(&mut fixture.session, "game.nsp");
        assert_eq!(user.paste(&mut fixture.session).unwrap(), 13);
        assert_eq!(fs::read(fixture.path("user/game.nsp")).unwrap(), b"package bytes");
        assert!(matches!(
            user.paste(&mut fixture.session),
            Err(BrowserError::Explorer(ExplorerError::EntryAlreadyPresent(_)))
        ));
        assert!(!fixture.session.clipboard.is_empty());

        sd.copy(&mut fixture.session, "dir");
        assert_eq!(user.paste(&mut fixture.session).unwrap(), 4);
        assert!(fixture.path("user/dir/sub/deep.bin").exists());
        assert_eq!(names(&user), vec!["dir", "game.nsp"]);
    }

    #[test]
    fn test_paste_into_itself_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.write("sd/dir/file", b"x");
        let mut view = fixture.view(Partition::SdCard);
        view.copy(&mut fixture.session, "dir");
        view.activate("dir").unwrap();
        assert!(matches!(
            view.paste(&mut fixture.session),
            Err(BrowserError::PasteIntoItself(_))
        ));

        let mut empty = Fixture::new();
        let mut other = empty.view(Partition::SdCard);
        assert!(matches!(other.paste(&mut empty.session), Err(BrowserError::ClipboardEmpty)));
    }

    #[test]
    fn test_jump_to_selects_entry() {
        let fixture = Fixture::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fixture.write(&format!("sd/docs/{}", name), b"x");
        }
        let mut view = fixture.view(Partition::SdCard);
        let target = format!("{}/docs/b.txt", fixture.path("sd").to_str().unwrap());
        view.jump_to(&target).unwrap();

        assert_eq!(view.explorer().presentable_cwd(), "sdmc:/docs");
        assert_eq!(view.selected_entry().map(|e| e.name.as_str()), Some("b.txt"));
        // The jump left no history
        assert!(view.go_back());
        assert_eq!(view.explorer().presentable_cwd(), "sdmc:/");
    }

    #[test]
    fn test_install_from_view() {
        let mut fixture = Fixture::new();
        fixture.write("sd/packages/a.nsp", &build_pfs0(&[("a.nca", b"first")]));
        fixture.write("sd/packages/b.nsp", &build_pfs0(&[("b.nca", b"second")]));
        let mut view = fixture.view(Partition::SdCard);

        let info = view.inspect_directory("packages").unwrap();
        assert_eq!(info.packages, vec!["a.nsp", "b.nsp"]);
        assert_eq!(info.actions.last(), Some(&DirectoryAction::InstallAll));

        fixture.script.answer(&[Some(2)]);
        assert!(matches!(view.install_all(&mut fixture.session, "packages"), Err(BrowserError::Cancelled)));

        fixture.script.answer(&[Some(1)]);
        let report = view.install_all(&mut fixture.session, "packages").unwrap();
        assert_eq!(report.succeeded(), 2);
        let registered = fixture.path("user").join(CONTENT_DIRECTORY);
        assert_eq!(fs::read(registered.join("b.nca")).unwrap(), b"second");

        view.activate("packages").unwrap();
        fixture.script.answer(&[Some(0)]);
        let outcome = view.install(&mut fixture.session, "a.nsp").unwrap();
        assert_eq!(outcome.content().bytes_written, 5);
        assert!(fixture.path("sd").join(CONTENT_DIRECTORY).join("a.nca").exists());
    }

    #[test]
    fn test_import_ticket_and_archive_bit() {
        let mut fixture = Fixture::new();
        let mut ticket = vec![0u8; 4 + 0x100 + 0x3C + 0x180];
        ticket[0..4].copy_from_slice(&0x10004u32.to_le_bytes());
        ticket[4 + 0x100 + 0x3C + 0x160] = 0x42;
        fixture.write("sd/title.tik", &ticket);
        fixture.write("sd/split.nsp/00", b"part");
        let mut view = fixture.view(Partition::SdCard);

        fixture.script.answer(&[Some(0)]);
        view.import_ticket(&mut fixture.session, "title.tik").unwrap();
        let stored = fixture
            .path("system/save/tickets")
            .join(format!("42{}.tik", "00".repeat(15)));
        assert_eq!(fs::read(stored).unwrap(), ticket);

        assert!(view.set_archive_bit(&mut fixture.session, "split.nsp").unwrap());
        match view.activate("split.nsp").unwrap() {
            Activation::File(info) => {
                assert_eq!(info.size, 4);
                assert_eq!(info.actions[0], FileAction::Install);
            }
            Activation::Entered => panic!("split file was entered as a directory"),
        }

        let mut user = fixture.view(Partition::NANDUser);
        fixture.write("user/dir/f", b"x");
        user.refresh(None);
        assert!(!user.set_archive_bit(&mut fixture.session, "dir").unwrap());
    }

    #[test]
    fn test_archive_bit_on_protected_partition_requires_confirmation() {
        let mut fixture = Fixture::new();
        fixture.write("system/split/00", b"part");
        let mut view = fixture.view(Partition::NANDSystem);

        fixture.script.answer(&[Some(1)]);
        let result = view.set_archive_bit(&mut fixture.session, "split");
        assert!(matches!(result, Err(BrowserError::Explorer(ExplorerError::WriteAccessDenied(_)))));
        assert_eq!(*fixture.script.titles.borrow(), vec!["Write access"]);

        fixture.script.answer(&[Some(0)]);
        assert!(!view.set_archive_bit(&mut fixture.session, "split").unwrap());
    }
}
