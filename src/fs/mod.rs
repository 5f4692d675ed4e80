//! Storage module
//!
//! Partition identities, path helpers and the explorer abstraction used to
//! browse and mutate every storage backend of the device.

pub mod backend;
pub mod explorer;

pub use backend::{
    Backend, BackendFile, CardBackend, EntryKind, FileMode, LocalBackend, MountedHost, ARCHIVE_MARKER,
};
pub use explorer::{
    Backing, Cursor, DirectoryEntry, Explorer, ExplorerError, FileHandle, NandSafeExplorer,
    NandSystemExplorer, NandUserExplorer, ProdInfoFExplorer, RemoteHostExplorer, SdCardExplorer,
};

use serde::{Deserialize, Serialize};

/// Number of bytes inspected when deciding whether a file is binary
pub const BINARY_PROBE_SIZE: usize = 0x200;

/// Storage regions of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    SdCard,
    NANDSystem,
    NANDUser,
    NANDSafe,
    PRODINFOF,
}

impl Partition {
    /// Every partition, in menu order
    pub const ALL: [Partition; 5] = [
        Partition::SdCard,
        Partition::NANDUser,
        Partition::NANDSystem,
        Partition::NANDSafe,
        Partition::PRODINFOF,
    ];

    /// Mount name shown to the user
    pub fn mount_name(&self) -> &'static str {
        match self {
            Self::SdCard => "sdmc",
            Self::NANDSystem => "@System",
            Self::NANDUser => "@User",
            Self::NANDSafe => "@Safe",
            Self::PRODINFOF => "@PRODINFOF",
        }
    }

    /// Presentable root path (e.g. `sdmc:/`)
    pub fn presentable_root(&self) -> String {
        format!("{}:/", self.mount_name())
    }

    /// Whether mutating this partition requires an explicit confirmation
    pub fn should_warn_on_write_access(&self) -> bool {
        matches!(self, Self::NANDSystem | Self::NANDSafe | Self::PRODINFOF)
    }

    /// Get the display name for this partition
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SdCard => "SD card",
            Self::NANDSystem => "NAND (system)",
            Self::NANDUser => "NAND (user)",
            Self::NANDSafe => "NAND (safe)",
            Self::PRODINFOF => "PRODINFOF",
        }
    }

    /// Parse a short command-line name
    pub fn from_short_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sd" | "sdmc" | "sdcard" => Some(Self::SdCard),
            "system" | "nand-system" => Some(Self::NANDSystem),
            "user" | "nand-user" => Some(Self::NANDUser),
            "safe" | "nand-safe" => Some(Self::NANDSafe),
            "prodinfof" => Some(Self::PRODINFOF),
            _ => None,
        }
    }
}

/// File classification by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Nsp,
    Nro,
    Tik,
    Cert,
    NxTheme,
    Nca,
    Nacp,
    Jpeg,
    Bin,
    Other,
}

impl FileKind {
    /// Classify a file name by its extension
    pub fn from_name(name: &str) -> Self {
        match get_extension(name).as_str() {
            "nsp" => Self::Nsp,
            "nro" => Self::Nro,
            "tik" => Self::Tik,
            "cert" => Self::Cert,
            "nxtheme" => Self::NxTheme,
            "nca" => Self::Nca,
            "nacp" => Self::Nacp,
            "jpg" | "jpeg" => Self::Jpeg,
            "bin" => Self::Bin,
            _ => Self::Other,
        }
    }

    /// Human readable description of the file type
    pub fn description(&self) -> &'static str {
        match self {
            Self::Nsp => "Nintendo Submission Package",
            Self::Nro => "Homebrew executable",
            Self::Tik => "Ticket",
            Self::Cert => "Certificate",
            Self::NxTheme => "Home menu theme",
            Self::Nca => "Content archive",
            Self::Nacp => "Application control data",
            Self::Jpeg => "JPEG image",
            Self::Bin => "Binary file",
            Self::Other => "File",
        }
    }
}

/// Lowercase extension of a path, without the dot
pub fn get_extension(path: &str) -> String {
    let name = get_file_name(path);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => name[idx + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// Last component of a `/` separated path
pub fn get_file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent of a `/` separated path (keeps a lone root slash)
pub fn get_base_directory(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) if trimmed[..idx].ends_with(':') => &trimmed[..idx + 1],
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Join a directory and an entry name with a single separator
pub fn join_path(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Format a byte count for display
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if size < KB {
        format!("{} B", size)
    } else if size < MB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else if size < GB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size < TB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else {
        format!("{:.2} TB", size as f64 / TB as f64)
    }
}

/// Check whether a content prefix looks binary
///
/// A NUL byte or any control character other than common whitespace and
/// escape marks the data as binary. Empty data is text.
pub fn is_binary_data(data: &[u8]) -> bool {
    data.iter().any(|&b| {
        b == 0 || (b < 0x20 && !matches!(b, 0x09 | 0x0A | 0x0C | 0x0D | 0x1B)) || b == 0x7F
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_warning_policy() {
        for partition in Partition::ALL {
            let expected = matches!(
                partition,
                Partition::NANDSystem | Partition::NANDSafe | Partition::PRODINFOF
            );
            assert_eq!(partition.should_warn_on_write_access(), expected, "{:?}", partition);
        }
    }

    #[test]
    fn test_get_extension() {
        assert_eq!(get_extension("sdmc:/games/Game.NSP"), "nsp");
        assert_eq!(get_extension("photo.jpeg"), "jpeg");
        assert_eq!(get_extension("archive.tar.gz"), "gz");
        assert_eq!(get_extension("README"), "");
        assert_eq!(get_extension("trailing."), "");
        assert_eq!(get_extension("/dir.d/file"), "");
    }

    #[test]
    fn test_file_kind() {
        assert_eq!(FileKind::from_name("a.nsp"), FileKind::Nsp);
        assert_eq!(FileKind::from_name("a.JPG"), FileKind::Jpeg);
        assert_eq!(FileKind::from_name("a.tik"), FileKind::Tik);
        assert_eq!(FileKind::from_name("a.txt"), FileKind::Other);
    }

    #[test]
    fn test_path_components() {
        assert_eq!(get_file_name("/a/b/c.nsp"), "c.nsp");
        assert_eq!(get_file_name("/a/b/"), "b");
        assert_eq!(get_base_directory("/a/b/c.nsp"), "/a/b");
        assert_eq!(get_base_directory("/a"), "/");
        assert_eq!(get_base_directory("C:/games"), "C:/");
        assert_eq!(join_path("/a", "b"), "/a/b");
        assert_eq!(join_path("/a/", "b"), "/a/b");
        assert_eq!(join_path("C:/", "/b"), "C:/b");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_binary_detection() {
        assert!(!is_binary_data(b"hello world\r\n\tindented"));
        assert!(!is_binary_data(b""));
        assert!(is_binary_data(b"PFS0\x02\x00\x00\x00"));
        assert!(is_binary_data(&[0x41, 0x01, 0x42]));
        assert!(!is_binary_data("héllo".as_bytes()));
    }
}
