//! Application control property (NACP) reader
//!
//! Only the fields shown by the file viewer are decoded: the title and
//! author of a language slot, the display version and a few policy bytes.

use thiserror::Error;

use crate::fs::{Explorer, ExplorerError, FileMode};

/// Size of a complete control property block
pub const NACP_SIZE: usize = 0x4000;

const LANGUAGE_COUNT: usize = 16;
const LANGUAGE_ENTRY_SIZE: usize = 0x300;
const NAME_SIZE: usize = 0x200;
const AUTHOR_SIZE: usize = 0x100;

const STARTUP_USER_ACCOUNT_OFFSET: usize = 0x3025;
const SCREENSHOT_OFFSET: usize = 0x3034;
const VIDEO_CAPTURE_OFFSET: usize = 0x3035;
const DISPLAY_VERSION_OFFSET: usize = 0x3060;
const DISPLAY_VERSION_SIZE: usize = 0x10;
const LOGO_TYPE_OFFSET: usize = 0x30F0;

/// Errors that can occur while reading a NACP file
#[derive(Debug, Error)]
pub enum NacpError {
    #[error("Explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("File is too small to be a NACP ({size} bytes)")]
    TooSmall { size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupUserAccount {
    None,
    Required,
    RequiredWithNetworkServiceAccountAvailable,
    Unknown(u8),
}

impl From<u8> for StartupUserAccount {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Required,
            2 => Self::RequiredWithNetworkServiceAccountAvailable,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screenshot {
    Allow,
    Deny,
    Unknown(u8),
}

impl From<u8> for Screenshot {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Allow,
            1 => Self::Deny,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCapture {
    Disabled,
    Manual,
    Enabled,
    Unknown(u8),
}

impl From<u8> for VideoCapture {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Disabled,
            1 => Self::Manual,
            2 => Self::Enabled,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoType {
    LicensedByNintendo,
    Nintendo,
    Unknown(u8),
}

impl From<u8> for LogoType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::LicensedByNintendo,
            2 => Self::Nintendo,
            other => Self::Unknown(other),
        }
    }
}

/// Decoded control property fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NacpInfo {
    /// None when every language slot is empty
    pub name: Option<String>,
    pub author: Option<String>,
    pub display_version: String,
    pub startup_user_account: StartupUserAccount,
    pub screenshot: Screenshot,
    pub video_capture: VideoCapture,
    pub logo_type: LogoType,
}

/// Read a fixed size, NUL padded UTF-8 field
fn read_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

impl NacpInfo {
    /// Decode a NACP block, preferring the `language` slot
    pub fn parse(data: &[u8], language: usize) -> Result<Self, NacpError> {
        if data.len() < NACP_SIZE {
            return Err(NacpError::TooSmall {
                size: data.len() as u64,
            });
        }

        let slot = |index: usize| {
            let base = index * LANGUAGE_ENTRY_SIZE;
            let name = read_string(&data[base..base + NAME_SIZE]);
            let author = read_string(&data[base + NAME_SIZE..base + NAME_SIZE + AUTHOR_SIZE]);
            (name, author)
        };

        // Preferred slot first, then the first non-empty one
        let entry = std::iter::once(language)
            .filter(|&index| index < LANGUAGE_COUNT)
            .chain(0..LANGUAGE_COUNT)
            .map(slot)
            .find(|(name, _)| !name.is_empty());

        let (name, author) = match entry {
            Some((name, author)) => (Some(name), Some(author)),
            None => (None, None),
        };

        Ok(Self {
            name,
            author,
            display_version: read_string(
                &data[DISPLAY_VERSION_OFFSET..DISPLAY_VERSION_OFFSET + DISPLAY_VERSION_SIZE],
            ),
            startup_user_account: data[STARTUP_USER_ACCOUNT_OFFSET].into(),
            screenshot: data[SCREENSHOT_OFFSET].into(),
            video_capture: data[VIDEO_CAPTURE_OFFSET].into(),
            logo_type: data[LOGO_TYPE_OFFSET].into(),
        })
    }

    /// Read a `.nacp` file through a scoped handle on `explorer`
    pub fn read_from(explorer: &dyn Explorer, path: &str, language: usize) -> Result<Self, NacpError> {
        let size = explorer.get_file_size(path)?;
        if size < NACP_SIZE as u64 {
            return Err(NacpError::TooSmall { size });
        }
        let data = {
            let mut handle = explorer.open_file(path, FileMode::Read)?;
            handle.read_exact_at(0, NACP_SIZE)?
        };
        Self::parse(&data, language)
    }

    /// Multi-line summary for the viewer dialog
    pub fn summary(&self) -> String {
        format!(
            "Name: {}\nAuthor: {}\nVersion: {}\nStartup user account: {:?}\nScreenshots: {:?}\nVideo capture: {:?}\nLogo type: {:?}",
            self.name.as_deref().unwrap_or("Unknown"),
            self.author.as_deref().unwrap_or("Unknown"),
            self.display_version,
            self.startup_user_account,
            self.screenshot,
            self.video_capture,
            self.logo_type
        )
    }
}
