//! Single-slot clipboard for pending copy operations

use crate::fs::Backing;

/// An entry waiting to be pasted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardItem {
    /// Backend the path belongs to
    pub backing: Backing,
    /// Real path of the copied file or directory
    pub path: String,
}

/// Holds at most one copied path; the last copy wins
///
/// Pasting does not clear the slot, so the same source can be pasted
/// repeatedly.
#[derive(Debug, Clone, Default)]
pub struct Clipboard {
    item: Option<ClipboardItem>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held value
    pub fn set(&mut self, backing: Backing, path: impl Into<String>) {
        let path = path.into();
        log::debug!("Clipboard set to {} on {:?}", path, backing);
        self.item = Some(ClipboardItem { backing, path });
    }

    /// The value a paste would use, left in place
    pub fn consume(&self) -> Option<&ClipboardItem> {
        self.item.as_ref()
    }

    /// Check whether something is held
    pub fn is_empty(&self) -> bool {
        self.item.is_none()
    }

    pub fn clear(&mut self) {
        self.item = None;
    }
}
