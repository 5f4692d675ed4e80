//! External platform services
//!
//! Free-space queries, content installation, the rights database and the
//! user confirmation dialog are owned by the surrounding platform. The
//! core only talks to them through these traits.

pub mod host;

use std::io;

use thiserror::Error;

use crate::fs::{Backing, Explorer, ExplorerError, Partition};
use crate::package::Package;

/// Errors reported by a platform service
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Partition {0:?} is not available")]
    Unavailable(Partition),
}

/// Free and total capacity of a partition
pub trait SpaceService {
    /// Bytes available at call time
    fn free_space(&self, partition: Partition) -> Result<u64, PlatformError>;

    fn total_space(&self, partition: Partition) -> Result<u64, PlatformError>;
}

/// Summary of an installed package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledContent {
    /// Content entries written to the destination
    pub entries: usize,
    /// Bytes occupied on the destination
    pub bytes_written: u64,
}

/// Writes package content into a partition's content database
pub trait ContentService {
    fn install(
        &mut self,
        package: &mut dyn Package,
        destination: Partition,
    ) -> Result<InstalledContent, PlatformError>;
}

/// The rights database
pub trait RightsService {
    fn import_ticket(&mut self, ticket: &[u8], certificate: &[u8]) -> Result<(), PlatformError>;
}

/// Modal confirmation dialog shown by the UI layer
pub trait Confirm {
    /// Returns the chosen option index, or None on cancel
    fn confirm(&mut self, title: &str, message: &str, options: &[&str]) -> Option<usize>;
}

/// Options of the write-access dialog; index 0 proceeds
pub const WRITE_ACCESS_OPTIONS: [&str; 2] = ["Yes", "Cancel"];

/// Ask for confirmation before mutating a protected partition
pub fn confirm_write_access(confirm: &mut dyn Confirm, target: &str) -> bool {
    let message = format!(
        "{} is a protected partition. Modifying it may damage the system.\nContinue?",
        target
    );
    let accepted = confirm.confirm("Write access", &message, &WRITE_ACCESS_OPTIONS) == Some(0);
    if !accepted {
        log::warn!("Write access to {} declined", target);
    }
    accepted
}

/// Builds explorers for a backend identity
pub trait ExplorerProvider {
    fn open(&self, backing: &Backing) -> Result<Box<dyn Explorer>, ExplorerError>;
}

/// The set of services an installer or browser session works against
pub struct Platform {
    pub space: Box<dyn SpaceService>,
    pub content: Box<dyn ContentService>,
    pub rights: Box<dyn RightsService>,
}

impl Platform {
    pub fn new(
        space: Box<dyn SpaceService>,
        content: Box<dyn ContentService>,
        rights: Box<dyn RightsService>,
    ) -> Self {
        Self {
            space,
            content,
            rights,
        }
    }
}
