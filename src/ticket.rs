//! Ticket import
//!
//! Tickets are kept as raw bytes; the rights service owns their format.
//! The importer only pairs them with a certificate chain.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::fs::{Explorer, ExplorerError};
use crate::platform::{PlatformError, RightsService};

/// Errors that can occur while importing a ticket
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("Explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("Failed to read ticket from package: {0}")]
    Read(String),

    #[error("Ticket is empty")]
    Empty,

    #[error("Ticket import failed: {0}")]
    ImportFailed(#[from] PlatformError),
}

/// Raw ticket bytes as read from a `.tik` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    bytes: Vec<u8>,
}

impl Ticket {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Read a ticket file through an explorer
    pub fn read_from(explorer: &dyn Explorer, path: &str) -> Result<Self, TicketError> {
        Ok(Self::from_bytes(explorer.read_file(path)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Signature type and rights id, if the header is well formed
    pub fn info(&self) -> Option<TicketInfo> {
        TicketInfo::parse(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Header fields the rights store needs from a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketInfo {
    pub signature_type: u32,
    pub rights_id: [u8; 16],
}

impl TicketInfo {
    const BODY_SIZE: usize = 0x180;
    const RIGHTS_ID_OFFSET: usize = 0x160;

    /// Parse the signature type and rights id of a ticket
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let signature_type = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let (signature_size, padding) = match signature_type {
            0x10000 | 0x10003 => (0x200, 0x3C),
            0x10001 | 0x10004 => (0x100, 0x3C),
            0x10002 | 0x10005 => (0x3C, 0x40),
            _ => return None,
        };
        let body = 4 + signature_size + padding;
        if data.len() < body + Self::BODY_SIZE {
            return None;
        }
        let start = body + Self::RIGHTS_ID_OFFSET;
        let mut rights_id = [0u8; 16];
        rights_id.copy_from_slice(&data[start..start + 16]);
        Some(Self {
            signature_type,
            rights_id,
        })
    }

    pub fn rights_id_hex(&self) -> String {
        hex::encode(self.rights_id)
    }
}

/// Certificate chain handed to the rights service alongside tickets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain {
    bytes: Vec<u8>,
}

impl CertificateChain {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Load the chain blob from a file
    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Binds tickets into the rights database
pub struct TicketImporter<'a> {
    rights: &'a mut dyn RightsService,
    certificate_chain: &'a CertificateChain,
}

impl<'a> TicketImporter<'a> {
    pub fn new(rights: &'a mut dyn RightsService, certificate_chain: &'a CertificateChain) -> Self {
        Self {
            rights,
            certificate_chain,
        }
    }

    /// Import a ticket with the fixed certificate chain
    pub fn import(&mut self, ticket: &Ticket) -> Result<(), TicketError> {
        let chain = self.certificate_chain;
        self.import_with(ticket, chain.as_bytes())
    }

    /// Import a ticket with an explicit certificate chain (e.g. one bundled in a package)
    pub fn import_with(&mut self, ticket: &Ticket, certificate: &[u8]) -> Result<(), TicketError> {
        if ticket.is_empty() {
            return Err(TicketError::Empty);
        }
        self.rights.import_ticket(ticket.as_bytes(), certificate)?;
        log::info!("Imported ticket ({} bytes) with {} byte certificate chain", ticket.len(), certificate.len());
        Ok(())
    }

    /// Read a `.tik` file through `explorer` and import it
    pub fn import_file(&mut self, explorer: &dyn Explorer, path: &str) -> Result<(), TicketError> {
        let ticket = Ticket::read_from(explorer, path)?;
        self.import(&ticket)
    }
}
