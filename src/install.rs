//! Package installation pipeline
//!
//! An install request runs `SpaceChecking -> Extracting -> Writing ->
//! TicketImporting -> Done`, or stops in `Failed`. Free space is checked
//! once, before the package is opened; nothing is written when it fails.

use std::sync::mpsc::Sender;

use log::{error, info, warn};
use thiserror::Error;

use crate::fs::{join_path, Explorer, ExplorerError, FileKind, Partition};
use crate::package::{open_package, Package, PackageError};
use crate::platform::{confirm_write_access, Confirm, InstalledContent, Platform, PlatformError};
use crate::ticket::{CertificateChain, Ticket, TicketError, TicketImporter};

/// Destinations offered when the user picks where to install
pub const INSTALL_DESTINATIONS: [Partition; 2] = [Partition::SdCard, Partition::NANDUser];

/// Why an install ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NotEnoughSpace,
    WriteAccessDenied,
    Source,
    Package,
    Content,
    SpaceQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Idle,
    SpaceChecking,
    Extracting,
    Writing,
    TicketImporting,
    Done,
    Failed(FailureReason),
}

/// State change reported to an observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEvent {
    pub source: String,
    pub state: InstallState,
}

/// Errors that end an install request
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Not enough space: {required} bytes required, {available} available")]
    NotEnoughSpace { required: u64, available: u64 },

    #[error("Write access to {0} was not confirmed")]
    WriteAccessDenied(&'static str),

    #[error("Explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    #[error("Content install failed: {0}")]
    Content(PlatformError),

    #[error("Free space query failed: {0}")]
    Space(PlatformError),
}

impl InstallError {
    pub fn reason(&self) -> FailureReason {
        match self {
            InstallError::NotEnoughSpace { .. } => FailureReason::NotEnoughSpace,
            InstallError::WriteAccessDenied(_) => FailureReason::WriteAccessDenied,
            InstallError::Explorer(_) => FailureReason::Source,
            InstallError::Package(_) => FailureReason::Package,
            InstallError::Content(_) => FailureReason::Content,
            InstallError::Space(_) => FailureReason::SpaceQuery,
        }
    }
}

/// A package to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Path of the package on the source explorer
    pub source_path: String,
    pub destination: Partition,
    /// Part of a batch whose destination was chosen (and confirmed) once
    pub is_batch_member: bool,
}

impl InstallRequest {
    pub fn new(source_path: impl Into<String>, destination: Partition) -> Self {
        Self {
            source_path: source_path.into(),
            destination,
            is_batch_member: false,
        }
    }

    pub fn batch_member(source_path: impl Into<String>, destination: Partition) -> Self {
        Self {
            is_batch_member: true,
            ..Self::new(source_path, destination)
        }
    }
}

/// Result of a completed install
#[derive(Debug)]
pub enum InstallOutcome {
    Installed(InstalledContent),
    /// Content is present, but its ticket could not be imported
    InstalledWithoutRights {
        content: InstalledContent,
        error: TicketError,
    },
}

impl InstallOutcome {
    pub fn content(&self) -> &InstalledContent {
        match self {
            InstallOutcome::Installed(content) => content,
            InstallOutcome::InstalledWithoutRights { content, .. } => content,
        }
    }

    pub fn has_rights(&self) -> bool {
        matches!(self, InstallOutcome::Installed(_))
    }
}

/// Per-member results of a batch install
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(String, Result<InstallOutcome, InstallError>)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Installs packages against the platform services
pub struct Installer<'p> {
    platform: &'p mut Platform,
    certificate_chain: &'p CertificateChain,
    state: InstallState,
    events: Option<Sender<InstallEvent>>,
}

impl<'p> Installer<'p> {
    pub fn new(platform: &'p mut Platform, certificate_chain: &'p CertificateChain) -> Self {
        Self {
            platform,
            certificate_chain,
            state: InstallState::Idle,
            events: None,
        }
    }

    /// Report every state change on `sender`
    pub fn with_events(mut self, sender: Sender<InstallEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    fn transition(&mut self, source: &str, state: InstallState) {
        self.state = state;
        if let Some(events) = &self.events {
            let _ = events.send(InstallEvent {
                source: source.to_string(),
                state,
            });
        }
    }

    /// Run one install request to its terminal state
    pub fn start_install(
        &mut self,
        request: &InstallRequest,
        source: &dyn Explorer,
        confirm: &mut dyn Confirm,
    ) -> Result<InstallOutcome, InstallError> {
        info!(
            "Installing {} to {}",
            request.source_path,
            request.destination.display_name()
        );
        let result = self.run(request, source, confirm);
        match &result {
            Ok(outcome) => {
                self.transition(&request.source_path, InstallState::Done);
                info!(
                    "Installed {} ({} bytes)",
                    request.source_path,
                    outcome.content().bytes_written
                );
            }
            Err(e) => {
                self.transition(&request.source_path, InstallState::Failed(e.reason()));
                error!("Install of {} failed: {}", request.source_path, e);
            }
        }
        result
    }

    fn run(
        &mut self,
        request: &InstallRequest,
        source: &dyn Explorer,
        confirm: &mut dyn Confirm,
    ) -> Result<InstallOutcome, InstallError> {
        let destination = request.destination;
        if destination.should_warn_on_write_access()
            && !request.is_batch_member
            && !confirm_write_access(confirm, destination.display_name())
        {
            return Err(InstallError::WriteAccessDenied(destination.display_name()));
        }

        self.transition(&request.source_path, InstallState::SpaceChecking);
        let required = if source.is_directory(&request.source_path) {
            source.get_directory_size(&request.source_path)?
        } else {
            source.get_file_size(&request.source_path)?
        };
        let available = self
            .platform
            .space
            .free_space(destination)
            .map_err(InstallError::Space)?;
        if required > available {
            return Err(InstallError::NotEnoughSpace {
                required,
                available,
            });
        }

        self.transition(&request.source_path, InstallState::Extracting);
        let mut package = open_package(source, &request.source_path)?;

        self.transition(&request.source_path, InstallState::Writing);
        let content = self
            .platform
            .content
            .install(package.as_mut(), destination)
            .map_err(InstallError::Content)?;

        let Some(ticket_index) = package.find_kind(FileKind::Tik) else {
            return Ok(InstallOutcome::Installed(content));
        };
        self.transition(&request.source_path, InstallState::TicketImporting);
        match self.import_bundled_ticket(package.as_mut(), ticket_index) {
            Ok(()) => Ok(InstallOutcome::Installed(content)),
            Err(error) => {
                // Content stays installed
                warn!(
                    "{} was installed without rights: {}",
                    request.source_path, error
                );
                Ok(InstallOutcome::InstalledWithoutRights { content, error })
            }
        }
    }

    fn import_bundled_ticket(
        &mut self,
        package: &mut dyn Package,
        ticket_index: usize,
    ) -> Result<(), TicketError> {
        let ticket = package
            .read_entry_to_end(ticket_index)
            .map(Ticket::from_bytes)
            .map_err(|e| TicketError::Read(e.to_string()))?;
        let bundled = match package.find_kind(FileKind::Cert) {
            Some(index) => Some(
                package
                    .read_entry_to_end(index)
                    .map_err(|e| TicketError::Read(e.to_string()))?,
            ),
            None => None,
        };

        let mut importer = TicketImporter::new(self.platform.rights.as_mut(), self.certificate_chain);
        match bundled {
            Some(certificate) => importer.import_with(&ticket, &certificate),
            None => importer.import(&ticket),
        }
    }

    /// Install every `.nsp` directly inside `directory` to one destination
    ///
    /// Each member gets its own space check; a failed member does not stop
    /// the rest.
    pub fn install_batch(
        &mut self,
        source: &dyn Explorer,
        directory: &str,
        destination: Partition,
        confirm: &mut dyn Confirm,
    ) -> Result<BatchReport, InstallError> {
        let directory = source.cursor().resolve(directory)?;
        if !source.is_directory(&directory) {
            return Err(ExplorerError::NotADirectory(directory).into());
        }
        if destination.should_warn_on_write_access()
            && !confirm_write_access(confirm, destination.display_name())
        {
            return Err(InstallError::WriteAccessDenied(destination.display_name()));
        }

        let members: Vec<String> = source
            .list_files(&directory)
            .into_iter()
            .filter(|name| FileKind::from_name(name) == FileKind::Nsp)
            .map(|name| join_path(&directory, &name))
            .collect();
        info!("Batch install of {} packages from {}", members.len(), directory);

        let mut report = BatchReport::default();
        for member in members {
            let request = InstallRequest::batch_member(member.clone(), destination);
            let result = self.start_install(&request, source, confirm);
            report.results.push((member, result));
        }
        info!(
            "Batch install finished: {} installed, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }
}
