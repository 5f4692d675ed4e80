//! Host directory implementations of the platform services
//!
//! Each partition is a directory with a configured capacity. Installed
//! content lands under `Contents/registered` of the destination and
//! tickets under `save/tickets` of the system partition.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    ContentService, ExplorerProvider, InstalledContent, Platform, PlatformError, RightsService,
    SpaceService,
};
use crate::config::{AppConfig, MountConfig};
use crate::fs::{
    Backing, Explorer, ExplorerError, FileKind, MountedHost, NandSafeExplorer, NandSystemExplorer,
    NandUserExplorer, Partition, ProdInfoFExplorer, RemoteHostExplorer, SdCardExplorer,
};
use crate::package::{is_plain_entry_name, Package};
use crate::ticket::TicketInfo;

/// Directory of installed content, relative to a partition root
pub const CONTENT_DIRECTORY: &str = "Contents/registered";

/// Directory of install records, relative to a partition root
pub const RECORD_DIRECTORY: &str = "Contents/records";

/// Suffix of an entry while it is written, before it is moved into place
const PARTIAL_SUFFIX: &str = ".part";

/// Directory of imported tickets, relative to the system partition root
pub const TICKET_DIRECTORY: &str = "save/tickets";

/// Build the host platform services from the configuration
pub fn host_platform(config: &AppConfig) -> Platform {
    let mounts: HashMap<Partition, MountConfig> = Partition::ALL
        .iter()
        .map(|&p| (p, config.partitions.get(p).clone()))
        .collect();

    Platform::new(
        Box::new(HostSpace {
            mounts: mounts.clone(),
        }),
        Box::new(HostContentStore {
            mounts,
            verify_hashes: config.install.verify_content_hashes,
            block_size: config.install.block_size.max(1),
        }),
        Box::new(HostRightsStore::new(
            config.partitions.nand_system.root.join(TICKET_DIRECTORY),
        )),
    )
}

/// Recursive size of a host directory (0 if missing)
pub fn directory_usage(path: &Path) -> io::Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += directory_usage(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Free space as configured capacity minus the bytes under the mount root
pub struct HostSpace {
    mounts: HashMap<Partition, MountConfig>,
}

impl HostSpace {
    pub fn new(mounts: HashMap<Partition, MountConfig>) -> Self {
        Self { mounts }
    }

    fn mount(&self, partition: Partition) -> Result<&MountConfig, PlatformError> {
        self.mounts
            .get(&partition)
            .ok_or(PlatformError::Unavailable(partition))
    }
}

impl SpaceService for HostSpace {
    fn free_space(&self, partition: Partition) -> Result<u64, PlatformError> {
        let mount = self.mount(partition)?;
        let used = directory_usage(&mount.root)?;
        Ok(mount.capacity.saturating_sub(used))
    }

    fn total_space(&self, partition: Partition) -> Result<u64, PlatformError> {
        Ok(self.mount(partition)?.capacity)
    }
}

/// Record written for every installed package
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRecord {
    pub source: String,
    pub entries: Vec<RecordEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordEntry {
    pub name: String,
    pub size: u64,
}

/// Content database emulated as a directory per partition
pub struct HostContentStore {
    mounts: HashMap<Partition, MountConfig>,
    verify_hashes: bool,
    block_size: usize,
}

impl HostContentStore {
    pub fn new(mounts: HashMap<Partition, MountConfig>, verify_hashes: bool, block_size: usize) -> Self {
        Self {
            mounts,
            verify_hashes,
            block_size: block_size.max(1),
        }
    }

    /// Write an entry next to `target` and move it into place once verified
    fn write_entry(
        &self,
        package: &mut dyn Package,
        index: usize,
        target: &Path,
    ) -> Result<u64, PlatformError> {
        let partial = partial_path(target);
        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)?;
        let written = self
            .copy_entry(package, index, &mut output)
            .and_then(|size| {
                output.flush()?;
                drop(output);
                fs::rename(&partial, target)?;
                Ok(size)
            });
        if written.is_err() {
            remove_created(&[partial]);
        }
        written
    }

    fn copy_entry(
        &self,
        package: &mut dyn Package,
        index: usize,
        output: &mut File,
    ) -> Result<u64, PlatformError> {
        let entry = package.entries()[index].clone();
        let expected = if self.verify_hashes {
            expected_hash_prefix(&entry.name)
        } else {
            None
        };

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.block_size];
        let mut offset = 0u64;
        while offset < entry.size {
            let read = package
                .read_entry(index, offset, &mut buffer)
                .map_err(|e| PlatformError::Rejected(e.to_string()))?;
            if read == 0 {
                return Err(PlatformError::Rejected(format!(
                    "{} ended after {} of {} bytes",
                    entry.name, offset, entry.size
                )));
            }
            output.write_all(&buffer[..read])?;
            if expected.is_some() {
                hasher.update(&buffer[..read]);
            }
            offset += read as u64;
        }

        if let Some(expected) = expected {
            let digest = hasher.finalize();
            if digest[..16] != expected[..] {
                return Err(PlatformError::Rejected(format!(
                    "{} does not match its hash (got {})",
                    entry.name,
                    hex::encode(&digest[..16])
                )));
            }
        }
        Ok(offset)
    }
}

/// Whether `target` already holds the content its hashed name stands for
fn is_registered(name: &str, target: &Path) -> Result<bool, PlatformError> {
    let Some(expected) = expected_hash_prefix(name) else {
        return Ok(false);
    };
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(target)?, &mut hasher)?;
    Ok(hasher.finalize()[..16] == expected[..])
}

fn partial_path(target: &Path) -> PathBuf {
    let mut path = target.as_os_str().to_owned();
    path.push(PARTIAL_SUFFIX);
    PathBuf::from(path)
}

/// Remove files created by a failed install
fn remove_created(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Failed to remove {} after a failed install: {}", path.display(), e);
        }
    }
}

/// Record file name, unique per source path
fn record_name(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    format!(
        "{}-{}.json",
        crate::fs::get_file_name(source),
        hex::encode(&digest[..8])
    )
}

/// Hash prefix encoded in a content archive name (`<32 hex>.nca` or `.cnmt.nca`)
fn expected_hash_prefix(name: &str) -> Option<Vec<u8>> {
    let stem = name
        .strip_suffix(".cnmt.nca")
        .or_else(|| name.strip_suffix(".nca"))?;
    if stem.len() != 32 {
        return None;
    }
    hex::decode(stem).ok()
}

impl ContentService for HostContentStore {
    fn install(
        &mut self,
        package: &mut dyn Package,
        destination: Partition,
    ) -> Result<InstalledContent, PlatformError> {
        let mount = self
            .mounts
            .get(&destination)
            .ok_or(PlatformError::Unavailable(destination))?;
        let content_dir = mount.root.join(CONTENT_DIRECTORY);
        let record_dir = mount.root.join(RECORD_DIRECTORY);
        fs::create_dir_all(&content_dir)?;
        fs::create_dir_all(&record_dir)?;

        let indices: Vec<usize> = package
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| !matches!(e.kind(), FileKind::Tik | FileKind::Cert))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(PlatformError::Rejected(format!(
                "{} has no content entries",
                package.source_path()
            )));
        }

        // Decide every target before touching the store
        let mut plan = Vec::with_capacity(indices.len());
        for index in indices {
            let name = package.entries()[index].name.clone();
            if !is_plain_entry_name(&name) {
                return Err(PlatformError::Rejected(format!(
                    "{} has an unsafe entry name {:?}",
                    package.source_path(),
                    name
                )));
            }
            let target = content_dir.join(&name);
            let existing = if target.exists() {
                if !is_registered(&name, &target)? {
                    return Err(PlatformError::Rejected(format!(
                        "{} is already registered with other content",
                        name
                    )));
                }
                Some(fs::metadata(&target)?.len())
            } else {
                None
            };
            plan.push((index, name, target, existing));
        }

        let mut created = Vec::new();
        let mut entries = Vec::new();
        let mut bytes_written = 0;
        for (index, name, target, existing) in plan {
            if let Some(size) = existing {
                log::debug!("{} is already registered", name);
                entries.push(RecordEntry { name, size });
                continue;
            }
            match self.write_entry(package, index, &target) {
                Ok(size) => {
                    bytes_written += size;
                    created.push(target);
                    entries.push(RecordEntry { name, size });
                }
                Err(e) => {
                    remove_created(&created);
                    return Err(e);
                }
            }
        }

        let record = InstallRecord {
            source: package.source_path().to_string(),
            entries,
        };
        let saved = serde_json::to_string_pretty(&record)
            .map_err(|e| PlatformError::Rejected(e.to_string()))
            .and_then(|json| Ok(fs::write(record_dir.join(record_name(&record.source)), json)?));
        if let Err(e) = saved {
            remove_created(&created);
            return Err(e);
        }

        log::info!(
            "Registered {} content entries ({} bytes) on {}",
            record.entries.len(),
            bytes_written,
            destination.display_name()
        );
        Ok(InstalledContent {
            entries: record.entries.len(),
            bytes_written,
        })
    }
}

/// Rights database emulated as ticket/certificate files
pub struct HostRightsStore {
    directory: PathBuf,
}

impl HostRightsStore {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }
}

impl RightsService for HostRightsStore {
    fn import_ticket(&mut self, ticket: &[u8], certificate: &[u8]) -> Result<(), PlatformError> {
        if certificate.is_empty() {
            return Err(PlatformError::Rejected("empty certificate chain".to_string()));
        }
        let info = TicketInfo::parse(ticket)
            .ok_or_else(|| PlatformError::Rejected("malformed ticket".to_string()))?;

        fs::create_dir_all(&self.directory)?;
        let name = info.rights_id_hex();
        fs::write(self.directory.join(format!("{}.tik", name)), ticket)?;
        fs::write(self.directory.join(format!("{}.cert", name)), certificate)?;
        log::debug!("Stored ticket {} in {}", name, self.directory.display());
        Ok(())
    }
}

/// Explorer factory over the configured mounts
pub struct HostExplorers {
    config: AppConfig,
}

impl HostExplorers {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl ExplorerProvider for HostExplorers {
    fn open(&self, backing: &Backing) -> Result<Box<dyn Explorer>, ExplorerError> {
        match backing {
            Backing::Partition(partition) => {
                let root = &self.config.partitions.get(*partition).root;
                fs::create_dir_all(root)?;
                let root = root.to_string_lossy().to_string();
                Ok(match partition {
                    Partition::SdCard => Box::new(SdCardExplorer::new(root)),
                    Partition::NANDUser => Box::new(NandUserExplorer::new(root)),
                    Partition::NANDSystem => Box::new(NandSystemExplorer::new(root)),
                    Partition::NANDSafe => Box::new(NandSafeExplorer::new(root)),
                    Partition::PRODINFOF => Box::new(ProdInfoFExplorer::new(root)),
                })
            }
            Backing::Remote(name) => {
                let mount = self
                    .config
                    .remote_mount(name)
                    .ok_or_else(|| ExplorerError::NotFound(format!("remote mount {}", name)))?;
                Ok(Box::new(RemoteHostExplorer::mounted(MountedHost::new(
                    mount.name.clone(),
                    mount.root.clone(),
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteMount;
    use crate::package::{build_pfs0, PackageEntry, PackageError, Pfs0Package};
    use tempfile::TempDir;

    /// Package held in memory, without any name checks
    struct MemoryPackage {
        entries: Vec<PackageEntry>,
        data: Vec<Vec<u8>>,
    }

    impl MemoryPackage {
        fn new(files: &[(&str, &[u8])]) -> Self {
            Self {
                entries: files
                    .iter()
                    .map(|(name, data)| PackageEntry {
                        name: name.to_string(),
                        size: data.len() as u64,
                        offset: 0,
                    })
                    .collect(),
                data: files.iter().map(|(_, data)| data.to_vec()).collect(),
            }
        }
    }

    impl Package for MemoryPackage {
        fn source_path(&self) -> &str {
            "memory.nsp"
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
            let data = self.data.get(index).ok_or(PackageError::EntryOutOfRange(index))?;
            let start = (offset as usize).min(data.len());
            let length = buffer.len().min(data.len() - start);
            buffer[..length].copy_from_slice(&data[start..start + length]);
            Ok(length)
        }
    }

    fn hashed_name(body: &[u8]) -> String {
        format!("{}.nca", hex::encode(&Sha256::digest(body)[..16]))
    }

    fn leftover_partials(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(PARTIAL_SUFFIX))
            .collect()
    }

    fn config_in(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        for (partition, name) in [
            (Partition::SdCard, "sd"),
            (Partition::NANDUser, "user"),
            (Partition::NANDSystem, "system"),
            (Partition::NANDSafe, "safe"),
            (Partition::PRODINFOF, "prodinfof"),
        ] {
            let mount = MountConfig {
                root: dir.path().join(name),
                capacity: 10_000,
            };
            match partition {
                Partition::SdCard => config.partitions.sd_card = mount,
                Partition::NANDUser => config.partitions.nand_user = mount,
                Partition::NANDSystem => config.partitions.nand_system = mount,
                Partition::NANDSafe => config.partitions.nand_safe = mount,
                Partition::PRODINFOF => config.partitions.prodinfof = mount,
            }
        }
        config
    }

    fn sample_ticket(rights_id: [u8; 16]) -> Vec<u8> {
        let mut ticket = vec![0u8; 4 + 0x100 + 0x3C + 0x180];
        ticket[0..4].copy_from_slice(&0x10004u32.to_le_bytes());
        let start = 4 + 0x100 + 0x3C + 0x160;
        ticket[start..start + 16].copy_from_slice(&rights_id);
        ticket
    }

    #[test]
    fn test_free_space_tracks_usage() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let platform = host_platform(&config);
        assert_eq!(platform.space.free_space(Partition::SdCard).unwrap(), 10_000);

        fs::create_dir_all(dir.path().join("sd/a")).unwrap();
        fs::write(dir.path().join("sd/a/file"), vec![0u8; 1234]).unwrap();
        assert_eq!(platform.space.free_space(Partition::SdCard).unwrap(), 8766);
        assert_eq!(platform.space.total_space(Partition::SdCard).unwrap(), 10_000);
    }

    #[test]
    fn test_content_store_writes_and_verifies() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut platform = host_platform(&config);

        let body = b"content archive body".to_vec();
        let hashed_name = hashed_name(&body);
        fs::create_dir_all(dir.path().join("sd")).unwrap();
        let image = build_pfs0(&[
            (hashed_name.as_str(), body.as_slice()),
            ("control.nacp", b"nacp"),
            ("title.tik", b"tik"),
        ]);
        fs::write(dir.path().join("sd/game.nsp"), &image).unwrap();

        let explorer = SdCardExplorer::new(dir.path().join("sd").to_str().unwrap());
        let mut package = Pfs0Package::open(&explorer, "game.nsp").unwrap();
        let installed = platform.content.install(&mut package, Partition::NANDUser).unwrap();
        assert_eq!(installed.entries, 2);
        assert_eq!(installed.bytes_written, body.len() as u64 + 4);

        let registered = dir.path().join("user").join(CONTENT_DIRECTORY);
        assert_eq!(fs::read(registered.join(&hashed_name)).unwrap(), body);
        assert!(!registered.join("title.tik").exists());

        let record_path = dir
            .path()
            .join("user")
            .join(RECORD_DIRECTORY)
            .join(record_name(package.source_path()));
        let record: InstallRecord = serde_json::from_str(&fs::read_to_string(record_path).unwrap()).unwrap();
        assert_eq!(record.entries.len(), 2);
    }

    #[test]
    fn test_content_store_rejects_hash_mismatch() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut platform = host_platform(&config);

        let wrong_name = format!("{}.nca", "00".repeat(16));
        fs::create_dir_all(dir.path().join("sd")).unwrap();
        let image = build_pfs0(&[("ok.nca", b"fine"), (wrong_name.as_str(), b"tampered")]);
        fs::write(dir.path().join("sd/bad.nsp"), &image).unwrap();

        let explorer = SdCardExplorer::new(dir.path().join("sd").to_str().unwrap());
        let mut package = Pfs0Package::open(&explorer, "bad.nsp").unwrap();
        assert!(matches!(
            platform.content.install(&mut package, Partition::SdCard),
            Err(PlatformError::Rejected(_))
        ));
        let registered = dir.path().join("sd").join(CONTENT_DIRECTORY);
        assert!(!registered.join("ok.nca").exists());
        assert!(!registered.join(&wrong_name).exists());
    }

    #[test]
    fn test_content_store_rejects_unsafe_names() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut platform = host_platform(&config);
        let absolute = dir.path().join("outside.nca");

        for name in ["../../../escaped.nca", absolute.to_str().unwrap(), ".."] {
            let mut package = MemoryPackage::new(&[("ok.nca", b"fine"), (name, b"evil")]);
            assert!(matches!(
                platform.content.install(&mut package, Partition::NANDUser),
                Err(PlatformError::Rejected(_))
            ));
        }
        assert!(!absolute.exists());
        assert!(!dir.path().join("escaped.nca").exists());
        assert!(!dir.path().join("user").join(CONTENT_DIRECTORY).join("ok.nca").exists());
    }

    #[test]
    fn test_failed_install_keeps_existing_content() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut platform = host_platform(&config);
        let registered = dir.path().join("user").join(CONTENT_DIRECTORY);

        let mut first = MemoryPackage::new(&[("shared.nca", b"first title")]);
        platform.content.install(&mut first, Partition::NANDUser).unwrap();

        // Same name, different content: refused before anything is written
        let mut clashing = MemoryPackage::new(&[("new.nca", b"new"), ("shared.nca", b"second title")]);
        assert!(matches!(
            platform.content.install(&mut clashing, Partition::NANDUser),
            Err(PlatformError::Rejected(_))
        ));
        assert_eq!(fs::read(registered.join("shared.nca")).unwrap(), b"first title");
        assert!(!registered.join("new.nca").exists());

        // A later entry failing removes only what this install created
        let body = b"common content".to_vec();
        let common = hashed_name(&body);
        let mut base = MemoryPackage::new(&[(common.as_str(), body.as_slice())]);
        platform.content.install(&mut base, Partition::NANDUser).unwrap();

        let wrong = format!("{}.nca", "00".repeat(16));
        let mut broken = MemoryPackage::new(&[
            (common.as_str(), body.as_slice()),
            ("fresh.nca", b"fresh"),
            (wrong.as_str(), b"tampered"),
        ]);
        assert!(platform.content.install(&mut broken, Partition::NANDUser).is_err());
        assert_eq!(fs::read(registered.join(&common)).unwrap(), body);
        assert_eq!(fs::read(registered.join("shared.nca")).unwrap(), b"first title");
        assert!(!registered.join("fresh.nca").exists());
        assert!(!registered.join(&wrong).exists());
        assert!(leftover_partials(&registered).is_empty());

        // Identical hashed content is shared between titles
        let mut update = MemoryPackage::new(&[(common.as_str(), body.as_slice()), ("extra.nca", b"x")]);
        let installed = platform.content.install(&mut update, Partition::NANDUser).unwrap();
        assert_eq!(installed.entries, 2);
        assert_eq!(installed.bytes_written, 1);
    }

    #[test]
    fn test_records_are_kept_per_source() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut platform = host_platform(&config);
        fs::create_dir_all(dir.path().join("sd/a")).unwrap();
        fs::create_dir_all(dir.path().join("sd/b")).unwrap();
        fs::write(dir.path().join("sd/a/game.nsp"), build_pfs0(&[("one.nca", b"1")])).unwrap();
        fs::write(dir.path().join("sd/b/game.nsp"), build_pfs0(&[("two.nca", b"2")])).unwrap();

        let explorer = SdCardExplorer::new(dir.path().join("sd").to_str().unwrap());
        for path in ["a/game.nsp", "b/game.nsp"] {
            let mut package = Pfs0Package::open(&explorer, path).unwrap();
            platform.content.install(&mut package, Partition::SdCard).unwrap();
        }

        let records = dir.path().join("sd").join(RECORD_DIRECTORY);
        let names: Vec<String> = fs::read_dir(&records)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|name| name.starts_with("game.nsp-") && name.ends_with(".json")));
    }

    #[test]
    fn test_expected_hash_prefix() {
        let name = "0123456789abcdef0123456789abcdef.cnmt.nca";
        assert_eq!(expected_hash_prefix(name).map(|h| h.len()), Some(16));
        assert!(expected_hash_prefix("program.nca").is_none());
        assert!(expected_hash_prefix("zz23456789abcdef0123456789abcdef.nca").is_none());
    }

    #[test]
    fn test_rights_store() {
        let dir = TempDir::new().unwrap();
        let mut store = HostRightsStore::new(dir.path().join("tickets"));
        let rights_id = [0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0x0A];
        store.import_ticket(&sample_ticket(rights_id), b"CERT").unwrap();
        let name = hex::encode(rights_id);
        assert!(dir.path().join("tickets").join(format!("{}.tik", name)).exists());

        assert!(store.import_ticket(b"short", b"CERT").is_err());
        assert!(store.import_ticket(&sample_ticket(rights_id), b"").is_err());
    }

    #[test]
    fn test_explorer_provider() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        fs::create_dir_all(dir.path().join("pc")).unwrap();
        config.remote_mounts.push(RemoteMount {
            name: "C:".to_string(),
            root: dir.path().join("pc"),
        });
        let provider = HostExplorers::new(config);

        let system = provider.open(&Backing::Partition(Partition::NANDSystem)).unwrap();
        assert!(system.should_warn_on_write_access());
        assert_eq!(system.presentable_cwd(), "@System:/");

        let remote = provider.open(&Backing::Remote("C".to_string())).unwrap();
        assert_eq!(remote.cwd(), "C:/");
        assert!(provider.open(&Backing::Remote("Z".to_string())).is_err());
    }
}
