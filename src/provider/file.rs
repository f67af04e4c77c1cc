use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;

use super::SaveProvider;
use crate::core::{Result, SaveDescriptor, SaveEnvelope, SaveError, SaveId, StagedSave};
use crate::registry::SaveTypeRegistry;

/// Wire encoding used by a file-backed provider.
pub trait EnvelopeCodec: Send + Sync + 'static {
    fn encode(envelope: &SaveEnvelope) -> Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> Result<SaveEnvelope>;
}

/// One encoded unit waiting for the writer thread.
struct FileUnit {
    file_name: String,
    notify_user: bool,
    bytes: Vec<u8>,
}

/// File-per-save storage backend, parameterized by wire encoding.
///
/// Each save lives in its own file named `<name><id><extension>` under a
/// single root directory. Writes go through a temp file and an atomic
/// rename.
pub struct FileSaveProvider<C> {
    root: PathBuf,
    pending: Mutex<Vec<FileUnit>>,
    _codec: PhantomData<C>,
}

pub(crate) fn save_file_name(descriptor: &SaveDescriptor, id: SaveId) -> String {
    format!("{}{}{}", descriptor.name(), id, descriptor.extension())
}

pub(crate) fn parse_save_id(file_name: &str, descriptor: &SaveDescriptor) -> Option<SaveId> {
    let id_part = file_name
        .strip_prefix(descriptor.name())?
        .strip_suffix(descriptor.extension())?;
    if id_part.is_empty() {
        return None;
    }
    id_part.parse::<SaveId>().ok()
}

impl<C: EnvelopeCodec> FileSaveProvider<C> {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pending: Mutex::new(Vec::new()),
            _codec: PhantomData,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, descriptor: &SaveDescriptor, id: SaveId) -> PathBuf {
        self.root.join(save_file_name(descriptor, id))
    }

    fn write_unit(&self, unit: &FileUnit) -> Result<()> {
        let mut temp = NamedTempFile::new_in(&self.root)
            .map_err(|e| SaveError::Io(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&unit.bytes)
            .map_err(|e| SaveError::Io(format!("Failed to write {}: {}", unit.file_name, e)))?;
        temp.persist(self.root.join(&unit.file_name))
            .map_err(|e| SaveError::Io(format!("Failed to persist {}: {}", unit.file_name, e)))?;
        Ok(())
    }

    fn decode_file(&self, path: &Path) -> Result<SaveEnvelope> {
        let bytes = fs::read(path)
            .map_err(|e| SaveError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        C::decode(&bytes)
    }
}

impl<C: EnvelopeCodec> SaveProvider for FileSaveProvider<C> {
    fn initialize(&self, _registry: &dyn SaveTypeRegistry) -> Result<()> {
        log::trace!("Directory for saves {}", self.root.display());
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|e| {
                SaveError::Io(format!(
                    "Failed to create save directory {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
            log::trace!("Created new directory for saves {}", self.root.display());
        }
        Ok(())
    }

    fn stage(&self, staged: Vec<StagedSave>) -> Result<()> {
        let mut encoded = Vec::with_capacity(staged.len());
        for save in &staged {
            log::trace!(
                "Save staged for writing {} with id {}",
                save.descriptor.name(),
                save.id
            );
            encoded.push(FileUnit {
                file_name: save_file_name(&save.descriptor, save.id),
                notify_user: save.descriptor.requires_user_notification(),
                bytes: C::encode(&save.envelope)?,
            });
        }

        let mut pending = self.pending.lock()?;
        for unit in encoded {
            match pending.iter_mut().find(|p| p.file_name == unit.file_name) {
                Some(existing) => *existing = unit,
                None => pending.push(unit),
            }
        }
        Ok(())
    }

    fn write_staged(&self) -> Result<()> {
        // Exchange the buffer under the lock; no lock is held during I/O.
        let batch = {
            let mut pending = self.pending.lock()?;
            std::mem::take(&mut *pending)
        };
        for unit in &batch {
            log::trace!("Writing {}", unit.file_name);
            if let Err(err) = self.write_unit(unit) {
                log::error!("Failed to write save file {}: {}", unit.file_name, err);
            }
        }
        Ok(())
    }

    fn any_staged_requires_notification(&self) -> bool {
        let pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.iter().any(|unit| unit.notify_user)
    }

    fn read(&self, descriptor: &SaveDescriptor, id: SaveId) -> Result<Option<SaveEnvelope>> {
        let path = self.path_for(descriptor, id);
        if !path.exists() {
            log::trace!("Reading cancelled, {} does not exist", path.display());
            return Ok(None);
        }
        log::trace!("Reading {} as {}", path.display(), descriptor.name());
        self.decode_file(&path).map(Some)
    }

    fn read_all(&self, descriptor: &SaveDescriptor) -> Result<Vec<SaveEnvelope>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root).map_err(|e| {
            SaveError::Io(format!(
                "Failed to list save directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut envelopes = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| SaveError::Io(format!("Failed to read dir entry: {}", e)))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if parse_save_id(file_name, descriptor).is_none() {
                continue;
            }
            envelopes.push(self.decode_file(&entry.path())?);
        }
        envelopes.sort_by_key(|envelope| envelope.id);
        Ok(envelopes)
    }

    fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
