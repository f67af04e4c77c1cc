use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use log::LevelFilter;

use crate::container::{AnyContainer, SaveContainer};
use crate::core::{Result, SaveDescriptor, SaveEnvelope, SaveError, SaveId};
use crate::migration::{MigrationChain, MigrationStamp};
use crate::provider::SaveProvider;
use crate::registry::SaveTypeRegistry;
use crate::save::{ChangeSink, Save, SaveCell, SaveRef};

/// Single-slot auto-resetting wake signal for the writer thread. A raise
/// while the writer is busy coalesces with any raise already pending.
struct WriterSignal {
    raised: Mutex<bool>,
    cvar: Condvar,
}

impl WriterSignal {
    fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn lock_raised(&self) -> MutexGuard<'_, bool> {
        match self.raised.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn raise(&self) {
        let mut raised = self.lock_raised();
        *raised = true;
        self.cvar.notify_one();
    }

    fn wait(&self) {
        let mut raised = self.lock_raised();
        while !*raised {
            raised = match self.cvar.wait(raised) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *raised = false;
    }
}

/// State shared between the caller thread and the writer thread.
struct WriterShared {
    signal: WriterSignal,
    running: AtomicBool,
    save_in_progress: AtomicBool,
    save_counter: AtomicU64,
}

/// The write-back persistence cache.
///
/// Owns all loaded save groups, tracks which groups changed since the
/// last drain, and feeds a single background writer thread. All record
/// access and mutation happens on the owning thread; the writer only
/// ever sees backend-serialized units.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use saveback::{JsonSaveProvider, SaveDescriptor, SavesSystem, StaticSaveTypeRegistry};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct PlayerProfile {
///     level: u32,
/// }
///
/// impl saveback::Save for PlayerProfile {}
///
/// # fn main() -> saveback::Result<()> {
/// let dir = tempfile::tempdir().unwrap();
/// let registry = StaticSaveTypeRegistry::new()
///     .with_save::<PlayerProfile>(SaveDescriptor::new("player"));
/// let mut saves = SavesSystem::new(
///     Arc::new(registry),
///     Arc::new(JsonSaveProvider::new(dir.path())),
/// );
/// saves.initialize(log::LevelFilter::Off)?;
///
/// let profile = saves.get::<PlayerProfile>(0)?;
/// profile.update(|p| p.level = 3)?;
///
/// // Once per frame/tick:
/// saves.drain_dirty()?;
///
/// saves.shutdown()?;
/// # Ok(())
/// # }
/// ```
pub struct SavesSystem {
    registry: Arc<dyn SaveTypeRegistry>,
    provider: Arc<dyn SaveProvider>,
    containers: HashMap<TypeId, Box<dyn AnyContainer>>,
    migrations: HashMap<TypeId, Box<dyn MigrationStamp>>,
    dirty_tx: Sender<TypeId>,
    dirty_rx: Receiver<TypeId>,
    dirty: HashSet<TypeId>,
    shared: Arc<WriterShared>,
    writer: Option<JoinHandle<()>>,
    initialized: bool,
    prev_save_in_progress: bool,
    prev_save_counter: u64,
    progress_subscribers: Vec<Sender<bool>>,
}

impl SavesSystem {
    pub fn new(registry: Arc<dyn SaveTypeRegistry>, provider: Arc<dyn SaveProvider>) -> Self {
        let (dirty_tx, dirty_rx) = mpsc::channel();
        Self {
            registry,
            provider,
            containers: HashMap::new(),
            migrations: HashMap::new(),
            dirty_tx,
            dirty_rx,
            dirty: HashSet::new(),
            shared: Arc::new(WriterShared {
                signal: WriterSignal::new(),
                running: AtomicBool::new(false),
                save_in_progress: AtomicBool::new(false),
                save_counter: AtomicU64::new(0),
            }),
            writer: None,
            initialized: false,
            prev_save_in_progress: false,
            prev_save_counter: 0,
            progress_subscribers: Vec::new(),
        }
    }

    /// Applies the log level, initializes the backend and starts the
    /// writer thread. Calling this twice without a shutdown in between
    /// is an error; the writer is never started twice.
    pub fn initialize(&mut self, log_level: LevelFilter) -> Result<()> {
        if self.initialized {
            return Err(SaveError::AlreadyInitialized);
        }
        log::set_max_level(log_level);
        self.provider.initialize(self.registry.as_ref())?;

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let provider = Arc::clone(&self.provider);
        let writer = std::thread::Builder::new()
            .name("saveback-writer".to_string())
            .spawn(move || writer_loop(shared, provider))
            .map_err(|e| SaveError::Io(format!("Failed to spawn writer thread: {}", e)))?;
        self.writer = Some(writer);
        self.initialized = true;
        Ok(())
    }

    /// Registers the migration chain for a save type. Must happen before
    /// the first load of that type; a second chain for the same type is
    /// an error.
    pub fn register_migration<T: Save>(&mut self, chain: MigrationChain<T>) -> Result<()> {
        let descriptor = self.descriptor_for::<T>()?;
        let type_id = TypeId::of::<T>();
        if self.migrations.contains_key(&type_id) {
            return Err(SaveError::MigrationAlreadyRegistered(
                descriptor.name().to_string(),
            ));
        }
        self.migrations.insert(type_id, Box::new(chain));
        Ok(())
    }

    /// Returns the cached save with the given id, loading it from the
    /// backend or synthesizing a default instance on a miss. Two calls
    /// for the same (type, id) always return the same instance.
    pub fn get<T: Save>(&mut self, id: SaveId) -> Result<SaveRef<T>> {
        self.ensure_initialized()?;
        self.ensure_container::<T>()?;
        if let Some(save) = self.container_ref::<T>()?.get(id) {
            return Ok(save);
        }

        let descriptor = self.descriptor_for::<T>()?;
        match self.provider.read(&descriptor, id)? {
            Some(envelope) => self.adopt_loaded::<T>(&descriptor, envelope),
            None => {
                log::debug!("New save was created {} with id {}", descriptor.name(), id);
                let save = SaveCell::<T>::new_created(id);
                self.container_mut::<T>()?.insert(save.clone())?;
                save.set_dirty();
                Ok(save)
            }
        }
    }

    /// Shorthand for [`SavesSystem::get`] with id 0, the conventional id
    /// for single-instance save types.
    pub fn get_default<T: Save>(&mut self) -> Result<SaveRef<T>> {
        self.get::<T>(0)
    }

    /// Eagerly loads every persisted save of a type. Loading happens at
    /// most once per type; saves already cached win over their persisted
    /// counterparts.
    pub fn preload_all<T: Save>(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_container::<T>()?;
        if self.container_ref::<T>()?.is_fully_loaded() {
            return Ok(());
        }

        let descriptor = self.descriptor_for::<T>()?;
        for envelope in self.provider.read_all(&descriptor)? {
            if self.container_ref::<T>()?.contains(envelope.id) {
                continue;
            }
            self.adopt_loaded::<T>(&descriptor, envelope)?;
        }
        self.container_mut::<T>()?.mark_fully_loaded();
        Ok(())
    }

    /// All saves of a type, after ensuring the type is fully loaded.
    pub fn get_all<T: Save>(&mut self) -> Result<Vec<SaveRef<T>>> {
        self.preload_all::<T>()?;
        Ok(self.container_ref::<T>()?.all())
    }

    /// Whether the writer is currently flushing saves that request user
    /// notification.
    pub fn is_save_in_progress(&self) -> bool {
        self.shared.save_in_progress.load(Ordering::Acquire)
    }

    /// Subscribes to save-in-progress changes. Dropped receivers are
    /// pruned on the next emission.
    pub fn subscribe_save_in_progress(&mut self) -> Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        self.progress_subscribers.push(tx);
        rx
    }

    /// Drains dirty save groups into the backend's pending buffer and
    /// wakes the writer. Meant to be called once per external tick, on
    /// the thread that mutates saves; serialization happens here so the
    /// writer never observes a save mid-mutation.
    pub fn drain_dirty(&mut self) -> Result<()> {
        self.ensure_initialized()?;

        let in_progress = self.shared.save_in_progress.load(Ordering::Acquire);
        if self.prev_save_in_progress != in_progress {
            self.emit_save_in_progress(in_progress);
            self.prev_save_in_progress = in_progress;
            self.prev_save_counter = self.shared.save_counter.load(Ordering::Acquire);
        } else {
            let counter = self.shared.save_counter.load(Ordering::Acquire);
            if self.prev_save_counter != counter {
                // A write cycle started and finished between two drains;
                // observers still get one true/false pulse. The
                // unsynchronized counter read can race with the writer,
                // which at worst delays the pulse by one drain.
                self.emit_save_in_progress(true);
                self.emit_save_in_progress(false);
                self.prev_save_counter = counter;
            }
        }

        while let Ok(group) = self.dirty_rx.try_recv() {
            self.dirty.insert(group);
        }
        if self.dirty.is_empty() {
            return Ok(());
        }

        log::trace!(
            "Draining {} dirty save group(s) into the backend",
            self.dirty.len()
        );
        let dirty: Vec<TypeId> = self.dirty.drain().collect();
        let mut staged = Vec::new();
        for group in dirty {
            let Some(container) = self.containers.get(&group) else {
                continue;
            };
            let stamp = self.migrations.get(&group).map(|chain| chain.current_id());
            staged.extend(container.stage_dirty(stamp)?);
            container.reset_dirty();
        }
        self.provider.stage(staged)?;
        self.shared.signal.raise();
        Ok(())
    }

    /// Flushes outstanding changes, stops the writer thread and disposes
    /// the backend. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        let drained = self.drain_dirty();
        self.initialized = false;
        self.shared.running.store(false, Ordering::Release);
        self.shared.signal.raise();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                log::error!("Writer thread terminated with a panic");
            }
        }
        self.provider.dispose()?;
        drained
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(SaveError::NotInitialized)
        }
    }

    fn descriptor_for<T: Save>(&self) -> Result<SaveDescriptor> {
        self.registry
            .descriptor(TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| SaveError::TypeNotRegistered(std::any::type_name::<T>().to_string()))
    }

    fn ensure_container<T: Save>(&mut self) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if !self.containers.contains_key(&type_id) {
            let descriptor = self.descriptor_for::<T>()?;
            let sink = ChangeSink {
                group: type_id,
                tx: self.dirty_tx.clone(),
            };
            self.containers
                .insert(type_id, Box::new(SaveContainer::<T>::new(descriptor, sink)));
        }
        Ok(())
    }

    fn container_ref<T: Save>(&self) -> Result<&SaveContainer<T>> {
        self.containers
            .get(&TypeId::of::<T>())
            .and_then(|container| container.as_any().downcast_ref())
            .ok_or_else(|| SaveError::TypeNotRegistered(std::any::type_name::<T>().to_string()))
    }

    fn container_mut<T: Save>(&mut self) -> Result<&mut SaveContainer<T>> {
        self.containers
            .get_mut(&TypeId::of::<T>())
            .and_then(|container| container.as_any_mut().downcast_mut())
            .ok_or_else(|| SaveError::TypeNotRegistered(std::any::type_name::<T>().to_string()))
    }

    fn chain_for<T: Save>(&self) -> Option<&MigrationChain<T>> {
        self.migrations
            .get(&TypeId::of::<T>())
            .and_then(|stamp| stamp.as_any().downcast_ref())
    }

    /// Decodes a loaded envelope, runs its migration chain and caches
    /// the resulting cell. A cell dirtied by migration lands in the
    /// dirty set immediately.
    fn adopt_loaded<T: Save>(
        &mut self,
        descriptor: &SaveDescriptor,
        envelope: SaveEnvelope,
    ) -> Result<SaveRef<T>> {
        let SaveEnvelope {
            id,
            migration_id,
            just_created,
            data,
            ..
        } = envelope;
        let mut payload: T = serde_json::from_value(data).map_err(|e| {
            SaveError::Serialization(format!(
                "Failed to decode save '{}' with id {}: {}",
                descriptor.name(),
                id,
                e
            ))
        })?;

        let (applied, current) = match self.chain_for::<T>() {
            Some(chain) => (
                chain.apply(descriptor.name(), id, migration_id, &mut payload)?,
                chain.current_id(),
            ),
            None => (0, migration_id),
        };
        // An executed chain leaves the save at its newest version.
        let effective = if applied > 0 { current } else { migration_id };

        let save = SaveCell::from_loaded(id, effective, just_created, payload);
        self.container_mut::<T>()?.insert(save.clone())?;
        if applied > 0 {
            save.set_dirty();
        }
        Ok(save)
    }

    fn emit_save_in_progress(&mut self, value: bool) {
        self.progress_subscribers
            .retain(|subscriber| subscriber.send(value).is_ok());
    }
}

impl Drop for SavesSystem {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Save system shutdown failed: {}", err);
        }
    }
}

fn writer_loop(shared: Arc<WriterShared>, provider: Arc<dyn SaveProvider>) {
    loop {
        log::trace!("Writer thread waiting for signal");
        shared.signal.wait();
        if !write_pass(&shared, provider.as_ref()) {
            return;
        }
        if !shared.running.load(Ordering::Acquire) {
            // One more pass so a batch staged after the final wake is
            // never dropped.
            write_pass(&shared, provider.as_ref());
            return;
        }
    }
}

/// One drain of the backend's pending buffer. Returns false when the
/// write failed and the writer must stop.
fn write_pass(shared: &WriterShared, provider: &dyn SaveProvider) -> bool {
    let requires_notification = provider.any_staged_requires_notification();
    if requires_notification {
        shared.save_in_progress.store(true, Ordering::Release);
    }
    log::trace!("Writer thread starting to write");
    if let Err(err) = provider.write_staged() {
        log::error!("Durable write failed, stopping the writer: {}", err);
        return false;
    }
    if requires_notification {
        shared.save_counter.fetch_add(1, Ordering::AcqRel);
        shared.save_in_progress.store(false, Ordering::Release);
    }
    log::trace!("Writer thread ending write");
    true
}
