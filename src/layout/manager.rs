//! LayoutManager - layout lifecycle against the live JoyPads
//!
//! # State Machine
//!
//! ```text
//!              load(name)              load(other) / reload()
//! NoLayout ───────────────► Loaded(name, dirty) ◄────────────┐
//!    ▲                        │      │  set_mapping -> dirty │
//!    │   clear() / remove()   │      └───────────────────────┘
//!    └────────────────────────┘
//! ```
//!
//! Every operation that touches JoyPads goes through their command channel,
//! so each pad switches mappings atomically with respect to its events.

use super::store::{validate_name, LayoutStore};
use super::{Layout, LayoutError, LayoutEvent, LayoutState, LoadReport};
use crate::config::{EngineSettings, Preference, Preferences};
use crate::device::{DeviceHandle, DeviceKey, DeviceRegistry, HotplugEvent};
use crate::joypad::{JoyPad, PadExit, PadOptions, PadSnapshot};
use crate::mapping::Mapping;
use crate::output::{self, SharedInjector};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const EXIT_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

pub struct LayoutManager {
    registry: DeviceRegistry,
    store: LayoutStore,
    injector: SharedInjector,
    pads: BTreeMap<usize, JoyPad>,
    state: LayoutState,
    layout: Layout,
    preferences: Preferences,
    notifier: broadcast::Sender<LayoutEvent>,
    pad_options: PadOptions,
}

impl LayoutManager {
    /// Creates the manager; the receiver yields exits of disconnected pads
    /// and must be fed back through [`handle_pad_exit`](Self::handle_pad_exit)
    pub async fn new(
        registry: DeviceRegistry,
        store: LayoutStore,
        injector: SharedInjector,
        settings: &EngineSettings,
    ) -> (Self, mpsc::Receiver<PadExit>) {
        if let Err(e) = store.ensure_dirs().await {
            warn!("Layout storage unavailable: {}", e);
        }
        let preferences = store.load_preferences().await;
        let (exits_tx, exits_rx) = mpsc::channel(EXIT_BUFFER);
        let (notifier, _) = broadcast::channel(EVENT_BUFFER);
        let motion_interval = (settings.motion_interval_ms > 0)
            .then(|| Duration::from_millis(settings.motion_interval_ms));

        let manager = Self {
            registry,
            store,
            injector,
            pads: BTreeMap::new(),
            state: LayoutState::NoLayout,
            layout: Layout::default(),
            preferences,
            notifier,
            pad_options: PadOptions {
                motion_interval,
                buffer: settings.event_buffer,
                exits: Some(exits_tx),
            },
        };
        (manager, exits_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LayoutEvent> {
        self.notifier.subscribe()
    }

    fn notify(&self, event: LayoutEvent) {
        debug!("Notify: {:?}", event);
        // no subscribers is fine
        let _ = self.notifier.send(event);
    }

    pub fn state(&self) -> &LayoutState {
        &self.state
    }

    pub fn current_name(&self) -> Option<&str> {
        match &self.state {
            LayoutState::NoLayout => None,
            LayoutState::LayoutLoaded { name, .. } => Some(name),
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, LayoutState::LayoutLoaded { dirty: true, .. })
    }

    /// In-memory layout, including unsaved edits
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn store(&self) -> &LayoutStore {
        &self.store
    }

    pub fn devices(&self) -> Vec<Arc<DeviceHandle>> {
        self.registry.devices()
    }

    /// Mapping last applied to each open pad, by slot
    pub fn pad_mappings(&self) -> BTreeMap<usize, Option<Arc<Mapping>>> {
        self.pads
            .iter()
            .map(|(slot, pad)| (*slot, pad.mapping().cloned()))
            .collect()
    }

    /// State of every open pad as seen by its worker
    pub async fn pad_snapshots(&self) -> BTreeMap<usize, PadSnapshot> {
        let mut snapshots = BTreeMap::new();
        for (slot, pad) in &self.pads {
            match pad.snapshot().await {
                Ok(snapshot) => {
                    snapshots.insert(*slot, snapshot);
                }
                Err(e) => debug!("No snapshot for slot {}: {}", slot, e),
            }
        }
        snapshots
    }

    pub async fn layout_names(&self) -> Result<Vec<String>, LayoutError> {
        self.store.list().await
    }

    /// Loads a stored layout and applies it to every pad
    ///
    /// Nothing is touched unless the file reads and parses completely.
    pub async fn load(&mut self, name: &str) -> Result<LoadReport, LayoutError> {
        if self.layout.settings.save_on_switch && self.is_dirty() && self.current_name() != Some(name)
        {
            info!("Saving '{}' before switching to '{}'", self.layout.name, name);
            self.save().await?;
        }

        let loaded = match self.store.read(name).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Failed to load layout '{}': {}", name, e);
                return Err(e);
            }
        };
        for conflict in &loaded.conflicts {
            warn!(
                "Layout '{}', device '{}': duplicate binding for {} ignored",
                name, conflict.device, conflict.conflict.slot
            );
        }

        self.layout = loaded.layout;
        let applied = self.apply_layout().await;
        self.state = LayoutState::LayoutLoaded {
            name: name.to_string(),
            dirty: false,
        };
        if let Err(e) = self.store.set_last_used(name).await {
            warn!("Could not record last used layout: {}", e);
        }
        info!("Layout '{}' loaded ({} pad(s) mapped)", name, applied);
        self.notify(LayoutEvent::CurrentLayoutChanged(Some(name.to_string())));

        Ok(LoadReport {
            name: name.to_string(),
            applied,
            conflicts: loaded.conflicts,
        })
    }

    /// Loads the last used layout, or clears if none is recorded
    pub async fn load_last(&mut self) -> Result<Option<LoadReport>, LayoutError> {
        match self.store.last_used().await {
            Some(name) => self.load(&name).await.map(Some),
            None => {
                debug!("No last used layout recorded");
                self.clear().await;
                Ok(None)
            }
        }
    }

    /// Reloads the current layout from storage, dropping unsaved edits
    pub async fn reload(&mut self) -> Result<Option<LoadReport>, LayoutError> {
        match self.current_name().map(str::to_string) {
            Some(name) => self.load(&name).await.map(Some),
            None => {
                self.clear().await;
                Ok(None)
            }
        }
    }

    pub async fn clear(&mut self) {
        self.layout = Layout::default();
        self.apply_layout().await;
        let was_loaded = self.state != LayoutState::NoLayout;
        self.state = LayoutState::NoLayout;
        info!("Layout cleared");
        if was_loaded {
            self.notify(LayoutEvent::CurrentLayoutChanged(None));
        }
    }

    /// Writes the current layout under its name
    ///
    /// On failure the in-memory layout is kept and marked dirty.
    pub async fn save(&mut self) -> Result<(), LayoutError> {
        let LayoutState::LayoutLoaded { name, .. } = &self.state else {
            return Err(LayoutError::NoCurrentLayout);
        };
        let name = name.clone();
        self.layout.name = name.clone();
        let existed = self.store.exists(&name).await;
        match self.store.write(&self.layout).await {
            Ok(_) => {
                self.state = LayoutState::LayoutLoaded { name, dirty: false };
                if !existed {
                    self.notify(LayoutEvent::LayoutListChanged);
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to save layout '{}': {}", name, e);
                self.state = LayoutState::LayoutLoaded { name, dirty: true };
                Err(e)
            }
        }
    }

    /// Save-as: writes under `name`, which becomes the current layout
    ///
    /// The file of the previous name is left untouched.
    pub async fn save_as(&mut self, name: &str) -> Result<(), LayoutError> {
        validate_name(name)?;
        let mut layout = self.layout.clone();
        layout.name = name.to_string();
        if let Err(e) = self.store.write(&layout).await {
            error!("Failed to save layout as '{}': {}", name, e);
            self.mark_dirty();
            return Err(e);
        }
        self.layout = layout;
        self.state = LayoutState::LayoutLoaded {
            name: name.to_string(),
            dirty: false,
        };
        if let Err(e) = self.store.set_last_used(name).await {
            warn!("Could not record last used layout: {}", e);
        }
        self.notify(LayoutEvent::LayoutListChanged);
        self.notify(LayoutEvent::CurrentLayoutChanged(Some(name.to_string())));
        Ok(())
    }

    /// Deletes the current layout from storage and clears it
    pub async fn remove(&mut self) -> Result<(), LayoutError> {
        let name = self
            .current_name()
            .map(str::to_string)
            .ok_or(LayoutError::NoCurrentLayout)?;
        self.remove_layout(&name).await
    }

    /// On failure the current layout stays loaded and is marked dirty
    pub async fn remove_layout(&mut self, name: &str) -> Result<(), LayoutError> {
        if let Err(e) = self.store.remove(name).await {
            error!("Failed to remove layout '{}': {}", name, e);
            self.mark_dirty();
            return Err(e);
        }
        if self.store.last_used().await.as_deref() == Some(name) {
            if let Err(e) = self.store.clear_last_used().await {
                warn!("Could not reset last used layout: {}", e);
            }
        }
        self.notify(LayoutEvent::LayoutListChanged);
        if self.current_name() == Some(name) {
            self.clear().await;
        }
        Ok(())
    }

    /// Renames a stored layout; the current one keeps running under the new name
    ///
    /// On failure the current layout stays as it is and is marked dirty.
    pub async fn rename(&mut self, old: &str, new: &str) -> Result<(), LayoutError> {
        if let Err(e) = self.store.rename(old, new).await {
            error!("Failed to rename layout '{}' to '{}': {}", old, new, e);
            self.mark_dirty();
            return Err(e);
        }
        if self.store.last_used().await.as_deref() == Some(old) {
            if let Err(e) = self.store.set_last_used(new).await {
                warn!("Could not update last used layout: {}", e);
            }
        }
        self.notify(LayoutEvent::LayoutListChanged);

        let current_dirty = match &self.state {
            LayoutState::LayoutLoaded { name, dirty } if name == old => Some(*dirty),
            _ => None,
        };
        if let Some(dirty) = current_dirty {
            self.state = LayoutState::LayoutLoaded {
                name: new.to_string(),
                dirty,
            };
            self.layout.name = new.to_string();
            self.notify(LayoutEvent::CurrentLayoutChanged(Some(new.to_string())));
        }
        Ok(())
    }

    /// Records the current layout as the one to load at startup
    pub async fn save_default(&self) -> Result<(), LayoutError> {
        let name = self.current_name().ok_or(LayoutError::NoCurrentLayout)?;
        self.store.set_last_used(name).await
    }

    pub async fn export_layout(&self, name: &str, dest: &Path) -> Result<(), LayoutError> {
        self.store.export(name, dest).await
    }

    /// Copies a layout file into storage, refusing to overwrite
    pub async fn import_layout(&mut self, path: &Path) -> Result<String, LayoutError> {
        let mut loaded = self.store.read_path(path).await?;
        if loaded.layout.name.trim().is_empty() {
            loaded.layout.name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
        }
        let name = loaded.layout.name.clone();
        validate_name(&name)?;
        if self.store.exists(&name).await {
            return Err(LayoutError::AlreadyExists(name));
        }
        self.store.write(&loaded.layout).await?;
        info!("Imported layout '{}' from {}", name, path.display());
        self.notify(LayoutEvent::LayoutListChanged);
        Ok(name)
    }

    /// Editor entry point: replaces one device's mapping in the current layout
    pub async fn set_mapping(&mut self, key: &DeviceKey, mapping: Option<Mapping>) {
        self.layout.set_mapping(key.clone(), mapping);
        let mapping = self.layout.mapping_for(key);
        for pad in self.pads.values_mut().filter(|p| p.key() == key) {
            if let Err(e) = pad.apply_mapping(mapping.clone()).await {
                warn!("Could not apply edited mapping to {}: {}", key, e);
            }
        }
        self.mark_dirty();
    }

    /// Releases everything held by every pad, e.g. on focus loss
    pub async fn release_all(&self) {
        for pad in self.pads.values() {
            if let Err(e) = pad.release().await {
                debug!("Release skipped for slot {}: {}", pad.slot(), e);
            }
        }
    }

    pub async fn set_setting(&mut self, preference: Preference, value: bool) -> Result<(), LayoutError> {
        if !self.preferences.set(preference, value) {
            return Ok(());
        }
        debug!("Preference {:?} set to {}", preference, value);
        self.store.save_preferences(&self.preferences).await
    }

    /// Rescans devices and reconciles the pad set
    ///
    /// Pads whose device is still present keep running and are matched to
    /// the new slot table by path and name. Vanished devices are released
    /// and closed, new ones are opened with the current layout's mapping.
    pub async fn update_joy_devs(&mut self) -> Result<(), LayoutError> {
        let scan = self.registry.scan();
        let devices = match &scan {
            Ok(devices) => devices.clone(),
            Err(_) => Vec::new(),
        };

        let mut previous: Vec<JoyPad> = std::mem::take(&mut self.pads).into_values().collect();
        let mut kept = BTreeMap::new();
        let mut fresh = Vec::new();

        for handle in devices {
            let matched = previous.iter().position(|pad| {
                pad.is_connected()
                    && pad.device().path() == handle.path()
                    && pad.device().name() == handle.name()
            });
            match matched {
                Some(index) => {
                    let mut pad = previous.swap_remove(index);
                    let key_changed = pad.key() != handle.key();
                    pad.rebind(handle.clone());
                    if key_changed {
                        let mapping = self.layout.mapping_for(handle.key());
                        if let Err(e) = pad.apply_mapping(mapping).await {
                            warn!("Could not remap {}: {}", handle.key(), e);
                        }
                    }
                    kept.insert(handle.slot(), pad);
                }
                None => fresh.push(handle),
            }
        }

        for pad in previous {
            info!("Dropping pad for {}", pad.key());
            if let Err(e) = pad.release().await {
                debug!("Release skipped: {}", e);
            }
            pad.close().await;
        }

        self.pads = kept;
        for handle in fresh {
            self.open_pad(handle).await;
        }
        self.notify(LayoutEvent::DeviceListChanged);

        scan.map(|_| ()).map_err(LayoutError::from)
    }

    /// Push-model device change from the hot-plug monitor
    pub async fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Added(path) => match self.registry.device_arrived(&path) {
                Ok(Some(handle)) => {
                    self.open_pad(handle).await;
                    self.notify(LayoutEvent::DeviceListChanged);
                }
                Ok(None) => {}
                Err(e) => debug!("Ignoring new node {}: {}", path.display(), e),
            },
            HotplugEvent::Removed(path) => {
                if let Some(handle) = self.registry.device_removed(&path) {
                    if let Some(pad) = self.pads.remove(&handle.slot()) {
                        if let Err(e) = pad.release().await {
                            debug!("Release skipped: {}", e);
                        }
                        pad.close().await;
                    }
                    self.notify(LayoutEvent::DeviceListChanged);
                }
            }
        }
    }

    /// A pad's device stream ended; its worker already released everything
    pub async fn handle_pad_exit(&mut self, exit: PadExit) {
        let Some(slot) = self
            .pads
            .iter()
            .find(|(_, pad)| pad.id() == exit.id)
            .map(|(slot, _)| *slot)
        else {
            debug!("Exit of unknown pad {}", exit.id);
            return;
        };
        if let Some(pad) = self.pads.remove(&slot) {
            let same_handle = self
                .registry
                .get(slot)
                .is_some_and(|h| Arc::ptr_eq(h, pad.device()));
            if same_handle {
                self.registry.mark_unavailable(slot);
            }
            warn!("Pad {} in slot {} disconnected", pad.key(), slot);
            pad.close().await;
            self.notify(LayoutEvent::DeviceListChanged);
        }
    }

    /// Closes every pad and releases anything still held
    pub async fn shutdown(&mut self) {
        info!("Shutting down {} pad(s)", self.pads.len());
        for (_, pad) in std::mem::take(&mut self.pads) {
            pad.close().await;
        }
        if let Err(e) = output::lock(&self.injector).release_all() {
            error!("Final release failed: {}", e);
        }
    }

    async fn open_pad(&mut self, handle: Arc<DeviceHandle>) {
        let backend = self.registry.backend().clone();
        let mut pad = match JoyPad::open(
            handle.clone(),
            backend.as_ref(),
            self.injector.clone(),
            self.pad_options.clone(),
        ) {
            Ok(pad) => pad,
            Err(e) => {
                warn!("Could not open {}: {}", handle.path().display(), e);
                return;
            }
        };
        if let Some(mapping) = self.layout.mapping_for(handle.key()) {
            if let Err(e) = pad.apply_mapping(Some(mapping)).await {
                warn!("Could not map {}: {}", handle.key(), e);
            }
        }
        self.pads.insert(handle.slot(), pad);
    }

    /// Applies the in-memory layout to every pad, returns how many got a mapping
    async fn apply_layout(&mut self) -> usize {
        let mut applied = 0;
        for pad in self.pads.values_mut() {
            let mapping = self.layout.mapping_for(pad.key());
            if mapping.is_some() {
                applied += 1;
            }
            if let Err(e) = pad.apply_mapping(mapping).await {
                warn!("Could not apply mapping to slot {}: {}", pad.slot(), e);
            }
        }
        applied
    }

    fn mark_dirty(&mut self) {
        if let LayoutState::LayoutLoaded { dirty, .. } = &mut self.state {
            *dirty = true;
        }
    }
}
