//! JoyPad - one physical device bound to a slot
//!
//! A [`JoyPad`] is a handle to a worker task that owns the device's event
//! stream, its translator state and its currently applied mapping.
//!
//! # Architecture
//!
//! ```text
//! DeviceBackend ──► raw events ──► [PadWorker] ──► Emissions ──► OutputInjector
//!                                      ▲
//!                     PadCommand ──────┘ (apply / release / snapshot)
//! ```

pub mod calibration;
pub mod translator;
pub mod worker;

use crate::device::{DeviceBackend, DeviceHandle, DeviceKey, RawEvent};
use crate::mapping::{DigitalOutput, Mapping};
use crate::output::SharedInjector;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use translator::Translator;
use worker::PadWorker;

static NEXT_PAD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum JoyPadError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Worker for pad {0} is no longer running")]
    WorkerStopped(u64),
}

pub enum PadCommand {
    Apply {
        mapping: Option<Arc<Mapping>>,
        ack: oneshot::Sender<()>,
    },
    Release {
        ack: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<PadSnapshot>,
    },
    Shutdown,
}

/// Mapping and held outputs of a pad at one point in its event stream
#[derive(Clone, Debug)]
pub struct PadSnapshot {
    pub mapping: Option<Arc<Mapping>>,
    pub asserted: Vec<DigitalOutput>,
}

/// Sent by a worker whose device stream ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PadExit {
    pub id: u64,
}

#[derive(Clone, Debug)]
pub struct PadOptions {
    /// Analog motion repeat period, `None` disables repeating
    pub motion_interval: Option<Duration>,
    pub buffer: usize,
    pub exits: Option<mpsc::Sender<PadExit>>,
}

impl Default for PadOptions {
    fn default() -> Self {
        Self {
            motion_interval: None,
            buffer: 256,
            exits: None,
        }
    }
}

pub struct JoyPad {
    id: u64,
    device: Arc<DeviceHandle>,
    commands: mpsc::Sender<PadCommand>,
    task: Option<JoinHandle<()>>,
    mapping: Option<Arc<Mapping>>,
}

impl JoyPad {
    /// Starts consuming the device's event stream
    pub fn open(
        device: Arc<DeviceHandle>,
        backend: &dyn DeviceBackend,
        injector: SharedInjector,
        options: PadOptions,
    ) -> Result<Self, JoyPadError> {
        if !device.is_available() {
            return Err(JoyPadError::DeviceUnavailable(format!(
                "{} ({}) is stale",
                device.name(),
                device.path().display()
            )));
        }
        let events = backend.open(device.info(), options.buffer).map_err(|e| {
            JoyPadError::DeviceUnavailable(format!("{}: {}", device.path().display(), e))
        })?;
        Ok(Self::attach(device, events, injector, options))
    }

    /// Spawns the worker on an already opened event stream
    pub fn attach(
        device: Arc<DeviceHandle>,
        events: mpsc::Receiver<RawEvent>,
        injector: SharedInjector,
        options: PadOptions,
    ) -> Self {
        let id = NEXT_PAD_ID.fetch_add(1, Ordering::Relaxed);
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let name = format!("{} [{}]", device.key(), device.path().display());

        let worker = PadWorker::create(
            id,
            name.clone(),
            events,
            commands_rx,
            Translator::new(device.info()),
            injector,
            options.motion_interval,
            options.exits,
        )
        .start();

        let task = tokio::spawn(async move {
            let releasing = worker.run_until_closed().await;
            let _closed = releasing.finish().await;
            debug!("Worker task for {} finished", name);
        });

        info!("JoyPad {} opened in slot {}", device.key(), device.slot());
        Self {
            id,
            device,
            commands: commands_tx,
            task: Some(task),
            mapping: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.device
    }

    pub fn slot(&self) -> usize {
        self.device.slot()
    }

    pub fn key(&self) -> &DeviceKey {
        self.device.key()
    }

    /// Last mapping handed to [`apply_mapping`](JoyPad::apply_mapping)
    pub fn mapping(&self) -> Option<&Arc<Mapping>> {
        self.mapping.as_ref()
    }

    /// Whether the worker is still consuming the device
    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Points the pad at a handle from a newer scan of the same device
    pub fn rebind(&mut self, device: Arc<DeviceHandle>) {
        debug!(
            "Rebinding pad {} from slot {} to slot {}",
            self.id,
            self.device.slot(),
            device.slot()
        );
        self.device = device;
    }

    /// Swaps the active mapping; resolves once everything held under the old
    /// mapping has been released and the new one is in effect
    pub async fn apply_mapping(&mut self, mapping: Option<Arc<Mapping>>) -> Result<(), JoyPadError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(PadCommand::Apply {
                mapping: mapping.clone(),
                ack,
            })
            .await
            .map_err(|_| JoyPadError::WorkerStopped(self.id))?;
        done.await.map_err(|_| JoyPadError::WorkerStopped(self.id))?;
        self.mapping = mapping;
        Ok(())
    }

    /// Releases every output held by this pad, keeping the mapping
    pub async fn release(&self) -> Result<(), JoyPadError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(PadCommand::Release { ack })
            .await
            .map_err(|_| JoyPadError::WorkerStopped(self.id))?;
        done.await.map_err(|_| JoyPadError::WorkerStopped(self.id))
    }

    pub async fn snapshot(&self) -> Result<PadSnapshot, JoyPadError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PadCommand::Snapshot { reply })
            .await
            .map_err(|_| JoyPadError::WorkerStopped(self.id))?;
        rx.await.map_err(|_| JoyPadError::WorkerStopped(self.id))
    }

    /// Stops the worker; it releases all outputs before exiting
    pub async fn close(mut self) {
        debug!("Closing JoyPad {}", self.device.key());
        if self.commands.send(PadCommand::Shutdown).await.is_err() {
            debug!("Worker for pad {} already stopped", self.id);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Worker task for pad {} panicked: {}", self.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, VirtualBackend};
    use crate::mapping::{Binding, LogicalInput, OutputAction};
    use crate::output::{self, OutputInjector, RecordingSink, SinkEvent};

    const PATH: &str = "/dev/input/event7";

    fn setup() -> (VirtualBackend, Arc<DeviceHandle>, SharedInjector, RecordingSink) {
        let backend = VirtualBackend::new();
        let info = DeviceInfo::new(PATH, "Pad", 4, 2, 0);
        backend.plug(info.clone());
        let handle = Arc::new(DeviceHandle::new(0, DeviceKey::new("Pad", 0), info));
        let sink = RecordingSink::new();
        let injector = OutputInjector::shared(Box::new(sink.clone()));
        (backend, handle, injector, sink)
    }

    fn button_to(code: u16) -> Arc<Mapping> {
        let (mapping, _) = Mapping::from_bindings([Binding::new(
            LogicalInput::Button { index: 0 },
            OutputAction::Key { code },
        )])
        .unwrap();
        Arc::new(mapping)
    }

    fn press(pressed: bool) -> RawEvent {
        RawEvent::Button { index: 0, pressed }
    }

    #[tokio::test]
    async fn apply_mapping_releases_previous_outputs() {
        let (backend, handle, injector, sink) = setup();
        let mut pad = JoyPad::open(handle, &backend, injector.clone(), PadOptions::default()).unwrap();
        pad.apply_mapping(Some(button_to(30))).await.unwrap();

        backend.feed(PATH, press(true)).await;
        let snapshot = pad.snapshot().await.unwrap();
        assert_eq!(snapshot.asserted, vec![DigitalOutput::Key(30)]);

        pad.apply_mapping(Some(button_to(31))).await.unwrap();
        assert!(pad.snapshot().await.unwrap().asserted.is_empty());
        assert!(output::lock(&injector).held().is_empty());

        // the held button does not leak into the new mapping on release
        backend.feed(PATH, press(false)).await;
        pad.snapshot().await.unwrap();
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::Press(DigitalOutput::Key(30)),
                SinkEvent::Release(DigitalOutput::Key(30)),
            ]
        );
        pad.close().await;
    }

    #[tokio::test]
    async fn release_keeps_mapping() {
        let (backend, handle, injector, _sink) = setup();
        let mut pad = JoyPad::open(handle, &backend, injector.clone(), PadOptions::default()).unwrap();
        let mapping = button_to(30);
        pad.apply_mapping(Some(mapping.clone())).await.unwrap();
        backend.feed(PATH, press(true)).await;
        pad.snapshot().await.unwrap();

        pad.release().await.unwrap();
        let snapshot = pad.snapshot().await.unwrap();
        assert!(snapshot.asserted.is_empty());
        assert_eq!(snapshot.mapping.as_deref(), Some(mapping.as_ref()));
        assert!(output::lock(&injector).held().is_empty());
        pad.close().await;
    }

    #[tokio::test]
    async fn disconnect_releases_and_reports() {
        let (backend, handle, injector, _sink) = setup();
        let (exits_tx, mut exits_rx) = mpsc::channel(4);
        let options = PadOptions {
            exits: Some(exits_tx),
            ..PadOptions::default()
        };
        let mut pad = JoyPad::open(handle, &backend, injector.clone(), options).unwrap();
        pad.apply_mapping(Some(button_to(30))).await.unwrap();
        backend.feed(PATH, press(true)).await;
        pad.snapshot().await.unwrap();
        assert_eq!(output::lock(&injector).held(), vec![DigitalOutput::Key(30)]);

        backend.unplug(PATH);
        let exit = exits_rx.recv().await.unwrap();
        assert_eq!(exit.id, pad.id());
        assert!(output::lock(&injector).held().is_empty());
        assert!(matches!(
            pad.snapshot().await,
            Err(JoyPadError::WorkerStopped(_))
        ));
    }

    #[tokio::test]
    async fn stale_handle_cannot_be_opened() {
        let (backend, handle, injector, _sink) = setup();
        handle.invalidate();
        let result = JoyPad::open(handle, &backend, injector, PadOptions::default());
        assert!(matches!(result, Err(JoyPadError::DeviceUnavailable(_))));
    }

    #[tokio::test]
    async fn close_releases_held_outputs() {
        let (backend, handle, injector, sink) = setup();
        let mut pad = JoyPad::open(handle, &backend, injector.clone(), PadOptions::default()).unwrap();
        pad.apply_mapping(Some(button_to(44))).await.unwrap();
        backend.feed(PATH, press(true)).await;
        pad.snapshot().await.unwrap();

        pad.close().await;
        assert!(output::lock(&injector).held().is_empty());
        assert_eq!(
            sink.events().last(),
            Some(&SinkEvent::Release(DigitalOutput::Key(44)))
        );
    }
}
