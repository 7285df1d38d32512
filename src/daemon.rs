//! Long-running control loop of the primary instance
//!
//! Owns the [`LayoutManager`] and serializes everything that changes it:
//! remote-control signals, pad disconnects and hot-plug events. Device I/O
//! happens in the pad workers, so a stalled device never holds this loop up.

use crate::control::{ControlReceiver, ControlSignal};
use crate::device::HotplugEvent;
use crate::joypad::PadExit;
use crate::layout::LayoutManager;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Daemon {
    manager: LayoutManager,
    control: ControlReceiver,
    exits: mpsc::Receiver<PadExit>,
    hotplug: Option<mpsc::Receiver<HotplugEvent>>,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(
        manager: LayoutManager,
        control: ControlReceiver,
        exits: mpsc::Receiver<PadExit>,
        hotplug: Option<mpsc::Receiver<HotplugEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            control,
            exits,
            hotplug,
            cancel,
        }
    }

    pub async fn handle_signal(&mut self, signal: ControlSignal) {
        info!("Handling {:?}", signal);
        match signal {
            ControlSignal::ReloadLayout => {
                if let Err(e) = self.manager.load_last().await {
                    error!("Reload failed: {}", e);
                }
            }
            ControlSignal::RescanDevices => {
                if let Err(e) = self.manager.update_joy_devs().await {
                    warn!("Rescan finished with error: {}", e);
                }
            }
        }
    }

    /// Runs until cancelled, then shuts the manager down
    pub async fn run(mut self) -> LayoutManager {
        info!("Daemon running");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                Some(signal) = self.control.recv() => {
                    self.handle_signal(signal).await;
                }
                Some(exit) = self.exits.recv() => {
                    self.manager.handle_pad_exit(exit).await;
                }
                Some(event) = next_hotplug(&mut self.hotplug) => {
                    self.manager.handle_hotplug(event).await;
                }
            }
        }
        self.manager.shutdown().await;
        info!("Daemon stopped");
        self.manager
    }
}

async fn next_hotplug(hotplug: &mut Option<mpsc::Receiver<HotplugEvent>>) -> Option<HotplugEvent> {
    match hotplug {
        Some(rx) => {
            let event = rx.recv().await;
            if event.is_none() {
                warn!("Hot-plug monitor ended");
                *hotplug = None;
            }
            event
        }
        None => std::future::pending().await,
    }
}
