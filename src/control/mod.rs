//! Out-of-band remote control of a running instance
//!
//! Two triggers, each with a queue of exactly one: a burst of identical
//! signals that arrives before the first is handled collapses into one.

pub mod instance;
pub mod signals;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

pub use instance::{Instance, InstanceLock};
pub use signals::ControlError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    ReloadLayout,
    RescanDevices,
}

#[derive(Clone, Debug)]
pub struct ControlSender {
    reload: mpsc::Sender<()>,
    rescan: mpsc::Sender<()>,
}

#[derive(Debug)]
pub struct ControlReceiver {
    reload: mpsc::Receiver<()>,
    rescan: mpsc::Receiver<()>,
}

pub fn channel() -> (ControlSender, ControlReceiver) {
    let (reload_tx, reload_rx) = mpsc::channel(1);
    let (rescan_tx, rescan_rx) = mpsc::channel(1);
    (
        ControlSender {
            reload: reload_tx,
            rescan: rescan_tx,
        },
        ControlReceiver {
            reload: reload_rx,
            rescan: rescan_rx,
        },
    )
}

impl ControlSender {
    /// Fire and forget; returns `false` if the signal merged into a pending one
    /// or the receiver is gone
    pub fn send(&self, signal: ControlSignal) -> bool {
        let queue = match signal {
            ControlSignal::ReloadLayout => &self.reload,
            ControlSignal::RescanDevices => &self.rescan,
        };
        match queue.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("{:?} already pending, coalesced", signal);
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

impl ControlReceiver {
    /// Next pending signal; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ControlSignal> {
        tokio::select! {
            Some(()) = self.rescan.recv() => Some(ControlSignal::RescanDevices),
            Some(()) = self.reload.recv() => Some(ControlSignal::ReloadLayout),
            else => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<ControlSignal> {
        if self.rescan.try_recv().is_ok() {
            return Some(ControlSignal::RescanDevices);
        }
        if self.reload.try_recv().is_ok() {
            return Some(ControlSignal::ReloadLayout);
        }
        None
    }
}
