//! Unix signal bridge
//!
//! `SIGUSR1` requests a device rescan, `SIGUSR2` a layout reload.

use super::{ControlSender, ControlSignal};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Failed to acquire instance lock {path}: {source}")]
    Lock {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another instance holds the lock but its pid is unknown")]
    InstanceUnknown,

    #[error("Failed to signal process {pid}: {source}")]
    Deliver {
        pid: i32,
        #[source]
        source: std::io::Error,
    },
}

pub fn signal_number(signal: ControlSignal) -> libc::c_int {
    match signal {
        ControlSignal::RescanDevices => libc::SIGUSR1,
        ControlSignal::ReloadLayout => libc::SIGUSR2,
    }
}

/// Forwards `SIGUSR1`/`SIGUSR2` into the control channel until cancelled
///
/// Installation errors are returned before anything is spawned.
pub fn install(
    sender: ControlSender,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>, ControlError> {
    let mut usr1 = signal(SignalKind::user_defined1()).map_err(ControlError::Signal)?;
    let mut usr2 = signal(SignalKind::user_defined2()).map_err(ControlError::Signal)?;
    info!("Listening for SIGUSR1 (rescan) and SIGUSR2 (reload)");

    Ok(tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(()) = usr1.recv() => ControlSignal::RescanDevices,
                Some(()) = usr2.recv() => ControlSignal::ReloadLayout,
                else => break,
            };
            debug!("Received {:?}", signal);
            sender.send(signal);
        }
        debug!("Signal bridge stopped");
    }))
}

/// Sends a control signal to another process
pub fn deliver(pid: i32, signal: ControlSignal) -> Result<(), ControlError> {
    // SAFETY: kill has no memory-safety preconditions
    let result = unsafe { libc::kill(pid, signal_number(signal)) };
    if result != 0 {
        return Err(ControlError::Deliver {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    info!("Sent {:?} to process {}", signal, pid);
    Ok(())
}
