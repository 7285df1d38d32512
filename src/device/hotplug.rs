//! udev hot-plug monitoring for the `input` subsystem

use futures::StreamExt;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HotplugEvent {
    Added(PathBuf),
    Removed(PathBuf),
}

impl HotplugEvent {
    pub fn path(&self) -> &std::path::Path {
        match self {
            HotplugEvent::Added(path) | HotplugEvent::Removed(path) => path,
        }
    }
}

fn monitor_socket() -> std::io::Result<AsyncMonitorSocket> {
    let socket = MonitorBuilder::new()?.match_subsystem("input")?.listen()?;
    AsyncMonitorSocket::new(socket)
}

fn is_event_node(path: &std::path::Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("event"))
}

/// Starts watching for device nodes appearing and disappearing
///
/// The udev socket lives on its own thread with a single-threaded runtime.
/// Returns an error if the monitor cannot be created; callers then fall back
/// to explicit rescans.
pub fn spawn_monitor(
    tx: mpsc::Sender<HotplugEvent>,
    cancel: CancellationToken,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let handle = std::thread::Builder::new()
        .name("udev-monitor".into())
        .spawn(move || {
            runtime.block_on(async move {
                let mut socket = match monitor_socket() {
                    Ok(socket) => {
                        let _ = ready_tx.send(Ok(()));
                        socket
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                info!("Hot-plug monitor running");

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = socket.next() => {
                            let event = match next {
                                Some(Ok(event)) => event,
                                Some(Err(e)) => {
                                    error!("udev monitor error: {}", e);
                                    continue;
                                }
                                None => break,
                            };
                            let Some(node) = event.devnode().map(|p| p.to_path_buf()) else {
                                continue;
                            };
                            if !is_event_node(&node) {
                                continue;
                            }
                            let hotplug = match event.event_type() {
                                EventType::Add => HotplugEvent::Added(node),
                                EventType::Remove => HotplugEvent::Removed(node),
                                _ => continue,
                            };
                            debug!("Hot-plug: {:?}", hotplug);
                            if tx.send(hotplug).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                info!("Hot-plug monitor stopped");
            });
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(std::io::Error::other("udev monitor thread exited")),
    }
}
