//! JoyPad worker with statum state machine
//!
//! One worker task per open device. Commands and raw events arrive on two
//! channels and are handled by the same loop, so a mapping swap or release is
//! never interleaved with the translation of an event.
//!
//! # State Machine
//!
//! ```text
//! Attached ──► Running ──► Releasing ──► Closed
//!                 │            ▲
//!                 └────────────┘
//!       (shutdown, handle dropped, device gone)
//! ```

use super::translator::{Emission, Translator};
use super::{PadCommand, PadExit, PadSnapshot};
use crate::device::RawEvent;
use crate::output::{self, SharedInjector};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum PadWorkerState {
    Attached,  // channels wired, loop not started
    Running,   // translating events
    Releasing, // loop left, outputs still held
    Closed,    // everything released
}

#[machine]
pub struct PadWorker<S: PadWorkerState> {
    id: u64,
    name: String,
    events: mpsc::Receiver<RawEvent>,
    commands: mpsc::Receiver<PadCommand>,
    translator: Translator,
    injector: SharedInjector,
    motion_interval: Option<Duration>,
    exits: Option<mpsc::Sender<PadExit>>,
    exit: Option<PadExit>,
}

impl<S: PadWorkerState> PadWorker<S> {
    fn emit(&self, emissions: &[Emission]) {
        if emissions.is_empty() {
            return;
        }
        output::lock(&self.injector).apply(emissions);
    }
}

impl PadWorker<Attached> {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: u64,
        name: String,
        events: mpsc::Receiver<RawEvent>,
        commands: mpsc::Receiver<PadCommand>,
        translator: Translator,
        injector: SharedInjector,
        motion_interval: Option<Duration>,
        exits: Option<mpsc::Sender<PadExit>>,
    ) -> Self {
        debug!("Attaching worker for {} (pad {})", name, id);
        Self::new(
            id,
            name,
            events,
            commands,
            translator,
            injector,
            motion_interval,
            exits,
            None, // exit
        )
    }

    pub fn start(self) -> PadWorker<Running> {
        info!("JoyPad {} running", self.name);
        self.transition()
    }
}

impl PadWorker<Running> {
    fn handle_command(&mut self, command: PadCommand) -> bool {
        match command {
            PadCommand::Apply { mapping, ack } => {
                let released = self.translator.swap_mapping(mapping);
                self.emit(&released);
                debug!(
                    "Mapping applied on {} ({} output(s) released)",
                    self.name,
                    released.len()
                );
                let _ = ack.send(());
            }
            PadCommand::Release { ack } => {
                let released = self.translator.release_all();
                self.emit(&released);
                let _ = ack.send(());
            }
            PadCommand::Snapshot { reply } => {
                // events already queued belong before the snapshot
                while let Ok(event) = self.events.try_recv() {
                    let emissions = self.translator.process(event);
                    self.emit(&emissions);
                }
                let _ = reply.send(PadSnapshot {
                    mapping: self.translator.mapping().cloned(),
                    asserted: self.translator.asserted(),
                });
            }
            PadCommand::Shutdown => return false,
        }
        true
    }

    /// Processes commands and events until shutdown or disconnect
    ///
    /// Commands take priority over pending events.
    pub async fn run_until_closed(mut self) -> PadWorker<Releasing> {
        let mut ticker = self.motion_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut moved_since_tick = false;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                info!("Shutdown requested for {}", self.name);
                                break;
                            }
                        }
                        None => {
                            debug!("Handle for {} dropped", self.name);
                            break;
                        }
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            let emissions = self.translator.process(event);
                            if emissions.iter().any(|e| matches!(e, Emission::Analog { .. })) {
                                moved_since_tick = true;
                            }
                            self.emit(&emissions);
                        }
                        None => {
                            warn!("Device {} disconnected", self.name);
                            self.exit = Some(PadExit { id: self.id });
                            break;
                        }
                    }
                }

                _ = next_tick(&mut ticker) => {
                    if !moved_since_tick && self.translator.has_motion() {
                        let motion = self.translator.motion_emissions();
                        self.emit(&motion);
                    }
                    moved_since_tick = false;
                }
            }
        }

        self.transition()
    }
}

impl PadWorker<Releasing> {
    /// Releases everything and reports a disconnect if there was one
    pub async fn finish(mut self) -> PadWorker<Closed> {
        let released = self.translator.release_all();
        self.emit(&released);
        info!(
            "JoyPad {} closed, released {} output(s)",
            self.name,
            released.len()
        );

        if let (Some(exit), Some(exits)) = (self.exit.take(), self.exits.as_ref()) {
            if exits.send(exit).await.is_err() {
                debug!("Nobody listening for exit of {}", self.name);
            }
        }
        self.transition()
    }
}

impl PadWorker<Closed> {}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
