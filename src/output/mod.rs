//! Output injection
//!
//! All JoyPads share one [`OutputInjector`]. It reference-counts every
//! digital output so a key only goes up once the last source lets go of it.

pub mod sink;
pub mod uinput;

use crate::joypad::translator::Emission;
use crate::mapping::{DigitalOutput, OutputAction};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info};

pub use sink::{LogSink, OutputSink, RecordingSink, SinkEvent};
pub use uinput::UinputSink;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to create virtual device: {0}")]
    CreateDevice(#[source] std::io::Error),

    #[error("Failed to emit event: {0}")]
    Emit(#[source] std::io::Error),
}

pub type SharedInjector = Arc<Mutex<OutputInjector>>;

/// Locks a shared injector, recovering from a poisoned lock
pub fn lock(injector: &SharedInjector) -> MutexGuard<'_, OutputInjector> {
    injector.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct OutputInjector {
    sink: Box<dyn OutputSink>,
    held: BTreeMap<DigitalOutput, usize>,
    remainder: (f32, f32),
}

impl OutputInjector {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        Self {
            sink,
            held: BTreeMap::new(),
            remainder: (0.0, 0.0),
        }
    }

    pub fn shared(sink: Box<dyn OutputSink>) -> SharedInjector {
        Arc::new(Mutex::new(Self::new(sink)))
    }

    pub fn assert(&mut self, action: &OutputAction) -> Result<(), OutputError> {
        match action.digital() {
            Some(output) => self.assert_output(output),
            None => {
                debug!("Ignoring assert of analog action {:?}", action);
                Ok(())
            }
        }
    }

    pub fn release(&mut self, action: &OutputAction) -> Result<(), OutputError> {
        match action.digital() {
            Some(output) => self.release_output(output),
            None => Ok(()),
        }
    }

    pub fn assert_output(&mut self, output: DigitalOutput) -> Result<(), OutputError> {
        let count = self.held.entry(output).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.sink.emit(SinkEvent::Press(output))?;
        }
        Ok(())
    }

    /// Drops one reference; releasing something not held is a no-op
    pub fn release_output(&mut self, output: DigitalOutput) -> Result<(), OutputError> {
        let Some(count) = self.held.get_mut(&output) else {
            return Ok(());
        };
        *count -= 1;
        if *count == 0 {
            self.held.remove(&output);
            self.sink.emit(SinkEvent::Release(output))?;
        }
        Ok(())
    }

    /// Moves the pointer; fractions carry over to the next update
    pub fn update_analog(&mut self, action: &OutputAction, dx: f32, dy: f32) -> Result<(), OutputError> {
        if !matches!(action, OutputAction::MouseMoveAxis { .. }) {
            debug!("Ignoring analog update for {:?}", action);
            return Ok(());
        }
        if !dx.is_finite() || !dy.is_finite() {
            return Ok(());
        }
        self.remainder.0 += dx;
        self.remainder.1 += dy;
        let step_x = self.remainder.0.trunc();
        let step_y = self.remainder.1.trunc();
        self.remainder.0 -= step_x;
        self.remainder.1 -= step_y;
        if step_x == 0.0 && step_y == 0.0 {
            return Ok(());
        }
        self.sink.emit(SinkEvent::Motion {
            dx: step_x as i32,
            dy: step_y as i32,
        })
    }

    /// Releases every held output regardless of reference counts
    pub fn release_all(&mut self) -> Result<(), OutputError> {
        self.remainder = (0.0, 0.0);
        if self.held.is_empty() {
            return Ok(());
        }
        info!("Releasing {} held output(s)", self.held.len());
        let mut first_error = None;
        for output in std::mem::take(&mut self.held).into_keys() {
            if let Err(e) = self.sink.emit(SinkEvent::Release(output)) {
                error!("Failed to release {:?}: {}", output, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn held(&self) -> Vec<DigitalOutput> {
        self.held.keys().copied().collect()
    }

    pub fn refcount(&self, output: DigitalOutput) -> usize {
        self.held.get(&output).copied().unwrap_or(0)
    }

    /// Applies translator output; sink failures are logged, never propagated
    pub fn apply(&mut self, emissions: &[Emission]) {
        for emission in emissions {
            let result = match emission {
                Emission::Assert(output) => self.assert_output(*output),
                Emission::Release(output) => self.release_output(*output),
                Emission::Analog { action, dx, dy } => self.update_analog(action, *dx, *dy),
            };
            if let Err(e) = result {
                error!("Output injection failed for {:?}: {}", emission, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACE: OutputAction = OutputAction::Key { code: 57 };

    fn injector() -> (RecordingSink, OutputInjector) {
        let sink = RecordingSink::new();
        (sink.clone(), OutputInjector::new(Box::new(sink)))
    }

    #[test]
    fn shared_output_stays_held_until_last_release() {
        let (sink, mut inj) = injector();
        inj.assert(&SPACE).unwrap();
        inj.assert(&SPACE).unwrap();
        inj.release(&SPACE).unwrap();
        assert_eq!(inj.refcount(DigitalOutput::Key(57)), 1);
        assert_eq!(sink.events(), vec![SinkEvent::Press(DigitalOutput::Key(57))]);

        inj.release(&SPACE).unwrap();
        assert_eq!(
            sink.take(),
            vec![
                SinkEvent::Press(DigitalOutput::Key(57)),
                SinkEvent::Release(DigitalOutput::Key(57)),
            ]
        );
        assert!(inj.held().is_empty());
    }

    #[test]
    fn release_is_idempotent() {
        let (sink, mut inj) = injector();
        inj.release(&SPACE).unwrap();
        inj.release_all().unwrap();
        inj.release_all().unwrap();
        assert!(sink.events().is_empty());

        inj.assert_output(DigitalOutput::MouseButton(0x110)).unwrap();
        inj.release_all().unwrap();
        inj.release_all().unwrap();
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::Press(DigitalOutput::MouseButton(0x110)),
                SinkEvent::Release(DigitalOutput::MouseButton(0x110)),
            ]
        );
    }

    #[test]
    fn fractional_motion_accumulates() {
        let (sink, mut inj) = injector();
        let motion = OutputAction::MouseMoveAxis {
            dx_scale: 1.0,
            dy_scale: 1.0,
        };
        inj.update_analog(&motion, 0.4, -0.4).unwrap();
        inj.update_analog(&motion, 0.4, -0.4).unwrap();
        assert!(sink.events().is_empty());
        inj.update_analog(&motion, 0.4, -0.4).unwrap();
        assert_eq!(sink.events(), vec![SinkEvent::Motion { dx: 1, dy: -1 }]);
    }
}
