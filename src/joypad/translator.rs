//! Raw event to output translation for one device
//!
//! Pure state machine without I/O: the worker feeds it raw events and hands
//! the resulting [`Emission`]s to the output injector.

use super::calibration::{apply_dead_zone, AxisCalibration};
use crate::device::{DeviceInfo, HatDirection, HatPosition, RawEvent};
use crate::mapping::{Binding, DigitalOutput, InputSlot, Mapping, OutputAction};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Emission {
    Assert(DigitalOutput),
    Release(DigitalOutput),
    /// Scaled motion for one analog axis
    Analog {
        action: OutputAction,
        dx: f32,
        dy: f32,
    },
}

pub struct Translator {
    mapping: Option<Arc<Mapping>>,
    buttons: u16,
    axes: u16,
    hats: u16,
    calibration: Vec<AxisCalibration>,

    // physical state
    pressed: HashSet<u16>,
    axis_values: HashMap<u16, i32>,
    hat_positions: HashMap<u16, HatPosition>,

    // output state
    asserted: BTreeMap<InputSlot, DigitalOutput>,
    analog: BTreeMap<u16, (OutputAction, f32, f32)>,
}

impl Translator {
    pub fn new(info: &DeviceInfo) -> Self {
        Self {
            mapping: None,
            buttons: info.buttons,
            axes: info.axes,
            hats: info.hats,
            calibration: info.calibration.clone(),
            pressed: HashSet::new(),
            axis_values: HashMap::new(),
            hat_positions: HashMap::new(),
            asserted: BTreeMap::new(),
            analog: BTreeMap::new(),
        }
    }

    pub fn mapping(&self) -> Option<&Arc<Mapping>> {
        self.mapping.as_ref()
    }

    /// Outputs currently held on behalf of this device
    pub fn asserted(&self) -> Vec<DigitalOutput> {
        self.asserted.values().copied().collect()
    }

    pub fn has_motion(&self) -> bool {
        !self.analog.is_empty()
    }

    /// Installs a new mapping; everything held under the old one is released
    pub fn swap_mapping(&mut self, mapping: Option<Arc<Mapping>>) -> Vec<Emission> {
        let released = self.release_all();
        self.mapping = mapping;
        released
    }

    pub fn release_all(&mut self) -> Vec<Emission> {
        self.analog.clear();
        std::mem::take(&mut self.asserted)
            .into_values()
            .map(Emission::Release)
            .collect()
    }

    /// Repeat of the current analog motion, one entry per moving axis
    pub fn motion_emissions(&self) -> Vec<Emission> {
        self.analog
            .values()
            .map(|(action, dx, dy)| Emission::Analog {
                action: *action,
                dx: *dx,
                dy: *dy,
            })
            .collect()
    }

    pub fn process(&mut self, event: RawEvent) -> Vec<Emission> {
        match event {
            RawEvent::Button { index, pressed } => self.button(index, pressed),
            RawEvent::Axis { index, value } => self.axis(index, value),
            RawEvent::Hat { index, position } => self.hat(index, position),
        }
    }

    fn button(&mut self, index: u16, pressed: bool) -> Vec<Emission> {
        if index >= self.buttons {
            debug!("Dropping event for unknown button {}", index);
            return Vec::new();
        }
        let was_pressed = self.pressed.contains(&index);
        if was_pressed == pressed {
            return Vec::new();
        }
        if pressed {
            self.pressed.insert(index);
        } else {
            self.pressed.remove(&index);
        }

        let mut out = Vec::new();
        self.update_level(InputSlot::Button(index), was_pressed, pressed, &mut out);
        order(out)
    }

    fn axis(&mut self, index: u16, raw: i32) -> Vec<Emission> {
        if index >= self.axes {
            debug!("Dropping event for unknown axis {}", index);
            return Vec::new();
        }
        let calibration = self
            .calibration
            .get(index as usize)
            .copied()
            .unwrap_or_default();
        let Some(value) = calibration.normalize(raw) else {
            debug!("Dropping out-of-range value {} on axis {}", raw, index);
            return Vec::new();
        };
        let previous = self.axis_values.insert(index, value).unwrap_or(0);

        let mut out = Vec::new();
        let Some(mapping) = self.mapping.clone() else {
            return out;
        };

        if let Some(binding) = mapping.get(InputSlot::AxisPositive(index)) {
            let threshold = axis_threshold(binding);
            self.update_level(
                InputSlot::AxisPositive(index),
                previous >= threshold,
                value >= threshold,
                &mut out,
            );
        }
        if let Some(binding) = mapping.get(InputSlot::AxisNegative(index)) {
            let threshold = axis_threshold(binding);
            self.update_level(
                InputSlot::AxisNegative(index),
                previous <= -threshold,
                value <= -threshold,
                &mut out,
            );
        }
        if let Some(binding) = mapping.get(InputSlot::AxisAnalog(index)) {
            if let OutputAction::MouseMoveAxis { dx_scale, dy_scale } = binding.target {
                let dead_zone = binding.params.dead_zone.unwrap_or(calibration.dead_zone);
                let amount = apply_dead_zone(value, dead_zone);
                if amount == 0.0 {
                    self.analog.remove(&index);
                } else {
                    let (dx, dy) = (amount * dx_scale, amount * dy_scale);
                    self.analog.insert(index, (binding.target, dx, dy));
                    out.push(Emission::Analog {
                        action: binding.target,
                        dx,
                        dy,
                    });
                }
            }
        }

        order(out)
    }

    fn hat(&mut self, index: u16, position: HatPosition) -> Vec<Emission> {
        if index >= self.hats {
            debug!("Dropping event for unknown hat {}", index);
            return Vec::new();
        }
        let previous = self
            .hat_positions
            .insert(index, position)
            .unwrap_or(HatPosition::CENTERED);

        let mut out = Vec::new();
        for direction in HatDirection::ALL {
            self.update_level(
                InputSlot::Hat(index, direction),
                previous.contains(direction),
                position.contains(direction),
                &mut out,
            );
        }
        order(out)
    }

    /// Level handling for one digital slot
    ///
    /// Plain bindings follow the input level. Sticky bindings flip on each
    /// rising edge and ignore the falling one.
    fn update_level(&mut self, slot: InputSlot, before: bool, now: bool, out: &mut Vec<Emission>) {
        let Some(binding) = self.mapping.as_ref().and_then(|m| m.get(slot)) else {
            return;
        };
        let Some(output) = binding.target.digital() else {
            return;
        };
        let held = self.asserted.contains_key(&slot);

        if binding.params.sticky {
            if now && !before {
                if held {
                    self.asserted.remove(&slot);
                    out.push(Emission::Release(output));
                } else {
                    self.asserted.insert(slot, output);
                    out.push(Emission::Assert(output));
                }
            }
            return;
        }

        if now && !held {
            self.asserted.insert(slot, output);
            out.push(Emission::Assert(output));
        } else if !now && held {
            self.asserted.remove(&slot);
            out.push(Emission::Release(output));
        }
    }
}

fn axis_threshold(binding: &Binding) -> i32 {
    match binding.source {
        crate::mapping::LogicalInput::AxisPositive { threshold, .. }
        | crate::mapping::LogicalInput::AxisNegative { threshold, .. } => threshold,
        _ => i32::MAX,
    }
}

/// Releases go out before asserts so a direction change never holds both keys
fn order(mut out: Vec<Emission>) -> Vec<Emission> {
    out.sort_by_key(|e| match e {
        Emission::Release(_) => 0,
        Emission::Assert(_) => 1,
        Emission::Analog { .. } => 2,
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{BindingParams, LogicalInput};

    const SPACE: u16 = 57;
    const LEFT: u16 = 105;
    const RIGHT: u16 = 106;

    fn pad() -> DeviceInfo {
        DeviceInfo::new("/dev/input/event0", "Test Pad", 8, 4, 1)
    }

    fn racing() -> Arc<Mapping> {
        let (mapping, _) = Mapping::from_bindings([
            Binding::new(
                LogicalInput::Button { index: 0 },
                OutputAction::Key { code: SPACE },
            ),
            Binding::new(
                LogicalInput::AxisPositive {
                    index: 1,
                    threshold: 16000,
                },
                OutputAction::Key { code: RIGHT },
            ),
            Binding::new(
                LogicalInput::AxisNegative {
                    index: 1,
                    threshold: 16000,
                },
                OutputAction::Key { code: LEFT },
            ),
        ])
        .unwrap();
        Arc::new(mapping)
    }

    fn translator(mapping: Arc<Mapping>) -> Translator {
        let mut t = Translator::new(&pad());
        t.swap_mapping(Some(mapping));
        t
    }

    fn feed(t: &mut Translator, events: &[RawEvent]) -> Vec<Emission> {
        events.iter().flat_map(|e| t.process(*e)).collect()
    }

    #[test]
    fn racing_scenario() {
        let mut t = translator(racing());
        let out = feed(
            &mut t,
            &[
                RawEvent::Button {
                    index: 0,
                    pressed: true,
                },
                RawEvent::Axis {
                    index: 1,
                    value: 20000,
                },
                RawEvent::Axis { index: 1, value: 0 },
                RawEvent::Button {
                    index: 0,
                    pressed: false,
                },
            ],
        );
        assert_eq!(
            out,
            vec![
                Emission::Assert(DigitalOutput::Key(SPACE)),
                Emission::Assert(DigitalOutput::Key(RIGHT)),
                Emission::Release(DigitalOutput::Key(RIGHT)),
                Emission::Release(DigitalOutput::Key(SPACE)),
            ]
        );
        assert!(t.asserted().is_empty());
    }

    #[test]
    fn axis_is_a_level() {
        let mut t = translator(racing());
        let threshold = 16000;
        let samples = [0, threshold - 1, threshold, threshold + 5, threshold - 1, 0];

        let mut per_sample = Vec::new();
        for value in samples {
            per_sample.push(t.process(RawEvent::Axis { index: 1, value }));
        }

        assert!(per_sample[0].is_empty());
        assert!(per_sample[1].is_empty());
        assert_eq!(per_sample[2], vec![Emission::Assert(DigitalOutput::Key(RIGHT))]);
        assert!(per_sample[3].is_empty());
        assert_eq!(per_sample[4], vec![Emission::Release(DigitalOutput::Key(RIGHT))]);
        assert!(per_sample[5].is_empty());
    }

    #[test]
    fn direction_flip_releases_first() {
        let mut t = translator(racing());
        t.process(RawEvent::Axis {
            index: 1,
            value: 30000,
        });
        let out = t.process(RawEvent::Axis {
            index: 1,
            value: -30000,
        });
        assert_eq!(
            out,
            vec![
                Emission::Release(DigitalOutput::Key(RIGHT)),
                Emission::Assert(DigitalOutput::Key(LEFT)),
            ]
        );
    }

    #[test]
    fn duplicate_button_events_are_debounced() {
        let mut t = translator(racing());
        let down = RawEvent::Button {
            index: 0,
            pressed: true,
        };
        let out = feed(&mut t, &[down, down]);
        assert_eq!(out, vec![Emission::Assert(DigitalOutput::Key(SPACE))]);
    }

    #[test]
    fn unbound_and_out_of_range_inputs_are_dropped() {
        let mut t = translator(racing());
        assert!(t
            .process(RawEvent::Button {
                index: 5,
                pressed: true
            })
            .is_empty());
        assert!(t
            .process(RawEvent::Button {
                index: 200,
                pressed: true
            })
            .is_empty());
        assert!(t
            .process(RawEvent::Axis {
                index: 1,
                value: 90000
            })
            .is_empty());
        assert!(t
            .process(RawEvent::Axis {
                index: 9,
                value: 1
            })
            .is_empty());
    }

    #[test]
    fn swap_releases_everything() {
        let mut t = translator(racing());
        t.process(RawEvent::Button {
            index: 0,
            pressed: true,
        });
        t.process(RawEvent::Axis {
            index: 1,
            value: -20000,
        });

        let released = t.swap_mapping(None);
        assert_eq!(released.len(), 2);
        assert!(released
            .iter()
            .all(|e| matches!(e, Emission::Release(_))));
        assert!(t.asserted().is_empty());

        // physical release under the empty mapping produces nothing
        assert!(t
            .process(RawEvent::Button {
                index: 0,
                pressed: false
            })
            .is_empty());
    }

    #[test]
    fn sticky_button_toggles() {
        let (mapping, _) = Mapping::from_bindings([Binding::new(
            LogicalInput::Button { index: 2 },
            OutputAction::MouseButton { code: 0x110 },
        )
        .with_params(BindingParams {
            sticky: true,
            dead_zone: None,
        })])
        .unwrap();
        let mut t = translator(Arc::new(mapping));
        let down = RawEvent::Button {
            index: 2,
            pressed: true,
        };
        let up = RawEvent::Button {
            index: 2,
            pressed: false,
        };

        assert_eq!(
            feed(&mut t, &[down, up]),
            vec![Emission::Assert(DigitalOutput::MouseButton(0x110))]
        );
        assert_eq!(t.asserted(), vec![DigitalOutput::MouseButton(0x110)]);
        assert_eq!(
            feed(&mut t, &[down, up]),
            vec![Emission::Release(DigitalOutput::MouseButton(0x110))]
        );
    }

    #[test]
    fn hat_directions_follow_position() {
        let (mapping, _) = Mapping::from_bindings([
            Binding::new(
                LogicalInput::Hat {
                    index: 0,
                    direction: HatDirection::Up,
                },
                OutputAction::Key { code: 103 },
            ),
            Binding::new(
                LogicalInput::Hat {
                    index: 0,
                    direction: HatDirection::Left,
                },
                OutputAction::Key { code: LEFT },
            ),
        ])
        .unwrap();
        let mut t = translator(Arc::new(mapping));

        let out = t.process(RawEvent::Hat {
            index: 0,
            position: HatPosition::new(-1, -1),
        });
        assert_eq!(out.len(), 2);
        let out = t.process(RawEvent::Hat {
            index: 0,
            position: HatPosition::new(-1, 0),
        });
        assert_eq!(out, vec![Emission::Release(DigitalOutput::Key(103))]);
        let out = t.process(RawEvent::Hat {
            index: 0,
            position: HatPosition::CENTERED,
        });
        assert_eq!(out, vec![Emission::Release(DigitalOutput::Key(LEFT))]);
    }

    #[test]
    fn analog_axis_respects_dead_zone() {
        let action = OutputAction::MouseMoveAxis {
            dx_scale: 10.0,
            dy_scale: 0.0,
        };
        let (mapping, _) = Mapping::from_bindings([Binding::new(
            LogicalInput::AxisAnalog { index: 0 },
            action,
        )
        .with_params(BindingParams {
            sticky: false,
            dead_zone: Some(2767),
        })])
        .unwrap();
        let mut t = translator(Arc::new(mapping));

        assert!(t.process(RawEvent::Axis { index: 0, value: 1000 }).is_empty());
        assert!(!t.has_motion());

        let out = t.process(RawEvent::Axis {
            index: 0,
            value: 32767,
        });
        assert_eq!(
            out,
            vec![Emission::Analog {
                action,
                dx: 10.0,
                dy: 0.0
            }]
        );
        assert_eq!(t.motion_emissions(), out);

        assert!(t.process(RawEvent::Axis { index: 0, value: 0 }).is_empty());
        assert!(t.motion_emissions().is_empty());
    }
}
