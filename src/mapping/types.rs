use super::MappingError;
use crate::device::HatDirection;
use crate::joypad::calibration::AXIS_MAX;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Physical input a binding listens to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogicalInput {
    Button { index: u16 },
    AxisPositive { index: u16, threshold: i32 },
    AxisNegative { index: u16, threshold: i32 },
    AxisAnalog { index: u16 },
    Hat { index: u16, direction: HatDirection },
}

/// Identity of a [`LogicalInput`] for duplicate detection; thresholds are
/// parameters, not identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InputSlot {
    Button(u16),
    AxisPositive(u16),
    AxisNegative(u16),
    AxisAnalog(u16),
    Hat(u16, HatDirection),
}

impl fmt::Display for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSlot::Button(i) => write!(f, "Button({})", i),
            InputSlot::AxisPositive(i) => write!(f, "AxisPositive({})", i),
            InputSlot::AxisNegative(i) => write!(f, "AxisNegative({})", i),
            InputSlot::AxisAnalog(i) => write!(f, "AxisAnalog({})", i),
            InputSlot::Hat(i, d) => write!(f, "Hat({}, {:?})", i, d),
        }
    }
}

impl LogicalInput {
    pub fn slot(&self) -> InputSlot {
        match *self {
            LogicalInput::Button { index } => InputSlot::Button(index),
            LogicalInput::AxisPositive { index, .. } => InputSlot::AxisPositive(index),
            LogicalInput::AxisNegative { index, .. } => InputSlot::AxisNegative(index),
            LogicalInput::AxisAnalog { index } => InputSlot::AxisAnalog(index),
            LogicalInput::Hat { index, direction } => InputSlot::Hat(index, direction),
        }
    }

    fn threshold(&self) -> Option<i32> {
        match *self {
            LogicalInput::AxisPositive { threshold, .. }
            | LogicalInput::AxisNegative { threshold, .. } => Some(threshold),
            _ => None,
        }
    }
}

/// Keyboard codes the virtual device exposes, `KEY_ESC..=KEY_MICMUTE`
pub const KEY_CODES: RangeInclusive<u16> = 1..=248;

/// Mouse button codes the virtual device exposes, `BTN_LEFT..=BTN_TASK`
pub const MOUSE_BUTTON_CODES: RangeInclusive<u16> = 0x110..=0x117;

/// A digital output that is either held or not
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigitalOutput {
    Key(u16),
    MouseButton(u16),
}

impl DigitalOutput {
    pub fn code(&self) -> u16 {
        match *self {
            DigitalOutput::Key(code) | DigitalOutput::MouseButton(code) => code,
        }
    }

    pub fn is_emittable(&self) -> bool {
        match *self {
            DigitalOutput::Key(code) => KEY_CODES.contains(&code),
            DigitalOutput::MouseButton(code) => MOUSE_BUTTON_CODES.contains(&code),
        }
    }
}

/// What a binding produces, codes are Linux input event codes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputAction {
    Key { code: u16 },
    MouseButton { code: u16 },
    MouseMoveAxis { dx_scale: f32, dy_scale: f32 },
}

impl OutputAction {
    pub fn digital(&self) -> Option<DigitalOutput> {
        match *self {
            OutputAction::Key { code } => Some(DigitalOutput::Key(code)),
            OutputAction::MouseButton { code } => Some(DigitalOutput::MouseButton(code)),
            OutputAction::MouseMoveAxis { .. } => None,
        }
    }
}

impl From<DigitalOutput> for OutputAction {
    fn from(value: DigitalOutput) -> Self {
        match value {
            DigitalOutput::Key(code) => OutputAction::Key { code },
            DigitalOutput::MouseButton(code) => OutputAction::MouseButton { code },
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Per-binding tuning
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingParams {
    /// Toggle the output on each press instead of holding it
    #[serde(default, skip_serializing_if = "is_false")]
    pub sticky: bool,

    /// Analog dead-zone override in normalized units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_zone: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub source: LogicalInput,
    pub target: OutputAction,
    #[serde(default)]
    pub params: BindingParams,
}

impl Binding {
    pub fn new(source: LogicalInput, target: OutputAction) -> Self {
        Self {
            source,
            target,
            params: BindingParams::default(),
        }
    }

    pub fn with_params(mut self, params: BindingParams) -> Self {
        self.params = params;
        self
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        let slot = self.source.slot();
        let invalid = |reason: &str| MappingError::InvalidBinding {
            slot,
            reason: reason.to_string(),
        };

        if let Some(threshold) = self.source.threshold() {
            if !(1..=AXIS_MAX).contains(&threshold) {
                return Err(invalid("threshold must be within 1..=32767"));
            }
        }
        if let Some(dead_zone) = self.params.dead_zone {
            if !(0..AXIS_MAX).contains(&dead_zone) {
                return Err(invalid("dead zone must be within 0..32767"));
            }
        }

        if let Some(output) = self.target.digital() {
            if !output.is_emittable() {
                return Err(invalid("output code is not supported by the virtual device"));
            }
        }

        match (self.source, self.target) {
            (
                LogicalInput::AxisAnalog { .. },
                OutputAction::MouseMoveAxis { dx_scale, dy_scale },
            ) => {
                if !dx_scale.is_finite() || !dy_scale.is_finite() {
                    return Err(invalid("motion scale must be finite"));
                }
                if self.params.sticky {
                    return Err(invalid("analog bindings cannot be sticky"));
                }
                Ok(())
            }
            (LogicalInput::AxisAnalog { .. }, _) => {
                Err(invalid("analog axis must target mouse motion"))
            }
            (_, OutputAction::MouseMoveAxis { .. }) => {
                Err(invalid("mouse motion needs an analog axis source"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_ignores_threshold() {
        let a = LogicalInput::AxisPositive {
            index: 1,
            threshold: 10000,
        };
        let b = LogicalInput::AxisPositive {
            index: 1,
            threshold: 20000,
        };
        assert_eq!(a.slot(), b.slot());
        assert_ne!(
            a.slot(),
            LogicalInput::AxisNegative {
                index: 1,
                threshold: 10000
            }
            .slot()
        );
    }

    #[test]
    fn rejects_mismatched_targets() {
        let analog_to_key = Binding::new(
            LogicalInput::AxisAnalog { index: 0 },
            OutputAction::Key { code: 30 },
        );
        assert!(analog_to_key.validate().is_err());

        let button_to_motion = Binding::new(
            LogicalInput::Button { index: 0 },
            OutputAction::MouseMoveAxis {
                dx_scale: 1.0,
                dy_scale: 0.0,
            },
        );
        assert!(button_to_motion.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let zero = Binding::new(
            LogicalInput::AxisNegative {
                index: 0,
                threshold: 0,
            },
            OutputAction::Key { code: 105 },
        );
        assert!(zero.validate().is_err());

        let ok = Binding::new(
            LogicalInput::AxisNegative {
                index: 0,
                threshold: 16000,
            },
            OutputAction::Key { code: 105 },
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn rejects_codes_the_device_cannot_emit() {
        let button = LogicalInput::Button { index: 0 };
        assert!(Binding::new(button, OutputAction::Key { code: 0x2c0 })
            .validate()
            .is_err());
        assert!(Binding::new(button, OutputAction::Key { code: 0 })
            .validate()
            .is_err());
        assert!(Binding::new(button, OutputAction::MouseButton { code: 30 })
            .validate()
            .is_err());
        assert!(Binding::new(button, OutputAction::Key { code: 248 })
            .validate()
            .is_ok());
        assert!(Binding::new(button, OutputAction::MouseButton { code: 0x110 })
            .validate()
            .is_ok());
    }

    #[test]
    fn rejects_nan_scale() {
        let binding = Binding::new(
            LogicalInput::AxisAnalog { index: 2 },
            OutputAction::MouseMoveAxis {
                dx_scale: f32::NAN,
                dy_scale: 0.0,
            },
        );
        assert!(binding.validate().is_err());
    }
}
