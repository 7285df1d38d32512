//! Synthetic keyboard and mouse through /dev/uinput

use super::sink::{OutputSink, SinkEvent};
use super::OutputError;
use crate::mapping::{DigitalOutput, KEY_CODES, MOUSE_BUTTON_CODES};
use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AttributeSet, EventType, InputEvent, Key, RelativeAxisType,
};
use tracing::info;

pub struct UinputSink {
    device: VirtualDevice,
}

impl UinputSink {
    pub fn new(name: &str) -> Result<Self, OutputError> {
        let mut keys = AttributeSet::<Key>::new();
        for code in KEY_CODES.chain(MOUSE_BUTTON_CODES) {
            keys.insert(Key::new(code));
        }

        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        axes.insert(RelativeAxisType::REL_WHEEL);

        let device = VirtualDeviceBuilder::new()
            .map_err(OutputError::CreateDevice)?
            .name(name)
            .with_keys(&keys)
            .map_err(OutputError::CreateDevice)?
            .with_relative_axes(&axes)
            .map_err(OutputError::CreateDevice)?
            .build()
            .map_err(OutputError::CreateDevice)?;

        info!("Virtual input device '{}' created", name);
        Ok(Self { device })
    }
}

impl OutputSink for UinputSink {
    fn emit(&mut self, event: SinkEvent) -> Result<(), OutputError> {
        let events = match event {
            SinkEvent::Press(output) => vec![key_event(output, 1)],
            SinkEvent::Release(output) => vec![key_event(output, 0)],
            SinkEvent::Motion { dx, dy } => {
                let mut events = Vec::with_capacity(2);
                if dx != 0 {
                    events.push(InputEvent::new(
                        EventType::RELATIVE,
                        RelativeAxisType::REL_X.0,
                        dx,
                    ));
                }
                if dy != 0 {
                    events.push(InputEvent::new(
                        EventType::RELATIVE,
                        RelativeAxisType::REL_Y.0,
                        dy,
                    ));
                }
                events
            }
        };
        if events.is_empty() {
            return Ok(());
        }
        // emit appends the SYN_REPORT
        self.device.emit(&events).map_err(OutputError::Emit)
    }
}

fn key_event(output: DigitalOutput, value: i32) -> InputEvent {
    InputEvent::new(EventType::KEY, output.code(), value)
}
