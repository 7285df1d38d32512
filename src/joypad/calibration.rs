//! Axis calibration and normalization

/// Magnitude of a normalized axis value
pub const AXIS_MAX: i32 = 32767;

/// Analog dead-zone used when neither the device nor the binding gives one
pub const DEFAULT_DEAD_ZONE: i32 = 3000;

/// Raw range of one axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisCalibration {
    pub min: i32,
    pub max: i32,
    pub center: i32,
    /// Normalized units around center treated as no input by analog bindings
    pub dead_zone: i32,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self {
            min: -AXIS_MAX,
            max: AXIS_MAX,
            center: 0,
            dead_zone: DEFAULT_DEAD_ZONE,
        }
    }
}

impl AxisCalibration {
    /// From a kernel absinfo range; `flat` is the hardware dead band in raw units
    pub fn from_range(min: i32, max: i32, flat: i32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let center = ((min as i64 + max as i64) / 2) as i32;
        let half_span = (max as i64 - center as i64).max(1);
        let flat = (flat.max(0) as i64 * AXIS_MAX as i64 / half_span) as i32;
        Self {
            min,
            max,
            center,
            dead_zone: flat.clamp(DEFAULT_DEAD_ZONE, AXIS_MAX - 1),
        }
    }

    /// Maps a raw value to `-32767..=32767`; `None` if it is outside the range
    pub fn normalize(&self, raw: i32) -> Option<i32> {
        if raw < self.min || raw > self.max {
            return None;
        }
        let offset = raw as i64 - self.center as i64;
        let span = if offset >= 0 {
            self.max as i64 - self.center as i64
        } else {
            self.center as i64 - self.min as i64
        };
        if span == 0 {
            return Some(0);
        }
        let scaled = offset * AXIS_MAX as i64 / span;
        Some(scaled.clamp(-(AXIS_MAX as i64), AXIS_MAX as i64) as i32)
    }
}

/// Scales a normalized value outside the dead-zone to `-1.0..=1.0`
///
/// Inside the dead-zone the result is `0.0`.
pub fn apply_dead_zone(value: i32, dead_zone: i32) -> f32 {
    let dead_zone = dead_zone.clamp(0, AXIS_MAX - 1);
    let magnitude = value.abs();
    if magnitude <= dead_zone {
        return 0.0;
    }
    let scaled = (magnitude - dead_zone) as f32 / (AXIS_MAX - dead_zone) as f32;
    scaled.min(1.0) * value.signum() as f32
}
