//! Photoresistor readings
//!
//! Normalization, the coarse lux estimate, and the two brightness mappings used by
//! the buzzer: light-derived duty and the light-to-pitch map of the lumosynth demo.

use crate::config;
use crate::hardware::FULL_SCALE;
use serde::Serialize;

/// Light level as reported by `GET /sensor`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LightReading {
    /// Raw 16-bit ADC value
    pub raw: u16,
    /// `raw / 65535`, rounded to three decimals
    pub norm: f32,
    /// `norm * 200`, rounded to one decimal
    pub lux_est: f32,
}

impl LightReading {
    pub fn from_raw(raw: u16) -> Self {
        // Integer rounding keeps the reported decimals exact without float `round`
        let thousandths = rounded_ratio(raw as u64 * 1000, FULL_SCALE as u64);
        let tenths = rounded_ratio(raw as u64 * config::LUX_FULL_SCALE as u64 * 10, FULL_SCALE as u64);
        Self {
            raw,
            norm: thousandths as f32 / 1000.0,
            lux_est: tenths as f32 / 10.0,
        }
    }

    /// Unrounded `raw / 65535`
    pub fn fraction(&self) -> f32 {
        self.raw as f32 / FULL_SCALE as f32
    }
}

fn rounded_ratio(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator / 2) / denominator
}

/// Buzzer duty for light-derived tones: brighter is louder, capped at the ceiling.
pub fn light_duty(reading: &LightReading) -> f32 {
    reading.fraction() * config::LIGHT_DUTY_CEILING
}

/// Dark threshold of the light-to-pitch map; readings at or below it are silent
pub const PITCH_MIN_LIGHT: u16 = 1000;
/// Bright threshold of the light-to-pitch map
pub const PITCH_MAX_LIGHT: u16 = 65000;
/// Pitch at the dark threshold (C4)
pub const PITCH_MIN_HZ: u32 = 261;
/// Pitch at the bright threshold (C6)
pub const PITCH_MAX_HZ: u32 = 1046;

/// Map brightness linearly onto C4..C6, `None` when it is too dark to play.
pub fn pitch_from_light(raw: u16) -> Option<u32> {
    let clamped = raw.clamp(PITCH_MIN_LIGHT, PITCH_MAX_LIGHT);
    if clamped <= PITCH_MIN_LIGHT {
        return None;
    }
    let span_in = (PITCH_MAX_LIGHT - PITCH_MIN_LIGHT) as u32;
    let span_out = PITCH_MAX_HZ - PITCH_MIN_HZ;
    Some((clamped - PITCH_MIN_LIGHT) as u32 * span_out / span_in + PITCH_MIN_HZ)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_bounds() {
        let dark = LightReading::from_raw(0);
        assert_eq!((dark.norm, dark.lux_est), (0.0, 0.0));

        let bright = LightReading::from_raw(u16::MAX);
        assert_eq!((bright.norm, bright.lux_est), (1.0, 200.0));
    }

    #[test]
    fn lux_is_norm_times_200_to_one_decimal() {
        for raw in [1u16, 327, 12345, 32768, 40000, 65534] {
            let reading = LightReading::from_raw(raw);
            assert!((0.0..=1.0).contains(&reading.norm));
            let expected = (raw as f64 / 65535.0 * 200.0 * 10.0).round() / 10.0;
            assert!(
                (reading.lux_est as f64 - expected).abs() < 1e-3,
                "raw {raw}: {} vs {expected}",
                reading.lux_est
            );
        }
    }

    #[test]
    fn half_scale_reading() {
        let reading = LightReading::from_raw(32768);
        assert_eq!(reading.norm, 0.5);
        assert_eq!(reading.lux_est, 100.0);
    }

    #[test]
    fn reading_serializes_with_api_field_names() {
        let json = serde_json::to_string(&LightReading::from_raw(32768)).unwrap();
        assert_eq!(json, r#"{"raw":32768,"norm":0.5,"lux_est":100.0}"#);
    }

    #[test]
    fn light_duty_follows_brightness() {
        assert_eq!(light_duty(&LightReading::from_raw(0)), 0.0);
        assert_eq!(light_duty(&LightReading::from_raw(u16::MAX)), config::LIGHT_DUTY_CEILING);
    }

    #[test]
    fn pitch_map_is_silent_in_the_dark() {
        assert_eq!(pitch_from_light(0), None);
        assert_eq!(pitch_from_light(PITCH_MIN_LIGHT), None);
        assert_eq!(pitch_from_light(PITCH_MIN_LIGHT + 1), Some(PITCH_MIN_HZ));
        assert_eq!(pitch_from_light(PITCH_MAX_LIGHT), Some(PITCH_MAX_HZ));
        assert_eq!(pitch_from_light(u16::MAX), Some(PITCH_MAX_HZ));
        assert_eq!(pitch_from_light(33000), Some(653));
    }
}
