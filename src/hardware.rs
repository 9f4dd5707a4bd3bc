//! Hardware facade
//!
//! Thin traits over the three peripherals the board drives. The ESP32-C3 drivers live in
//! `board`; tests provide mocks.

use crate::BoardError;
use embedded_hal::pwm::SetDutyCycle;

/// Full-scale value of every 16-bit duty and ADC quantity on the facade
pub const FULL_SCALE: u16 = u16::MAX;

/// 16-bit RGB color, one duty value per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl Color {
    pub const OFF: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(FULL_SCALE, FULL_SCALE, FULL_SCALE);
    pub const RED: Color = Color::new(FULL_SCALE, 0, 0);
    pub const GREEN: Color = Color::new(0, FULL_SCALE, 0);
    pub const BLUE: Color = Color::new(0, 0, FULL_SCALE);

    pub const fn new(r: u16, g: u16, b: u16) -> Self {
        Self { r, g, b }
    }
}

/// Passive buzzer driven by a square wave
pub trait ToneOutput {
    /// Change the square-wave frequency. The duty is kept.
    fn set_frequency(&mut self, hz: u32) -> Result<(), BoardError>;

    /// Set the duty cycle, 0 = silent, 65535 = always high
    fn set_duty(&mut self, duty: u16) -> Result<(), BoardError>;
}

/// Common-cathode RGB LED
pub trait RgbLed {
    fn set_color(&mut self, color: Color) -> Result<(), BoardError>;
}

/// Photoresistor divider on an ADC input
#[allow(async_fn_in_trait)]
pub trait LightSensor {
    /// Raw reading scaled to 16 bits, bright = high
    async fn read_u16(&mut self) -> Result<u16, BoardError>;
}

/// Peripheral set of one board
pub trait Hardware {
    type Buzzer: ToneOutput;
    type Led: RgbLed;
    type Sensor: LightSensor;
}

/// RGB LED on three PWM channels
pub struct PwmRgbLed<R, G, B> {
    red: R,
    green: G,
    blue: B,
}

impl<R, G, B> PwmRgbLed<R, G, B>
where
    R: SetDutyCycle,
    G: SetDutyCycle,
    B: SetDutyCycle,
{
    pub fn new(red: R, green: G, blue: B) -> Self {
        Self { red, green, blue }
    }
}

impl<R, G, B> RgbLed for PwmRgbLed<R, G, B>
where
    R: SetDutyCycle,
    G: SetDutyCycle,
    B: SetDutyCycle,
{
    fn set_color(&mut self, color: Color) -> Result<(), BoardError> {
        self.red
            .set_duty_cycle_fraction(color.r, FULL_SCALE)
            .map_err(|_| BoardError::LedError)?;
        self.green
            .set_duty_cycle_fraction(color.g, FULL_SCALE)
            .map_err(|_| BoardError::LedError)?;
        self.blue
            .set_duty_cycle_fraction(color.b, FULL_SCALE)
            .map_err(|_| BoardError::LedError)?;
        Ok(())
    }
}

/// Convert a 0.0–1.0 duty fraction to the 16-bit facade scale
pub fn duty_to_u16(duty: f32) -> u16 {
    let clamped = if duty.is_nan() { 0.0 } else { duty.clamp(0.0, 1.0) };
    (clamped * FULL_SCALE as f32) as u16
}

/// Widen a 12-bit ADC sample to the 16-bit facade scale (4095 -> 65535)
pub fn widen_12bit(raw: u16) -> u16 {
    let raw = raw.min(0x0fff);
    (raw << 4) | (raw >> 8)
}

/// Largest pulse length a single pulse-code half can hold
pub const MAX_PULSE_TICKS: u32 = 0x7fff;

/// High and low lengths, in ticks, of one period of a square wave.
///
/// Returns `None` when the wave would be silent (zero frequency or duty) or when one
/// period does not fit into two pulse halves at this tick rate.
pub fn square_wave_ticks(frequency_hz: u32, duty: u16, tick_hz: u32) -> Option<(u16, u16)> {
    if frequency_hz == 0 || duty == 0 {
        return None;
    }
    let period = tick_hz / frequency_hz;
    if period < 2 || period > 2 * MAX_PULSE_TICKS {
        return None;
    }

    let high = (period as u64 * duty as u64 / FULL_SCALE as u64) as u32;
    let high = high.clamp(1, period - 1).min(MAX_PULSE_TICKS);
    let low = (period - high).min(MAX_PULSE_TICKS);
    Some((high as u16, low as u16))
}
