//! Device state
//!
//! One owned value holding every peripheral handle and the small amount of mutable
//! board state (current LED color, halt latch). It is shared by reference between the
//! dispatcher and the playback scheduler instead of living in globals.

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use heapless::String;
use log::{info, warn};
use serde::Serialize;

use crate::hardware::{Color, Hardware, LightSensor, RgbLed, ToneOutput, duty_to_u16};
use crate::sensor::LightReading;
use crate::{BoardError, config};

/// Maximum length of a device identifier
pub const DEVICE_ID_LEN: usize = 32;

/// Lowercase hex of the station MAC address, e.g. `a0b1c2d3e4f5`
pub fn device_id_from_mac(mac: [u8; 6]) -> String<DEVICE_ID_LEN> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut id = String::new();
    for byte in mac {
        // 12 characters always fit
        let _ = id.push(HEX[(byte >> 4) as usize] as char);
        let _ = id.push(HEX[(byte & 0x0f) as usize] as char);
    }
    id
}

/// Read-only snapshot produced on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub device_id: String<DEVICE_ID_LEN>,
    pub api_version: &'static str,
    pub firmware_version: &'static str,
    pub light: LightReading,
}

/// Peripheral handles and board state
pub struct DeviceState<M: RawMutex, H: Hardware> {
    device_id: String<DEVICE_ID_LEN>,
    buzzer: BlockingMutex<M, RefCell<H::Buzzer>>,
    led: BlockingMutex<M, RefCell<H::Led>>,
    color: BlockingMutex<M, Cell<Color>>,
    sensor: Mutex<M, H::Sensor>,
    halted: BlockingMutex<M, Cell<bool>>,
    halt_signal: Signal<M, ()>,
}

impl<M: RawMutex, H: Hardware> DeviceState<M, H> {
    /// Take ownership of the peripherals. Identifiers longer than
    /// [`DEVICE_ID_LEN`] are truncated.
    pub fn new(device_id: &str, buzzer: H::Buzzer, led: H::Led, sensor: H::Sensor) -> Self {
        let mut id = String::new();
        for ch in device_id.chars() {
            if id.push(ch).is_err() {
                break;
            }
        }

        Self {
            device_id: id,
            buzzer: BlockingMutex::new(RefCell::new(buzzer)),
            led: BlockingMutex::new(RefCell::new(led)),
            color: BlockingMutex::new(Cell::new(Color::OFF)),
            sensor: Mutex::new(sensor),
            halted: BlockingMutex::new(Cell::new(false)),
            halt_signal: Signal::new(),
        }
    }

    /// Put the outputs into their power-up state: LED off, buzzer preset and silent.
    pub fn power_up(&self) -> Result<(), BoardError> {
        self.with_buzzer(|buzzer| {
            buzzer.set_duty(0)?;
            buzzer.set_frequency(config::BUZZER_IDLE_FREQUENCY_HZ)
        })?;
        self.set_color(Color::OFF)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn status(&self) -> Result<DeviceStatus, BoardError> {
        Ok(DeviceStatus {
            device_id: self.device_id.clone(),
            api_version: config::API_VERSION,
            firmware_version: config::FIRMWARE_VERSION,
            light: self.read_light().await?,
        })
    }

    pub async fn read_light(&self) -> Result<LightReading, BoardError> {
        let raw = self.sensor.lock().await.read_u16().await?;
        Ok(LightReading::from_raw(raw))
    }

    pub fn color(&self) -> Color {
        self.color.lock(|color| color.get())
    }

    /// Set the LED and remember it as the current color
    pub fn set_color(&self, color: Color) -> Result<(), BoardError> {
        self.led.lock(|led| led.borrow_mut().set_color(color))?;
        self.color.lock(|current| current.set(color));
        log::debug!("[LED] Set color -> R:{} G:{} B:{}", color.r, color.g, color.b);
        Ok(())
    }

    /// Start a square wave at `frequency_hz` and `duty`. The returned guard silences
    /// the buzzer when dropped, whichever way the caller exits. Refused once halted.
    pub fn sound(&self, frequency_hz: u32, duty: f32) -> Result<Sounding<'_, M, H>, BoardError> {
        if self.is_halted() {
            return Err(BoardError::Halted);
        }
        self.with_buzzer(|buzzer| {
            buzzer.set_frequency(frequency_hz)?;
            buzzer.set_duty(duty_to_u16(duty))
        })?;
        Ok(Sounding { device: self })
    }

    pub fn silence(&self) {
        if let Err(e) = self.with_buzzer(|buzzer| buzzer.set_duty(0)) {
            warn!("[BUZZER] Failed to silence buzzer: {:?}", e);
        }
    }

    fn with_buzzer<R>(
        &self,
        f: impl FnOnce(&mut H::Buzzer) -> Result<R, BoardError>,
    ) -> Result<R, BoardError> {
        self.buzzer.lock(|buzzer| f(&mut buzzer.borrow_mut()))
    }

    pub fn is_halted(&self) -> bool {
        self.halted.lock(|halted| halted.get())
    }

    /// Wait until [`DeviceState::shutdown`] has run
    pub async fn wait_halted(&self) {
        while !self.is_halted() {
            self.halt_signal.wait().await;
        }
    }

    /// Shutdown sequence: silence the buzzer, zero every LED channel and latch the
    /// board as halted. Safe to call more than once.
    pub fn shutdown(&self) {
        info!("[MAIN] Shutting down outputs");
        self.silence();
        if let Err(e) = self.set_color(Color::OFF) {
            warn!("[LED] Failed to switch LED off: {:?}", e);
        }
        self.halted.lock(|halted| halted.set(true));
        self.halt_signal.signal(());
    }
}

/// Buzzer output held on; silenced on drop
pub struct Sounding<'a, M: RawMutex, H: Hardware> {
    device: &'a DeviceState<M, H>,
}

impl<M: RawMutex, H: Hardware> Sounding<'_, M, H> {
    /// Fails once the board is halted; the buzzer stays silent
    pub fn set_duty(&self, duty: f32) -> Result<(), BoardError> {
        if self.device.is_halted() {
            return Err(BoardError::Halted);
        }
        self.device.with_buzzer(|buzzer| buzzer.set_duty(duty_to_u16(duty)))
    }
}

impl<M: RawMutex, H: Hardware> Drop for Sounding<'_, M, H> {
    fn drop(&mut self) {
        self.device.silence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_lowercase_hex() {
        let id = device_id_from_mac([0xA0, 0x0b, 0xC2, 0x00, 0xff, 0x10]);
        assert_eq!(id.as_str(), "a00bc200ff10");
    }
}
