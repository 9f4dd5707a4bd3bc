#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Orchestra Board Library
//!
//! This library provides the pieces of a WiFi-enabled "light/sound orchestra" board:
//! an HTTP/1.0 endpoint set that drives an RGB LED, reads a photoresistor and plays
//! tones or melodies on a passive buzzer through a single-slot playback scheduler.
//!
//! Everything except the `board` and `wifi` modules is hardware independent and runs
//! on the host with mock peripherals.

extern crate alloc;

pub mod device;
pub mod dispatcher;
pub mod hardware;
pub mod http;
pub mod http_server;
pub mod playback;
pub mod sensor;
pub mod state_machine;

#[cfg(feature = "esp32c3")]
pub mod board;
#[cfg(feature = "esp32c3")]
pub mod wifi;

/// Default configuration constants
pub mod config {
    /// Firmware version reported in the device status
    pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// HTTP API version reported by `/health`
    pub const API_VERSION: &str = "1.0.0";

    /// TCP port of the HTTP server
    pub const HTTP_PORT: u16 = 80;

    /// Socket inactivity timeout, so a stalled client cannot hang the single listener
    pub const SOCKET_TIMEOUT_SECS: u64 = 10;

    /// Body limit for `POST /tone`
    pub const TONE_BODY_LIMIT: usize = 1024;

    /// Body limit for `POST /melody`
    pub const MELODY_BODY_LIMIT: usize = 2048;

    /// Body limit for every other route
    pub const DEFAULT_BODY_LIMIT: usize = 1024;

    /// PWM frequency of the RGB LED channels
    pub const LED_PWM_FREQUENCY_HZ: u32 = 1000;

    /// Buzzer frequency preset at power-up (output stays silent)
    pub const BUZZER_IDLE_FREQUENCY_HZ: u32 = 440;

    /// Duty used when a tone request does not carry one
    pub const DEFAULT_DUTY: f32 = 0.5;

    /// Silent gap between melody notes when the request does not carry one
    pub const DEFAULT_GAP_MS: u64 = 20;

    /// Longest accepted tone or melody note
    pub const MAX_NOTE_MS: u64 = 60_000;

    /// Longest accepted gap between melody notes
    pub const MAX_GAP_MS: u64 = 10_000;

    /// Cadence of duty re-evaluation for light-derived tones
    pub const DUTY_REFRESH_MS: u64 = 50;

    /// Upper bound on waiting for a preempted task to silence the buzzer
    pub const PREEMPT_WAIT_MS: u64 = 10;

    /// Duty reached at full brightness for light-derived tones
    pub const LIGHT_DUTY_CEILING: f32 = 0.5;

    /// Lux estimate at full-scale ADC reading
    pub const LUX_FULL_SCALE: u32 = 200;

    /// Duration of the `GET /led` white pulse
    pub const LED_PULSE_MS: u64 = 300;

    /// Number of red flashes for `POST /led`
    pub const LED_BLINK_COUNT: usize = 5;

    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

    /// WiFi reconnection interval in milliseconds
    pub const WIFI_RECONNECT_INTERVAL_MS: u64 = 5000;
}

/// Error types for the orchestra board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// WiFi connection error
    WiFiError,
    /// TCP listener error
    HttpError,
    /// LED control error
    LedError,
    /// Buzzer control error
    BuzzerError,
    /// Light sensor error
    SensorError,
    /// Board has been shut down
    Halted,
    /// System error
    SystemError,
}

impl core::fmt::Display for BoardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            BoardError::WiFiError => "wifi error",
            BoardError::HttpError => "http listener error",
            BoardError::LedError => "led error",
            BoardError::BuzzerError => "buzzer error",
            BoardError::SensorError => "light sensor error",
            BoardError::Halted => "board halted",
            BoardError::SystemError => "system error",
        };
        f.write_str(text)
    }
}
