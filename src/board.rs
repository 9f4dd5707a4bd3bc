//! ESP32-C3 peripheral drivers
//!
//! Buzzer on an RMT channel looping one square-wave period, RGB LED on three LEDC
//! channels, photoresistor on ADC1 and the BOOT button.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_hal::Async;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::gpio::{Input, InputConfig, Level, Pull};
use esp_hal::ledc::channel::{self, ChannelIFace};
use esp_hal::ledc::timer::{self, TimerIFace};
use esp_hal::ledc::{LSGlobalClkSource, Ledc, LowSpeed};
use esp_hal::peripherals::{ADC1, GPIO1, GPIO3, GPIO4, GPIO5, GPIO9, GPIO10, LEDC, RMT};
use esp_hal::rmt::{Channel, ContinuousTxTransaction, PulseCode, Rmt, TxChannel, TxChannelConfig, TxChannelCreator};
use esp_hal::time::Rate;
use log::{info, warn};
use static_cell::StaticCell;

use crate::device::DeviceState;
use crate::hardware::{Hardware, LightSensor, PwmRgbLed, ToneOutput, square_wave_ticks, widen_12bit};
use crate::{BoardError, config};

/// RMT tick rate used for buzzer pulses
pub const RMT_TICK_HZ: u32 = 1_000_000;

/// RMT channel driving the buzzer pin
pub type BuzzerChannel = Channel<Blocking, 0>;
/// One LEDC PWM channel of the RGB LED
pub type LedChannel = channel::Channel<'static, LowSpeed>;
pub type LedcRgbLed = PwmRgbLed<LedChannel, LedChannel, LedChannel>;

/// The ESP32-C3 board
pub struct Esp32c3;

impl Hardware for Esp32c3 {
    type Buzzer = RmtBuzzer;
    type Led = LedcRgbLed;
    type Sensor = AdcLightSensor;
}

/// Device state as used by the firmware tasks
pub type BoardState = DeviceState<CriticalSectionRawMutex, Esp32c3>;

static LEDC_CELL: StaticCell<Ledc<'static>> = StaticCell::new();
static LED_TIMER_CELL: StaticCell<timer::Timer<'static, LowSpeed>> = StaticCell::new();

/// Passive buzzer fed by a continuously repeating RMT pulse pair
pub struct RmtBuzzer {
    channel: Option<BuzzerChannel>,
    transaction: Option<ContinuousTxTransaction<BuzzerChannel>>,
    frequency_hz: u32,
    duty: u16,
}

impl RmtBuzzer {
    pub fn new(channel: BuzzerChannel) -> Self {
        Self {
            channel: Some(channel),
            transaction: None,
            frequency_hz: config::BUZZER_IDLE_FREQUENCY_HZ,
            duty: 0,
        }
    }

    /// Stop the running waveform; the pin returns to its idle (low) level
    fn halt(&mut self) {
        if let Some(transaction) = self.transaction.take() {
            match transaction.stop() {
                Ok(channel) => self.channel = Some(channel),
                Err((e, channel)) => {
                    warn!("[BUZZER] RMT stop reported {:?}", e);
                    self.channel = Some(channel);
                }
            }
        }
    }

    /// Restart the waveform with the stored frequency and duty
    fn apply(&mut self) -> Result<(), BoardError> {
        self.halt();

        let Some((high, low)) = square_wave_ticks(self.frequency_hz, self.duty, RMT_TICK_HZ)
        else {
            if self.duty != 0 {
                warn!(
                    "[BUZZER] {}Hz cannot be generated at {}Hz ticks, staying silent",
                    self.frequency_hz, RMT_TICK_HZ
                );
            }
            return Ok(());
        };

        let channel = self.channel.take().ok_or(BoardError::BuzzerError)?;
        let pulses = [
            PulseCode::new(Level::High, high, Level::Low, low),
            PulseCode::new(Level::Low, 0, Level::Low, 0),
        ];
        match channel.transmit_continuously(&pulses) {
            Ok(transaction) => {
                self.transaction = Some(transaction);
                Ok(())
            }
            Err(e) => {
                warn!("[BUZZER] RMT transmit failed: {:?}", e);
                Err(BoardError::BuzzerError)
            }
        }
    }
}

impl ToneOutput for RmtBuzzer {
    fn set_frequency(&mut self, hz: u32) -> Result<(), BoardError> {
        if hz == self.frequency_hz {
            return Ok(());
        }
        self.frequency_hz = hz;
        if self.duty == 0 {
            return Ok(());
        }
        self.apply()
    }

    fn set_duty(&mut self, duty: u16) -> Result<(), BoardError> {
        if duty == self.duty && (duty == 0 || self.transaction.is_some()) {
            return Ok(());
        }
        self.duty = duty;
        if duty == 0 {
            self.halt();
            return Ok(());
        }
        self.apply()
    }
}

/// Photoresistor divider on GPIO1 (ADC1 channel 1)
pub struct AdcLightSensor {
    adc: Adc<'static, ADC1<'static>, Async>,
    pin: AdcPin<GPIO1<'static>, ADC1<'static>>,
}

impl LightSensor for AdcLightSensor {
    async fn read_u16(&mut self) -> Result<u16, BoardError> {
        let raw = self.adc.read_oneshot(&mut self.pin).await;
        Ok(widen_12bit(raw))
    }
}

/// Configure RMT channel 0 on GPIO10 for the buzzer
pub fn init_buzzer(rmt: RMT<'static>, pin: GPIO10<'static>) -> Result<RmtBuzzer, BoardError> {
    let rmt = Rmt::new(rmt, Rate::from_hz(RMT_TICK_HZ)).map_err(|e| {
        warn!("[BUZZER] Failed to initialize RMT: {:?}", e);
        BoardError::BuzzerError
    })?;

    let tx_config = TxChannelConfig::default()
        .with_clk_divider(1)
        .with_idle_output_level(Level::Low)
        .with_idle_output(true)
        .with_carrier_modulation(false);

    let channel = rmt.channel0.configure(pin, tx_config).map_err(|e| {
        warn!("[BUZZER] Failed to configure RMT channel: {:?}", e);
        BoardError::BuzzerError
    })?;

    info!("[BUZZER] RMT buzzer ready on GPIO10");
    Ok(RmtBuzzer::new(channel))
}

/// Configure LEDC timer 0 and channels 0..=2 for the RGB LED (GPIO3/4/5)
pub fn init_rgb_led(
    ledc: LEDC<'static>,
    red: GPIO3<'static>,
    green: GPIO4<'static>,
    blue: GPIO5<'static>,
) -> Result<LedcRgbLed, BoardError> {
    let ledc = LEDC_CELL.init(Ledc::new(ledc));
    ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);

    let led_timer = LED_TIMER_CELL.init(ledc.timer::<LowSpeed>(timer::Number::Timer0));
    led_timer
        .configure(timer::config::Config {
            duty: timer::config::Duty::Duty13Bit,
            clock_source: timer::LSClockSource::APBClk,
            frequency: Rate::from_hz(config::LED_PWM_FREQUENCY_HZ),
        })
        .map_err(|e| {
            warn!("[LED] Failed to configure LEDC timer: {:?}", e);
            BoardError::LedError
        })?;
    let led_timer: &'static timer::Timer<'static, LowSpeed> = led_timer;

    let mut red = ledc.channel(channel::Number::Channel0, red);
    let mut green = ledc.channel(channel::Number::Channel1, green);
    let mut blue = ledc.channel(channel::Number::Channel2, blue);
    for led_channel in [&mut red, &mut green, &mut blue] {
        led_channel
            .configure(channel::config::Config {
                timer: led_timer,
                duty_pct: 0,
                pin_config: channel::config::PinConfig::PushPull,
            })
            .map_err(|e| {
                warn!("[LED] Failed to configure LEDC channel: {:?}", e);
                BoardError::LedError
            })?;
    }

    info!("[LED] RGB LED ready at {}Hz", config::LED_PWM_FREQUENCY_HZ);
    Ok(PwmRgbLed::new(red, green, blue))
}

/// Configure ADC1 on GPIO1 with full-range attenuation
pub fn init_light_sensor(adc: ADC1<'static>, pin: GPIO1<'static>) -> AdcLightSensor {
    let mut adc_config = AdcConfig::new();
    let pin = adc_config.enable_pin(pin, Attenuation::_11dB);
    let adc = Adc::new(adc, adc_config).into_async();
    info!("[SENSOR] Light sensor ready on GPIO1");
    AdcLightSensor { adc, pin }
}

/// BOOT button (GPIO9, active low)
pub fn init_boot_button(pin: GPIO9<'static>) -> Input<'static> {
    Input::new(pin, InputConfig::default().with_pull(Pull::Up))
}
