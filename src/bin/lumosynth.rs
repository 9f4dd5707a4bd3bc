//! Light-controlled synth
//!
//! Standalone demo without networking: brightness on the photoresistor sets the buzzer
//! pitch between C4 and C6. Too dark and it goes quiet.

#![no_std]
#![no_main]

extern crate alloc;

use embassy_time::{Duration, Ticker};
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use esp_hal_embassy::Executor;
use log::{info, warn};
use orchestra_board::board::{self, AdcLightSensor, RmtBuzzer};
use orchestra_board::config;
use orchestra_board::hardware::{LightSensor, ToneOutput, duty_to_u16};
use orchestra_board::sensor::pitch_from_light;
use static_cell::StaticCell;

esp_bootloader_esp_idf::esp_app_desc!();

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[embassy_executor::task]
async fn synth_task(mut buzzer: RmtBuzzer, mut sensor: AdcLightSensor) {
    let duty = duty_to_u16(config::DEFAULT_DUTY);
    let mut ticker = Ticker::every(Duration::from_millis(config::DUTY_REFRESH_MS));
    let mut last_pitch = None;

    loop {
        let pitch = match sensor.read_u16().await {
            Ok(raw) => pitch_from_light(raw),
            Err(e) => {
                warn!("[SENSOR] Read failed: {:?}", e);
                None
            }
        };

        if pitch != last_pitch {
            let result = match pitch {
                Some(hz) => buzzer
                    .set_frequency(hz)
                    .and_then(|_| buzzer.set_duty(duty)),
                None => buzzer.set_duty(0),
            };
            if let Err(e) = result {
                warn!("[BUZZER] Update failed: {:?}", e);
            }
            info!("[SYNTH] Pitch -> {:?}", pitch);
            last_pitch = pitch;
        }

        ticker.next().await;
    }
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(size: 16 * 1024);

    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    let buzzer = match board::init_buzzer(peripherals.RMT, peripherals.GPIO10) {
        Ok(buzzer) => buzzer,
        Err(e) => panic!("buzzer initialization failed: {:?}", e),
    };
    let sensor = board::init_light_sensor(peripherals.ADC1, peripherals.GPIO1);
    info!("[SYNTH] Lumosynth running");

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(synth_task(buzzer, sensor)).ok();
    });
}
