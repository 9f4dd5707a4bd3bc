#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::gpio::Input;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};

extern crate alloc;

use esp_wifi::wifi;

use embassy_net::{Config, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_hal_embassy::Executor;
use static_cell::StaticCell;

use orchestra_board::board::{self, BoardState, Esp32c3};
use orchestra_board::config;
use orchestra_board::device::{DeviceState, device_id_from_mac};
use orchestra_board::dispatcher::Dispatcher;
use orchestra_board::http_server::HttpServer;
use orchestra_board::playback::{PlaybackConfig, Scheduler};
use orchestra_board::wifi::WiFiManager;

esp_bootloader_esp_idf::esp_app_desc!();

type BoardScheduler = Scheduler<'static, CriticalSectionRawMutex, Esp32c3>;
type BoardDispatcher = Dispatcher<'static, CriticalSectionRawMutex, Esp32c3>;

static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static WIFI_MANAGER_CELL: StaticCell<WiFiManager<'static>> = StaticCell::new();
static DEVICE_CELL: StaticCell<BoardState> = StaticCell::new();
static SCHEDULER_CELL: StaticCell<BoardScheduler> = StaticCell::new();
static DISPATCHER_CELL: StaticCell<BoardDispatcher> = StaticCell::new();
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("[MAIN] Panic: {}", info);
    loop {}
}

#[embassy_executor::task]
async fn net_task(
    mut runner: embassy_net::Runner<'static, esp_wifi::wifi::WifiDevice<'static>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn wifi_task(wifi_manager: &'static mut WiFiManager<'static>) -> ! {
    wifi_manager.maintain().await
}

#[embassy_executor::task]
async fn playback_task(scheduler: &'static BoardScheduler) -> ! {
    scheduler.run().await
}

#[embassy_executor::task]
async fn http_server_task(
    stack: Stack<'static>,
    device: &'static BoardState,
    dispatcher: &'static BoardDispatcher,
) {
    stack.wait_config_up().await;

    let mut server = HttpServer::new();
    server.set_stack(stack);

    match server.bind(config::HTTP_PORT) {
        Ok(_) => {
            if let Err(e) = server.start_listening(device, dispatcher).await {
                error!("[HTTP] Server error: {:?}", e);
            }
        }
        Err(e) => error!("[HTTP] Failed to bind HTTP server: {:?}", e),
    }
}

/// BOOT button press: stop playback, zero the outputs, latch the board as halted
#[embassy_executor::task]
async fn shutdown_task(
    mut button: Input<'static>,
    device: &'static BoardState,
    scheduler: &'static BoardScheduler,
) {
    button.wait_for_falling_edge().await;
    info!("[MAIN] BOOT button pressed, stopping");
    scheduler.stop().await;
    device.shutdown();
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    info!("[MAIN] orchestra-board v{}", config::FIRMWARE_VERSION);

    // Outputs first so the buzzer is silent before anything else runs
    let buzzer = match board::init_buzzer(peripherals.RMT, peripherals.GPIO10) {
        Ok(buzzer) => buzzer,
        Err(e) => panic!("buzzer initialization failed: {:?}", e),
    };
    let led = match board::init_rgb_led(
        peripherals.LEDC,
        peripherals.GPIO3,
        peripherals.GPIO4,
        peripherals.GPIO5,
    ) {
        Ok(led) => led,
        Err(e) => panic!("LED initialization failed: {:?}", e),
    };
    let sensor = board::init_light_sensor(peripherals.ADC1, peripherals.GPIO1);
    let button = board::init_boot_button(peripherals.GPIO9);

    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let wifi_init = match esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) {
        Ok(wifi_init) => wifi_init,
        Err(e) => panic!("WiFi driver initialization failed: {:?}", e),
    };
    let wifi_init = WIFI_INIT_CELL.init(wifi_init);
    let (wifi_controller, wifi_interfaces) = match wifi::new(wifi_init, peripherals.WIFI) {
        Ok(parts) => parts,
        Err(e) => panic!("WiFi controller creation failed: {:?}", e),
    };
    let wifi_device = wifi_interfaces.sta;
    let device_id = device_id_from_mac(wifi_device.mac_address());
    info!("[MAIN] Device id {}", device_id);

    let (stack, runner) = embassy_net::new(
        wifi_device,
        Config::dhcpv4(Default::default()),
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    );

    let mut wifi_manager = WiFiManager::new(wifi_controller);
    wifi_manager.set_stack(stack);
    let wifi_manager = WIFI_MANAGER_CELL.init(wifi_manager);

    let device: &'static BoardState =
        DEVICE_CELL.init(DeviceState::new(&device_id, buzzer, led, sensor));
    if let Err(e) = device.power_up() {
        warn!("[MAIN] Power-up preset failed: {:?}", e);
    }
    let scheduler: &'static BoardScheduler =
        SCHEDULER_CELL.init(Scheduler::new(device, PlaybackConfig::default()));
    let dispatcher: &'static BoardDispatcher =
        DISPATCHER_CELL.init(Dispatcher::new(device, scheduler));

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        info!("[MAIN] Spawning tasks...");
        spawner.spawn(net_task(runner)).ok();
        spawner.spawn(wifi_task(wifi_manager)).ok();
        spawner.spawn(playback_task(scheduler)).ok();
        spawner
            .spawn(http_server_task(stack, device, dispatcher))
            .ok();
        match spawner.spawn(shutdown_task(button, device, scheduler)) {
            Ok(_) => info!("[MAIN] All tasks spawned"),
            Err(e) => warn!("[MAIN] Failed to spawn shutdown task: {:?}", e),
        }
    });
}
