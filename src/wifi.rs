//! WiFi module for ESP32-C3 board
//!
//! Joins the configured network with esp-wifi and waits for the embassy-net DHCP lease.
//! Reconnects after a link loss; there is no other retry policy.

use crate::{BoardError, config};
use embassy_net::Stack;
use embassy_time::{Duration, Timer, with_timeout};
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController, WifiEvent};
use log::{info, warn};

/// How long to wait for a DHCP lease after association
const DHCP_TIMEOUT_SECS: u64 = 15;

/// WiFi manager for handling network connectivity
pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    is_connected: bool,
    stack: Option<Stack<'a>>,
}

impl<'a> WiFiManager<'a> {
    pub fn new(controller: WifiController<'a>) -> Self {
        Self {
            controller,
            is_connected: false,
            stack: None,
        }
    }

    /// Set the embassy-net stack used for the DHCP lease
    pub fn set_stack(&mut self, stack: Stack<'a>) {
        self.stack = Some(stack);
    }

    /// Associate with the network and wait for an IPv4 address
    pub async fn connect(&mut self, ssid: &str, password: &str) -> Result<[u8; 4], BoardError> {
        info!("[WIFI] Connecting to WiFi network: {}", ssid);

        let auth_method = if password.is_empty() {
            info!("[WIFI] Password is empty, using open network");
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client_config = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| BoardError::WiFiError)?,
            password: password.try_into().map_err(|_| BoardError::WiFiError)?,
            auth_method,
            ..Default::default()
        };

        if !matches!(self.controller.is_started(), Ok(true)) {
            self.controller
                .set_configuration(&Configuration::Client(client_config))
                .map_err(|e| {
                    warn!("[WIFI] Configuration rejected: {:?}", e);
                    BoardError::WiFiError
                })?;
            self.controller.start_async().await.map_err(|e| {
                warn!("[WIFI] Failed to start station: {:?}", e);
                BoardError::WiFiError
            })?;
        }

        self.controller.connect_async().await.map_err(|e| {
            warn!("[WIFI] Association failed: {:?}", e);
            BoardError::WiFiError
        })?;
        self.is_connected = true;
        info!("[WIFI] Associated, waiting for DHCP lease");

        let stack = self.stack.ok_or(BoardError::WiFiError)?;
        with_timeout(
            Duration::from_secs(DHCP_TIMEOUT_SECS),
            stack.wait_config_up(),
        )
        .await
        .map_err(|_| {
            warn!("[DHCP] No lease within {}s", DHCP_TIMEOUT_SECS);
            BoardError::WiFiError
        })?;

        self.get_ip_address().ok_or(BoardError::WiFiError)
    }

    /// Current IPv4 address from the DHCP lease
    pub fn get_ip_address(&self) -> Option<[u8; 4]> {
        if !self.is_connected {
            return None;
        }
        let config = self.stack?.config_v4()?;
        Some(config.address.address().octets())
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected && self.controller.is_connected().unwrap_or(false)
    }

    /// Keep the link up: connect, wait for a disconnect, reconnect after the interval
    pub async fn maintain(&mut self) -> ! {
        loop {
            match self.connect(config::WIFI_SSID, config::WIFI_PASSWORD).await {
                Ok(ip) => {
                    info!(
                        "[WIFI] Server reachable at http://{}.{}.{}.{}:{}/",
                        ip[0],
                        ip[1],
                        ip[2],
                        ip[3],
                        config::HTTP_PORT
                    );
                    self.controller
                        .wait_for_event(WifiEvent::StaDisconnected)
                        .await;
                    self.is_connected = false;
                    warn!("[WIFI] Link lost, reconnecting");
                }
                Err(_) => {
                    self.is_connected = false;
                    warn!(
                        "[WIFI] Connection failed, retrying in {}ms",
                        config::WIFI_RECONNECT_INTERVAL_MS
                    );
                }
            }
            Timer::after_millis(config::WIFI_RECONNECT_INTERVAL_MS).await;
        }
    }
}
