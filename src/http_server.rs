//! HTTP listener
//!
//! Accepts one TCP connection at a time on the configured port and hands it to the
//! [`Dispatcher`]. Stops accepting once the board is halted.

use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;
use log::{info, warn};

use crate::device::DeviceState;
use crate::dispatcher::Dispatcher;
use crate::hardware::Hardware;
use crate::state_machine::CloseReason;
use crate::{BoardError, config};

const RX_BUFFER_SIZE: usize = 2560;
const TX_BUFFER_SIZE: usize = 1024;

/// HTTP server over the embassy-net TCP stack
pub struct HttpServer<'a> {
    port: u16,
    is_bound: bool,
    stack: Option<Stack<'a>>,
}

impl<'a> HttpServer<'a> {
    pub fn new() -> Self {
        Self {
            port: 0,
            is_bound: false,
            stack: None,
        }
    }

    /// Set the network stack for TCP operations
    pub fn set_stack(&mut self, stack: Stack<'a>) {
        self.stack = Some(stack);
    }

    /// Select the listening port. Sockets are created per connection.
    pub fn bind(&mut self, port: u16) -> Result<(), BoardError> {
        if self.stack.is_none() {
            warn!("[HTTP] Network stack not set");
            return Err(BoardError::HttpError);
        }

        self.port = port;
        self.is_bound = true;
        info!("[HTTP] Server bound to port {}", port);
        Ok(())
    }

    /// Serve connections until the board halts
    pub async fn start_listening<M: RawMutex, H: Hardware>(
        &mut self,
        device: &DeviceState<M, H>,
        dispatcher: &Dispatcher<'_, M, H>,
    ) -> Result<(), BoardError> {
        if !self.is_bound {
            return Err(BoardError::HttpError);
        }
        let stack = self.stack.ok_or(BoardError::HttpError)?;

        let mut rx_buffer = [0u8; RX_BUFFER_SIZE];
        let mut tx_buffer = [0u8; TX_BUFFER_SIZE];

        info!("[HTTP] Server running on port {}", self.port);

        loop {
            if device.is_halted() {
                break;
            }

            let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
            socket.set_timeout(Some(Duration::from_secs(config::SOCKET_TIMEOUT_SECS)));

            match select(socket.accept(self.port), device.wait_halted()).await {
                Either::First(Ok(())) => {}
                Either::First(Err(e)) => {
                    warn!("[HTTP] Accept failed: {:?}", e);
                    continue;
                }
                Either::Second(()) => {
                    socket.abort();
                    break;
                }
            }

            let peer = socket.remote_endpoint();
            match dispatcher.serve(&mut socket).await {
                CloseReason::Completed | CloseReason::NotFound => {}
                CloseReason::Fault(state) => {
                    warn!("[HTTP] Dropped connection from {:?} in {:?}", peer, state);
                }
            }

            socket.close();
            if let Err(e) = socket.flush().await {
                warn!("[HTTP] Flush on close failed: {:?}", e);
                socket.abort();
            }
        }

        info!("[HTTP] Board halted, listener stopped");
        Ok(())
    }
}

impl Default for HttpServer<'_> {
    fn default() -> Self {
        Self::new()
    }
}
