//! Serial port endpoint for the network processor.
//!
//! The driver itself works over any `AsyncRead + AsyncWrite` stream; this
//! module only knows how to open the serial port the radio sits behind.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::{Error, Result};

/// Default baud rate for network processors.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay after opening the port before the first command.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Configuration for the serial endpoint.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Hardware or software flow control.
    pub flow_control: FlowControl,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Parity checking mode.
    pub parity: Parity,
    /// Delay after opening before the port is handed to the driver.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with 8N1 framing and no flow control.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            flow_control: FlowControl::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the flow control mode.
    #[must_use]
    pub const fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Sets the number of data bits.
    #[must_use]
    pub const fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Sets the number of stop bits.
    #[must_use]
    pub const fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Sets the parity mode.
    #[must_use]
    pub const fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Opens the port, waits out the connection delay and drains stale input.
    pub async fn open(&self) -> Result<SerialStream> {
        tracing::info!("opening serial port: {}", self.port);

        let mut stream = tokio_serial::new(&self.port, self.baud_rate)
            .flow_control(self.flow_control)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .open_native_async()
            .map_err(Error::Serial)?;

        tokio::time::sleep(self.connection_delay).await;

        // Boot banners and half-sent frames from a previous session.
        let mut buf = [0u8; 256];
        let mut drained = 0usize;
        while let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await
        {
            if n == 0 {
                break;
            }
            drained += n;
        }
        if drained > 0 {
            tracing::debug!("drained {} stale bytes from {}", drained, self.port);
        }

        Ok(stream)
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyACM0");
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.flow_control, FlowControl::None);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(38_400)
            .flow_control(FlowControl::Hardware)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .data_bits(DataBits::Seven)
            .connection_delay(Duration::from_secs(1));
        assert_eq!(config.baud_rate, 38_400);
        assert_eq!(config.flow_control, FlowControl::Hardware);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        let _ = list_ports();
    }
}
