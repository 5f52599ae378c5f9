//! UART resource context over tty device nodes.
//!
//! `init` validates the logical device index, routes the rx/tx pins, then
//! opens the board's device path. Baud changes go through the port's
//! control request (termios on the real implementation).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::board::Capability;
use crate::error::{Error, Result};
use crate::io::{ControlRequest, DevicePort, OpenMode, PlatformIo};
use crate::mux;
use crate::registry::Registry;
use crate::tracing::prelude::*;

/// One owned tty handle. `Open -> Closed`; no re-open.
pub struct Uart {
    device: PathBuf,
    port: Option<Box<dyn DevicePort>>,
}

impl Uart {
    pub fn init(registry: &Registry, io: &Arc<dyn PlatformIo>, index: i32) -> Result<Self> {
        let (board, local) = registry.board_for(index)?;
        let entry = board.uart_device(local)?;
        let device = entry.device.clone().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "uart {index} on {} has no device path",
                board.platform_name
            ))
        })?;

        for pin in [entry.rx, entry.tx].into_iter().flatten() {
            mux::resolve(board, io, pin, Capability::Uart)?;
        }
        Self::open_device(io, device)
    }

    /// Open a tty path directly, with no board routing.
    pub fn init_raw(io: &Arc<dyn PlatformIo>, device: impl Into<PathBuf>) -> Result<Self> {
        Self::open_device(io, device.into())
    }

    fn open_device(io: &Arc<dyn PlatformIo>, device: PathBuf) -> Result<Self> {
        let port = io
            .open(&device, OpenMode::ReadWrite)
            .map_err(|err| Error::from_open(format!("uart {}", device.display()), err))?;
        trace!(device = %device.display(), "uart context open");
        Ok(Self {
            device,
            port: Some(port),
        })
    }

    pub fn set_baud(&mut self, baud: u32) -> Result<()> {
        let what = format!("uart {} baud", self.device.display());
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.control(ControlRequest::UartBaud(baud))
            .map_err(|err| Error::unavailable(what, err))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let what = format!("uart {} read", self.device.display());
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.read(buf).map_err(|err| Error::unavailable(what, err))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let what = format!("uart {} write", self.device.display());
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.write(data).map_err(|err| Error::unavailable(what, err))
    }

    /// Release the handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            trace!(device = %self.device.display(), "uart context closed");
        }
        Ok(())
    }
}

impl fmt::Debug for Uart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uart")
            .field("device", &self.device)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Drop for Uart {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::catalog;
    use crate::io::MockIo;

    const TABLE: &str = r#"
        schema = 1
        platform = "uart-test"
        gpio_count = 2

        [[pin]]
        name = "RX"
        gpio = { pinmap = 60 }
        uart = { pinmap = 0 }

        [[pin]]
        name = "TX"
        gpio = { pinmap = 61 }
        uart = { pinmap = 0 }

        [[uart]]
        device = "/dev/ttyS1"
        rx = 0
        tx = 1

        [[uart]]
        rx = 0
    "#;

    fn setup() -> (Registry, MockIo, Arc<dyn PlatformIo>) {
        let mut registry = Registry::new();
        registry
            .init_with(catalog::parse_table(TABLE).unwrap())
            .unwrap();
        let mock = MockIo::new();
        let io: Arc<dyn PlatformIo> = Arc::new(mock.clone());
        (registry, mock, io)
    }

    #[test]
    fn test_init_opens_device_and_sets_baud() {
        let (registry, mock, io) = setup();
        let mut uart = Uart::init(&registry, &io, 0).unwrap();
        uart.set_baud(115_200).unwrap();

        assert!(mock.opened().contains(&PathBuf::from("/dev/ttyS1")));
        assert_eq!(
            mock.controls(),
            vec![(PathBuf::from("/dev/ttyS1"), ControlRequest::UartBaud(115_200))]
        );
    }

    #[test]
    fn test_read_write_round_trip() {
        let (registry, mock, io) = setup();
        let mut uart = Uart::init(&registry, &io, 0).unwrap();
        uart.write(b"at\r\n").unwrap();
        assert_eq!(mock.written(PathBuf::from("/dev/ttyS1")), b"at\r\n");

        mock.set_read_data("/dev/ttyS1", b"OK".to_vec());
        let mut buf = [0u8; 2];
        assert_eq!(uart.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"OK");
    }

    #[test]
    fn test_missing_device_path() {
        let (registry, _mock, io) = setup();
        let err = Uart::init(&registry, &io, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (registry, _mock, io) = setup();
        let mut uart = Uart::init(&registry, &io, 0).unwrap();
        uart.close().unwrap();
        uart.close().unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(uart.read(&mut buf), Err(Error::NotOpen)));
        assert!(matches!(uart.set_baud(9600), Err(Error::NotOpen)));
    }
}
