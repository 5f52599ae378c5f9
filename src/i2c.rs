//! I2C resource context over i2c-dev.
//!
//! `init` validates the logical bus index, routes the bus's sda/scl pins
//! through the mux engine, then opens `/dev/i2c-{adapter}`. A slave address
//! must be selected before transfers; register helpers cover the common
//! write-pointer-then-read pattern.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::board::Capability;
use crate::error::{Error, Result};
use crate::io::{ControlRequest, DevicePort, OpenMode, PlatformIo};
use crate::mux;
use crate::registry::Registry;
use crate::tracing::prelude::*;

/// One owned i2c-dev handle. `Open -> Closed`; no re-open.
pub struct I2c {
    adapter: u32,
    port: Option<Box<dyn DevicePort>>,
    address: Option<u16>,
}

impl I2c {
    /// Open a logical bus: index validation, sda/scl mux routing, then the
    /// device-node open.
    pub fn init(registry: &Registry, io: &Arc<dyn PlatformIo>, bus: i32) -> Result<Self> {
        let (board, local) = registry.board_for(bus)?;
        let entry = board.i2c_bus(local)?;

        for pin in [entry.sda, entry.scl].into_iter().flatten() {
            mux::resolve(board, io, pin, Capability::I2c)?;
        }
        Self::open_adapter(io, entry.adapter)
    }

    /// Open a kernel adapter directly, with no board routing.
    pub fn init_raw(io: &Arc<dyn PlatformIo>, adapter: u32) -> Result<Self> {
        Self::open_adapter(io, adapter)
    }

    fn open_adapter(io: &Arc<dyn PlatformIo>, adapter: u32) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/i2c-{adapter}"));
        let port = io
            .open(&path, OpenMode::ReadWrite)
            .map_err(|err| Error::from_open(format!("i2c adapter {adapter}"), err))?;
        trace!(adapter, "i2c context open");
        Ok(Self {
            adapter,
            port: Some(port),
            address: None,
        })
    }

    /// Select the target device address for subsequent transfers.
    pub fn set_address(&mut self, address: u16) -> Result<()> {
        let adapter = self.adapter;
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.control(ControlRequest::I2cSlaveAddress(address))
            .map_err(|err| Error::unavailable(format!("i2c adapter {adapter} address"), err))?;
        self.address = Some(address);
        Ok(())
    }

    fn checked_port(&mut self) -> Result<&mut dyn DevicePort> {
        let has_address = self.address.is_some();
        let port = self.port.as_deref_mut().ok_or(Error::NotOpen)?;
        if !has_address {
            return Err(Error::InvalidArgument(
                "no slave address selected".to_string(),
            ));
        }
        Ok(port)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let adapter = self.adapter;
        self.checked_port()?
            .read(buf)
            .map_err(|err| Error::unavailable(format!("i2c adapter {adapter} read"), err))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let adapter = self.adapter;
        self.checked_port()?
            .write(data)
            .map(|_| ())
            .map_err(|err| Error::unavailable(format!("i2c adapter {adapter} write"), err))
    }

    /// Read one register: write the register pointer, then read a byte.
    pub fn read_reg(&mut self, reg: u8) -> Result<u8> {
        self.write(&[reg])?;
        let mut buf = [0u8; 1];
        let n = self.read(&mut buf)?;
        if n != 1 {
            return Err(Error::unavailable(
                format!("i2c adapter {} register {reg:#04x}", self.adapter),
                io::Error::new(io::ErrorKind::UnexpectedEof, "short read"),
            ));
        }
        Ok(buf[0])
    }

    pub fn write_reg(&mut self, reg: u8, value: u8) -> Result<()> {
        self.write(&[reg, value])
    }

    /// Release the handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            trace!(adapter = self.adapter, "i2c context closed");
        }
        Ok(())
    }
}

impl fmt::Debug for I2c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2c")
            .field("adapter", &self.adapter)
            .field("address", &self.address)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Drop for I2c {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::catalog;
    use crate::io::MockIo;
    use std::path::Path;

    const TABLE: &str = r#"
        schema = 1
        platform = "i2c-test"
        gpio_count = 2

        [[pin]]
        name = "SDA"
        gpio = { pinmap = 20 }
        i2c = { pinmap = 0, mux = [{ pin = 1, value = 1 }] }

        [[pin]]
        name = "MUX"
        gpio = { pinmap = 21 }

        [[i2c]]
        adapter = 4
        sda = 0
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
    fn test_init_routes_pins_and_opens_adapter() {
        let (registry, mock, io) = setup();
        let _i2c = I2c::init(&registry, &io, 0).unwrap();

        // The sda routing chain drove the selector before the open.
        assert_eq!(mock.attr("/sys/class/gpio/gpio21/value").as_deref(), Some("1"));
        assert!(mock.opened().contains(&PathBuf::from("/dev/i2c-4")));
    }

    #[test]
    fn test_transfers_require_address() {
        let (registry, mock, io) = setup();
        let mut i2c = I2c::init(&registry, &io, 0).unwrap();

        assert!(matches!(i2c.write(&[0x00]), Err(Error::InvalidArgument(_))));

        i2c.set_address(0x48).unwrap();
        assert_eq!(
            mock.controls(),
            vec![(
                PathBuf::from("/dev/i2c-4"),
                ControlRequest::I2cSlaveAddress(0x48)
            )]
        );

        mock.set_read_data("/dev/i2c-4", vec![0xab]);
        assert_eq!(i2c.read_reg(0x01).unwrap(), 0xab);
        assert_eq!(mock.written(Path::new("/dev/i2c-4")), vec![0x01]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (registry, _mock, io) = setup();
        let mut i2c = I2c::init(&registry, &io, 0).unwrap();
        i2c.set_address(0x10).unwrap();
        i2c.close().unwrap();
        i2c.close().unwrap();
        assert!(matches!(i2c.set_address(0x11), Err(Error::NotOpen)));
        assert!(matches!(i2c.write(&[0]), Err(Error::NotOpen)));
    }

    #[test]
    fn test_bad_bus_index() {
        let (registry, _mock, io) = setup();
        assert!(matches!(
            I2c::init(&registry, &io, 7),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_open_failure_surfaces() {
        let (registry, mock, io) = setup();
        mock.fail_open("/dev/i2c-4", libc::EACCES);
        let err = I2c::init(&registry, &io, 0).unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable { .. }), "{err}");
    }
}
