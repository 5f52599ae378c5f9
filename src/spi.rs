//! SPI resource context over spidev.
//!
//! `init` validates the logical bus index, routes whichever of the bus's
//! sclk/mosi/miso/cs pins the board lists, then opens
//! `/dev/spidev{bus}.{chip_select}`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::board::Capability;
use crate::error::{Error, Result};
use crate::io::{ControlRequest, DevicePort, OpenMode, PlatformIo};
use crate::mux;
use crate::registry::Registry;
use crate::tracing::prelude::*;

/// One owned spidev handle. `Open -> Closed`; no re-open.
pub struct Spi {
    bus: u32,
    chip_select: u32,
    port: Option<Box<dyn DevicePort>>,
}

impl Spi {
    pub fn init(registry: &Registry, io: &Arc<dyn PlatformIo>, bus: i32) -> Result<Self> {
        let (board, local) = registry.board_for(bus)?;
        let entry = board.spi_bus(local)?;

        for pin in [entry.sclk, entry.mosi, entry.miso, entry.cs]
            .into_iter()
            .flatten()
        {
            mux::resolve(board, io, pin, Capability::Spi)?;
        }
        Self::open_bus(io, entry.bus, entry.chip_select)
    }

    /// Open a spidev node directly, with no board routing.
    pub fn init_raw(io: &Arc<dyn PlatformIo>, bus: u32, chip_select: u32) -> Result<Self> {
        Self::open_bus(io, bus, chip_select)
    }

    fn open_bus(io: &Arc<dyn PlatformIo>, bus: u32, chip_select: u32) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/spidev{bus}.{chip_select}"));
        let port = io
            .open(&path, OpenMode::ReadWrite)
            .map_err(|err| Error::from_open(format!("spi bus {bus}.{chip_select}"), err))?;
        trace!(bus, chip_select, "spi context open");
        Ok(Self {
            bus,
            chip_select,
            port: Some(port),
        })
    }

    fn what(&self, op: &str) -> String {
        format!("spi bus {}.{} {op}", self.bus, self.chip_select)
    }

    /// Clock polarity/phase mode 0..=3.
    pub fn set_mode(&mut self, mode: u8) -> Result<()> {
        if mode > 3 {
            return Err(Error::InvalidArgument(format!(
                "spi mode {mode} outside 0..=3"
            )));
        }
        let what = self.what("mode");
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.control(ControlRequest::SpiMode(mode))
            .map_err(|err| Error::unavailable(what, err))
    }

    pub fn set_speed_hz(&mut self, hz: u32) -> Result<()> {
        let what = self.what("speed");
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.control(ControlRequest::SpiSpeedHz(hz))
            .map_err(|err| Error::unavailable(what, err))
    }

    pub fn set_bits_per_word(&mut self, bits: u8) -> Result<()> {
        let what = self.what("bits-per-word");
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.control(ControlRequest::SpiBitsPerWord(bits))
            .map_err(|err| Error::unavailable(what, err))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let what = self.what("write");
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.write(data)
            .map(|_| ())
            .map_err(|err| Error::unavailable(what, err))
    }

    /// Full-duplex transfer. `tx` and `rx` must be the same length.
    pub fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(Error::InvalidArgument(format!(
                "transfer buffers differ in length ({} vs {})",
                tx.len(),
                rx.len()
            )));
        }
        let what = self.what("transfer");
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.transfer(tx, rx)
            .map_err(|err| Error::unavailable(what, err))
    }

    /// Release the handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            trace!(bus = self.bus, chip_select = self.chip_select, "spi context closed");
        }
        Ok(())
    }
}

impl fmt::Debug for Spi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spi")
            .field("bus", &self.bus)
            .field("chip_select", &self.chip_select)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Drop for Spi {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
