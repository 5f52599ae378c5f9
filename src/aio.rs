//! Analog-input resource context over IIO sysfs attributes.
//!
//! Analog channel `a` occupies table index `gpio_count + a` on its board;
//! the hook scheme turns the channel into a raw-value path. Raw samples
//! arrive at the board's `adc_raw_bits` resolution and are shifted down to
//! the context resolution (default `adc_supported_bits`), so the scaling is
//! board data, never hard-coded.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::board::Capability;
use crate::error::{Error, Result};
use crate::io::{DevicePort, OpenMode, PlatformIo};
use crate::mux;
use crate::registry::Registry;
use crate::tracing::prelude::*;

/// One owned analog-input channel. `Open -> Closed`; no re-open.
pub struct Aio {
    channel: u32,
    raw_bits: u32,
    resolution: u32,
    port: Option<Box<dyn DevicePort>>,
}

impl Aio {
    /// Open analog channel `channel` (sub-platform marker respected).
    pub fn init(registry: &Registry, io: &Arc<dyn PlatformIo>, channel: i32) -> Result<Self> {
        let (board, local) = registry.board_for(channel)?;
        let pin = board.aio_pin(local)?;
        mux::resolve(board, io, pin, Capability::Aio)?;

        let path = board.hooks.aio_raw_path(local as u32);
        let port = io
            .open(&path, OpenMode::ReadOnly)
            .map_err(|err| Error::from_open(format!("aio channel {local}"), err))?;
        trace!(channel = local, raw_bits = board.adc_raw_bits, "aio context open");
        Ok(Self {
            channel: local as u32,
            raw_bits: board.adc_raw_bits,
            resolution: board.adc_supported_bits,
            port: Some(port),
        })
    }

    /// Read one sample at the kernel's raw resolution.
    pub fn read_raw(&mut self) -> Result<u32> {
        let what = format!("aio channel {} raw value", self.channel);
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.rewind().map_err(|err| Error::unavailable(what.as_str(), err))?;

        let mut buf = [0u8; 16];
        let n = port
            .read(&mut buf)
            .map_err(|err| Error::unavailable(what.as_str(), err))?;
        let text = std::str::from_utf8(&buf[..n])
            .map_err(|_| bad_sample(&what))?
            .trim();
        text.parse::<u32>().map_err(|_| bad_sample(&what))
    }

    /// Read one sample shifted to the context resolution.
    pub fn read(&mut self) -> Result<u32> {
        let raw = self.read_raw()?;
        Ok(raw >> (self.raw_bits - self.resolution))
    }

    /// Read one sample as a fraction of full scale.
    pub fn read_float(&mut self) -> Result<f32> {
        let raw = self.read_raw()?;
        let max = (1u32 << self.raw_bits) - 1;
        Ok(raw as f32 / max as f32)
    }

    /// Resolution `read()` reports at, in bits.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Override the reporting resolution, up to the board's raw resolution.
    pub fn set_resolution(&mut self, bits: u32) -> Result<()> {
        if bits == 0 || bits > self.raw_bits {
            return Err(Error::InvalidArgument(format!(
                "resolution {bits} outside 1..={} bits",
                self.raw_bits
            )));
        }
        self.resolution = bits;
        Ok(())
    }

    /// Release the handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            trace!(channel = self.channel, "aio context closed");
        }
        Ok(())
    }
}

fn bad_sample(what: &str) -> Error {
    Error::unavailable(
        what,
        io::Error::new(io::ErrorKind::InvalidData, "unparseable sample"),
    )
}

impl fmt::Debug for Aio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aio")
            .field("channel", &self.channel)
            .field("raw_bits", &self.raw_bits)
            .field("resolution", &self.resolution)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Drop for Aio {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
