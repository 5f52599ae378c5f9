//! Kernel-facing I/O seam.
//!
//! The routing core never touches the OS directly; it goes through
//! [`PlatformIo`] (open a device node, read/write a sysfs attribute) and
//! [`DevicePort`] (operations on one open handle). `LinuxIo` is the real
//! implementation; `MockIo` is an in-memory double with an ordered write
//! journal for tests. The core owns *when* and *in what order* these are
//! invoked, never how they are implemented.

#[cfg(target_os = "linux")]
pub mod linux;
pub mod mock;

#[cfg(target_os = "linux")]
pub use linux::LinuxIo;
pub use mock::MockIo;

use std::io;
use std::path::Path;

/// How a device node should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Handle-level configuration requests, one per ioctl-shaped operation the
/// resource contexts need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// `I2C_SLAVE`: select the target device address on an i2c-dev node.
    I2cSlaveAddress(u16),
    /// `SPI_IOC_WR_MODE`: clock polarity/phase mode 0..=3.
    SpiMode(u8),
    /// `SPI_IOC_WR_MAX_SPEED_HZ`.
    SpiSpeedHz(u32),
    /// `SPI_IOC_WR_BITS_PER_WORD`.
    SpiBitsPerWord(u8),
    /// termios baud rate change on a tty.
    UartBaud(u32),
}

/// One open OS-level handle (file descriptor, device node, or equivalent).
///
/// All calls are blocking and synchronous; the core does not retry or back
/// off internally.
pub trait DevicePort: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Apply a handle-level configuration request.
    fn control(&mut self, req: ControlRequest) -> io::Result<()>;

    /// Full-duplex transfer (SPI). `tx` and `rx` must be the same length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;

    /// Seek back to the start of the node, so a sysfs value file can be
    /// re-read without reopening.
    fn rewind(&mut self) -> io::Result<()>;
}

/// Process-level I/O operations the routing core consumes.
pub trait PlatformIo: Send + Sync {
    /// Open a device node, returning the owned handle.
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn DevicePort>>;

    /// Read a whole sysfs attribute as trimmed text.
    fn read_attr(&self, path: &Path) -> io::Result<String>;

    /// Write a sysfs attribute.
    fn write_attr(&self, path: &Path, value: &str) -> io::Result<()>;

    /// Whether a path currently exists (e.g. an already-exported GPIO dir).
    fn exists(&self, path: &Path) -> bool;
}
