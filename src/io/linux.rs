//! Real Linux implementation of the kernel-boundary traits.
//!
//! Uses `std::fs` for sysfs attributes and device nodes, and `libc` ioctls
//! for the handle-level configuration requests (i2c-dev slave address,
//! spidev mode/speed/bits, termios baud).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use super::{ControlRequest, DevicePort, OpenMode, PlatformIo};
use crate::tracing::prelude::*;

const I2C_SLAVE: u64 = 0x0703;
const SPI_IOC_WR_MODE: u64 = 0x4001_6b01;
const SPI_IOC_WR_BITS_PER_WORD: u64 = 0x4001_6b03;
const SPI_IOC_WR_MAX_SPEED_HZ: u64 = 0x4004_6b04;
const SPI_IOC_MESSAGE_1: u64 = 0x4020_6b00;

/// Layout of `struct spi_ioc_transfer` from `<linux/spi/spidev.h>`.
#[repr(C)]
#[derive(Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

/// `PlatformIo` over the live kernel interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxIo;

impl LinuxIo {
    pub fn new() -> Self {
        Self
    }
}

impl PlatformIo for LinuxIo {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn DevicePort>> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(path)?;
        trace!(path = %path.display(), ?mode, "opened device node");
        Ok(Box::new(LinuxPort {
            file,
            path: path.to_path_buf(),
        }))
    }

    fn read_attr(&self, path: &Path) -> io::Result<String> {
        let text = fs::read_to_string(path)?;
        Ok(text.trim_end().to_string())
    }

    fn write_attr(&self, path: &Path, value: &str) -> io::Result<()> {
        trace!(path = %path.display(), value, "writing attribute");
        fs::write(path, value)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

struct LinuxPort {
    file: File,
    path: PathBuf,
}

impl LinuxPort {
    fn ioctl<T>(&self, request: u64, arg: *mut T) -> io::Result<()> {
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_baud(&self, baud: u32) -> io::Result<()> {
        let speed = match baud {
            1200 => libc::B1200,
            2400 => libc::B2400,
            4800 => libc::B4800,
            9600 => libc::B9600,
            19200 => libc::B19200,
            38400 => libc::B38400,
            57600 => libc::B57600,
            115200 => libc::B115200,
            230400 => libc::B230400,
            460800 => libc::B460800,
            921600 => libc::B921600,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported baud rate {baud}"),
                ))
            }
        };

        let fd = self.file.as_raw_fd();
        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe {
            libc::cfmakeraw(&mut tio);
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
        }
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl DevicePort for LinuxPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.file.flush()?;
        Ok(n)
    }

    fn control(&mut self, req: ControlRequest) -> io::Result<()> {
        trace!(path = %self.path.display(), ?req, "control request");
        match req {
            ControlRequest::I2cSlaveAddress(addr) => {
                let rc = unsafe {
                    libc::ioctl(self.file.as_raw_fd(), I2C_SLAVE as _, addr as libc::c_ulong)
                };
                if rc < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            }
            ControlRequest::SpiMode(mut mode) => self.ioctl(SPI_IOC_WR_MODE, &mut mode),
            ControlRequest::SpiSpeedHz(mut hz) => self.ioctl(SPI_IOC_WR_MAX_SPEED_HZ, &mut hz),
            ControlRequest::SpiBitsPerWord(mut bits) => {
                self.ioctl(SPI_IOC_WR_BITS_PER_WORD, &mut bits)
            }
            ControlRequest::UartBaud(baud) => self.set_baud(baud),
        }
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        if tx.len() != rx.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transfer buffers must be the same length",
            ));
        }
        let mut xfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: tx.len() as u32,
            ..Default::default()
        };
        self.ioctl(SPI_IOC_MESSAGE_1, &mut xfer)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}
