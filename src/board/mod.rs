//! Board descriptor data model.
//!
//! A [`BoardDescriptor`] is the immutable-after-load description of one
//! platform: an ordered pin table (index = logical pin id within the
//! platform), per-pin capability sets with per-function physical mappings and
//! mux chains, and per-bus tables for I2C/SPI/UART. Descriptors are built by
//! the catalog loader and held by the registry behind `Arc`; applying a mux
//! chain mutates hardware state, never the descriptor.

pub mod catalog;
pub mod detect;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Per-pin capability bitset: which function families are wired to a
    /// physical pin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PinCaps: u8 {
        const VALID = 1 << 0;
        const GPIO = 1 << 1;
        const PWM = 1 << 2;
        const FAST_GPIO = 1 << 3;
        const SPI = 1 << 4;
        const I2C = 1 << 5;
        const AIO = 1 << 6;
        const UART = 1 << 7;
    }
}

/// One routable function family.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Capability {
    Gpio,
    Pwm,
    FastGpio,
    Spi,
    I2c,
    Aio,
    Uart,
}

pub(crate) const CAP_COUNT: usize = 7;

impl Capability {
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// The capability's bit in a [`PinCaps`] set.
    pub fn flag(self) -> PinCaps {
        match self {
            Capability::Gpio => PinCaps::GPIO,
            Capability::Pwm => PinCaps::PWM,
            Capability::FastGpio => PinCaps::FAST_GPIO,
            Capability::Spi => PinCaps::SPI,
            Capability::I2c => PinCaps::I2C,
            Capability::Aio => PinCaps::AIO,
            Capability::Uart => PinCaps::UART,
        }
    }
}

/// One multiplexer setting: drive `pin` (a logical pin on the same board) to
/// `value` before the routed function is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxStep {
    pub pin: i32,
    pub value: u8,
}

/// Per-function physical mapping for one pin.
#[derive(Debug, Clone, Default)]
pub struct PinMapping {
    /// Physical index on the parent controller (sysfs GPIO number, PWM
    /// channel, ...).
    pub pinmap: u32,
    /// Parent controller id (PWM chip number, GPIO chip, ...).
    pub parent: u32,
    /// Ordered mux chain applied before the function is usable.
    pub mux: Vec<MuxStep>,
}

/// One physical pin position on a platform.
#[derive(Debug, Clone)]
pub struct Pin {
    /// Display name. Not unique across the table.
    pub name: String,
    pub caps: PinCaps,
    mappings: [Option<PinMapping>; CAP_COUNT],
}

impl Pin {
    /// A placeholder table slot with no wired functions.
    pub fn invalid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caps: PinCaps::empty(),
            mappings: Default::default(),
        }
    }

    /// Add a function mapping, setting the matching capability flag.
    pub fn with_mapping(mut self, cap: Capability, mapping: PinMapping) -> Self {
        self.caps |= PinCaps::VALID | cap.flag();
        self.mappings[cap.index()] = Some(mapping);
        self
    }

    /// The mapping record for `cap`, if the capability is wired.
    pub fn mapping(&self, cap: Capability) -> Option<&PinMapping> {
        if !self.supports(cap) {
            return None;
        }
        self.mappings[cap.index()].as_ref()
    }

    /// True iff the pin is valid and the capability flag is set.
    pub fn supports(&self, cap: Capability) -> bool {
        self.caps.contains(PinCaps::VALID | cap.flag())
    }

    pub fn is_valid(&self) -> bool {
        self.caps.contains(PinCaps::VALID)
    }
}

/// One I2C bus: kernel adapter number plus the pins that must be muxed to
/// route sda/scl to it.
#[derive(Debug, Clone)]
pub struct I2cBusEntry {
    /// Kernel adapter number (`/dev/i2c-{adapter}`).
    pub adapter: u32,
    pub sda: Option<i32>,
    pub scl: Option<i32>,
}

/// One SPI bus (`/dev/spidev{bus}.{chip_select}`).
#[derive(Debug, Clone)]
pub struct SpiBusEntry {
    pub bus: u32,
    pub chip_select: u32,
    pub sclk: Option<i32>,
    pub mosi: Option<i32>,
    pub miso: Option<i32>,
    pub cs: Option<i32>,
}

/// One UART: device path plus rx/tx routing pins.
#[derive(Debug, Clone)]
pub struct UartDeviceEntry {
    pub device: Option<PathBuf>,
    pub rx: Option<i32>,
    pub tx: Option<i32>,
}

/// Board-wide PWM period limits, microseconds.
#[derive(Debug, Clone, Copy)]
pub struct PwmBounds {
    pub min_period_us: u32,
    pub max_period_us: u32,
    pub default_period_us: u32,
}

impl Default for PwmBounds {
    fn default() -> Self {
        Self {
            min_period_us: 1,
            max_period_us: 1_000_000,
            default_period_us: 5_000,
        }
    }
}

/// Per-platform overrides for default open/path behavior.
///
/// A strategy seam, not a subtype: the defaults cover standard sysfs/IIO
/// layouts, and platform variants substitute single methods (e.g. a
/// non-standard analog-file-path scheme).
pub trait PlatformHooks: Send + Sync {
    /// Sysfs raw-value attribute for an analog input channel.
    fn aio_raw_path(&self, channel: u32) -> PathBuf {
        PathBuf::from(format!(
            "/sys/bus/iio/devices/iio:device0/in_voltage{channel}_raw"
        ))
    }

    /// Sysfs directory for an exported GPIO line.
    fn gpio_base_path(&self, physical: u32) -> PathBuf {
        PathBuf::from(format!("/sys/class/gpio/gpio{physical}"))
    }

    /// Sysfs directory for a PWM chip.
    fn pwm_chip_path(&self, parent: u32) -> PathBuf {
        PathBuf::from(format!("/sys/class/pwm/pwmchip{parent}"))
    }
}

/// Standard sysfs/IIO path scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl PlatformHooks for DefaultHooks {}

/// Analog channels spread across several IIO devices, `channels_per_device`
/// per device (e.g. channel 5 with 4 per device lives at
/// `iio:device1/in_voltage1_raw`).
#[derive(Debug, Clone, Copy)]
pub struct BankedAioHooks {
    pub channels_per_device: u32,
}

impl PlatformHooks for BankedAioHooks {
    fn aio_raw_path(&self, channel: u32) -> PathBuf {
        let device = channel / self.channels_per_device;
        let index = channel % self.channels_per_device;
        PathBuf::from(format!(
            "/sys/bus/iio/devices/iio:device{device}/in_voltage{index}_raw"
        ))
    }
}

/// Immutable description of one platform.
#[derive(Clone)]
pub struct BoardDescriptor {
    pub platform_name: String,
    /// Ordered pin table; index = logical pin id within this platform.
    pub pins: Vec<Pin>,
    /// Number of digital-capable table positions; analog channels follow at
    /// indices `gpio_count .. gpio_count + aio_count`.
    pub gpio_count: usize,
    pub aio_count: usize,
    pub i2c_buses: Vec<I2cBusEntry>,
    pub default_i2c_bus: usize,
    pub spi_buses: Vec<SpiBusEntry>,
    pub default_spi_bus: usize,
    pub uart_devices: Vec<UartDeviceEntry>,
    pub default_uart: usize,
    pub pwm_bounds: PwmBounds,
    /// Resolution the kernel reports raw ADC samples at. Zero if no ADC.
    pub adc_raw_bits: u32,
    /// Resolution raw samples should be understood at after shifting.
    pub adc_supported_bits: u32,
    pub hooks: Arc<dyn PlatformHooks>,
}

impl fmt::Debug for BoardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardDescriptor")
            .field("platform_name", &self.platform_name)
            .field("pins", &self.pins.len())
            .field("gpio_count", &self.gpio_count)
            .field("aio_count", &self.aio_count)
            .field("i2c_buses", &self.i2c_buses.len())
            .field("spi_buses", &self.spi_buses.len())
            .field("uart_devices", &self.uart_devices.len())
            .finish()
    }
}

impl BoardDescriptor {
    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    /// Look up a pin by local (already-stripped) id. Bounds errors only;
    /// capability checks belong to the resolution engine.
    pub fn pin(&self, local: i32) -> Result<&Pin> {
        let index = usize::try_from(local)
            .map_err(|_| Error::InvalidArgument(format!("negative pin id {local}")))?;
        self.pins.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "pin {local} out of range for {} ({} pins)",
                self.platform_name,
                self.pins.len()
            ))
        })
    }

    pub fn pin_name(&self, local: i32) -> Result<&str> {
        Ok(&self.pin(local)?.name)
    }

    /// Table index of analog channel `channel`.
    pub fn aio_pin(&self, channel: i32) -> Result<i32> {
        let ch = usize::try_from(channel)
            .map_err(|_| Error::InvalidArgument(format!("negative aio channel {channel}")))?;
        if ch >= self.aio_count {
            return Err(Error::InvalidArgument(format!(
                "aio channel {channel} out of range for {} ({} channels)",
                self.platform_name, self.aio_count
            )));
        }
        Ok((self.gpio_count + ch) as i32)
    }

    pub fn i2c_bus(&self, index: i32) -> Result<&I2cBusEntry> {
        let i = usize::try_from(index)
            .map_err(|_| Error::InvalidArgument(format!("negative i2c bus index {index}")))?;
        self.i2c_buses.get(i).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "i2c bus {index} out of range for {} ({} buses)",
                self.platform_name,
                self.i2c_buses.len()
            ))
        })
    }

    pub fn spi_bus(&self, index: i32) -> Result<&SpiBusEntry> {
        let i = usize::try_from(index)
            .map_err(|_| Error::InvalidArgument(format!("negative spi bus index {index}")))?;
        self.spi_buses.get(i).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "spi bus {index} out of range for {} ({} buses)",
                self.platform_name,
                self.spi_buses.len()
            ))
        })
    }

    pub fn uart_device(&self, index: i32) -> Result<&UartDeviceEntry> {
        let i = usize::try_from(index)
            .map_err(|_| Error::InvalidArgument(format!("negative uart index {index}")))?;
        self.uart_devices.get(i).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "uart {index} out of range for {} ({} devices)",
                self.platform_name,
                self.uart_devices.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_invalid_pin_supports_nothing() {
        let pin = Pin::invalid("NC");
        assert!(!pin.is_valid());
        for cap in Capability::iter() {
            assert!(!pin.supports(cap));
            assert!(pin.mapping(cap).is_none());
        }
    }

    #[test]
    fn test_mapping_sets_flag_and_valid() {
        let pin = Pin::invalid("GPIO4").with_mapping(
            Capability::Gpio,
            PinMapping {
                pinmap: 4,
                parent: 0,
                mux: vec![],
            },
        );
        assert!(pin.is_valid());
        assert!(pin.supports(Capability::Gpio));
        assert!(!pin.supports(Capability::Pwm));
        assert_eq!(pin.mapping(Capability::Gpio).unwrap().pinmap, 4);
    }

    #[test]
    fn test_capability_names_are_kebab_case() {
        assert_eq!(Capability::FastGpio.to_string(), "fast-gpio");
        assert_eq!(Capability::I2c.to_string(), "i2c");
    }

    #[test]
    fn test_banked_aio_paths() {
        let hooks = BankedAioHooks {
            channels_per_device: 4,
        };
        assert_eq!(
            hooks.aio_raw_path(5),
            PathBuf::from("/sys/bus/iio/devices/iio:device1/in_voltage1_raw")
        );
        assert_eq!(
            hooks.aio_raw_path(0),
            PathBuf::from("/sys/bus/iio/devices/iio:device0/in_voltage0_raw")
        );
    }
}
