//! GPIO resource context over sysfs.
//!
//! A [`Gpio`] owns the open `value` handle for one physical line. Export is
//! tolerant of an already-exported line (`EBUSY`); the context only
//! unexports on close if it did the export itself. Exclusivity is enforced
//! at the OS level, not by a lock table: two contexts over the same line can
//! coexist but their writes have undefined relative order, which is a
//! documented limitation for callers, not something this layer hides.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::board::{BoardDescriptor, Capability, DefaultHooks, PlatformHooks};
use crate::error::{Error, Result};
use crate::io::{DevicePort, OpenMode, PlatformIo};
use crate::mux::{self, PhysicalTarget};
use crate::registry::Registry;
use crate::tracing::prelude::*;

const GPIO_EXPORT: &str = "/sys/class/gpio/export";
const GPIO_UNEXPORT: &str = "/sys/class/gpio/unexport";

/// Line level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    fn from(value: Level) -> Self {
        matches!(value, Level::High)
    }
}

/// Line direction. `OutHigh`/`OutLow` atomically set direction and initial
/// level via the sysfs `high`/`low` keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum Direction {
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "out")]
    Out,
    #[strum(serialize = "high")]
    OutHigh,
    #[strum(serialize = "low")]
    OutLow,
}

/// Interrupt edge selection. Anything other than `None` requires the pin's
/// fast-gpio capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum Edge {
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "rising")]
    Rising,
    #[strum(serialize = "falling")]
    Falling,
    #[strum(serialize = "both")]
    Both,
}

/// One owned GPIO line. `Open -> Closed`; no re-open.
pub struct Gpio {
    io: Arc<dyn PlatformIo>,
    hooks: Arc<dyn PlatformHooks>,
    /// Logical id for diagnostics; the physical index for raw contexts.
    pin: i32,
    physical: PhysicalTarget,
    /// Routed contexts keep their board so a mode change can re-run a
    /// capability-specific mux chain.
    board: Option<(Arc<BoardDescriptor>, i32)>,
    value: Option<Box<dyn DevicePort>>,
    owner: bool,
    fast: bool,
}

impl Gpio {
    /// Open a logical pin through the registry: sub-platform stripping,
    /// capability validation, mux resolution, then the sysfs open.
    pub fn init(registry: &Registry, io: &Arc<dyn PlatformIo>, pin: i32) -> Result<Self> {
        let (board, local) = registry.board_for(pin)?;
        let target = mux::resolve(board, io, local, Capability::Gpio)?;
        let fast = board.pin(local)?.supports(Capability::FastGpio);
        let mut gpio = Self::open_sysfs(io.clone(), board.hooks.clone(), pin, target, fast)?;
        gpio.board = Some((board.clone(), local));
        Ok(gpio)
    }

    /// Open a controller line directly by physical index, with no routing.
    /// For callers that already know the line, and for mux selectors.
    pub fn init_raw(io: &Arc<dyn PlatformIo>, physical: u32) -> Result<Self> {
        Self::open_raw(
            io.clone(),
            Arc::new(DefaultHooks),
            PhysicalTarget {
                pinmap: physical,
                parent: 0,
            },
        )
    }

    pub(crate) fn open_raw(
        io: Arc<dyn PlatformIo>,
        hooks: Arc<dyn PlatformHooks>,
        target: PhysicalTarget,
    ) -> Result<Self> {
        Self::open_sysfs(io, hooks, target.pinmap as i32, target, false)
    }

    fn open_sysfs(
        io: Arc<dyn PlatformIo>,
        hooks: Arc<dyn PlatformHooks>,
        pin: i32,
        target: PhysicalTarget,
        fast: bool,
    ) -> Result<Self> {
        let base = hooks.gpio_base_path(target.pinmap);
        let mut owner = true;
        if io.exists(&base) {
            owner = false;
        } else {
            match io.write_attr(Path::new(GPIO_EXPORT), &target.pinmap.to_string()) {
                Ok(()) => {}
                Err(err) if err.raw_os_error() == Some(libc::EBUSY) => {
                    // Exported by someone else; usable, but not ours to
                    // unexport.
                    debug!(gpio = target.pinmap, "line already exported");
                    owner = false;
                }
                Err(err) => {
                    return Err(Error::unavailable(
                        format!("gpio {} export", target.pinmap),
                        err,
                    ))
                }
            }
        }

        let value = io
            .open(&base.join("value"), OpenMode::ReadWrite)
            .map_err(|err| Error::from_open(format!("gpio {} value", target.pinmap), err))?;

        trace!(gpio = target.pinmap, owner, "gpio context open");
        Ok(Self {
            io,
            hooks,
            pin,
            physical: target,
            board: None,
            value: Some(value),
            owner,
            fast,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.value.is_none() {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    /// The resolved physical line number.
    pub fn physical(&self) -> u32 {
        self.physical.pinmap
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        self.ensure_open()?;
        let path = self
            .hooks
            .gpio_base_path(self.physical.pinmap)
            .join("direction");
        self.io
            .write_attr(&path, direction.as_ref())
            .map_err(|err| {
                Error::unavailable(format!("gpio {} direction", self.physical.pinmap), err)
            })
    }

    /// Select an interrupt edge. Re-validates the fast-gpio capability and
    /// re-runs its mux chain when the board routes edge-capable lines
    /// through a distinct selector.
    pub fn set_edge(&mut self, edge: Edge) -> Result<()> {
        self.ensure_open()?;
        if edge != Edge::None {
            if !self.fast {
                return Err(Error::UnsupportedCapability {
                    pin: self.pin,
                    cap: Capability::FastGpio,
                });
            }
            if let Some((board, local)) = &self.board {
                let has_chain = board
                    .pin(*local)?
                    .mapping(Capability::FastGpio)
                    .is_some_and(|m| !m.mux.is_empty());
                if has_chain {
                    mux::resolve(board, &self.io, *local, Capability::FastGpio)?;
                }
            }
        }
        let path = self.hooks.gpio_base_path(self.physical.pinmap).join("edge");
        self.io.write_attr(&path, edge.as_ref()).map_err(|err| {
            Error::unavailable(format!("gpio {} edge", self.physical.pinmap), err)
        })
    }

    pub fn read(&mut self) -> Result<Level> {
        let what = format!("gpio {} value", self.physical.pinmap);
        let port = self.value.as_mut().ok_or(Error::NotOpen)?;
        port.rewind().map_err(|err| Error::unavailable(what.as_str(), err))?;
        let mut buf = [0u8; 4];
        let n = port
            .read(&mut buf)
            .map_err(|err| Error::unavailable(what.as_str(), err))?;
        match buf[..n].first() {
            Some(b'0') => Ok(Level::Low),
            Some(b'1') => Ok(Level::High),
            _ => Err(Error::unavailable(
                what,
                io::Error::new(io::ErrorKind::InvalidData, "unparseable value"),
            )),
        }
    }

    pub fn write(&mut self, level: Level) -> Result<()> {
        let what = format!("gpio {} value", self.physical.pinmap);
        let port = self.value.as_mut().ok_or(Error::NotOpen)?;
        let byte: &[u8] = if bool::from(level) { b"1" } else { b"0" };
        port.write(byte)
            .map(|_| ())
            .map_err(|err| Error::unavailable(what.as_str(), err))
    }

    /// Release the handle. Safe to call more than once; the second call is a
    /// no-op, so release can sit on every exit path.
    pub fn close(&mut self) -> Result<()> {
        if let Some(port) = self.value.take() {
            drop(port);
            if self.owner {
                if let Err(err) =
                    self.io
                        .write_attr(Path::new(GPIO_UNEXPORT), &self.physical.pinmap.to_string())
                {
                    warn!(gpio = self.physical.pinmap, %err, "unexport failed");
                }
            }
            trace!(gpio = self.physical.pinmap, "gpio context closed");
        }
        Ok(())
    }
}

impl fmt::Debug for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpio")
            .field("pin", &self.pin)
            .field("physical", &self.physical)
            .field("open", &self.value.is_some())
            .field("owner", &self.owner)
            .field("fast", &self.fast)
            .finish()
    }
}

impl Drop for Gpio {
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
        platform = "gpio-test"
        gpio_count = 3

        [[pin]]
        name = "PLAIN"
        gpio = { pinmap = 30 }

        [[pin]]
        name = "FAST"
        gpio = { pinmap = 31 }
        fast_gpio = { pinmap = 31, mux = [{ pin = 0, value = 1 }] }

        [[pin]]
        name = "NC"
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
    fn test_lifecycle_and_idempotent_close() {
        let (registry, mock, io) = setup();
        let mut gpio = Gpio::init(&registry, &io, 0).unwrap();
        assert_eq!(gpio.physical(), 30);

        gpio.set_direction(Direction::Out).unwrap();
        gpio.write(Level::High).unwrap();
        assert_eq!(mock.attr("/sys/class/gpio/gpio30/value").as_deref(), Some("1"));

        gpio.close().unwrap();
        gpio.close().unwrap();
        assert!(matches!(gpio.read(), Err(Error::NotOpen)));
        assert!(matches!(gpio.write(Level::Low), Err(Error::NotOpen)));
        assert!(matches!(
            gpio.set_direction(Direction::In),
            Err(Error::NotOpen)
        ));
    }

    #[test]
    fn test_read_parses_level() {
        let (registry, mock, io) = setup();
        let mut gpio = Gpio::init(&registry, &io, 0).unwrap();
        mock.set_attr("/sys/class/gpio/gpio30/value", "1\n");
        assert_eq!(gpio.read().unwrap(), Level::High);
        mock.set_attr("/sys/class/gpio/gpio30/value", "0\n");
        assert_eq!(gpio.read().unwrap(), Level::Low);
    }

    #[test]
    fn test_edge_requires_fast_capability() {
        let (registry, _mock, io) = setup();
        let mut plain = Gpio::init(&registry, &io, 0).unwrap();
        let err = plain.set_edge(Edge::Rising).unwrap_err();
        assert!(
            matches!(
                err,
                Error::UnsupportedCapability {
                    pin: 0,
                    cap: Capability::FastGpio
                }
            ),
            "{err}"
        );
        // Clearing the edge needs no capability.
        plain.set_edge(Edge::None).unwrap();
    }

    #[test]
    fn test_edge_reruns_fast_gpio_mux_chain() {
        let (registry, mock, io) = setup();
        let mut fast = Gpio::init(&registry, &io, 1).unwrap();
        fast.set_edge(Edge::Both).unwrap();

        // The fast-gpio chain drove selector pin 0 (gpio 30) high.
        assert_eq!(mock.attr("/sys/class/gpio/gpio30/value").as_deref(), Some("1"));
        assert_eq!(mock.attr("/sys/class/gpio/gpio31/edge").as_deref(), Some("both"));
    }

    #[test]
    fn test_export_ebusy_tolerated_and_no_unexport() {
        let (registry, mock, io) = setup();
        mock.fail_write("/sys/class/gpio/export", libc::EBUSY);

        let mut gpio = Gpio::init(&registry, &io, 0).unwrap();
        gpio.close().unwrap();
        // We did not export it, so we do not unexport it.
        assert!(mock.attr("/sys/class/gpio/unexport").is_none());
    }

    #[test]
    fn test_owner_unexports_on_close() {
        let (registry, mock, io) = setup();
        let mut gpio = Gpio::init(&registry, &io, 0).unwrap();
        gpio.close().unwrap();
        assert_eq!(mock.attr("/sys/class/gpio/unexport").as_deref(), Some("30"));
    }

    #[test]
    fn test_init_on_capless_pin_fails_before_hardware() {
        let (registry, mock, io) = setup();
        let err = Gpio::init(&registry, &io, 2).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCapability { pin: 2, .. }), "{err}");
        assert!(mock.journal().is_empty());
    }

    #[test]
    fn test_raw_open_skips_routing() {
        let (_registry, mock, io) = setup();
        let mut gpio = Gpio::init_raw(&io, 99).unwrap();
        gpio.set_direction(Direction::OutLow).unwrap();
        assert_eq!(
            mock.attr("/sys/class/gpio/gpio99/direction").as_deref(),
            Some("low")
        );
    }
}
