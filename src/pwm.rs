//! PWM resource context over sysfs.
//!
//! Routing resolves the pin's pwm mapping to `(channel, chip)`; the channel
//! is exported under `pwmchip{chip}` and the context owns the open
//! `duty_cycle` handle. Periods are validated against the board's bounds;
//! the sysfs files take nanoseconds, the API microseconds.

use std::fmt;
use std::sync::Arc;

use crate::board::{Capability, PlatformHooks, PwmBounds};
use crate::error::{Error, Result};
use crate::io::{DevicePort, OpenMode, PlatformIo};
use crate::mux;
use crate::registry::Registry;
use crate::tracing::prelude::*;

/// One owned PWM channel. `Open -> Closed`; no re-open.
pub struct Pwm {
    io: Arc<dyn PlatformIo>,
    hooks: Arc<dyn PlatformHooks>,
    chip: u32,
    channel: u32,
    bounds: PwmBounds,
    period_us: u32,
    duty: Option<Box<dyn DevicePort>>,
    owner: bool,
}

impl Pwm {
    /// Route a logical pin to its PWM channel and open it. The board's
    /// default period is written during init so duty writes always have a
    /// period to be relative to.
    pub fn init(registry: &Registry, io: &Arc<dyn PlatformIo>, pin: i32) -> Result<Self> {
        let (board, local) = registry.board_for(pin)?;
        let target = mux::resolve(board, io, local, Capability::Pwm)?;

        let mut pwm = Self {
            io: io.clone(),
            hooks: board.hooks.clone(),
            chip: target.parent,
            channel: target.pinmap,
            bounds: board.pwm_bounds,
            period_us: board.pwm_bounds.default_period_us,
            duty: None,
            owner: true,
        };
        pwm.export()?;
        pwm.write_period()?;

        let duty_path = pwm.channel_dir().join("duty_cycle");
        let port = io
            .open(&duty_path, OpenMode::ReadWrite)
            .map_err(|err| Error::from_open(format!("pwm {}:{} duty", pwm.chip, pwm.channel), err))?;
        pwm.duty = Some(port);
        trace!(chip = pwm.chip, channel = pwm.channel, "pwm context open");
        Ok(pwm)
    }

    fn channel_dir(&self) -> std::path::PathBuf {
        self.hooks
            .pwm_chip_path(self.chip)
            .join(format!("pwm{}", self.channel))
    }

    fn export(&mut self) -> Result<()> {
        let dir = self.channel_dir();
        if self.io.exists(&dir) {
            self.owner = false;
            return Ok(());
        }
        let export = self.hooks.pwm_chip_path(self.chip).join("export");
        match self.io.write_attr(&export, &self.channel.to_string()) {
            Ok(()) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EBUSY) => {
                debug!(chip = self.chip, channel = self.channel, "channel already exported");
                self.owner = false;
                Ok(())
            }
            Err(err) => Err(Error::unavailable(
                format!("pwm {}:{} export", self.chip, self.channel),
                err,
            )),
        }
    }

    fn write_period(&self) -> Result<()> {
        let ns = u64::from(self.period_us) * 1_000;
        self.io
            .write_attr(&self.channel_dir().join("period"), &ns.to_string())
            .map_err(|err| {
                Error::unavailable(format!("pwm {}:{} period", self.chip, self.channel), err)
            })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.duty.is_none() {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Change the period, validated against the board's bounds.
    pub fn set_period_us(&mut self, period_us: u32) -> Result<()> {
        self.ensure_open()?;
        if period_us < self.bounds.min_period_us || period_us > self.bounds.max_period_us {
            return Err(Error::InvalidArgument(format!(
                "period {period_us}us outside board bounds {}..={}us",
                self.bounds.min_period_us, self.bounds.max_period_us
            )));
        }
        self.period_us = period_us;
        self.write_period()
    }

    /// Set the duty cycle as a fraction of the current period.
    pub fn write(&mut self, duty: f32) -> Result<()> {
        self.ensure_open()?;
        if !(0.0..=1.0).contains(&duty) {
            return Err(Error::InvalidArgument(format!(
                "duty cycle {duty} outside 0.0..=1.0"
            )));
        }
        let ns = (f64::from(self.period_us) * 1_000.0 * f64::from(duty)).round() as u64;
        let what = format!("pwm {}:{} duty", self.chip, self.channel);
        let port = self.duty.as_mut().ok_or(Error::NotOpen)?;
        port.write(ns.to_string().as_bytes())
            .map(|_| ())
            .map_err(|err| Error::unavailable(what, err))
    }

    pub fn enable(&mut self, on: bool) -> Result<()> {
        self.ensure_open()?;
        self.io
            .write_attr(
                &self.channel_dir().join("enable"),
                if on { "1" } else { "0" },
            )
            .map_err(|err| {
                Error::unavailable(format!("pwm {}:{} enable", self.chip, self.channel), err)
            })
    }

    /// Release the handle; unexports the channel if this context exported
    /// it. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some(port) = self.duty.take() {
            drop(port);
            if self.owner {
                let unexport = self.hooks.pwm_chip_path(self.chip).join("unexport");
                if let Err(err) = self.io.write_attr(&unexport, &self.channel.to_string()) {
                    warn!(chip = self.chip, channel = self.channel, %err, "unexport failed");
                }
            }
            trace!(chip = self.chip, channel = self.channel, "pwm context closed");
        }
        Ok(())
    }
}

impl fmt::Debug for Pwm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pwm")
            .field("chip", &self.chip)
            .field("channel", &self.channel)
            .field("period_us", &self.period_us)
            .field("open", &self.duty.is_some())
            .field("owner", &self.owner)
            .finish()
    }
}

impl Drop for Pwm {
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
        platform = "pwm-test"
        gpio_count = 1

        [pwm]
        min_period_us = 10
        max_period_us = 1000
        default_period_us = 100

        [[pin]]
        name = "PWM0"
        gpio = { pinmap = 12 }
        pwm = { pinmap = 2, parent = 1 }
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
    fn test_init_exports_and_writes_default_period() {
        let (registry, mock, io) = setup();
        let pwm = Pwm::init(&registry, &io, 0).unwrap();
        assert_eq!(pwm.period_us(), 100);
        assert_eq!(mock.attr("/sys/class/pwm/pwmchip1/export").as_deref(), Some("2"));
        // 100us written as nanoseconds.
        assert_eq!(
            mock.attr("/sys/class/pwm/pwmchip1/pwm2/period").as_deref(),
            Some("100000")
        );
    }

    #[test]
    fn test_period_bounds_enforced() {
        let (registry, _mock, io) = setup();
        let mut pwm = Pwm::init(&registry, &io, 0).unwrap();
        assert!(matches!(
            pwm.set_period_us(5),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pwm.set_period_us(2000),
            Err(Error::InvalidArgument(_))
        ));
        pwm.set_period_us(500).unwrap();
        assert_eq!(pwm.period_us(), 500);
    }

    #[test]
    fn test_duty_fraction_of_period() {
        let (registry, mock, io) = setup();
        let mut pwm = Pwm::init(&registry, &io, 0).unwrap();
        pwm.write(0.25).unwrap();
        assert_eq!(
            mock.attr("/sys/class/pwm/pwmchip1/pwm2/duty_cycle").as_deref(),
            Some("25000")
        );
        assert!(matches!(pwm.write(1.5), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_enable_and_close() {
        let (registry, mock, io) = setup();
        let mut pwm = Pwm::init(&registry, &io, 0).unwrap();
        pwm.enable(true).unwrap();
        assert_eq!(
            mock.attr("/sys/class/pwm/pwmchip1/pwm2/enable").as_deref(),
            Some("1")
        );

        pwm.close().unwrap();
        pwm.close().unwrap();
        assert!(matches!(pwm.write(0.5), Err(Error::NotOpen)));
        assert!(matches!(pwm.enable(false), Err(Error::NotOpen)));
        assert_eq!(mock.attr("/sys/class/pwm/pwmchip1/unexport").as_deref(), Some("2"));
    }
}
