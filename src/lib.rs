//! plinth — board-aware I/O routing for Linux single-board computers.
//!
//! plinth maps the logical pin and bus numbers printed on a board's silk
//! screen to the kernel resources behind them (sysfs GPIO and PWM nodes,
//! i2c-dev/spidev/tty device files, IIO raw-value attributes), across many
//! platforms described by data tables rather than code.
//!
//! The moving parts:
//!
//! - [`board`] — immutable per-platform descriptors: pin tables with
//!   capability sets, per-function physical mappings and mux chains, bus
//!   tables, loaded from versioned TOML.
//! - [`subplatform`] — the reserved marker bit that lets one chained
//!   expansion board share the logical numbering space.
//! - [`mux`] — the resolution engine that turns `(pin, capability)` into a
//!   physical target, driving multiplexer chains in strict order.
//! - [`registry`] — the explicit process state: one base platform, at most
//!   one sub-platform, a selection, and the routing queries over them.
//! - [`gpio`], [`pwm`], [`i2c`], [`spi`], [`uart`], [`aio`] — resource
//!   contexts, each exclusively owning one open kernel handle from `init`
//!   to an idempotent `close`.
//! - [`io`] — the narrow seam to the kernel: [`io::LinuxIo`] for real
//!   hardware, [`io::MockIo`] for tests.
//!
//! The crate is synchronous and single-threaded by design: OS calls block,
//! nothing retries internally, and no lock manager arbitrates pins between
//! contexts. It emits `tracing` events but never installs a subscriber.

pub mod aio;
pub mod board;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod io;
pub mod mux;
pub mod pwm;
pub mod registry;
pub mod spi;
pub mod subplatform;
pub(crate) mod tracing;
pub mod uart;

pub use aio::Aio;
pub use board::detect::{HostDetector, PlatformSource};
pub use board::{BoardDescriptor, Capability, PinCaps};
pub use error::{Error, Result};
pub use gpio::{Direction, Edge, Gpio, Level};
pub use i2c::I2c;
pub use mux::PhysicalTarget;
pub use pwm::Pwm;
pub use registry::{InitOutcome, Registry};
pub use spi::Spi;
pub use uart::Uart;
