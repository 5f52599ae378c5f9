//! Platform registry.
//!
//! Holds the active board descriptors: one base platform and optionally one
//! chained sub-platform. The registry is an explicit value passed to every
//! query and resource-context constructor, not process-global state; tests
//! construct isolated instances side by side.
//!
//! Descriptor-level queries (`pin_count`, `platform_name`, ADC bits, bus
//! counts) answer for whichever side is currently selected. Routing queries
//! take logical ids and pick the side from the sub-platform marker bit, never
//! by searching.

use std::sync::Arc;

use crate::board::detect::PlatformSource;
use crate::board::{BoardDescriptor, Capability};
use crate::error::{Error, Result};
use crate::subplatform;
use crate::tracing::prelude::*;

/// Which descriptor answers selection-scoped queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Selected {
    #[default]
    Main,
    Sub,
}

/// Reported by [`Registry::init`]; repeated initialization is harmless and
/// distinguished rather than re-probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Initialized,
    AlreadyInitialized,
}

/// The process's view of the running platform(s).
#[derive(Debug, Default)]
pub struct Registry {
    base: Option<Arc<BoardDescriptor>>,
    sub: Option<Arc<BoardDescriptor>>,
    selected: Selected,
}

impl Registry {
    /// An empty, uninitialized registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect and load the base platform. Idempotent: if a base descriptor
    /// is already loaded the source is not consulted again.
    pub fn init(&mut self, source: &dyn PlatformSource) -> Result<InitOutcome> {
        if self.base.is_some() {
            debug!("registry already initialized");
            return Ok(InitOutcome::AlreadyInitialized);
        }
        match source.detect()? {
            Some(board) => self.init_with(board),
            None => Err(Error::PlatformNotRecognized),
        }
    }

    /// Load a known descriptor directly, bypassing detection.
    pub fn init_with(&mut self, board: BoardDescriptor) -> Result<InitOutcome> {
        if self.base.is_some() {
            debug!("registry already initialized");
            return Ok(InitOutcome::AlreadyInitialized);
        }
        info!(platform = %board.platform_name, pins = board.pin_count(), "platform initialized");
        self.base = Some(Arc::new(board));
        self.selected = Selected::Main;
        Ok(InitOutcome::Initialized)
    }

    /// Attach the chained expansion board. At most one; the marker bit
    /// admits a single level of chaining.
    pub fn attach_sub_platform(&mut self, board: BoardDescriptor) -> Result<()> {
        if self.base.is_none() {
            return Err(Error::NotInitialized);
        }
        if self.sub.is_some() {
            return Err(Error::InvalidArgument(
                "a sub-platform is already attached".to_string(),
            ));
        }
        if board.pin_count() as i32 > subplatform::SUB_PLATFORM_MASK {
            return Err(Error::InvalidArgument(format!(
                "sub-platform {} has {} pins, exceeding the addressable range",
                board.platform_name,
                board.pin_count()
            )));
        }
        info!(platform = %board.platform_name, "sub-platform attached");
        self.sub = Some(Arc::new(board));
        Ok(())
    }

    /// Clear both descriptors and the selection. Later queries fail with
    /// `NotInitialized` rather than operating on stale descriptors.
    pub fn deinit(&mut self) {
        if self.base.is_some() {
            info!("platform registry deinitialized");
        }
        self.base = None;
        self.sub = None;
        self.selected = Selected::Main;
    }

    pub fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    /// Route selection-scoped queries to the base platform. False if no
    /// base descriptor is loaded.
    pub fn select_main_platform(&mut self) -> bool {
        if self.base.is_none() {
            return false;
        }
        self.selected = Selected::Main;
        true
    }

    /// Route selection-scoped queries to the sub-platform. False if none is
    /// attached.
    pub fn select_sub_platform(&mut self) -> bool {
        if self.sub.is_none() {
            return false;
        }
        self.selected = Selected::Sub;
        true
    }

    pub fn is_sub_platform_selected(&self) -> bool {
        self.selected == Selected::Sub
    }

    fn selected_board(&self) -> Result<&Arc<BoardDescriptor>> {
        let side = match self.selected {
            Selected::Main => &self.base,
            Selected::Sub => &self.sub,
        };
        side.as_ref().ok_or(Error::NotInitialized)
    }

    /// Strip the sub-platform marker and pick the descriptor that answers a
    /// logical id.
    pub fn board_for(&self, id: i32) -> Result<(&Arc<BoardDescriptor>, i32)> {
        if self.base.is_none() {
            return Err(Error::NotInitialized);
        }
        if id < 0 {
            return Err(Error::InvalidArgument(format!("negative logical id {id}")));
        }
        if subplatform::is_sub_platform(id) {
            let sub = self.sub.as_ref().ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "id {id} carries the sub-platform bit but no sub-platform is attached"
                ))
            })?;
            Ok((sub, subplatform::sub_platform_index(id)))
        } else {
            // Checked non-None above.
            Ok((self.base.as_ref().ok_or(Error::NotInitialized)?, id))
        }
    }

    // ---- selection-scoped descriptor queries ----

    pub fn platform_name(&self) -> Result<&str> {
        Ok(&self.selected_board()?.platform_name)
    }

    pub fn pin_count(&self) -> Result<usize> {
        Ok(self.selected_board()?.pin_count())
    }

    pub fn adc_raw_bits(&self) -> Result<u32> {
        Ok(self.selected_board()?.adc_raw_bits)
    }

    pub fn adc_supported_bits(&self) -> Result<u32> {
        Ok(self.selected_board()?.adc_supported_bits)
    }

    pub fn i2c_bus_count(&self) -> Result<usize> {
        Ok(self.selected_board()?.i2c_buses.len())
    }

    pub fn default_i2c_bus(&self) -> Result<i32> {
        Ok(self.selected_board()?.default_i2c_bus as i32)
    }

    pub fn spi_bus_count(&self) -> Result<usize> {
        Ok(self.selected_board()?.spi_buses.len())
    }

    pub fn uart_count(&self) -> Result<usize> {
        Ok(self.selected_board()?.uart_devices.len())
    }

    // ---- logical-id routing queries ----

    pub fn pin_name(&self, pin: i32) -> Result<&str> {
        let (board, local) = self.board_for(pin)?;
        board.pin_name(local)
    }

    /// Whether a pin's capability set includes `cap`. False for unroutable
    /// ids rather than an error, mirroring a plain capability probe.
    pub fn pin_supports(&self, pin: i32, cap: Capability) -> bool {
        match self.board_for(pin) {
            Ok((board, local)) => board
                .pin(local)
                .map(|p| p.supports(cap))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn i2c_adapter_number(&self, bus: i32) -> Result<u32> {
        let (board, local) = self.board_for(bus)?;
        Ok(board.i2c_bus(local)?.adapter)
    }

    // ---- sub-platform codec wrappers ----

    pub fn is_on_sub_platform(&self, id: i32) -> bool {
        subplatform::is_sub_platform(id)
    }

    /// Encode `id` for the attached sub-platform.
    pub fn use_sub_platform(&self, id: i32) -> Result<i32> {
        if self.sub.is_none() {
            return Err(Error::InvalidArgument(
                "no sub-platform is attached".to_string(),
            ));
        }
        subplatform::use_sub_platform(id)
    }

    pub fn sub_platform_index(&self, id: i32) -> i32 {
        subplatform::sub_platform_index(id)
    }

    /// Crate version string.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}
