//! Mux resolution engine.
//!
//! Translates `(board, local pin id, requested capability)` into the terminal
//! physical target, driving the pin's ordered mux chain on the way. Chain
//! entries are applied strictly in table order because multiplexers can be
//! wired in series, and nothing is cached across calls: hardware state may
//! have been disturbed by another caller, so every resolution re-applies the
//! full chain.
//!
//! There is NO rollback. A failed step aborts the resolution and leaves the
//! earlier steps applied; callers must treat a failed resolution as "mux
//! state unknown" and not assume the prior pin function is restored.

use std::sync::Arc;

use crate::board::{BoardDescriptor, Capability};
use crate::error::{Error, Result};
use crate::gpio::{Direction, Gpio, Level};
use crate::io::PlatformIo;
use crate::tracing::prelude::*;

/// Concrete controller index plus parent-controller id; what the OS-level
/// open call ultimately addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalTarget {
    pub pinmap: u32,
    pub parent: u32,
}

/// Guard against cyclic table data. Real chains are one or two stages deep.
const MAX_MUX_DEPTH: usize = 4;

/// Resolve a local pin id plus requested capability to its physical target,
/// applying the capability's mux chain in order.
///
/// Capability validation happens before any hardware is touched; an
/// unsupported request has no side effects.
pub fn resolve(
    board: &BoardDescriptor,
    io: &Arc<dyn PlatformIo>,
    local_pin: i32,
    cap: Capability,
) -> Result<PhysicalTarget> {
    resolve_at_depth(board, io, local_pin, cap, 0)
}

fn resolve_at_depth(
    board: &BoardDescriptor,
    io: &Arc<dyn PlatformIo>,
    local_pin: i32,
    cap: Capability,
    depth: usize,
) -> Result<PhysicalTarget> {
    if depth > MAX_MUX_DEPTH {
        return Err(Error::InvalidArgument(format!(
            "mux chain deeper than {MAX_MUX_DEPTH} at pin {local_pin}; table is cyclic"
        )));
    }

    let pin = board.pin(local_pin)?;
    if !pin.supports(cap) {
        return Err(Error::UnsupportedCapability {
            pin: local_pin,
            cap,
        });
    }
    // The loader guarantees flag implies mapping; re-check so a hand-built
    // descriptor cannot route through an unset capability.
    let mapping = pin.mapping(cap).ok_or_else(|| {
        Error::BoardConfig(format!(
            "{}: pin {local_pin} flags {cap} but carries no mapping",
            board.platform_name
        ))
    })?;

    for (step_index, step) in mapping.mux.iter().enumerate() {
        apply_step(board, io, step.pin, step.value, depth).map_err(|err| {
            warn!(
                pin = local_pin,
                %cap,
                step = step_index,
                mux_pin = step.pin,
                %err,
                "mux chain application failed; earlier steps remain applied"
            );
            match err {
                Error::ResourceUnavailable { what, source } => Error::ResourceUnavailable {
                    what: format!("mux step {step_index} (pin {}): {what}", step.pin),
                    source,
                },
                other => other,
            }
        })?;
    }

    trace!(pin = local_pin, %cap, pinmap = mapping.pinmap, parent = mapping.parent, "resolved");
    Ok(PhysicalTarget {
        pinmap: mapping.pinmap,
        parent: mapping.parent,
    })
}

/// Drive one mux selector: resolve it as a plain digital output (its own
/// chain, usually empty, applies first), write the required value, release
/// the transient handle.
fn apply_step(
    board: &BoardDescriptor,
    io: &Arc<dyn PlatformIo>,
    mux_pin: i32,
    value: u8,
    depth: usize,
) -> Result<()> {
    let target = resolve_at_depth(board, io, mux_pin, Capability::Gpio, depth + 1)?;
    let mut mux = Gpio::open_raw(io.clone(), board.hooks.clone(), target)?;

    // Some selectors are hardwired as outputs and reject the direction
    // write; the value write is the one that must land.
    if let Err(err) = mux.set_direction(Direction::Out) {
        debug!(mux_pin, %err, "mux direction write rejected, continuing");
    }
    mux.write(Level::from(value != 0))?;
    mux.close()
}
