//! Platform detection.
//!
//! The registry consumes a [`PlatformSource`]: something that returns a
//! populated [`BoardDescriptor`] for the running platform, or nothing. The
//! default [`HostDetector`] reads the DMI board name (x86) and falls back to
//! the device-tree model (ARM), then matches the id string against board
//! tables. Detection never spawns external processes.

use std::path::{Path, PathBuf};

use super::{catalog, BoardDescriptor};
use crate::error::Result;
use crate::tracing::prelude::*;

/// Produces the board descriptor for the running platform.
pub trait PlatformSource {
    /// `Ok(None)` means no platform was recognized.
    fn detect(&self) -> Result<Option<BoardDescriptor>>;
}

const DMI_BOARD_NAME: &str = "/sys/class/dmi/id/board_name";
const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";

/// Default detector for the local host.
#[derive(Debug, Default)]
pub struct HostDetector {
    table_dir: Option<PathBuf>,
}

impl HostDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also search a directory of external board tables; external tables
    /// take precedence over built-ins so a board can be overridden without
    /// rebuilding.
    pub fn with_table_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            table_dir: Some(dir.into()),
        }
    }

    fn platform_id(&self) -> Option<String> {
        for probe in [DMI_BOARD_NAME, DEVICE_TREE_MODEL] {
            if let Some(id) = read_id(Path::new(probe)) {
                debug!(probe, id, "platform id probe");
                return Some(id);
            }
        }
        None
    }
}

fn read_id(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    // Device-tree strings are NUL-terminated.
    let id = text.trim_matches('\0').trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

impl PlatformSource for HostDetector {
    fn detect(&self) -> Result<Option<BoardDescriptor>> {
        let Some(id) = self.platform_id() else {
            debug!("no DMI or device-tree platform id available");
            return Ok(None);
        };
        if let Some(dir) = &self.table_dir {
            if let Some(board) = catalog::find_in_dir(dir, &id)? {
                return Ok(Some(board));
            }
        }
        catalog::find_builtin(&id)
    }
}

/// Source returning a fixed descriptor. Used by tests and embedders that
/// already know their board.
pub struct StaticSource(pub BoardDescriptor);

impl PlatformSource for StaticSource {
    fn detect(&self) -> Result<Option<BoardDescriptor>> {
        Ok(Some(self.0.clone()))
    }
}

/// Source that never recognizes a platform.
pub struct NullSource;

impl PlatformSource for NullSource {
    fn detect(&self) -> Result<Option<BoardDescriptor>> {
        Ok(None)
    }
}
