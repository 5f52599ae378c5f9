//! Tracing prelude for this crate.
//!
//! The library only emits events; installing a subscriber is the embedder's
//! concern. Modules include `use crate::tracing::prelude::*` for convenient
//! access to the `trace!()`, `debug!()`, `info!()`, `warn!()`, and `error!()`
//! macros.

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}
