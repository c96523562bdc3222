//! Runtime core: configuration, lifecycle and the controller.
//!
//! The only entry point most applications need is [`Controller`]; everything
//! else here is shared by the subsystems it owns.
//!
//! Internal modules:
//! - [`controller`]: owns every subsystem and drives the two-phase shutdown;
//! - [`builtin`]: daemons every controller starts (sleep check, cache and storage maintenance);
//! - [`lifecycle`]: monotonic lifecycle flags and shutdown gates;
//! - [`signals`]: busy/idle flags and suspend/resume detection;
//! - [`shutdown`]: OS termination signals and bounded joins.

mod builder;
mod builtin;
mod caches;
mod config;
mod controller;
mod lifecycle;
pub(crate) mod shutdown;
mod signals;

pub use builder::ControllerBuilder;
pub use caches::{Cache, CacheRegistry};
pub use config::{Config, NO_WAL_MARKER};
pub use controller::Controller;
pub use lifecycle::Phase;
pub use shutdown::wait_for_shutdown_signal;
pub use signals::Signals;
