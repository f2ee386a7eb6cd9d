//! Location queries against a platform positioning service.
//!
//! Two ways to get a fix:
//! - [`Positioner`]: callback driven. One outstanding request at a time;
//!   completions are delivered through an [`EventLoop`] on the caller's thread.
//! - [`get_current_position`]: blocks until one fix (or an error) is available.
//!
//! Provider implementations plug in through the `location_provider` traits.

pub mod config;
pub mod controller;
pub mod error;
pub mod fix;
pub mod logging;
pub mod positioner;
pub mod query;
pub mod runtime;
pub mod session;

pub use location_provider::{LocationServer, ModuleId, ModuleInfo, Requestor, StatusCode};

pub use crate::config::{PositionerConfig, DEFAULT_REQUESTOR};
pub use crate::controller::{
    Delivery, HandlerError, PositionController, PositionHandler, RequestId, RequestState,
};
pub use crate::error::{ConfigError, FatalError, QueryError, SessionError};
pub use crate::fix::PositionFix;
pub use crate::logging::init_logging;
pub use crate::positioner::{Positioner, WeakPositioner};
pub use crate::query::{get_current_position, get_current_position_with, QueryOptions};
pub use crate::runtime::{ActiveObject, Completion, CompletionPort, EventLoop};
pub use crate::session::{Session, UpdateTiming};
