//! Blocking one-shot position query.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use location_provider::{CompletionSink, LocationServer, ModuleId, Requestor, StatusCode};

use crate::config::{PositionerConfig, DEFAULT_REQUESTOR};
use crate::error::QueryError;
use crate::fix::PositionFix;
use crate::session::{Session, UpdateTiming};

/// Extra time the caller waits beyond the provider's own update timeout.
pub const DEFAULT_WAIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub timing: UpdateTiming,
    pub requestor: Requestor,
    /// Added to `timing.update_timeout` to bound the local wait. With a zero
    /// update timeout the wait is unbounded.
    pub wait_grace: Duration,
    /// Submit one more request when the first fix has no coordinates.
    pub retry_on_invalid_fix: bool,
}

impl QueryOptions {
    #[must_use]
    pub fn from_config(config: &PositionerConfig) -> Self {
        Self {
            timing: config.timing,
            requestor: config.requestor(),
            ..Self::default()
        }
    }

    fn wait_limit(&self) -> Option<Duration> {
        if self.timing.update_timeout.is_zero() {
            None
        } else {
            Some(self.timing.update_timeout.saturating_add(self.wait_grace))
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timing: UpdateTiming::ONE_SHOT,
            requestor: Requestor::service(DEFAULT_REQUESTOR),
            wait_grace: DEFAULT_WAIT_GRACE,
            retry_on_invalid_fix: false,
        }
    }
}

/// Blocks the calling thread until one fix from `module_id` is available.
///
/// Uses a 15 s update timeout and accepts a cached fix up to 30 s old. The
/// session is opened for this call only and always closed before returning.
pub fn get_current_position(
    server: &dyn LocationServer,
    module_id: ModuleId,
) -> Result<PositionFix, QueryError> {
    get_current_position_with(server, module_id, &QueryOptions::default())
}

pub fn get_current_position_with(
    server: &dyn LocationServer,
    module_id: ModuleId,
    options: &QueryOptions,
) -> Result<PositionFix, QueryError> {
    let mut session = Session::open(server, module_id, options.timing, &options.requestor)?;

    let mut result = request_once(&mut session, options);
    if options.retry_on_invalid_fix && result == Err(QueryError::InvalidFix) {
        tracing::debug!(%module_id, "fix had no coordinates, asking once more");
        result = request_once(&mut session, options);
    }

    session.close();
    result
}

fn request_once(session: &mut Session, options: &QueryOptions) -> Result<PositionFix, QueryError> {
    let (tx, rx) = mpsc::channel();
    session.request_update(CompletionSink::new(move |status| {
        let _ = tx.send(status);
    }));

    let received = match options.wait_limit() {
        Some(limit) => rx.recv_timeout(limit),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };

    let status = match received {
        Ok(status) => status,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(module_id = %session.module_id(), "provider missed its update timeout");
            session.cancel_update();
            return Err(QueryError::Provider(StatusCode::TIMED_OUT));
        }
        Err(RecvTimeoutError::Disconnected) => {
            return Err(QueryError::Provider(StatusCode::SERVER_TERMINATED));
        }
    };

    if !status.is_success() {
        return Err(QueryError::Provider(status));
    }

    let info = session.fetch_result().map_err(QueryError::Provider)?;
    PositionFix::validate(info).map_err(|_| QueryError::InvalidFix)
}
