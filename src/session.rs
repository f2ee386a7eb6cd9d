//! Session with the location service: connection plus one positioner.

use std::time::Duration;

use location_provider::{
    CompletionSink, LocationServer, ModuleId, PositionInfo, PositionerChannel, Requestor,
    ServerConnection, StatusCode, UpdateOptions,
};

use crate::error::SessionError;

/// Caller-supplied timing for each update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTiming {
    pub update_timeout: Duration,
    pub max_update_age: Duration,
}

impl UpdateTiming {
    /// Timing used by the one-shot query: 15 s timeout, 30 s staleness.
    pub const ONE_SHOT: Self = Self {
        update_timeout: Duration::from_secs(15),
        max_update_age: Duration::from_secs(30),
    };

    #[must_use]
    pub const fn from_micros(update_timeout_us: u64, max_update_age_us: u64) -> Self {
        Self {
            update_timeout: Duration::from_micros(update_timeout_us),
            max_update_age: Duration::from_micros(max_update_age_us),
        }
    }

    /// Update timeout in microseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn update_timeout_us(&self) -> u64 {
        saturating_micros(self.update_timeout)
    }

    /// Maximum fix age in microseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn max_update_age_us(&self) -> u64 {
        saturating_micros(self.max_update_age)
    }

    #[must_use]
    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions::one_shot(self.update_timeout, self.max_update_age)
    }
}

fn saturating_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl Default for UpdateTiming {
    fn default() -> Self {
        Self::ONE_SHOT
    }
}

/// Open connection and positioner bound to one module.
///
/// Handles are released positioner first, then connection. Dropping the
/// session closes it.
pub struct Session {
    module_id: ModuleId,
    options: UpdateOptions,
    connection: Option<Box<dyn ServerConnection>>,
    positioner: Option<Box<dyn PositionerChannel>>,
}

impl Session {
    /// Connects, opens the module, registers `requestor` and applies the
    /// one-shot update policy built from `timing`.
    ///
    /// A failure at any step closes whatever was already acquired.
    pub fn open(
        server: &dyn LocationServer,
        module_id: ModuleId,
        timing: UpdateTiming,
        requestor: &Requestor,
    ) -> Result<Self, SessionError> {
        let options = timing.update_options();
        let connection = server.connect().map_err(|status| {
            tracing::warn!(%status, "location service connection failed");
            SessionError::ServiceUnavailable(status)
        })?;

        let mut session = Self {
            module_id,
            options,
            connection: Some(connection),
            positioner: None,
        };

        let positioner = session
            .connection
            .as_mut()
            .map(|connection| connection.open_positioner(module_id))
            .unwrap_or(Err(StatusCode::NOT_READY))
            .map_err(|status| {
                tracing::warn!(%module_id, %status, "opening positioning module failed");
                SessionError::ProviderUnavailable { module_id, status }
            })?;
        let positioner = session.positioner.insert(positioner);

        positioner
            .set_requestor(requestor)
            .map_err(SessionError::RequestorRejected)?;
        positioner
            .set_update_options(&options)
            .map_err(SessionError::PolicyRejected)?;

        tracing::debug!(
            %module_id,
            requestor = %requestor.name,
            timeout_us = saturating_micros(options.update_timeout),
            max_age_us = saturating_micros(options.max_update_age),
            "positioning session opened"
        );
        Ok(session)
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    #[must_use]
    pub fn update_options(&self) -> &UpdateOptions {
        &self.options
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.positioner.is_some()
    }

    /// Submits a "next position" request.
    ///
    /// On a closed session the sink completes at once with
    /// [`StatusCode::NOT_READY`].
    pub fn request_update(&mut self, sink: CompletionSink) {
        match self.positioner.as_mut() {
            Some(positioner) => positioner.notify_position_update(sink),
            None => sink.complete(StatusCode::NOT_READY),
        }
    }

    /// Asks the provider to cancel the outstanding request. The provider's
    /// answer is only logged.
    pub fn cancel_update(&mut self) {
        if let Some(positioner) = self.positioner.as_mut() {
            if let Err(status) = positioner.cancel_update() {
                tracing::debug!(module_id = %self.module_id, %status, "cancel not acknowledged");
            }
        }
    }

    pub fn fetch_result(&self) -> Result<PositionInfo, StatusCode> {
        match self.positioner.as_ref() {
            Some(positioner) => positioner.fetch_result(),
            None => Err(StatusCode::NOT_READY),
        }
    }

    /// Releases the positioner and then the connection. Safe to repeat.
    pub fn close(&mut self) {
        let had_positioner = self.positioner.is_some();
        if let Some(mut positioner) = self.positioner.take() {
            positioner.close();
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close();
            tracing::debug!(module_id = %self.module_id, had_positioner, "positioning session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("module_id", &self.module_id)
            .field("options", &self.options)
            .field("open", &self.is_open())
            .finish()
    }
}
