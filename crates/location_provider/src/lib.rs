//! Minimal provider-agnostic contract for a platform location service.
//!
//! This crate defines only the handles, option records and status codes shared
//! between the positioning core and a concrete service. It excludes request
//! bookkeeping, scheduling and any positioning algorithm.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Platform-level status code reported by the location service.
///
/// `0` is success; platform errors are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(i32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const NOT_FOUND: Self = Self(-1);
    pub const GENERAL: Self = Self(-2);
    pub const CANCELLED: Self = Self(-3);
    pub const NOT_SUPPORTED: Self = Self(-5);
    pub const INVALID_ARGUMENT: Self = Self(-6);
    pub const SERVER_TERMINATED: Self = Self(-15);
    pub const NOT_READY: Self = Self(-18);
    pub const ACCESS_DENIED: Self = Self(-21);
    pub const TIMED_OUT: Self = Self(-33);
    pub const COULD_NOT_CONNECT: Self = Self(-34);

    /// Reserved status for a provider "success" carrying a degenerate fix.
    pub const INVALID_FIX: Self = Self::INVALID_ARGUMENT;

    /// Wraps a raw platform code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// Returns the raw platform code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<StatusCode> for i32 {
    fn from(status: StatusCode) -> Self {
        status.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SUCCESS => "success",
            Self::NOT_FOUND => "not found",
            Self::GENERAL => "general error",
            Self::CANCELLED => "cancelled",
            Self::NOT_SUPPORTED => "not supported",
            Self::INVALID_ARGUMENT => "invalid argument",
            Self::SERVER_TERMINATED => "server terminated",
            Self::NOT_READY => "not ready",
            Self::ACCESS_DENIED => "access denied",
            Self::TIMED_OUT => "timed out",
            Self::COULD_NOT_CONNECT => "could not connect",
            _ => return write!(f, "status {}", self.0),
        };
        write!(f, "{name} ({})", self.0)
    }
}

/// Identifier of one positioning module exposed by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub i32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Module record as enumerated by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestorKind {
    Service,
    Contact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestorFormat {
    Application,
    Url,
}

/// Identity declared to the service before update requests are honoured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requestor {
    pub kind: RequestorKind,
    pub format: RequestorFormat,
    pub name: String,
}

impl Requestor {
    /// Creates a service requestor identified by application name.
    #[must_use]
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            kind: RequestorKind::Service,
            format: RequestorFormat::Application,
            name: name.into(),
        }
    }
}

/// Per-session update policy applied by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub accept_partial_updates: bool,
    /// Zero requests a single, non-periodic update.
    pub update_interval: Duration,
    /// Longest time the service may spend producing a fix.
    pub update_timeout: Duration,
    /// Oldest cached fix the service may answer with.
    pub max_update_age: Duration,
}

impl UpdateOptions {
    /// One-shot policy: partial fixes rejected, no periodic updates.
    #[must_use]
    pub fn one_shot(update_timeout: Duration, max_update_age: Duration) -> Self {
        Self {
            accept_partial_updates: false,
            update_interval: Duration::ZERO,
            update_timeout,
            max_update_age,
        }
    }
}

/// Raw position record produced by the service.
///
/// Coordinates may be NaN when the service could not determine them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
}

impl PositionInfo {
    /// A record with every field unknown.
    pub const UNKNOWN: Self = Self {
        latitude: f64::NAN,
        longitude: f64::NAN,
        altitude: f64::NAN,
        horizontal_accuracy: f64::NAN,
        vertical_accuracy: f64::NAN,
    };

    #[must_use]
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            ..Self::UNKNOWN
        }
    }

    #[must_use]
    pub fn with_accuracy(mut self, horizontal: f64, vertical: f64) -> Self {
        self.horizontal_accuracy = horizontal;
        self.vertical_accuracy = vertical;
        self
    }
}

impl Default for PositionInfo {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// How an update request ended, as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// The service reported a final status.
    Completed(StatusCode),
    /// The service dropped the sink without reporting.
    Abandoned,
}

impl SinkOutcome {
    /// Status reported for an abandoned request.
    pub const ABANDONED_STATUS: StatusCode = StatusCode::SERVER_TERMINATED;

    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Completed(status) => status,
            Self::Abandoned => Self::ABANDONED_STATUS,
        }
    }
}

type SinkCallback = Box<dyn FnOnce(SinkOutcome) + Send>;

/// One-shot completion signal for an outstanding update request.
///
/// Consuming `complete` guarantees a sink reports at most once. A sink dropped
/// without being completed or dismissed reports [`SinkOutcome::Abandoned`], so
/// a lost request still reaches the client.
pub struct CompletionSink {
    deliver: Option<SinkCallback>,
}

impl CompletionSink {
    /// Sink whose callback sees abandonment as
    /// [`SinkOutcome::ABANDONED_STATUS`].
    #[must_use]
    pub fn new(deliver: impl FnOnce(StatusCode) + Send + 'static) -> Self {
        Self::with_outcome(move |outcome: SinkOutcome| deliver(outcome.status()))
    }

    #[must_use]
    pub fn with_outcome(deliver: impl FnOnce(SinkOutcome) + Send + 'static) -> Self {
        Self {
            deliver: Some(Box::new(deliver)),
        }
    }

    /// Reports the final status of the request.
    pub fn complete(mut self, status: StatusCode) {
        if let Some(deliver) = self.deliver.take() {
            deliver(SinkOutcome::Completed(status));
        }
    }

    /// Releases the sink without reporting anything.
    ///
    /// Only for requests the client itself cancelled or closed.
    pub fn dismiss(mut self) {
        self.deliver = None;
    }
}

impl Drop for CompletionSink {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(SinkOutcome::Abandoned);
        }
    }
}

impl fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink")
            .field("pending", &self.deliver.is_some())
            .finish()
    }
}

/// Entry point of a location service.
pub trait LocationServer: Send + Sync + 'static {
    /// Opens a connection to the service.
    fn connect(&self) -> Result<Box<dyn ServerConnection>, StatusCode>;

    /// Lists the positioning modules the service knows about.
    fn modules(&self) -> Vec<ModuleInfo> {
        Vec::new()
    }
}

/// Open connection to the service.
pub trait ServerConnection: Send {
    /// Opens a positioner bound to one module.
    fn open_positioner(
        &mut self,
        module_id: ModuleId,
    ) -> Result<Box<dyn PositionerChannel>, StatusCode>;

    fn close(&mut self);
}

/// Positioner handle opened on a connection.
pub trait PositionerChannel: Send {
    fn set_requestor(&mut self, requestor: &Requestor) -> Result<(), StatusCode>;

    fn set_update_options(&mut self, options: &UpdateOptions) -> Result<(), StatusCode>;

    /// Submits a request for the next position update.
    ///
    /// Returns immediately; the service completes `sink` later, possibly from
    /// another thread. Every request must end in exactly one `complete`, or
    /// in `dismiss` once the client has cancelled it. Dropping the sink
    /// instead is reported to the client as [`SinkOutcome::Abandoned`].
    fn notify_position_update(&mut self, sink: CompletionSink);

    /// Asks the service to cancel the outstanding update request.
    ///
    /// The service may still complete the request's sink afterwards, typically
    /// with [`StatusCode::CANCELLED`], or dismiss it silently.
    fn cancel_update(&mut self) -> Result<(), StatusCode>;

    /// Returns the record filled in by the last successful update.
    fn fetch_result(&self) -> Result<PositionInfo, StatusCode>;

    fn close(&mut self);
}
