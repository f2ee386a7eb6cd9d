//! Single-outstanding asynchronous position request.
//!
//! `PositionController` drives at most one "next position" request against its
//! session. Completions are resolved into a [`Delivery`] which the caller
//! invokes once it no longer holds the controller, so handlers may issue the
//! next request themselves.

use std::panic::{catch_unwind, AssertUnwindSafe};

use location_provider::StatusCode;

use crate::error::FatalError;
use crate::fix::PositionFix;
use crate::runtime::CompletionPort;
use crate::session::Session;

/// Identifier for one accepted request.
pub type RequestId = u64;

/// Error a handler may return. Handlers are not supposed to fail; any error is
/// escalated to [`FatalError::CallbackFailure`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Completion handler retained for exactly one request.
pub type PositionHandler = Box<dyn FnOnce(StatusCode) -> Result<(), HandlerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Requesting,
}

struct PendingRequest {
    id: RequestId,
    handler: PositionHandler,
}

impl PendingRequest {
    fn deliver(self, status: StatusCode) -> Delivery {
        Delivery {
            request: self.id,
            status,
            handler: self.handler,
        }
    }
}

/// A resolved completion waiting for its handler to run.
#[must_use = "a delivery must be invoked or the handler is never called"]
pub struct Delivery {
    request: RequestId,
    status: StatusCode,
    handler: PositionHandler,
}

impl Delivery {
    #[must_use]
    pub fn request(&self) -> RequestId {
        self.request
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Calls the handler with the status and releases it when the call returns.
    ///
    /// A returned error or a panic inside the handler is fatal.
    pub fn invoke(self) -> Result<(), FatalError> {
        let Delivery {
            request,
            status,
            handler,
        } = self;

        let reason = match catch_unwind(AssertUnwindSafe(move || handler(status))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(error)) => error.to_string(),
            Err(_) => "position handler panicked".to_string(),
        };

        tracing::error!(request, %status, %reason, "position handler failed");
        Err(FatalError::CallbackFailure { request, reason })
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("request", &self.request)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

pub struct PositionController {
    session: Session,
    port: CompletionPort,
    pending: Option<PendingRequest>,
    next_request: RequestId,
    position: Option<PositionFix>,
}

impl PositionController {
    /// Takes ownership of an open session. Completions for its requests are
    /// posted through `port`.
    #[must_use]
    pub fn new(session: Session, port: CompletionPort) -> Self {
        Self {
            session,
            port,
            pending: None,
            next_request: 1,
            position: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        if self.pending.is_some() {
            RequestState::Requesting
        } else {
            RequestState::Idle
        }
    }

    #[must_use]
    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending.as_ref().map(|pending| pending.id)
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Last fix that passed validation, if any request has succeeded yet.
    #[must_use]
    pub fn position(&self) -> Option<PositionFix> {
        self.position
    }

    /// Starts a new request, first cancelling and discarding any outstanding
    /// one. Returns immediately.
    pub fn ask_position<F>(&mut self, handler: F) -> RequestId
    where
        F: FnOnce(StatusCode) -> Result<(), HandlerError> + 'static,
    {
        self.cancel();

        let id = self.next_request;
        self.next_request += 1;
        self.pending = Some(PendingRequest {
            id,
            handler: Box::new(handler),
        });

        tracing::debug!(request = id, module_id = %self.session.module_id(), "requesting position update");
        self.session.request_update(self.port.sink(id));
        id
    }

    /// Cancels the outstanding request without calling its handler.
    ///
    /// No-op while idle. A late completion for the cancelled request is
    /// ignored by [`PositionController::complete`].
    pub fn cancel(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        self.session.cancel_update();
        tracing::debug!(request = pending.id, "position request cancelled");
        drop(pending);
    }

    /// Resolves a provider completion for `request`.
    ///
    /// Returns `None` for a request that is no longer outstanding. Otherwise
    /// the controller is idle again and the returned delivery carries the
    /// handler and the status to call it with.
    pub fn complete(&mut self, request: RequestId, status: StatusCode) -> Option<Delivery> {
        let Some(pending) = self.take_pending(request) else {
            tracing::trace!(request, %status, "ignoring completion for stale request");
            return None;
        };

        if !status.is_success() {
            tracing::debug!(request, %status, "position update failed");
            return Some(pending.deliver(status));
        }

        let info = match self.session.fetch_result() {
            Ok(info) => info,
            Err(fetch_status) => return Some(Self::fail_pending(pending, fetch_status)),
        };

        match PositionFix::validate(info) {
            Ok(fix) => {
                self.position = Some(fix);
                Some(pending.deliver(StatusCode::SUCCESS))
            }
            Err(invalid) => {
                tracing::warn!(
                    request,
                    latitude = info.latitude,
                    longitude = info.longitude,
                    "provider reported success without usable coordinates"
                );
                Some(pending.deliver(invalid))
            }
        }
    }

    /// Error path: the completion could not be processed normally. The handler
    /// still receives `status` so its caller is never left waiting.
    pub fn fail(&mut self, request: RequestId, status: StatusCode) -> Option<Delivery> {
        self.take_pending(request)
            .map(|pending| Self::fail_pending(pending, status))
    }

    fn fail_pending(pending: PendingRequest, status: StatusCode) -> Delivery {
        tracing::warn!(request = pending.id, %status, "position completion failed, reporting error to handler");
        pending.deliver(status)
    }

    fn take_pending(&mut self, request: RequestId) -> Option<PendingRequest> {
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.id == request)
        {
            self.pending.take()
        } else {
            None
        }
    }
}

impl Drop for PositionController {
    fn drop(&mut self) {
        self.cancel();
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use assert_matches::assert_matches;
    use location_provider::{ModuleId, PositionInfo, Requestor};
    use location_provider_mock::{MockCall, MockFailures, MockLocationServer, MockOutcome};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::EventLoop;
    use crate::session::UpdateTiming;

    const MODULE: ModuleId = ModuleId(0x51);

    type Calls = Rc<RefCell<Vec<StatusCode>>>;

    fn controller(server: &MockLocationServer, event_loop: &EventLoop) -> PositionController {
        let session = Session::open(
            server,
            MODULE,
            UpdateTiming::ONE_SHOT,
            &Requestor::service("positioner"),
        )
        .expect("session opens");
        PositionController::new(session, event_loop.port())
    }

    fn held_server() -> MockLocationServer {
        MockLocationServer::new()
            .with_module(MODULE, "test", true)
            .script(MODULE, MockOutcome::Held)
            .script(MODULE, MockOutcome::Held)
    }

    fn recording(calls: &Calls) -> impl FnOnce(StatusCode) -> Result<(), HandlerError> {
        let calls = Rc::clone(calls);
        move |status| {
            calls.borrow_mut().push(status);
            Ok(())
        }
    }

    #[test]
    fn successful_completion_stores_fix_and_returns_to_idle() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);
        let calls = Calls::default();

        let request = controller.ask_position(recording(&calls));
        assert_eq!(controller.state(), RequestState::Requesting);
        server.complete_held(
            StatusCode::SUCCESS,
            Some(PositionInfo::new(61.5, 23.8, 10.0).with_accuracy(3.0, 4.0)),
        );

        let delivery = controller
            .complete(request, StatusCode::SUCCESS)
            .expect("request outstanding");
        assert_eq!(controller.state(), RequestState::Idle);
        assert_eq!(delivery.status(), StatusCode::SUCCESS);
        delivery.invoke().expect("handler succeeds");

        assert_eq!(*calls.borrow(), vec![StatusCode::SUCCESS]);
        assert_eq!(
            controller.position(),
            Some(PositionFix {
                latitude: 61.5,
                longitude: 23.8,
                altitude: 10.0,
                vertical_accuracy: 4.0,
                horizontal_accuracy: 3.0,
            })
        );
    }

    #[test]
    fn provider_error_is_passed_through_without_touching_position() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);

        let request = controller.ask_position(|_| Ok(()));
        let delivery = controller
            .complete(request, StatusCode::TIMED_OUT)
            .expect("request outstanding");

        assert_eq!(delivery.status(), StatusCode::TIMED_OUT);
        assert_eq!(controller.position(), None);
        assert!(!server
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::FetchResult(_))));
    }

    #[test]
    fn nan_fix_yields_invalid_fix_and_keeps_previous_position() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);

        let first = controller.ask_position(|_| Ok(()));
        server.complete_held(StatusCode::SUCCESS, Some(PositionInfo::new(61.5, 23.8, 10.0)));
        controller
            .complete(first, StatusCode::SUCCESS)
            .expect("first outstanding")
            .invoke()
            .expect("handler succeeds");
        let previous = controller.position();

        let second = controller.ask_position(|_| Ok(()));
        server.complete_held(
            StatusCode::SUCCESS,
            Some(PositionInfo::new(f64::NAN, 23.8, 10.0)),
        );
        let delivery = controller
            .complete(second, StatusCode::SUCCESS)
            .expect("second outstanding");

        assert_eq!(delivery.status(), StatusCode::INVALID_FIX);
        assert_eq!(controller.position(), previous);
    }

    #[test]
    fn new_request_supersedes_pending_one_without_calling_it() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);
        let first_calls = Calls::default();
        let second_calls = Calls::default();

        let first = controller.ask_position(recording(&first_calls));
        let second = controller.ask_position(recording(&second_calls));

        assert_ne!(first, second);
        assert!(controller.complete(first, StatusCode::CANCELLED).is_none());
        controller
            .complete(second, StatusCode::GENERAL)
            .expect("second outstanding")
            .invoke()
            .expect("handler succeeds");

        assert!(first_calls.borrow().is_empty());
        assert_eq!(*second_calls.borrow(), vec![StatusCode::GENERAL]);
        assert!(server.calls().contains(&MockCall::CancelUpdate(MODULE)));
    }

    #[test]
    fn cancel_while_idle_is_a_no_op() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);

        controller.cancel();

        assert_eq!(controller.state(), RequestState::Idle);
        assert!(!server.calls().contains(&MockCall::CancelUpdate(MODULE)));
    }

    #[test]
    fn cancel_releases_handler_without_invoking_it() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);
        let calls = Calls::default();

        let request = controller.ask_position(recording(&calls));
        assert_eq!(Rc::strong_count(&calls), 2);
        controller.cancel();

        assert_eq!(Rc::strong_count(&calls), 1);
        assert_eq!(controller.state(), RequestState::Idle);
        assert!(controller.complete(request, StatusCode::CANCELLED).is_none());
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn fetch_failure_takes_error_path() {
        let server = held_server().with_failures(MockFailures {
            fetch_result: Some(StatusCode::SERVER_TERMINATED),
            ..MockFailures::default()
        });
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);

        let request = controller.ask_position(|_| Ok(()));
        let delivery = controller
            .complete(request, StatusCode::SUCCESS)
            .expect("request outstanding");

        assert_eq!(delivery.status(), StatusCode::SERVER_TERMINATED);
        assert_eq!(controller.state(), RequestState::Idle);
    }

    #[test]
    fn explicit_failure_still_reaches_the_handler() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);
        let calls = Calls::default();

        let request = controller.ask_position(recording(&calls));
        controller
            .fail(request, StatusCode::GENERAL)
            .expect("request outstanding")
            .invoke()
            .expect("handler succeeds");

        assert_eq!(*calls.borrow(), vec![StatusCode::GENERAL]);
        assert!(controller.fail(request, StatusCode::GENERAL).is_none());
    }

    #[test]
    fn handler_error_becomes_callback_failure() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);

        let request = controller.ask_position(|_| Err("script raised".into()));
        let result = controller
            .complete(request, StatusCode::GENERAL)
            .expect("request outstanding")
            .invoke();

        assert_matches!(
            result,
            Err(FatalError::CallbackFailure { request: failed, reason })
                if failed == request && reason == "script raised"
        );
    }

    #[test]
    fn handler_panic_becomes_callback_failure() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);

        let request = controller.ask_position(|_| panic!("boom"));
        let result = controller
            .complete(request, StatusCode::GENERAL)
            .expect("request outstanding")
            .invoke();

        assert_matches!(result, Err(FatalError::CallbackFailure { .. }));
    }

    #[test]
    fn drop_cancels_pending_request_before_closing_session() {
        let server = held_server();
        let event_loop = EventLoop::new();
        let mut controller = controller(&server, &event_loop);
        let calls = Calls::default();

        controller.ask_position(recording(&calls));
        drop(controller);

        let trace = server.calls();
        let tail = &trace[trace.len() - 3..];
        assert_eq!(
            tail,
            &[
                MockCall::CancelUpdate(MODULE),
                MockCall::ClosePositioner(MODULE),
                MockCall::CloseConnection,
            ]
        );
        assert_eq!(Rc::strong_count(&calls), 1);
        assert!(calls.borrow().is_empty());
    }
}
