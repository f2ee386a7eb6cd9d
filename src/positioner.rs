//! Script-facing positioner handle.
//!
//! A [`Positioner`] owns one [`PositionController`] and registers itself with
//! an [`EventLoop`], which routes provider completions back to it. Handlers
//! run with no internal borrow held, so they may call back into the same
//! positioner (typically to ask for the next position).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use location_provider::{LocationServer, ModuleId, Requestor, StatusCode};

use crate::config::DEFAULT_REQUESTOR;
use crate::controller::{HandlerError, PositionController, RequestId, RequestState};
use crate::error::{FatalError, SessionError};
use crate::fix::PositionFix;
use crate::runtime::{ActiveObject, Completion, EventLoop};
use crate::session::{Session, UpdateTiming};

struct PositionerState {
    controller: RefCell<Option<PositionController>>,
}

impl ActiveObject for PositionerState {
    fn run(&self, completion: Completion) -> Result<(), FatalError> {
        let delivery = match self.controller.borrow_mut().as_mut() {
            Some(controller) if completion.abandoned => {
                controller.fail(completion.request, completion.status)
            }
            Some(controller) => controller.complete(completion.request, completion.status),
            None => {
                tracing::trace!(
                    request = completion.request,
                    status = %completion.status,
                    "completion arrived after close"
                );
                None
            }
        };

        match delivery {
            Some(delivery) => delivery.invoke(),
            None => Ok(()),
        }
    }
}

/// Callback-driven position source bound to one module.
///
/// Clones share the same underlying request; closing any clone closes all.
#[derive(Clone)]
pub struct Positioner {
    state: Rc<PositionerState>,
}

impl Positioner {
    /// Opens a session registered under the default requestor name.
    pub fn open(
        event_loop: &EventLoop,
        server: &dyn LocationServer,
        module_id: ModuleId,
        timing: UpdateTiming,
    ) -> Result<Self, SessionError> {
        Self::open_as(
            event_loop,
            server,
            module_id,
            timing,
            &Requestor::service(DEFAULT_REQUESTOR),
        )
    }

    pub fn open_as(
        event_loop: &EventLoop,
        server: &dyn LocationServer,
        module_id: ModuleId,
        timing: UpdateTiming,
        requestor: &Requestor,
    ) -> Result<Self, SessionError> {
        let session = Session::open(server, module_id, timing, requestor)?;
        let port = event_loop.port();
        let object = port.object();

        let state = Rc::new(PositionerState {
            controller: RefCell::new(Some(PositionController::new(session, port))),
        });
        let target: Weak<dyn ActiveObject> = Rc::downgrade(&state) as Weak<dyn ActiveObject>;
        event_loop.attach(object, target);

        Ok(Self { state })
    }

    /// Requests the next position; `handler` receives the completion status.
    ///
    /// An outstanding request is cancelled first and its handler is dropped
    /// without being called.
    pub fn ask_position<F>(&self, handler: F) -> Result<RequestId, FatalError>
    where
        F: FnOnce(StatusCode) -> Result<(), HandlerError> + 'static,
    {
        self.with_controller("ask_position", |controller| {
            controller.ask_position(handler)
        })
    }

    /// Last valid fix, or `None` before the first successful request.
    pub fn get_position(&self) -> Result<Option<PositionFix>, FatalError> {
        self.with_controller("get_position", |controller| controller.position())
    }

    pub fn cancel(&self) -> Result<(), FatalError> {
        self.with_controller("cancel", PositionController::cancel)
    }

    pub fn request_state(&self) -> Result<RequestState, FatalError> {
        self.with_controller("request_state", |controller| controller.state())
    }

    /// Cancels any outstanding request and releases the session.
    ///
    /// Closing twice is allowed; every other operation fails afterwards.
    pub fn close(&self) {
        let controller = self.state.controller.borrow_mut().take();
        if let Some(controller) = controller {
            tracing::debug!(module_id = %controller.session().module_id(), "closing positioner");
            drop(controller);
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.controller.borrow().is_none()
    }

    /// Handle that does not keep the positioner alive, for use inside handlers.
    #[must_use]
    pub fn downgrade(&self) -> WeakPositioner {
        WeakPositioner {
            state: Rc::downgrade(&self.state),
        }
    }

    fn with_controller<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut PositionController) -> T,
    ) -> Result<T, FatalError> {
        let mut controller = self.state.controller.borrow_mut();
        match controller.as_mut() {
            Some(controller) => Ok(f(controller)),
            None => {
                tracing::error!(operation, "positioner used after close");
                Err(FatalError::UseAfterClose { operation })
            }
        }
    }
}

impl std::fmt::Debug for Positioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Positioner")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct WeakPositioner {
    state: Weak<PositionerState>,
}

impl WeakPositioner {
    #[must_use]
    pub fn upgrade(&self) -> Option<Positioner> {
        self.state.upgrade().map(|state| Positioner { state })
    }
}
