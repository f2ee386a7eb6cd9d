#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use location_provider::{ModuleId, StatusCode};
use location_provider_mock::MockLocationServer;
use positioner::{EventLoop, HandlerError, Positioner, UpdateTiming};

pub const MODULE: ModuleId = ModuleId(0x2700_0001);
pub const WAIT: Duration = Duration::from_secs(2);

/// Default one-shot timeout with the provider cache disabled, so every request
/// runs its scripted outcome.
pub const TIMING: UpdateTiming = UpdateTiming::from_micros(15_000_000, 0);

/// Statuses seen by one handler, in call order.
#[derive(Clone, Default)]
pub struct HandlerTrace {
    calls: Rc<RefCell<Vec<StatusCode>>>,
}

impl HandlerTrace {
    pub fn handler(&self) -> impl FnOnce(StatusCode) -> Result<(), HandlerError> + 'static {
        let calls = Rc::clone(&self.calls);
        move |status| {
            calls.borrow_mut().push(status);
            Ok(())
        }
    }

    pub fn calls(&self) -> Vec<StatusCode> {
        self.calls.borrow().clone()
    }

    pub fn is_called(&self) -> bool {
        !self.calls.borrow().is_empty()
    }

    /// Live references besides this trace, i.e. handlers not yet released.
    pub fn retained_handlers(&self) -> usize {
        Rc::strong_count(&self.calls) - 1
    }
}

pub fn server() -> MockLocationServer {
    MockLocationServer::new().with_module(MODULE, "Network based", true)
}

pub fn open(event_loop: &EventLoop, server: &MockLocationServer) -> Positioner {
    Positioner::open(event_loop, server, MODULE, TIMING)
        .expect("positioner should open")
}

pub fn settle(event_loop: &EventLoop) {
    let _ = event_loop
        .run_until(Duration::from_millis(50), || false)
        .expect("no fatal errors");
}
