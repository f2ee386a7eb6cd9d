//! Cooperative completion loop.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Weak;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use location_provider::{CompletionSink, SinkOutcome, StatusCode};

use crate::controller::RequestId;
use crate::error::FatalError;

/// Identifier of an object attached to an [`EventLoop`].
pub type ObjectId = u64;

/// Provider completion addressed to one request of one active object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub object: ObjectId,
    pub request: RequestId,
    pub status: StatusCode,
    /// The provider dropped the request without reporting; `status` is
    /// [`SinkOutcome::ABANDONED_STATUS`].
    pub abandoned: bool,
}

/// Receiver of completions on the loop thread.
pub trait ActiveObject {
    fn run(&self, completion: Completion) -> Result<(), FatalError>;
}

#[derive(Default)]
struct LoopWake {
    queue: Mutex<VecDeque<Completion>>,
    cvar: Condvar,
}

impl LoopWake {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Completion>> {
        match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn post(&self, completion: Completion) {
        self.lock().push_back(completion);
        self.cvar.notify_one();
    }

    fn pop(&self) -> Option<Completion> {
        self.lock().pop_front()
    }

    fn wait_for_event(&self, timeout: Duration) -> bool {
        let queue = self.lock();
        let (queue, _) = self
            .cvar
            .wait_timeout_while(queue, timeout, |queue| queue.is_empty())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !queue.is_empty()
    }
}

/// Thread-safe producer side of the loop for one active object.
#[derive(Clone)]
pub struct CompletionPort {
    wake: Arc<LoopWake>,
    object: ObjectId,
}

impl CompletionPort {
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Sink that posts the provider's status for `request` to the loop.
    ///
    /// A sink the provider drops is posted as an abandoned completion.
    #[must_use]
    pub fn sink(&self, request: RequestId) -> CompletionSink {
        let wake = Arc::clone(&self.wake);
        let object = self.object;
        CompletionSink::with_outcome(move |outcome| {
            wake.post(Completion {
                object,
                request,
                status: outcome.status(),
                abandoned: outcome == SinkOutcome::Abandoned,
            });
        })
    }
}

/// Single-threaded scheduler delivering provider completions.
///
/// Providers may complete from any thread; completions are only dispatched
/// from [`EventLoop::run_once`] and friends, on the thread that owns the loop.
pub struct EventLoop {
    wake: Arc<LoopWake>,
    objects: RefCell<HashMap<ObjectId, Weak<dyn ActiveObject>>>,
    next_object: Cell<ObjectId>,
}

impl EventLoop {
    #[must_use]
    pub fn new() -> Self {
        Self {
            wake: Arc::new(LoopWake::default()),
            objects: RefCell::new(HashMap::new()),
            next_object: Cell::new(1),
        }
    }

    /// Allocates an object id and returns its completion port.
    #[must_use]
    pub fn port(&self) -> CompletionPort {
        let object = self.next_object.get();
        self.next_object.set(object + 1);
        CompletionPort {
            wake: Arc::clone(&self.wake),
            object,
        }
    }

    /// Routes completions for `object` to `target` while it is alive.
    pub fn attach(&self, object: ObjectId, target: Weak<dyn ActiveObject>) {
        let mut objects = self.objects.borrow_mut();
        objects.retain(|_, existing| existing.strong_count() > 0);
        objects.insert(object, target);
    }

    /// Number of completions waiting to be dispatched.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.wake.lock().len()
    }

    /// Dispatches every queued completion.
    ///
    /// Completions for objects that no longer exist are dropped. A fatal error
    /// stops dispatching and leaves the remaining completions queued.
    pub fn run_once(&self) -> Result<usize, FatalError> {
        let mut dispatched = 0usize;

        while let Some(completion) = self.wake.pop() {
            let target = self
                .objects
                .borrow()
                .get(&completion.object)
                .and_then(Weak::upgrade);

            match target {
                Some(target) => {
                    target.run(completion)?;
                    dispatched += 1;
                }
                None => {
                    tracing::trace!(
                        object = completion.object,
                        request = completion.request,
                        status = %completion.status,
                        "dropping completion for detached object"
                    );
                    self.objects.borrow_mut().remove(&completion.object);
                }
            }
        }

        Ok(dispatched)
    }

    /// Blocks until a completion is queued or `timeout` passes, then dispatches.
    pub fn wait(&self, timeout: Duration) -> Result<usize, FatalError> {
        if !self.wake.wait_for_event(timeout) {
            return Ok(0);
        }

        self.run_once()
    }

    /// Pumps the loop until `predicate` holds or `timeout` passes.
    ///
    /// Returns whether the predicate was satisfied.
    pub fn run_until(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut() -> bool,
    ) -> Result<bool, FatalError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_once()?;
            if predicate() {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.wake.wait_for_event(deadline - now);
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::thread;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<Completion>>,
        fail_on: Option<RequestId>,
    }

    impl ActiveObject for Recorder {
        fn run(&self, completion: Completion) -> Result<(), FatalError> {
            self.seen.borrow_mut().push(completion);
            if self.fail_on == Some(completion.request) {
                return Err(FatalError::CallbackFailure {
                    request: completion.request,
                    reason: "recorder refused".to_string(),
                });
            }
            Ok(())
        }
    }

    fn attached(event_loop: &EventLoop, recorder: Recorder) -> (Rc<Recorder>, CompletionPort) {
        let recorder = Rc::new(recorder);
        let port = event_loop.port();
        let target: Weak<dyn ActiveObject> = Rc::downgrade(&recorder) as Weak<dyn ActiveObject>;
        event_loop.attach(port.object(), target);
        (recorder, port)
    }

    #[test]
    fn completions_are_routed_to_their_object_in_order() {
        let event_loop = EventLoop::new();
        let (first, first_port) = attached(&event_loop, Recorder::default());
        let (second, second_port) = attached(&event_loop, Recorder::default());

        first_port.sink(1).complete(StatusCode::SUCCESS);
        second_port.sink(7).complete(StatusCode::TIMED_OUT);
        first_port.sink(2).complete(StatusCode::CANCELLED);

        assert_eq!(event_loop.queued(), 3);
        assert_eq!(event_loop.run_once(), Ok(3));

        let first_requests: Vec<_> = first.seen.borrow().iter().map(|c| c.request).collect();
        assert_eq!(first_requests, vec![1, 2]);
        assert_eq!(
            *second.seen.borrow(),
            vec![Completion {
                object: second_port.object(),
                request: 7,
                status: StatusCode::TIMED_OUT,
                abandoned: false,
            }]
        );
    }

    #[test]
    fn dropped_sink_is_posted_as_abandoned() {
        let event_loop = EventLoop::new();
        let (recorder, port) = attached(&event_loop, Recorder::default());

        drop(port.sink(4));

        assert_eq!(event_loop.run_once(), Ok(1));
        assert_eq!(
            *recorder.seen.borrow(),
            vec![Completion {
                object: port.object(),
                request: 4,
                status: StatusCode::SERVER_TERMINATED,
                abandoned: true,
            }]
        );
    }

    #[test]
    fn completions_for_dropped_objects_are_discarded() {
        let event_loop = EventLoop::new();
        let (recorder, port) = attached(&event_loop, Recorder::default());
        drop(recorder);

        port.sink(1).complete(StatusCode::SUCCESS);

        assert_eq!(event_loop.run_once(), Ok(0));
        assert_eq!(event_loop.queued(), 0);
    }

    #[test]
    fn fatal_error_stops_dispatch_and_keeps_the_rest_queued() {
        let event_loop = EventLoop::new();
        let (_recorder, port) = attached(
            &event_loop,
            Recorder {
                fail_on: Some(1),
                ..Recorder::default()
            },
        );

        port.sink(1).complete(StatusCode::SUCCESS);
        port.sink(2).complete(StatusCode::SUCCESS);

        assert_matches!(
            event_loop.run_once(),
            Err(FatalError::CallbackFailure { request: 1, .. })
        );
        assert_eq!(event_loop.queued(), 1);
    }

    #[test]
    fn wait_wakes_on_completion_from_another_thread() {
        let event_loop = EventLoop::new();
        let (recorder, port) = attached(&event_loop, Recorder::default());
        let sink = port.sink(3);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sink.complete(StatusCode::SUCCESS);
        });

        let satisfied = event_loop
            .run_until(Duration::from_secs(2), || !recorder.seen.borrow().is_empty())
            .expect("no fatal errors");
        worker.join().expect("worker exits");

        assert!(satisfied);
        assert_eq!(recorder.seen.borrow()[0].request, 3);
    }

    #[test]
    fn wait_times_out_when_nothing_arrives() {
        let event_loop = EventLoop::new();
        assert_eq!(event_loop.wait(Duration::from_millis(10)), Ok(0));
    }
}
