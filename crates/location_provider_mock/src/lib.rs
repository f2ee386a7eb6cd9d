//! Deterministic mock implementation of the shared `location_provider` contract.
//!
//! This crate contains no positioning logic and is intended for local
//! development and contract-level integration testing. Each module carries a
//! FIFO script of outcomes; requests either complete from a worker thread after
//! a delay or are held until the test releases them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use location_provider::{
    CompletionSink, LocationServer, ModuleId, ModuleInfo, PositionInfo, PositionerChannel,
    Requestor, ServerConnection, StatusCode, UpdateOptions,
};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

pub const INTEGRATED_GPS_MODULE: ModuleId = ModuleId(0x101f_e98a);
pub const NETWORK_MODULE: ModuleId = ModuleId(0x1020_6915);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of one update request against a mock module.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Reports `info` with a success status after `delay`.
    Fix { info: PositionInfo, delay: Duration },
    /// Reports `status` after `delay`.
    Error { status: StatusCode, delay: Duration },
    /// Parks the request until [`MockLocationServer::complete_held`] or a cancel.
    Held,
    /// Never completes on its own; only cancellation or the update timeout end it.
    Hang,
}

impl MockOutcome {
    #[must_use]
    pub fn fix(latitude: f64, longitude: f64, altitude: f64, delay: Duration) -> Self {
        Self::Fix {
            info: PositionInfo::new(latitude, longitude, altitude),
            delay,
        }
    }

    #[must_use]
    pub fn error(status: StatusCode, delay: Duration) -> Self {
        Self::Error { status, delay }
    }
}

/// Failures injected into individual service operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockFailures {
    pub connect: Option<StatusCode>,
    pub open_positioner: Option<StatusCode>,
    pub set_requestor: Option<StatusCode>,
    pub set_update_options: Option<StatusCode>,
    pub fetch_result: Option<StatusCode>,
}

/// Service call recorded by the mock, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect,
    OpenPositioner(ModuleId),
    SetRequestor(Requestor),
    SetUpdateOptions(UpdateOptions),
    NotifyPositionUpdate(ModuleId),
    CancelUpdate(ModuleId),
    FetchResult(ModuleId),
    ClosePositioner(ModuleId),
    CloseConnection,
}

#[derive(Debug)]
struct MockModule {
    info: ModuleInfo,
    script: VecDeque<MockOutcome>,
    fallback: Option<MockOutcome>,
    cached: Option<(PositionInfo, Instant)>,
}

struct HeldRequest {
    channel_id: u64,
    sink: CompletionSink,
    result: Arc<Mutex<Option<PositionInfo>>>,
}

#[derive(Default)]
struct MockState {
    modules: Vec<MockModule>,
    failures: MockFailures,
    cancel_delivers_completion: bool,
    calls: Vec<MockCall>,
    held: Option<HeldRequest>,
    next_channel_id: u64,
    requests_started: usize,
    completions_delivered: usize,
}

impl MockState {
    fn module_mut(&mut self, module_id: ModuleId) -> Option<&mut MockModule> {
        self.modules
            .iter_mut()
            .find(|module| module.info.id == module_id)
    }
}

/// Deterministic in-process location service.
///
/// Cloning shares the underlying state, so tests can keep a handle for
/// scripting and inspection after passing the server to the code under test.
#[derive(Clone, Default)]
pub struct MockLocationServer {
    state: Arc<Mutex<MockState>>,
}

impl MockLocationServer {
    /// Creates a service with no modules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Service with an unavailable integrated GPS and an available network
    /// module that keeps answering with a fixed position.
    #[must_use]
    pub fn demo() -> Self {
        Self::new()
            .with_module(INTEGRATED_GPS_MODULE, "Integrated GPS", false)
            .with_module(NETWORK_MODULE, "Network based", true)
            .repeat(
                NETWORK_MODULE,
                MockOutcome::Fix {
                    info: PositionInfo::new(61.5, 23.8, 10.0).with_accuracy(1500.0, 50.0),
                    delay: Duration::from_millis(200),
                },
            )
    }

    #[must_use]
    pub fn with_module(self, id: ModuleId, name: impl Into<String>, available: bool) -> Self {
        self.lock().modules.push(MockModule {
            info: ModuleInfo {
                id,
                name: name.into(),
                available,
            },
            script: VecDeque::new(),
            fallback: None,
            cached: None,
        });
        self
    }

    /// Appends an outcome to the module's script.
    #[must_use]
    pub fn script(self, module_id: ModuleId, outcome: MockOutcome) -> Self {
        if let Some(module) = self.lock().module_mut(module_id) {
            module.script.push_back(outcome);
        }
        self
    }

    /// Outcome used once the module's script is exhausted.
    ///
    /// Without one, requests end with [`StatusCode::TIMED_OUT`] after the
    /// configured update timeout.
    #[must_use]
    pub fn repeat(self, module_id: ModuleId, outcome: MockOutcome) -> Self {
        if let Some(module) = self.lock().module_mut(module_id) {
            module.fallback = Some(outcome);
        }
        self
    }

    /// Seeds a cached fix that is `age` old.
    #[must_use]
    pub fn cached_fix(self, module_id: ModuleId, info: PositionInfo, age: Duration) -> Self {
        let captured_at = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
        if let Some(module) = self.lock().module_mut(module_id) {
            module.cached = Some((info, captured_at));
        }
        self
    }

    #[must_use]
    pub fn with_failures(self, failures: MockFailures) -> Self {
        self.lock().failures = failures;
        self
    }

    /// Whether cancelling a request still completes it with
    /// [`StatusCode::CANCELLED`]. Off by default.
    #[must_use]
    pub fn cancel_delivers_completion(self, enabled: bool) -> Self {
        self.lock().cancel_delivers_completion = enabled;
        self
    }

    /// Returns the recorded service calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn has_held_request(&self) -> bool {
        self.lock().held.is_some()
    }

    /// Number of update requests submitted so far.
    #[must_use]
    pub fn requests_started(&self) -> usize {
        self.lock().requests_started
    }

    /// Number of sinks the service has completed so far.
    #[must_use]
    pub fn completions_delivered(&self) -> usize {
        self.lock().completions_delivered
    }

    /// Completes the held request, storing `info` first when given.
    ///
    /// Returns false when no request is held.
    pub fn complete_held(&self, status: StatusCode, info: Option<PositionInfo>) -> bool {
        let held = {
            let mut state = self.lock();
            let held = state.held.take();
            if held.is_some() {
                state.completions_delivered += 1;
            }
            held
        };

        let Some(held) = held else {
            return false;
        };

        if let Some(info) = info {
            *lock_unpoisoned(&held.result) = Some(info);
        }
        held.sink.complete(status);
        true
    }

    fn open_connection(&self) -> Result<MockConnection, StatusCode> {
        let mut state = self.lock();
        state.calls.push(MockCall::Connect);
        if let Some(status) = state.failures.connect {
            return Err(status);
        }

        Ok(MockConnection {
            state: Arc::clone(&self.state),
            closed: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_unpoisoned(&self.state)
    }
}

impl LocationServer for MockLocationServer {
    fn connect(&self) -> Result<Box<dyn ServerConnection>, StatusCode> {
        self.open_connection()
            .map(|connection| Box::new(connection) as Box<dyn ServerConnection>)
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        self.lock()
            .modules
            .iter()
            .map(|module| module.info.clone())
            .collect()
    }
}

struct MockConnection {
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl ServerConnection for MockConnection {
    fn open_positioner(
        &mut self,
        module_id: ModuleId,
    ) -> Result<Box<dyn PositionerChannel>, StatusCode> {
        self.open_channel(module_id)
            .map(|channel| Box::new(channel) as Box<dyn PositionerChannel>)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        lock_unpoisoned(&self.state)
            .calls
            .push(MockCall::CloseConnection);
    }
}

impl MockConnection {
    fn open_channel(&mut self, module_id: ModuleId) -> Result<MockChannel, StatusCode> {
        let mut state = lock_unpoisoned(&self.state);
        state.calls.push(MockCall::OpenPositioner(module_id));
        if let Some(status) = state.failures.open_positioner {
            return Err(status);
        }

        let available = match state.module_mut(module_id) {
            Some(module) => module.info.available,
            None => return Err(StatusCode::NOT_FOUND),
        };
        if !available {
            return Err(StatusCode::NOT_READY);
        }

        let channel_id = state.next_channel_id;
        state.next_channel_id += 1;

        Ok(MockChannel {
            state: Arc::clone(&self.state),
            channel_id,
            module_id,
            options: UpdateOptions::one_shot(Duration::ZERO, Duration::ZERO),
            result: Arc::new(Mutex::new(None)),
            cancel: None,
            workers: Vec::new(),
            closed: false,
        })
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct MockChannel {
    state: Arc<Mutex<MockState>>,
    channel_id: u64,
    module_id: ModuleId,
    options: UpdateOptions,
    result: Arc<Mutex<Option<PositionInfo>>>,
    cancel: Option<Arc<AtomicBool>>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl MockChannel {
    fn spawn_worker(&mut self, outcome: MockOutcome, sink: CompletionSink) {
        self.reap_finished_workers();

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Some(Arc::clone(&cancel));

        let worker = Worker {
            state: Arc::clone(&self.state),
            module_id: self.module_id,
            update_timeout: self.options.update_timeout,
            result: Arc::clone(&self.result),
            cancel,
        };

        let spawned = thread::Builder::new()
            .name(format!("mock-positioner-{}", self.channel_id))
            .spawn(move || worker.run(outcome, sink));
        match spawned {
            Ok(handle) => self.workers.push(handle),
            // The sink went down with the closure and reports the request as abandoned.
            Err(error) => tracing::warn!(%error, "failed to spawn mock positioner worker"),
        }
    }

    fn reap_finished_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .workers
            .drain(..)
            .partition(JoinHandle::is_finished);
        for handle in finished {
            let _ = handle.join();
        }
        self.workers = running;
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl PositionerChannel for MockChannel {
    fn set_requestor(&mut self, requestor: &Requestor) -> Result<(), StatusCode> {
        let mut state = lock_unpoisoned(&self.state);
        state.calls.push(MockCall::SetRequestor(requestor.clone()));
        match state.failures.set_requestor {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn set_update_options(&mut self, options: &UpdateOptions) -> Result<(), StatusCode> {
        let mut state = lock_unpoisoned(&self.state);
        state.calls.push(MockCall::SetUpdateOptions(*options));
        if let Some(status) = state.failures.set_update_options {
            return Err(status);
        }
        if options.accept_partial_updates {
            return Err(StatusCode::NOT_SUPPORTED);
        }

        self.options = *options;
        Ok(())
    }

    fn notify_position_update(&mut self, sink: CompletionSink) {
        let next = {
            let mut state = lock_unpoisoned(&self.state);
            state.calls.push(MockCall::NotifyPositionUpdate(self.module_id));
            state.requests_started += 1;

            let max_age = self.options.max_update_age;
            match state.module_mut(self.module_id) {
                None => NextUpdate::MissingModule,
                Some(module) => {
                    let fresh_cache = module
                        .cached
                        .filter(|(_, captured_at)| {
                            !max_age.is_zero() && captured_at.elapsed() <= max_age
                        })
                        .map(|(info, _)| info);

                    match fresh_cache {
                        Some(info) => NextUpdate::Cached(info),
                        None => NextUpdate::Run(
                            module
                                .script
                                .pop_front()
                                .or_else(|| module.fallback.clone())
                                .unwrap_or(MockOutcome::Hang),
                        ),
                    }
                }
            }
        };

        match next {
            NextUpdate::MissingModule => sink.complete(StatusCode::NOT_FOUND),
            NextUpdate::Cached(info) => {
                *lock_unpoisoned(&self.result) = Some(info);
                lock_unpoisoned(&self.state).completions_delivered += 1;
                sink.complete(StatusCode::SUCCESS);
            }
            NextUpdate::Run(MockOutcome::Held) => {
                let mut state = lock_unpoisoned(&self.state);
                state.held = Some(HeldRequest {
                    channel_id: self.channel_id,
                    sink,
                    result: Arc::clone(&self.result),
                });
            }
            NextUpdate::Run(outcome) => self.spawn_worker(outcome, sink),
        }
    }

    fn cancel_update(&mut self) -> Result<(), StatusCode> {
        let (held, deliver) = {
            let mut state = lock_unpoisoned(&self.state);
            state.calls.push(MockCall::CancelUpdate(self.module_id));
            let held = match &state.held {
                Some(held) if held.channel_id == self.channel_id => state.held.take(),
                _ => None,
            };
            if held.is_some() && state.cancel_delivers_completion {
                state.completions_delivered += 1;
            }
            (held, state.cancel_delivers_completion)
        };

        if let Some(held) = held {
            if deliver {
                held.sink.complete(StatusCode::CANCELLED);
            } else {
                held.sink.dismiss();
            }
            return Ok(());
        }

        match self.cancel.take() {
            Some(cancel) => {
                cancel.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StatusCode::NOT_FOUND),
        }
    }

    fn fetch_result(&self) -> Result<PositionInfo, StatusCode> {
        let failure = {
            let mut state = lock_unpoisoned(&self.state);
            state.calls.push(MockCall::FetchResult(self.module_id));
            state.failures.fetch_result
        };
        if let Some(status) = failure {
            return Err(status);
        }

        (*lock_unpoisoned(&self.result)).ok_or(StatusCode::NOT_FOUND)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        self.join_workers();

        let mut state = lock_unpoisoned(&self.state);
        if matches!(&state.held, Some(held) if held.channel_id == self.channel_id) {
            if let Some(held) = state.held.take() {
                held.sink.dismiss();
            }
        }
        state.calls.push(MockCall::ClosePositioner(self.module_id));
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.close();
    }
}

enum NextUpdate {
    MissingModule,
    Cached(PositionInfo),
    Run(MockOutcome),
}

struct Worker {
    state: Arc<Mutex<MockState>>,
    module_id: ModuleId,
    update_timeout: Duration,
    result: Arc<Mutex<Option<PositionInfo>>>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, outcome: MockOutcome, sink: CompletionSink) {
        let delay = match &outcome {
            MockOutcome::Fix { delay, .. } | MockOutcome::Error { delay, .. } => Some(*delay),
            MockOutcome::Held | MockOutcome::Hang => None,
        };
        let timeout = (!self.update_timeout.is_zero()).then_some(self.update_timeout);
        let timed_out = match (delay, timeout) {
            (Some(delay), Some(timeout)) => delay > timeout,
            (None, Some(_)) => true,
            (_, None) => false,
        };
        let wait = match (delay, timeout) {
            (Some(delay), Some(timeout)) => Some(delay.min(timeout)),
            (Some(delay), None) => Some(delay),
            (None, timeout) => timeout,
        };

        let started = Instant::now();
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                let deliver = {
                    let mut state = lock_unpoisoned(&self.state);
                    if state.cancel_delivers_completion {
                        state.completions_delivered += 1;
                    }
                    state.cancel_delivers_completion
                };
                tracing::trace!(module = %self.module_id, deliver, "mock update cancelled");
                if deliver {
                    sink.complete(StatusCode::CANCELLED);
                } else {
                    sink.dismiss();
                }
                return;
            }

            if wait.is_some_and(|wait| started.elapsed() >= wait) {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        let status = if timed_out {
            StatusCode::TIMED_OUT
        } else {
            match outcome {
                MockOutcome::Fix { info, .. } => {
                    *lock_unpoisoned(&self.result) = Some(info);
                    let mut state = lock_unpoisoned(&self.state);
                    if let Some(module) = state.module_mut(self.module_id) {
                        module.cached = Some((info, Instant::now()));
                    }
                    StatusCode::SUCCESS
                }
                MockOutcome::Error { status, .. } => status,
                MockOutcome::Held | MockOutcome::Hang => StatusCode::TIMED_OUT,
            }
        };

        lock_unpoisoned(&self.state).completions_delivered += 1;
        sink.complete(status);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
