//! # Async Operations
//!
//! Fire-and-forget variants of insert, add, remove and clear.
//!
//! ## Overview
//!
//! The calling thread validates the request and registers the completion
//! callback in the matching async category, then queues the work on a
//! bounded `crossbeam` channel and returns. Worker threads run the engine
//! call, resolve the callback token, invoke the callback once and release
//! the registration. Completions of different operations may arrive in any
//! order.
//!
//! A panic in the queued work or in a completion callback is caught and
//! logged. The worker keeps serving the queue and the registration is still
//! released.

use crate::access::ItemVersion;
use crate::error::{CacheError, Result};
use crate::logging::log_error;
use crate::registry::{CallbackCategory, CallbackToken, HandlerId, RegistryHandler, TokenRegistry};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Kind of queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncOperation {
    Insert,
    Add,
    Remove,
    Clear,
}

impl AsyncOperation {
    /// Registry category holding completion callbacks for this operation
    pub fn category(self) -> CallbackCategory {
        match self {
            AsyncOperation::Insert => CallbackCategory::AsyncUpdate,
            AsyncOperation::Add => CallbackCategory::AsyncAdd,
            AsyncOperation::Remove => CallbackCategory::AsyncRemove,
            AsyncOperation::Clear => CallbackCategory::AsyncClear,
        }
    }
}

impl fmt::Display for AsyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AsyncOperation::Insert => "insert",
            AsyncOperation::Add => "add",
            AsyncOperation::Remove => "remove",
            AsyncOperation::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// Completion report handed to an [`AsyncCallback`]
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncResult {
    pub operation: AsyncOperation,
    pub key: Option<String>,
    /// Version written by insert/add; `ItemVersion::NONE` otherwise
    pub result: Result<ItemVersion>,
}

type AsyncCallbackFn = dyn Fn(&AsyncResult) + Send + Sync;

/// Completion handler of an async operation
#[derive(Clone)]
pub struct AsyncCallback(Arc<AsyncCallbackFn>);

impl AsyncCallback {
    pub fn new(callback: impl Fn(&AsyncResult) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn invoke(&self, result: &AsyncResult) {
        (self.0)(result)
    }
}

impl RegistryHandler for AsyncCallback {
    fn handler_id(&self) -> HandlerId {
        HandlerId::of(&self.0)
    }
}

impl fmt::Debug for AsyncCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncCallback")
            .field(&self.handler_id())
            .finish()
    }
}

pub(crate) type Work = Box<dyn FnOnce() -> Result<ItemVersion> + Send>;

struct Job {
    operation: AsyncOperation,
    key: Option<String>,
    token: Option<CallbackToken>,
    work: Work,
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }
}

/// Marks one job finished when dropped, whatever path the worker took
struct FinishGuard<'a>(&'a InFlight);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Worker pool completing queued operations
pub(crate) struct AsyncDispatcher {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<InFlight>,
    registry: Arc<TokenRegistry<AsyncCallback>>,
}

impl AsyncDispatcher {
    pub(crate) fn start(
        worker_threads: usize,
        queue_capacity: usize,
        registry: Arc<TokenRegistry<AsyncCallback>>,
    ) -> Result<Self> {
        let (sender, receiver) = channel::bounded::<Job>(queue_capacity.max(1));
        let in_flight = Arc::new(InFlight::default());

        let mut workers = Vec::with_capacity(worker_threads);
        for index in 0..worker_threads.max(1) {
            let receiver = receiver.clone();
            let registry = Arc::clone(&registry);
            let in_flight = Arc::clone(&in_flight);
            let handle = std::thread::Builder::new()
                .name(format!("cache-session-async-{index}"))
                .spawn(move || worker_loop(receiver, registry, in_flight))
                .map_err(|e| CacheError::engine(format!("failed to start async worker: {e}")))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            in_flight,
            registry,
        })
    }

    pub(crate) fn registry(&self) -> &Arc<TokenRegistry<AsyncCallback>> {
        &self.registry
    }

    /// Register `callback`, then queue `work`
    pub(crate) fn submit(
        &self,
        operation: AsyncOperation,
        key: Option<String>,
        callback: Option<&AsyncCallback>,
        work: Work,
    ) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(CacheError::NotInitialized)?;

        let category = operation.category();
        let token = callback
            .map(|callback| self.registry.register(category, callback))
            .transpose()?;

        *self.in_flight.count.lock() += 1;
        let job = Job {
            operation,
            key,
            token,
            work,
        };
        if sender.send(job).is_err() {
            self.in_flight.finish();
            if let Some(callback) = callback {
                self.registry.unregister(category, callback);
            }
            return Err(CacheError::NotInitialized);
        }
        debug!(operation = %operation, token = ?token, "Queued async operation");
        Ok(())
    }

    /// Block until every queued operation completed or `timeout` elapsed
    pub(crate) fn wait_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            if self
                .in_flight
                .drained
                .wait_until(&mut count, deadline)
                .timed_out()
            {
                if *count == 0 {
                    break;
                }
                return Err(CacheError::timeout("async operations"));
            }
        }
        Ok(())
    }

    pub(crate) fn pending(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Stop accepting work and wait for the workers to drain the queue
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = std::thread::current().id();
        for worker in workers {
            // A callback disposing its own session must not join itself
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Async worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(
    receiver: Receiver<Job>,
    registry: Arc<TokenRegistry<AsyncCallback>>,
    in_flight: Arc<InFlight>,
) {
    for job in receiver {
        let _finished = FinishGuard(&*in_flight);
        let operation = job.operation;
        let work = job.work;
        let outcome = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
            log_error(
                "async_dispatcher",
                &operation.to_string(),
                "async operation panicked",
                job.key.as_deref(),
            );
            Err(CacheError::engine(format!("async {operation} panicked")))
        });
        let result = AsyncResult {
            operation,
            key: job.key,
            result: outcome,
        };

        if let Some(token) = job.token {
            let category = operation.category();
            match registry.resolve(category, token) {
                Some(callback) => {
                    let invoked =
                        panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(&result)));
                    registry.unregister(category, &callback);
                    if invoked.is_err() {
                        log_error(
                            "async_dispatcher",
                            &operation.to_string(),
                            "completion callback panicked",
                            result.key.as_deref(),
                        );
                    }
                }
                None => debug!(
                    category = %category,
                    token = %token,
                    "Async callback no longer registered, dropping completion"
                ),
            }
        }
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
