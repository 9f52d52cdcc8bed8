//! Cooperative coroutines.
//!
//! Each coroutine body runs on its own worker thread, but only one side of a
//! resume/yield pair is ever running: the resumer blocks until the body
//! yields or finishes, and the body blocks inside `yield` until the next
//! resume or until the handle is disposed.
//!
//! ## Channel Architecture
//!
//! - Resume to worker: `std::sync::mpsc` channel per coroutine. Each message
//!   carries the resume arguments plus a fresh reply sender. Disposal drops
//!   the sending half, which wakes a parked worker with a disconnect.
//! - Worker to resume: `tokio::sync::oneshot`, one per resume. Blocking
//!   callers use `blocking_recv`, async callers await [`PendingResume`].
//!
//! `yield` takes no handle. The scheduler keeps a registry from worker
//! thread id to coroutine so the body can find its own handle.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::sequence::ValueSequence;
use crate::value::{Function, Value};
use crate::Result;

const DEAD_MESSAGE: &str = "cannot resume dead coroutine";
const NOT_SUSPENDED_MESSAGE: &str = "cannot resume non-suspended coroutine";
const TERMINATED_MESSAGE: &str = "coroutine terminated unexpectedly";

/// Identity of one coroutine, unique within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(u64);

impl CoroutineId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// Not started yet, or parked at a yield.
    Suspended,
    /// Currently executing.
    Running,
    /// Resumed another coroutine and is waiting for it.
    Normal,
    /// Returned, failed or was disposed. Terminal.
    Dead,
}

impl CoroutineStatus {
    /// The name scripts see from `coroutine.status`.
    pub fn as_str(self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            CoroutineStatus::Suspended => 0,
            CoroutineStatus::Running => 1,
            CoroutineStatus::Normal => 2,
            CoroutineStatus::Dead => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CoroutineStatus::Suspended,
            1 => CoroutineStatus::Running,
            2 => CoroutineStatus::Normal,
            _ => CoroutineStatus::Dead,
        }
    }
}

impl fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one resume: a success flag plus the yielded or returned
/// values, or the error payload on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeResult {
    pub success: bool,
    pub values: ValueSequence,
}

impl ResumeResult {
    fn success(values: ValueSequence) -> Self {
        Self {
            success: true,
            values,
        }
    }

    fn failure(payload: Value) -> Self {
        Self {
            success: false,
            values: ValueSequence::single(payload),
        }
    }

    fn dead() -> Self {
        Self::failure(Value::from(DEAD_MESSAGE))
    }

    /// The script-level result: `(true, values...)` or `(false, payload)`.
    pub fn into_sequence(self) -> ValueSequence {
        self.values.prepend(Value::Boolean(self.success))
    }
}

/// A coroutine handle. Clones refer to the same coroutine.
///
/// Dropping the last handle disposes the coroutine. The scheduler and the
/// worker thread only hold the shared state, so they never keep an
/// unreachable coroutine alive.
#[derive(Clone)]
pub struct Coroutine {
    inner: Arc<CoroutineInner>,
    handle: Arc<HandleGuard>,
}

struct CoroutineInner {
    id: CoroutineId,
    /// Taken by the first resume, which hands it to the worker.
    body: Mutex<Option<Function>>,
    status: AtomicU8,
    /// Held for the whole of one resume. Never waited on.
    resume_gate: AtomicBool,
    cancelled: AtomicBool,
    resume_tx: Mutex<Option<mpsc::Sender<ResumeSignal>>>,
    /// Only touched by the worker thread.
    port: Mutex<Option<WorkerPort>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Shared by every handle; disposes when the last one goes away.
struct HandleGuard(Arc<CoroutineInner>);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if !self.0.is_dead() {
            tracing::trace!(coroutine = %self.0.id, "last coroutine handle dropped");
        }
        self.0.dispose();
    }
}

struct ResumeSignal {
    args: ValueSequence,
    reply: oneshot::Sender<Exchange>,
}

enum Exchange {
    Yielded(ValueSequence),
    Returned(ValueSequence),
    Failed(Value),
}

struct WorkerPort {
    resume_rx: mpsc::Receiver<ResumeSignal>,
    /// Reply sender of the resume currently in flight, if any.
    reply: Option<oneshot::Sender<Exchange>>,
}

impl CoroutineInner {
    fn status(&self) -> CoroutineStatus {
        CoroutineStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn is_dead(&self) -> bool {
        self.status() == CoroutineStatus::Dead
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn set_status(&self, status: CoroutineStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    /// Move from `from` to `to` unless something else (usually disposal)
    /// changed the status in between.
    fn transition(&self, from: CoroutineStatus, to: CoroutineStatus) -> bool {
        self.status
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn dispose(&self) {
        let already = self.cancelled.swap(true, Ordering::AcqRel);
        self.set_status(CoroutineStatus::Dead);
        // Dropped outside the locks: a body may own handles whose drop disposes again
        let body = self.body.lock().take();
        let resume_tx = self.resume_tx.lock().take();
        let worker = self.worker.lock().take();
        drop((body, resume_tx, worker));
        if !already {
            tracing::debug!(coroutine = %self.id, "coroutine disposed");
        }
    }
}

impl Coroutine {
    fn new(id: CoroutineId, body: Function) -> Self {
        let inner = Arc::new(CoroutineInner {
            id,
            body: Mutex::new(Some(body)),
            status: AtomicU8::new(CoroutineStatus::Suspended.to_u8()),
            resume_gate: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            resume_tx: Mutex::new(None),
            port: Mutex::new(None),
            worker: Mutex::new(None),
        });
        let handle = Arc::new(HandleGuard(Arc::clone(&inner)));
        Self { inner, handle }
    }

    pub fn id(&self) -> CoroutineId {
        self.inner.id
    }

    /// Current status. A plain atomic read; never blocks.
    pub fn status(&self) -> CoroutineStatus {
        self.inner.status()
    }

    pub fn is_dead(&self) -> bool {
        self.inner.is_dead()
    }

    /// Cancel this coroutine and release its handshake resources.
    ///
    /// Valid in every state and idempotent. A worker parked in `yield` wakes
    /// up and unwinds with [`Error::Cancelled`]; a worker that is running
    /// sees the cancellation at its next `yield`. Later resumes report a
    /// dead coroutine.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    fn set_status(&self, status: CoroutineStatus) {
        self.inner.set_status(status);
    }

    fn transition(&self, from: CoroutineStatus, to: CoroutineStatus) -> bool {
        self.inner.transition(from, to)
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

/// Exclusive right to resume one coroutine. Released on drop.
struct ResumeGate {
    inner: Arc<CoroutineInner>,
}

impl ResumeGate {
    fn try_acquire(co: &Coroutine) -> Option<Self> {
        co.inner
            .resume_gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                inner: Arc::clone(&co.inner),
            })
    }
}

impl Drop for ResumeGate {
    fn drop(&mut self) {
        self.inner.resume_gate.store(false, Ordering::Release);
    }
}

/// A resume that has been started but not yet observed.
///
/// Call [`wait`](PendingResume::wait) from synchronous code or `.await` it
/// from async code. The resume gate stays held until the result arrives or
/// this value is dropped.
pub struct PendingResume {
    ready: Option<ResumeResult>,
    reply: Option<oneshot::Receiver<Exchange>>,
    coroutine: Coroutine,
    /// The coroutine that issued this resume, parked in `Normal` meanwhile.
    caller: Option<Arc<CoroutineInner>>,
    gate: Option<ResumeGate>,
}

impl PendingResume {
    fn ready(coroutine: &Coroutine, result: ResumeResult) -> Self {
        Self {
            ready: Some(result),
            reply: None,
            coroutine: coroutine.clone(),
            caller: None,
            gate: None,
        }
    }

    /// Block until the coroutine yields or finishes.
    ///
    /// Safe to call on an async runtime thread, but it blocks that thread
    /// for the whole exchange; async callers should `.await` instead.
    pub fn wait(mut self) -> ResumeResult {
        match self.reply.take() {
            Some(reply) => {
                let received = receive_blocking(reply);
                self.complete(received)
            }
            None => self.ready.take().unwrap_or_else(ResumeResult::dead),
        }
    }

    fn complete(&mut self, received: Option<Exchange>) -> ResumeResult {
        self.release_caller();
        let result = match received {
            Some(Exchange::Yielded(values)) => {
                tracing::trace!(coroutine = %self.coroutine.id(), count = values.len(), "coroutine yielded");
                ResumeResult::success(values)
            }
            Some(Exchange::Returned(values)) => {
                tracing::trace!(coroutine = %self.coroutine.id(), count = values.len(), "coroutine returned");
                ResumeResult::success(values)
            }
            Some(Exchange::Failed(payload)) => ResumeResult::failure(payload),
            None => {
                tracing::warn!(coroutine = %self.coroutine.id(), "coroutine worker exited without reporting");
                self.coroutine.set_status(CoroutineStatus::Dead);
                ResumeResult::failure(Value::from(TERMINATED_MESSAGE))
            }
        };
        self.gate.take();
        result
    }

    fn release_caller(&mut self) {
        if let Some(caller) = self.caller.take() {
            caller.transition(CoroutineStatus::Normal, CoroutineStatus::Running);
        }
    }
}

/// Receive a reply from synchronous code.
///
/// `blocking_recv` panics on a thread that is driving a tokio runtime, so
/// there the receive happens on a short-lived helper thread instead.
fn receive_blocking(reply: oneshot::Receiver<Exchange>) -> Option<Exchange> {
    if tokio::runtime::Handle::try_current().is_err() {
        return reply.blocking_recv().ok();
    }
    thread::scope(|scope| {
        thread::Builder::new()
            .name("moonwell-resume-wait".to_string())
            .spawn_scoped(scope, move || reply.blocking_recv().ok())
            .ok()
            .and_then(|helper| helper.join().ok())
            .flatten()
    })
}

impl Future for PendingResume {
    type Output = ResumeResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ResumeResult> {
        if let Some(result) = self.ready.take() {
            return Poll::Ready(result);
        }

        let Some(reply) = self.reply.as_mut() else {
            return Poll::Ready(ResumeResult::dead());
        };

        match Pin::new(reply).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(received) => {
                self.reply = None;
                Poll::Ready(self.complete(received.ok()))
            }
        }
    }
}

impl Drop for PendingResume {
    fn drop(&mut self) {
        // Abandoned before the result arrived
        self.release_caller();
    }
}

/// Owner of the live-coroutine registry.
///
/// Cheap to clone; clones share the registry. Separate schedulers are fully
/// independent, which keeps test instances isolated.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    /// Worker thread id to the coroutine that worker is running.
    registry: Mutex<HashMap<ThreadId, RegisteredWorker>>,
    next_id: AtomicU64,
    config: RuntimeConfig,
}

/// Registry entry. Does not count as a handle.
struct RegisteredWorker {
    inner: Arc<CoroutineInner>,
    handle: Weak<HandleGuard>,
}

impl Scheduler {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Create a suspended coroutine. No worker starts until the first resume.
    pub fn create(&self, body: Function) -> Coroutine {
        let id = CoroutineId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(coroutine = %id, "coroutine created");
        Coroutine::new(id, body)
    }

    /// Resume `co` with `args` and block until it yields or finishes.
    ///
    /// Resuming a dead coroutine is not an error: it yields
    /// `success == false` with a message. A resume issued while another one
    /// is in flight on the same handle fails with
    /// [`Error::ResumeInProgress`] without blocking. Called from async code
    /// this blocks the calling runtime thread; prefer
    /// [`begin_resume`](Scheduler::begin_resume) there.
    pub fn resume(&self, co: &Coroutine, args: ValueSequence) -> Result<ResumeResult> {
        Ok(self.begin_resume(co, args)?.wait())
    }

    /// First half of a resume: hand `args` to the coroutine and return
    /// without waiting for it.
    pub fn begin_resume(&self, co: &Coroutine, args: ValueSequence) -> Result<PendingResume> {
        let gate = ResumeGate::try_acquire(co).ok_or(Error::ResumeInProgress(co.id()))?;

        if !co.transition(CoroutineStatus::Suspended, CoroutineStatus::Running) {
            let result = match co.status() {
                CoroutineStatus::Dead => ResumeResult::dead(),
                // Still running for a resume that was abandoned before it completed
                _ => ResumeResult::failure(Value::from(NOT_SUSPENDED_MESSAGE)),
            };
            return Ok(PendingResume::ready(co, result));
        }

        let caller = self.current_state();
        if let Some(caller) = &caller {
            caller.transition(CoroutineStatus::Running, CoroutineStatus::Normal);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let mut pending = PendingResume {
            ready: None,
            reply: Some(reply_rx),
            coroutine: co.clone(),
            caller,
            gate: Some(gate),
        };

        let body = co.inner.body.lock().take();
        match body {
            Some(body) => {
                if let Err(e) = self.spawn_worker(co, body.clone(), args, reply_tx) {
                    *co.inner.body.lock() = Some(body);
                    co.transition(CoroutineStatus::Running, CoroutineStatus::Suspended);
                    return Err(e);
                }
            }
            None => {
                let signal = ResumeSignal {
                    args,
                    reply: reply_tx,
                };
                let sent = match co.inner.resume_tx.lock().as_ref() {
                    Some(tx) => tx.send(signal).is_ok(),
                    None => false,
                };
                if !sent {
                    // Disposed, or the worker is gone
                    co.set_status(CoroutineStatus::Dead);
                    pending.reply = None;
                    pending.release_caller();
                    pending.ready = Some(ResumeResult::dead());
                }
            }
        }

        Ok(pending)
    }

    fn spawn_worker(
        &self,
        co: &Coroutine,
        body: Function,
        args: ValueSequence,
        reply: oneshot::Sender<Exchange>,
    ) -> Result<()> {
        let (resume_tx, resume_rx) = mpsc::channel();
        let port = WorkerPort {
            resume_rx,
            reply: Some(reply),
        };

        let config = &self.inner.config;
        let mut builder = thread::Builder::new().name(format!("{}-{}", config.worker_name_prefix, co.id()));
        if let Some(size) = config.worker_stack_size {
            builder = builder.stack_size(size);
        }

        // Installed before the worker exists so a concurrent dispose can always reach it
        *co.inner.resume_tx.lock() = Some(resume_tx);
        if co.inner.is_cancelled() {
            drop(co.inner.resume_tx.lock().take());
        }

        let scheduler = self.clone();
        let worker = RegisteredWorker {
            inner: Arc::clone(&co.inner),
            handle: Arc::downgrade(&co.handle),
        };
        let handle = match builder.spawn(move || scheduler.run_worker(worker, body, args, port)) {
            Ok(handle) => handle,
            Err(e) => {
                drop(co.inner.resume_tx.lock().take());
                return Err(Error::Spawn(e));
            }
        };

        *co.inner.worker.lock() = Some(handle);
        Ok(())
    }

    fn run_worker(&self, worker: RegisteredWorker, body: Function, args: ValueSequence, port: WorkerPort) {
        let thread_id = thread::current().id();
        let co = Arc::clone(&worker.inner);
        self.inner.registry.lock().insert(thread_id, worker);
        *co.port.lock() = Some(port);
        let exit = WorkerExit {
            scheduler: self,
            coroutine: &co,
            thread_id,
        };
        tracing::debug!(coroutine = %co.id, "coroutine worker started");

        let outcome = if co.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            body.call(args)
        };
        drop(body);

        let reply = co.port.lock().take().and_then(|port| port.reply);
        // Dead and unregistered before the resumer can observe the final exchange
        drop(exit);

        let exchange = match outcome {
            Ok(values) => Exchange::Returned(values),
            Err(e) => {
                tracing::debug!(coroutine = %co.id, error = %e, "coroutine body failed");
                Exchange::Failed(e.into_payload())
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(exchange);
        }
    }

    /// Suspend the calling coroutine, handing `values` to its resumer.
    ///
    /// Returns the arguments of the next resume. Fails with
    /// [`Error::YieldOutsideCoroutine`] when not called from a coroutine body
    /// and with [`Error::Cancelled`] once the coroutine has been disposed.
    pub fn yield_values(&self, values: ValueSequence) -> Result<ValueSequence> {
        let co = self.current_state().ok_or(Error::YieldOutsideCoroutine)?;
        if co.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut port_guard = co.port.lock();
        let port = port_guard.as_mut().ok_or(Error::YieldOutsideCoroutine)?;
        let reply = port
            .reply
            .take()
            .ok_or_else(|| Error::runtime("coroutine yielded with no resume in flight"))?;

        co.transition(CoroutineStatus::Running, CoroutineStatus::Suspended);
        tracing::trace!(coroutine = %co.id, count = values.len(), "coroutine parked");
        // An abandoned async resume drops its receiver; the coroutine still parks
        let _ = reply.send(Exchange::Yielded(values));

        match port.resume_rx.recv() {
            Ok(ResumeSignal { args, reply }) => {
                port.reply = Some(reply);
                if co.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                Ok(args)
            }
            Err(_) => {
                tracing::debug!(coroutine = %co.id, "parked coroutine cancelled");
                Err(Error::Cancelled)
            }
        }
    }

    /// The coroutine running on the calling thread, if any.
    pub fn current(&self) -> Option<Coroutine> {
        let registry = self.inner.registry.lock();
        let worker = registry.get(&thread::current().id())?;
        let handle = worker.handle.upgrade()?;
        Some(Coroutine {
            inner: Arc::clone(&worker.inner),
            handle,
        })
    }

    /// Shared state of the coroutine on the calling thread, even when no
    /// handle to it is left.
    fn current_state(&self) -> Option<Arc<CoroutineInner>> {
        self.inner
            .registry
            .lock()
            .get(&thread::current().id())
            .map(|worker| Arc::clone(&worker.inner))
    }

    /// `coroutine.running`: the current coroutine and whether the caller is
    /// the main thread of control.
    pub fn running(&self) -> (Option<Coroutine>, bool) {
        let current = self.current();
        let is_main = self.current_state().is_none();
        (current, is_main)
    }

    pub fn is_yieldable(&self) -> bool {
        self.current_state().is_some()
    }

    pub fn status(&self, co: &Coroutine) -> CoroutineStatus {
        co.status()
    }

    pub fn dispose(&self, co: &Coroutine) {
        co.dispose();
    }

    /// Number of coroutines whose workers are currently alive.
    pub fn live_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// A plain function that resumes a private coroutine on every call and
    /// returns what it yields. Failures are raised as exceptions. Dropping
    /// the last clone of the function disposes the coroutine.
    pub fn wrap(&self, body: Function) -> Function {
        let scheduler = self.clone();
        let co = self.create(body);
        Function::named("wrap", move |args| {
            let result = scheduler.resume(&co, args)?;
            if result.success {
                Ok(result.values)
            } else {
                Err(Error::Exception(result.values.first()))
            }
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("live", &self.live_count())
            .finish()
    }
}

/// Bookkeeping for a worker leaving its body, including by panic.
struct WorkerExit<'a> {
    scheduler: &'a Scheduler,
    coroutine: &'a CoroutineInner,
    thread_id: ThreadId,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        self.coroutine.set_status(CoroutineStatus::Dead);
        let entry = self.scheduler.inner.registry.lock().remove(&self.thread_id);
        let port = self.coroutine.port.lock().take();
        let resume_tx = self.coroutine.resume_tx.lock().take();
        drop((entry, port, resume_tx));
        tracing::debug!(coroutine = %self.coroutine.id, "coroutine worker exited");
    }
}
