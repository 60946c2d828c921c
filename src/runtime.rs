//! Single-worker isolation boundary around one database handle.
//!
//! Two threads cooperate per boundary. The dispatcher owns the request queue
//! and the state machine; the executor owns the [`DatabaseHandle`] and runs
//! one job at a time when the dispatcher hands it one. The dispatcher never
//! sends a second job before the first one answered, so engine calls never
//! overlap and responses leave in arrival order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::channel::oneshot;
use tracing::{debug, debug_span, error, info, warn};

use crate::config::RuntimeConfig;
use crate::engine::{DatabaseHandle, HandleId, Interrupter, SqlEngine};
use crate::envelope::{Request, Response};
use crate::error::{ErrorKind, ExecutionError, RuntimeError};
use crate::gateway::ExecutionGateway;

/// Lifecycle of a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Executing,
    Closed,
}

impl RuntimeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RuntimeState::Idle,
            1 => RuntimeState::Executing,
            _ => RuntimeState::Closed,
        }
    }
}

struct Shared {
    state: AtomicU8,
    closing: AtomicBool,
    sequence: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(RuntimeState::Idle as u8),
            closing: AtomicBool::new(false),
            sequence: AtomicU64::new(1),
        }
    }

    fn state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RuntimeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn begin_close(&self) {
        self.closing.store(true, Ordering::Release);
    }
}

/// The channel one caller waits on
struct Reply {
    sequence: u64,
    sender: oneshot::Sender<Response>,
}

impl Reply {
    fn answer(self, response: Response) {
        if self.sender.send(response).is_err() {
            debug!(sequence = self.sequence, "caller dropped before its response arrived");
        }
    }

    fn reject(self) {
        self.answer(Response::boundary_closed());
    }
}

/// A queued request and where its response goes
struct Envelope {
    request: Request,
    reply: Reply,
    enqueued_at: Instant,
}

enum Command {
    Execute(Envelope),
    Shutdown,
}

enum JobResult {
    Done(Response),
    Panicked(String),
}

/// Why the dispatcher had to give up on the executor
enum Fatal {
    Timeout(Duration),
    Panicked(String),
    ExecutorLost,
}

/// Anything that can run a request and hand back its response
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, request: Request) -> Response;

    async fn execute_sql(&self, sql: &str) -> Response {
        self.execute(Request::new(sql)).await
    }
}

/// Cloneable sender side of a boundary
#[derive(Clone)]
pub struct BoundaryClient {
    sender: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    handle_id: HandleId,
}

impl BoundaryClient {
    /// Queue a request. The receiver resolves to its response; if it is
    /// cancelled instead, the boundary closed before answering.
    pub fn submit(&self, request: Request) -> oneshot::Receiver<Response> {
        let (sender, receiver) = oneshot::channel();
        let reply = Reply {
            sequence: self.shared.sequence.fetch_add(1, Ordering::Relaxed),
            sender,
        };
        if self.shared.is_closing() {
            reply.reject();
            return receiver;
        }
        let envelope = Envelope {
            request,
            reply,
            enqueued_at: Instant::now(),
        };
        if let Err(mpsc::SendError(Command::Execute(envelope))) =
            self.sender.send(Command::Execute(envelope))
        {
            envelope.reply.reject();
        }
        receiver
    }

    pub async fn execute(&self, request: Request) -> Response {
        self.submit(request)
            .await
            .unwrap_or_else(|_| Response::boundary_closed())
    }

    pub fn execute_blocking(&self, request: Request) -> Response {
        futures::executor::block_on(self.execute(request))
    }

    /// Ask the boundary to close once the in-flight request finishes.
    pub fn shutdown(&self) {
        self.shared.begin_close();
        let _ = self.sender.send(Command::Shutdown);
    }

    pub fn state(&self) -> RuntimeState {
        self.shared.state()
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }
}

#[async_trait]
impl SqlExecutor for BoundaryClient {
    async fn execute(&self, request: Request) -> Response {
        BoundaryClient::execute(self, request).await
    }
}

/// Owner of a running boundary; dropping it shuts the boundary down.
pub struct BoundaryRuntime {
    client: BoundaryClient,
    dispatcher: Option<JoinHandle<()>>,
}

impl BoundaryRuntime {
    /// Wrap `engine` in a fresh handle and start serving requests.
    pub fn spawn<E>(engine: E, config: RuntimeConfig) -> Result<Self, RuntimeError>
    where
        E: SqlEngine + 'static,
    {
        Self::with_handle(DatabaseHandle::new(engine), config)
    }

    pub fn with_handle<E>(
        handle: DatabaseHandle<E>,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError>
    where
        E: SqlEngine + 'static,
    {
        let handle_id = handle.id();
        let interrupter = handle.interrupter();
        let (job_tx, job_rx) = mpsc::channel::<Request>();
        let (result_tx, result_rx) = mpsc::channel::<JobResult>();

        let executor = thread::Builder::new()
            .name(format!("{}-executor", config.thread_name))
            .spawn(move || executor_loop(handle, job_rx, result_tx))
            .map_err(|source| RuntimeError::Spawn {
                thread: "executor",
                source,
            })?;

        let shared = Arc::new(Shared::new());
        let (command_tx, command_rx) = mpsc::channel();
        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            handle_id,
            jobs: Some(job_tx),
            results: result_rx,
            executor: Some(executor),
            interrupter,
            timeout: config.execute_timeout(),
        };
        let dispatcher = thread::Builder::new()
            .name(format!("{}-dispatch", config.thread_name))
            .spawn(move || dispatcher.run(command_rx))
            .map_err(|source| RuntimeError::Spawn {
                thread: "dispatcher",
                source,
            })?;

        info!(handle = %handle_id, timeout_ms = ?config.execute_timeout_ms, "boundary started");
        Ok(Self {
            client: BoundaryClient {
                sender: command_tx,
                shared,
                handle_id,
            },
            dispatcher: Some(dispatcher),
        })
    }

    pub fn client(&self) -> BoundaryClient {
        self.client.clone()
    }

    pub fn handle_id(&self) -> HandleId {
        self.client.handle_id
    }

    pub fn state(&self) -> RuntimeState {
        self.client.state()
    }

    /// Signal shutdown and wait until the handle is closed.
    pub fn shutdown(mut self) -> Result<(), RuntimeError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        self.client.shutdown();
        match self.dispatcher.take() {
            Some(dispatcher) => dispatcher
                .join()
                .map_err(|_| RuntimeError::Panicked("dispatcher")),
            None => Ok(()),
        }
    }
}

impl Drop for BoundaryRuntime {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!(error = %err, "boundary did not shut down cleanly");
        }
    }
}

struct Dispatcher {
    shared: Arc<Shared>,
    handle_id: HandleId,
    jobs: Option<mpsc::Sender<Request>>,
    results: mpsc::Receiver<JobResult>,
    executor: Option<JoinHandle<()>>,
    interrupter: Option<Interrupter>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    fn run(mut self, commands: mpsc::Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            let envelope = match command {
                Command::Execute(envelope) => envelope,
                Command::Shutdown => break,
            };
            if self.shared.is_closing() {
                envelope.reply.reject();
                break;
            }
            if self.dispatch(envelope).is_err() {
                break;
            }
        }

        self.shared.begin_close();
        self.close_executor();
        self.shared.set_state(RuntimeState::Closed);

        let mut rejected = 0usize;
        while let Ok(command) = commands.try_recv() {
            if let Command::Execute(envelope) = command {
                envelope.reply.reject();
                rejected += 1;
            }
        }
        info!(handle = %self.handle_id, rejected, "boundary closed");
    }

    /// Run one request to completion. `Err` means the executor can no longer
    /// be trusted and the boundary must close.
    fn dispatch(&mut self, envelope: Envelope) -> Result<(), ()> {
        let Envelope {
            request,
            reply,
            enqueued_at,
        } = envelope;
        let span = debug_span!("request", sequence = reply.sequence, handle = %self.handle_id);
        let _enter = span.enter();
        debug!(
            queued_us = u64::try_from(enqueued_at.elapsed().as_micros()).unwrap_or(u64::MAX),
            "dispatching request"
        );
        self.shared.set_state(RuntimeState::Executing);

        let sent = match &self.jobs {
            Some(jobs) => jobs.send(request).is_ok(),
            None => false,
        };
        let outcome = if sent {
            self.await_result()
        } else {
            Err(Fatal::ExecutorLost)
        };
        match outcome {
            Ok(response) => {
                if !self.shared.is_closing() {
                    self.shared.set_state(RuntimeState::Idle);
                }
                reply.answer(response);
                Ok(())
            }
            Err(fatal) => self.fail(reply, fatal),
        }
    }

    fn await_result(&self) -> Result<Response, Fatal> {
        let result = match self.timeout {
            Some(limit) => self.results.recv_timeout(limit).map_err(|err| match err {
                RecvTimeoutError::Timeout => Fatal::Timeout(limit),
                RecvTimeoutError::Disconnected => Fatal::ExecutorLost,
            })?,
            None => self.results.recv().map_err(|_| Fatal::ExecutorLost)?,
        };
        match result {
            JobResult::Done(response) => Ok(response),
            JobResult::Panicked(message) => Err(Fatal::Panicked(message)),
        }
    }

    fn fail(&mut self, reply: Reply, fatal: Fatal) -> Result<(), ()> {
        let error = match fatal {
            Fatal::Timeout(limit) => {
                warn!(
                    limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "execution timed out; closing boundary"
                );
                if let Some(interrupter) = &self.interrupter {
                    interrupter.interrupt();
                }
                self.abandon_executor();
                ExecutionError::new(
                    ErrorKind::Timeout,
                    format!("execution exceeded {} ms", limit.as_millis()),
                )
            }
            Fatal::Panicked(message) => {
                error!(panic = %message, "engine panicked; closing boundary");
                self.abandon_executor();
                ExecutionError::new(ErrorKind::Unknown, format!("engine panicked: {message}"))
            }
            Fatal::ExecutorLost => {
                error!("database executor stopped; closing boundary");
                ExecutionError::new(ErrorKind::HandleClosed, "database executor stopped")
            }
        };
        self.shared.begin_close();
        self.shared.set_state(RuntimeState::Closed);
        reply.answer(Response::err(error));
        Err(())
    }

    /// Detach from an executor stuck in or wrecked by its last job. It
    /// closes the handle itself once the job returns and the queue is gone.
    fn abandon_executor(&mut self) {
        self.jobs = None;
        self.executor = None;
    }

    fn close_executor(&mut self) {
        self.jobs = None;
        if let Some(executor) = self.executor.take() {
            if executor.join().is_err() {
                warn!(handle = %self.handle_id, "executor thread panicked during close");
            }
        }
    }
}

fn executor_loop<E: SqlEngine>(
    mut handle: DatabaseHandle<E>,
    jobs: mpsc::Receiver<Request>,
    results: mpsc::Sender<JobResult>,
) {
    let gateway = ExecutionGateway::new();
    while let Ok(request) = jobs.recv() {
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| gateway.respond(&mut handle, &request)));
        match result {
            Ok(response) => {
                if results.send(JobResult::Done(response)).is_err() {
                    break;
                }
            }
            Err(payload) => {
                let _ = results.send(JobResult::Panicked(panic_message(payload.as_ref())));
                return;
            }
        }
    }
    if let Err(failure) = handle.close() {
        let err = crate::marshal::execution_error(failure);
        warn!(handle = %handle.id(), error = %err, "failed to close database handle");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
