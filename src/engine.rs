//! Preparser engine: request acceptance, per-domain fan-out, outcome
//! aggregation and the exactly-once terminal transition.
//!
//! Locking is two-tiered: the request-table mutex guards insert, lookup,
//! iteration and the terminal transition; each record's own lock guards
//! aggregation state. Locks are taken table-then-record, and callbacks are
//! always invoked with no engine lock held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::PreparserConfig;
use crate::executor::{Executor, SubTask};
use crate::item::{InputItem, ParseCallbacks, ThumbnailCallbacks};
use crate::protocol::{
    Domain, DomainMask, ParseOptions, RequestId, SeekArg, TaskStatus, REQUEST_ID_INVALID,
};
use crate::request::{Request, RequestSink, RequestTable};
use crate::timer::RequestTimer;
use crate::workers::{WorkerContext, WorkerSet};

const PARSE_FAMILY: DomainMask = DomainMask::PARSE.union(DomainMask::FETCH_META_ALL);

struct EngineInner {
    configured: DomainMask,
    executors: [Option<Executor>; 4],
    workers: WorkerSet,
    table: RequestTable,
    timer: RequestTimer,
    timeout: Mutex<Option<Duration>>,
    closing: AtomicBool,
}

/// Asynchronous media-item preparser.
///
/// Enqueue operations return a request identifier immediately; outcomes are
/// delivered on engine worker threads through the callbacks supplied with
/// each request. Every accepted request receives exactly one terminal
/// callback, under any interleaving of completion, cancellation, timeout
/// and engine teardown. Rejected requests (identifier
/// [`REQUEST_ID_INVALID`]) never invoke any callback.
pub struct Preparser {
    inner: Arc<EngineInner>,
}

impl Preparser {
    /// Creates an engine with the built-in extractors for every configured
    /// domain.
    pub fn new(config: &PreparserConfig) -> Result<Self, String> {
        Self::with_workers(config, WorkerSet::defaults(config))
    }

    /// Creates an engine with caller-supplied workers. Every domain in
    /// `config.types` must have a worker registered.
    pub fn with_workers(config: &PreparserConfig, workers: WorkerSet) -> Result<Self, String> {
        if config.types.is_empty() {
            return Err("preparser configuration selects no work domain".to_string());
        }
        for domain in config.types.domains() {
            if workers.get(domain).is_none() {
                return Err(format!(
                    "no worker registered for configured domain {}",
                    domain.label()
                ));
            }
        }

        let configured = config.types;
        let parser_threads = config.parser_threads();
        let thumbnailer_threads = config.thumbnailer_threads();
        let timeout = config.effective_timeout();

        let inner = Arc::new_cyclic(|engine: &Weak<EngineInner>| {
            let timeout_engine = engine.clone();
            let timer = RequestTimer::new(Box::new(move |id: RequestId| {
                if let Some(engine) = timeout_engine.upgrade() {
                    engine.cancel_requests(id, Some(TaskStatus::Timeout));
                }
            }));

            let mut executors: [Option<Executor>; 4] = [None, None, None, None];
            for domain in configured.domains() {
                let width = match domain {
                    Domain::Thumbnail => thumbnailer_threads,
                    _ => parser_threads,
                };
                executors[domain.index()] = Some(Executor::new(domain.label(), width));
            }

            EngineInner {
                configured,
                executors,
                workers,
                table: RequestTable::new(),
                timer,
                timeout: Mutex::new(timeout),
                closing: AtomicBool::new(false),
            }
        });

        debug!(
            "Preparser: created for domains {:?}, {} parser / {} thumbnailer thread(s)",
            configured, parser_threads, thumbnailer_threads
        );
        Ok(Self { inner })
    }

    /// Enqueues `item` for preparsing and/or metadata fetching.
    ///
    /// `options.types` must be a non-empty subset of the engine's configured
    /// parse-family domains. The item is held by the engine until the
    /// request settles. Returns [`REQUEST_ID_INVALID`] on rejection, in
    /// which case no callback will ever fire.
    pub fn push(
        &self,
        item: Arc<InputItem>,
        options: ParseOptions,
        cbs: Arc<dyn ParseCallbacks>,
    ) -> RequestId {
        let inner = &self.inner;
        if inner.closing.load(Ordering::Acquire) {
            debug!("Preparser: rejecting push during shutdown");
            return REQUEST_ID_INVALID;
        }
        if options.types.is_empty()
            || !PARSE_FAMILY.contains(options.types)
            || !inner.configured.contains(options.types)
        {
            warn!(
                "Preparser: rejecting push with invalid type selection {:?} (configured {:?})",
                options.types, inner.configured
            );
            return REQUEST_ID_INVALID;
        }

        let domains: Vec<Domain> = options.types.domains().collect();
        let id = inner.table.allocate_id();
        let request = Request::new(id, item, RequestSink::Parse(cbs), domains.len());
        let timeout = *inner.timeout.lock().expect("engine timeout lock poisoned");
        Arc::clone(inner).accept(
            request,
            &domains,
            options.interact,
            options.subitems,
            SeekArg::default(),
            timeout,
        )
    }

    /// Enqueues `item` for thumbnail generation.
    ///
    /// `timeout` replaces the engine-wide deadline for this request when
    /// given; `Some(Duration::ZERO)` disables the deadline entirely and
    /// `None` falls back to the engine-wide value.
    pub fn generate_thumbnail(
        &self,
        item: Arc<InputItem>,
        seek: SeekArg,
        timeout: Option<Duration>,
        cbs: Arc<dyn ThumbnailCallbacks>,
    ) -> RequestId {
        let inner = &self.inner;
        if inner.closing.load(Ordering::Acquire) {
            debug!("Preparser: rejecting thumbnail request during shutdown");
            return REQUEST_ID_INVALID;
        }
        if !inner.configured.contains(DomainMask::THUMBNAIL) {
            warn!("Preparser: rejecting thumbnail request, domain not configured");
            return REQUEST_ID_INVALID;
        }

        let timeout = match timeout {
            Some(timeout) if timeout.is_zero() => None,
            Some(timeout) => Some(timeout),
            None => *inner.timeout.lock().expect("engine timeout lock poisoned"),
        };
        let id = inner.table.allocate_id();
        let request = Request::new(id, item, RequestSink::Thumbnail(cbs), 1);
        Arc::clone(inner).accept(request, &[Domain::Thumbnail], false, false, seek, timeout)
    }

    /// Cancels the request `id`, or every live request for
    /// [`REQUEST_ID_INVALID`]. Returns the number of requests targeted.
    ///
    /// Cancellation is cooperative: the terminal callback of a cancelled
    /// request is delivered asynchronously once its sub-tasks settle, never
    /// from within this call.
    pub fn cancel(&self, id: RequestId) -> usize {
        self.inner.cancel_requests(id, None)
    }

    /// Replaces the engine-wide deadline used by newly accepted requests.
    /// In-flight requests keep the deadline they were accepted with.
    #[deprecated(
        note = "retained for interface compatibility; prefer configuring the timeout at construction"
    )]
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *self.inner.timeout.lock().expect("engine timeout lock poisoned") =
            timeout.filter(|timeout| !timeout.is_zero());
    }

    /// Shuts the engine down: rejects new requests, cancels every live one
    /// and blocks until all executors drained. On return, every accepted
    /// request has received its terminal callback and no further callback
    /// will fire. Also runs on drop.
    pub fn close(&self) {
        self.inner.close_engine();
    }
}

impl Drop for Preparser {
    fn drop(&mut self) {
        self.inner.close_engine();
    }
}

impl EngineInner {
    fn executor(&self, domain: Domain) -> &Executor {
        self.executors[domain.index()]
            .as_ref()
            .expect("executor missing for configured domain")
    }

    /// Second half of acceptance, shared by both request families: insert
    /// the record, arm the deadline, then create and submit one sub-task
    /// per domain in the fixed domain order.
    fn accept(
        self: Arc<Self>,
        request: Arc<Request>,
        domains: &[Domain],
        interact: bool,
        want_subitems: bool,
        seek: SeekArg,
        timeout: Option<Duration>,
    ) -> RequestId {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        self.table.insert(Arc::clone(&request));
        if let Some(due) = deadline {
            self.timer.arm(request.id, due);
        }

        // Register the full sub-task set on the record before submitting
        // anything, so a concurrent cancel captures every handle.
        let mut subtasks = Vec::with_capacity(domains.len());
        for &domain in domains {
            let worker = Arc::clone(
                self.workers
                    .get(domain)
                    .expect("worker missing for configured domain"),
            );
            let interrupt = Arc::new(AtomicBool::new(false));
            let ctx = WorkerContext::new(
                Arc::clone(&request.item),
                domain,
                interact,
                want_subitems,
                seek,
                deadline,
                Arc::clone(&interrupt),
                Arc::clone(&request),
            );
            let engine = Arc::clone(&self);
            let completing = Arc::clone(&request);
            let subtask = SubTask::new(
                worker,
                ctx,
                interrupt,
                Box::new(move |status| engine.on_subtask_complete(&completing, status)),
            );
            subtasks.push((domain, subtask));
        }
        request
            .state
            .lock()
            .expect("request state lock poisoned")
            .subtasks = subtasks.clone();

        for (domain, subtask) in subtasks {
            let cancelled = request
                .state
                .lock()
                .expect("request state lock poisoned")
                .cancel_requested;
            if cancelled || self.closing.load(Ordering::Acquire) {
                subtask.interrupt();
                subtask.complete(TaskStatus::Interrupted);
            } else {
                self.executor(domain).submit(subtask);
            }
        }

        debug!(
            "Preparser: accepted request {} for {} ({} domain(s))",
            request.id,
            request.item.uri(),
            domains.len()
        );
        request.id
    }

    /// Merges one sub-task outcome into the aggregate and runs the terminal
    /// transition once the last outcome arrived. The first non-Ok outcome
    /// triggers best-effort cancellation of the request's still-outstanding
    /// sub-tasks.
    fn on_subtask_complete(&self, request: &Arc<Request>, status: TaskStatus) {
        let (siblings, finished) = {
            let mut state = request.state.lock().expect("request state lock poisoned");
            let previous = state.status;
            state.status = state.status.merge(status);
            state.remaining -= 1;
            let first_failure =
                previous.is_ok() && !status.is_ok() && state.remaining > 0;
            (
                first_failure.then(|| state.subtasks.clone()),
                state.remaining == 0,
            )
        };

        if let Some(siblings) = siblings {
            for (domain, subtask) in siblings {
                self.executor(domain).cancel(&subtask);
            }
        }
        if finished {
            self.finish(request);
        }
    }

    /// Terminal transition: wins the table-side settle exactly once, then
    /// delivers the terminal callback with no engine lock held. The engine's
    /// item hold is the record's `Arc`, dropped when the last sub-task
    /// reference to the record goes away.
    fn finish(&self, request: &Arc<Request>) {
        if !self.table.settle(request) {
            return;
        }
        self.timer.disarm(request.id);
        debug!("Preparser: request {} reached terminal state", request.id);
        request.deliver_terminal();
    }

    /// Cancellation body shared by user cancel and deadline expiry; the
    /// `reason` tag distinguishes the two in the aggregate status.
    fn cancel_requests(&self, id: RequestId, reason: Option<TaskStatus>) -> usize {
        let targets = self.table.targets(id);
        let targeted = targets.len();

        for request in &targets {
            let subtasks = {
                let mut state = request.state.lock().expect("request state lock poisoned");
                if state.terminal {
                    continue;
                }
                state.cancel_requested = true;
                if let Some(tag) = reason {
                    state.status = state.status.merge(tag);
                }
                state.subtasks.clone()
            };
            // Sub-handles are cancelled outside every engine lock.
            for (domain, subtask) in subtasks {
                self.executor(domain).cancel(&subtask);
            }
        }

        if targeted > 0 {
            debug!(
                "Preparser: cancel targeted {targeted} request(s) (reason {:?})",
                reason
            );
        }
        targeted
    }

    fn close_engine(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Preparser: shutting down");
        self.cancel_requests(REQUEST_ID_INVALID, None);
        for domain in Domain::ALL {
            if let Some(executor) = &self.executors[domain.index()] {
                executor.drain_and_shutdown();
            }
        }
        self.timer.shutdown();
        if !self.table.is_empty() {
            warn!("Preparser: request table not empty after drain");
        }
        debug!("Preparser: shut down");
    }
}
