//! Bounded FIFO executor: a queue of domain sub-tasks drained by a fixed
//! pool of dispatch threads.
//!
//! Cancellation of a queued sub-task removes it and completes it as
//! `Interrupted` without ever running its worker; cancellation of a running
//! sub-task raises its interrupt token and lets the natural completion path
//! deliver the outcome. Every submitted sub-task reports exactly one outcome
//! through its completion sink, including during shutdown.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::protocol::TaskStatus;
use crate::workers::{Worker, WorkerContext};

pub(crate) type CompletionSink = Box<dyn FnOnce(TaskStatus) + Send>;

/// Handle to one enqueued or running unit of domain work.
pub(crate) struct SubTask {
    worker: Arc<dyn Worker>,
    ctx: WorkerContext,
    interrupt: Arc<AtomicBool>,
    sink: Mutex<Option<CompletionSink>>,
}

impl SubTask {
    pub(crate) fn new(
        worker: Arc<dyn Worker>,
        ctx: WorkerContext,
        interrupt: Arc<AtomicBool>,
        sink: CompletionSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker,
            ctx,
            interrupt,
            sink: Mutex::new(Some(sink)),
        })
    }

    /// Raises the cooperative interrupt token. Idempotent; safe to call at
    /// any point of the sub-task lifecycle.
    pub(crate) fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    /// Delivers the outcome to the completion sink. Only the first call has
    /// an effect.
    pub(crate) fn complete(&self, status: TaskStatus) {
        let sink = self
            .sink
            .lock()
            .expect("sub-task sink lock poisoned")
            .take();
        if let Some(sink) = sink {
            sink(status);
        }
    }

    fn execute(&self) -> TaskStatus {
        match catch_unwind(AssertUnwindSafe(|| self.worker.run(&self.ctx))) {
            Ok(status) => status,
            Err(_) => {
                error!(
                    "Executor: worker panicked for {}",
                    self.ctx.item().uri()
                );
                TaskStatus::Failed
            }
        }
    }
}

struct ExecutorState {
    queue: VecDeque<Arc<SubTask>>,
    running: Vec<Arc<SubTask>>,
    accepting: bool,
}

struct ExecutorShared {
    name: &'static str,
    state: Mutex<ExecutorState>,
    work_available: Condvar,
}

/// FIFO worker pool of one domain.
pub(crate) struct Executor {
    shared: Arc<ExecutorShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Spawns `max_threads` dispatch threads (0 means 1).
    pub(crate) fn new(name: &'static str, max_threads: usize) -> Self {
        let shared = Arc::new(ExecutorShared {
            name,
            state: Mutex::new(ExecutorState {
                queue: VecDeque::new(),
                running: Vec::new(),
                accepting: true,
            }),
            work_available: Condvar::new(),
        });

        let width = max_threads.max(1);
        let threads = (0..width)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || Self::dispatch_loop(shared, index))
            })
            .collect();
        debug!("Executor({name}): started with {width} thread(s)");

        Self {
            shared,
            threads: Mutex::new(threads),
        }
    }

    fn dispatch_loop(shared: Arc<ExecutorShared>, index: usize) {
        loop {
            let task = {
                let mut state = shared
                    .state
                    .lock()
                    .expect("executor state lock poisoned");
                while state.queue.is_empty() && state.accepting {
                    state = shared
                        .work_available
                        .wait(state)
                        .expect("executor state lock poisoned");
                }
                match state.queue.pop_front() {
                    Some(task) => {
                        state.running.push(Arc::clone(&task));
                        task
                    }
                    // Shutting down with an empty queue.
                    None => break,
                }
            };

            let status = task.execute();
            task.complete(status);

            let mut state = shared
                .state
                .lock()
                .expect("executor state lock poisoned");
            state
                .running
                .retain(|running| !Arc::ptr_eq(running, &task));
        }
        debug!(
            "Executor({}): dispatch thread {index} exiting",
            shared.name
        );
    }

    /// Appends the sub-task to the FIFO queue. A submission racing shutdown
    /// is completed as `Interrupted` from the calling thread so the outcome
    /// contract holds regardless.
    pub(crate) fn submit(&self, task: Arc<SubTask>) {
        let accepted = {
            let mut state = self
                .shared
                .state
                .lock()
                .expect("executor state lock poisoned");
            if state.accepting {
                state.queue.push_back(Arc::clone(&task));
                true
            } else {
                false
            }
        };

        if accepted {
            self.shared.work_available.notify_one();
        } else {
            debug!(
                "Executor({}): rejecting submission during shutdown",
                self.shared.name
            );
            task.interrupt();
            task.complete(TaskStatus::Interrupted);
        }
    }

    /// Cancels one sub-task: removes it from the queue if still pending,
    /// and raises its interrupt token either way. Idempotent.
    pub(crate) fn cancel(&self, task: &Arc<SubTask>) {
        let dequeued = {
            let mut state = self
                .shared
                .state
                .lock()
                .expect("executor state lock poisoned");
            state
                .queue
                .iter()
                .position(|queued| Arc::ptr_eq(queued, task))
                .and_then(|position| state.queue.remove(position))
        };

        task.interrupt();
        if let Some(dequeued) = dequeued {
            dequeued.complete(TaskStatus::Interrupted);
        }
    }

    /// Stops accepting submissions, cancels everything outstanding and
    /// blocks until all dispatch threads have exited.
    pub(crate) fn drain_and_shutdown(&self) {
        let (cancelled, running) = {
            let mut state = self
                .shared
                .state
                .lock()
                .expect("executor state lock poisoned");
            state.accepting = false;
            let cancelled: Vec<Arc<SubTask>> = state.queue.drain(..).collect();
            (cancelled, state.running.clone())
        };
        self.shared.work_available.notify_all();

        for task in &running {
            task.interrupt();
        }
        for task in cancelled {
            task.interrupt();
            task.complete(TaskStatus::Interrupted);
        }

        let threads = std::mem::take(
            &mut *self.threads.lock().expect("executor threads lock poisoned"),
        );
        for handle in threads {
            if handle.join().is_err() {
                error!(
                    "Executor({}): dispatch thread terminated by panic",
                    self.shared.name
                );
            }
        }
        debug!("Executor({}): drained and shut down", self.shared.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{InputItem, ParseCallbacks};
    use crate::protocol::{Domain, SeekArg};
    use crate::request::{Request, RequestSink};
    use std::sync::mpsc;
    use std::time::Duration;

    struct NoopParseCallbacks;

    impl ParseCallbacks for NoopParseCallbacks {
        fn on_preparse_ended(&self, _item: &Arc<InputItem>, _status: TaskStatus) {}
    }

    struct OrderedWorker {
        tag: u32,
        log: Arc<Mutex<Vec<u32>>>,
    }

    impl Worker for OrderedWorker {
        fn run(&self, _ctx: &WorkerContext) -> TaskStatus {
            self.log
                .lock()
                .expect("order log lock poisoned")
                .push(self.tag);
            TaskStatus::Ok
        }
    }

    struct BlockUntilInterrupted;

    impl Worker for BlockUntilInterrupted {
        fn run(&self, ctx: &WorkerContext) -> TaskStatus {
            loop {
                if let Some(status) = ctx.cancellation_status() {
                    return status;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn test_task(
        worker: Arc<dyn Worker>,
        outcome_tx: mpsc::Sender<TaskStatus>,
    ) -> Arc<SubTask> {
        let item = InputItem::new("file:///music/executor-test.flac");
        let request = Request::new(
            1,
            Arc::clone(&item),
            RequestSink::Parse(Arc::new(NoopParseCallbacks)),
            1,
        );
        let interrupt = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext::new(
            item,
            Domain::Parse,
            false,
            false,
            SeekArg::default(),
            None,
            Arc::clone(&interrupt),
            request,
        );
        SubTask::new(
            worker,
            ctx,
            interrupt,
            Box::new(move |status| {
                let _ = outcome_tx.send(status);
            }),
        )
    }

    #[test]
    fn test_single_thread_dispatch_is_fifo() {
        let executor = Executor::new("test", 1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        for tag in 0..4u32 {
            executor.submit(test_task(
                Arc::new(OrderedWorker {
                    tag,
                    log: Arc::clone(&log),
                }),
                tx.clone(),
            ));
        }
        for _ in 0..4 {
            let status = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("every sub-task should complete");
            assert_eq!(status, TaskStatus::Ok);
        }

        assert_eq!(
            *log.lock().expect("order log lock poisoned"),
            vec![0, 1, 2, 3]
        );
        executor.drain_and_shutdown();
    }

    #[test]
    fn test_cancel_queued_task_completes_interrupted_without_running() {
        let executor = Executor::new("test", 1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (blocker_tx, blocker_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();

        // Occupy the single dispatch thread so later submissions stay queued.
        let blocker = test_task(Arc::new(BlockUntilInterrupted), blocker_tx);
        executor.submit(Arc::clone(&blocker));

        let queued = test_task(
            Arc::new(OrderedWorker {
                tag: 7,
                log: Arc::clone(&log),
            }),
            tx,
        );
        executor.submit(Arc::clone(&queued));

        executor.cancel(&queued);
        let status = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("cancelled queued task should still complete");
        assert_eq!(status, TaskStatus::Interrupted);
        assert!(
            log.lock().expect("order log lock poisoned").is_empty(),
            "cancelled queued task should never run its worker"
        );

        executor.cancel(&blocker);
        assert_eq!(
            blocker_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("running task should complete after interrupt"),
            TaskStatus::Interrupted
        );
        executor.drain_and_shutdown();
    }

    #[test]
    fn test_drain_and_shutdown_interrupts_running_and_queued_work() {
        let executor = Executor::new("test", 1);
        let (running_tx, running_rx) = mpsc::channel();
        let (queued_tx, queued_rx) = mpsc::channel();

        executor.submit(test_task(Arc::new(BlockUntilInterrupted), running_tx));
        executor.submit(test_task(Arc::new(BlockUntilInterrupted), queued_tx));

        executor.drain_and_shutdown();
        assert_eq!(
            running_rx.try_recv().expect("running task should have completed"),
            TaskStatus::Interrupted
        );
        assert_eq!(
            queued_rx.try_recv().expect("queued task should have completed"),
            TaskStatus::Interrupted
        );
    }

    #[test]
    fn test_submit_after_shutdown_completes_interrupted() {
        let executor = Executor::new("test", 2);
        executor.drain_and_shutdown();

        let (tx, rx) = mpsc::channel();
        executor.submit(test_task(Arc::new(BlockUntilInterrupted), tx));
        assert_eq!(
            rx.try_recv()
                .expect("post-shutdown submission should complete synchronously"),
            TaskStatus::Interrupted
        );
    }
}
