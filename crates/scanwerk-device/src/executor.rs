// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Serial task executor.
//
// One worker thread executes submitted closures strictly in submission order.
// The worker owns an opaque context value `C` (in practice: the device
// backend) that is created *inside* the thread and never leaves it — tasks
// receive `&mut C`, which is the only way to touch the device.  Callers get a
// `PendingResult` per task and observe completion by polling, never by
// blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use scanwerk_core::error::{Result, ScanwerkError};

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

enum WorkerMessage<C> {
    Task(Job<C>),
    Stop,
}

/// Lifecycle of a pending task result: `Pending` until the worker finishes
/// the task, `Ready` until the caller takes the value, then `Consumed`.
enum PendingState<R> {
    Pending,
    Ready(Result<R>),
    Consumed,
}

/// Observable handle for the result of one submitted task.
///
/// The result is consumed exactly once via [`try_take`](Self::try_take); an
/// error returned by the task's closure is delivered here instead of
/// crashing the worker thread.
pub struct PendingResult<R> {
    state: Arc<Mutex<PendingState<R>>>,
}

impl<R> PendingResult<R> {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PendingState::Pending)),
        }
    }

    /// Whether the task has completed and the result is still unconsumed.
    pub fn is_ready(&self) -> bool {
        matches!(
            *self.state.lock().expect("pending result lock poisoned"),
            PendingState::Ready(_)
        )
    }

    /// Take the result if the task has completed.
    ///
    /// Returns `None` while the task is still running and after the result
    /// has already been taken.
    pub fn try_take(&self) -> Option<Result<R>> {
        let mut state = self.state.lock().expect("pending result lock poisoned");
        match &*state {
            PendingState::Ready(_) => {
                let PendingState::Ready(result) =
                    std::mem::replace(&mut *state, PendingState::Consumed)
                else {
                    unreachable!("state checked as Ready above");
                };
                Some(result)
            }
            PendingState::Pending | PendingState::Consumed => None,
        }
    }
}

/// Fire-and-forget task submission handle.
///
/// Cloneable and usable from inside worker tasks, which lets a task schedule
/// its own continuation (the scan read loop reschedules itself this way).
/// Scheduling after the worker has stopped is a silent no-op.
pub struct TaskScheduler<C> {
    tx: Sender<WorkerMessage<C>>,
}

impl<C> Clone for TaskScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> TaskScheduler<C> {
    /// Enqueue a task with no observable result.
    pub fn schedule(&self, f: impl FnOnce(&mut C) + Send + 'static) {
        if self.tx.send(WorkerMessage::Task(Box::new(f))).is_err() {
            debug!("task scheduled after worker stop — discarded");
        }
    }
}

/// Single-worker-thread task queue with strict FIFO execution.
pub struct SerialTaskExecutor<C> {
    tx: Sender<WorkerMessage<C>>,
    worker: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl<C: 'static> SerialTaskExecutor<C> {
    /// Spawn the worker thread.
    ///
    /// `make_ctx` runs on the worker thread and builds the context the
    /// worker will own; it receives a [`TaskScheduler`] so the context can
    /// enqueue follow-up tasks on its own queue.
    pub fn new<F>(name: &str, make_ctx: F) -> Result<Self>
    where
        F: FnOnce(TaskScheduler<C>) -> C + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<WorkerMessage<C>>();
        let cancel = Arc::new(AtomicBool::new(false));

        let scheduler = TaskScheduler { tx: tx.clone() };
        let worker_cancel = Arc::clone(&cancel);
        let worker = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let mut ctx = make_ctx(scheduler);
                while let Ok(message) = rx.recv() {
                    match message {
                        WorkerMessage::Task(job) => {
                            if worker_cancel.load(Ordering::Acquire) {
                                continue;
                            }
                            job(&mut ctx);
                        }
                        WorkerMessage::Stop => break,
                    }
                }
                debug!("executor worker stopped");
            })
            .map_err(|e| {
                ScanwerkError::Device(format!("failed to spawn executor worker: {e}"))
            })?;

        Ok(Self {
            tx,
            worker: Some(worker),
            cancel,
        })
    }

    /// Enqueue a unit of work and return a handle to its eventual result.
    ///
    /// Tasks run strictly in submission order, one at a time.  An `Err`
    /// returned by `f` is stored in the pending result for the caller to
    /// observe.
    ///
    /// Fails with `InvalidState` if the worker has already stopped.
    pub fn submit<R, F>(&self, f: F) -> Result<PendingResult<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> Result<R> + Send + 'static,
    {
        let pending = PendingResult::new();
        let state = Arc::clone(&pending.state);

        let job: Job<C> = Box::new(move |ctx| {
            let result = f(ctx);
            *state.lock().expect("pending result lock poisoned") = PendingState::Ready(result);
        });

        self.tx
            .send(WorkerMessage::Task(job))
            .map_err(|_| ScanwerkError::InvalidState("task submitted after executor stop".into()))?;

        Ok(pending)
    }

    /// A fire-and-forget scheduling handle onto this executor's queue.
    pub fn scheduler(&self) -> TaskScheduler<C> {
        TaskScheduler {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting new work, drain the queue, and join the worker.
    pub fn join(mut self) -> Result<()> {
        self.shutdown(false)
    }

    /// Like [`join`](Self::join), but discard queued tasks that have not
    /// started yet.
    pub fn join_cancel(mut self) -> Result<()> {
        self.shutdown(true)
    }

    fn shutdown(&mut self, discard_queued: bool) -> Result<()> {
        if discard_queued {
            self.cancel.store(true, Ordering::Release);
        }
        // The Stop sentinel queues behind every already-submitted task, so a
        // plain join drains the queue first.
        let _ = self.tx.send(WorkerMessage::Stop);
        if let Some(handle) = self.worker.take() {
            handle
                .join()
                .map_err(|_| ScanwerkError::Device("executor worker panicked".into()))?;
        }
        Ok(())
    }
}

impl<C> Drop for SerialTaskExecutor<C> {
    fn drop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        // Drain rather than discard: shutdown work (e.g. a scheduled device
        // close) queued just before the drop must still run.
        let _ = self.tx.send(WorkerMessage::Stop);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("executor worker panicked during drop");
            }
        }
    }
}
