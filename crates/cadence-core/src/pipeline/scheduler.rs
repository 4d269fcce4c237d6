//! Worker pool and the run queue.
//!
//! A node is in the queue at most once: enqueueing is a CAS from `Idle` to `Queued`.
//! A worker takes the node, runs it under its lock, puts it back to `Idle` and, if the
//! run made progress, offers the node and each of its peers to the queue again. A
//! request that arrives while the node is running turns into one more run.

use crate::backend::HardwareEventSender;
use crate::node::cell::{NodeCell, SchedState};
use crate::node::RunContext;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use thread_priority::ThreadPriority;

pub(crate) enum Task {
    Run(Arc<NodeCell>),
    Shutdown,
}

pub(crate) struct SchedulerShared {
    running: AtomicBool,
    /// Nodes queued or running.
    in_flight: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
    queue: Sender<Task>,
    pub(crate) events: HardwareEventSender,
    bpm: f64,
}

impl SchedulerShared {
    pub(crate) fn new(queue: Sender<Task>, events: HardwareEventSender, bpm: f64) -> Self {
        Self {
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            queue,
            events,
            bpm,
        }
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Queues `cell` for a run regardless of its ports.
    pub(crate) fn schedule(&self, cell: &Arc<NodeCell>) {
        if !self.is_running() {
            return;
        }
        loop {
            match cell.state() {
                SchedState::Idle => {
                    if cell.transition(SchedState::Idle, SchedState::Queued) {
                        self.in_flight.fetch_add(1, Ordering::SeqCst);
                        if self.queue.send(Task::Run(Arc::clone(cell))).is_err() {
                            cell.set_state(SchedState::Idle);
                            self.finish_one();
                        }
                        return;
                    }
                }
                SchedState::Running => {
                    if cell.transition(SchedState::Running, SchedState::RunningWoken) {
                        return;
                    }
                }
                SchedState::Queued | SchedState::RunningWoken => return,
            }
        }
    }

    pub(crate) fn schedule_if_runnable(&self, cell: &Arc<NodeCell>) {
        if cell.is_runnable() {
            self.schedule(cell);
        }
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }

    /// Blocks until no node is queued or running.
    pub(crate) fn wait_idle(&self) {
        let mut guard = self.idle_lock.lock();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            self.idle.wait(&mut guard);
        }
    }

    fn process(&self, cell: Arc<NodeCell>) {
        if !self.is_running() {
            cell.set_state(SchedState::Idle);
            self.finish_one();
            return;
        }

        cell.set_state(SchedState::Running);
        cell.being_processed.set(true);

        let links = cell.links.load_full();
        let progress = {
            let mut body = cell.body.lock();
            let body = &mut *body;
            let mut ctx = RunContext::new(
                &cell.timestamp,
                &mut body.ends,
                &links,
                self.bpm,
                &self.events,
                cell.descriptor.name(),
            );
            let processor = &mut body.processor;
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                processor.run(&mut ctx);
            }));
            if result.is_err() {
                tracing::error!("Node {} ({}) panicked in run", cell.id, cell.descriptor.name());
            }
            ctx.made_progress()
        };

        cell.being_processed.set(false);
        let previous = cell.swap_state(SchedState::Idle);

        if previous == SchedState::RunningWoken {
            self.schedule(&cell);
        } else if progress {
            self.schedule_if_runnable(&cell);
        }
        if progress {
            for peer in cell.peers() {
                self.schedule_if_runnable(&peer);
            }
        }

        self.finish_one();
    }
}

/// Thread-safe "mark runnable" handle for one node.
///
/// Hardware callbacks call [`NodeWaker::wake`] when a device frees space or delivers
/// data. Holds only weak references: waking a destroyed node or a dropped pipeline
/// does nothing.
#[derive(Clone, Default)]
pub struct NodeWaker {
    cell: Weak<NodeCell>,
    shared: Weak<SchedulerShared>,
}

impl NodeWaker {
    pub(crate) fn new(cell: Weak<NodeCell>, shared: Weak<SchedulerShared>) -> Self {
        Self { cell, shared }
    }

    /// A waker attached to nothing.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        if let (Some(cell), Some(shared)) = (self.cell.upgrade(), self.shared.upgrade()) {
            shared.schedule(&cell);
        }
    }
}

impl std::fmt::Debug for NodeWaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeWaker")
            .field("attached", &(self.cell.strong_count() > 0))
            .finish()
    }
}

/// Fixed pool of worker threads blocking on the run queue.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    queue: Sender<Task>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        count: usize,
        shared: &Arc<SchedulerShared>,
        queue: Sender<Task>,
        receiver: Receiver<Task>,
    ) -> crate::Result<Self> {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let shared = Arc::clone(shared);
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("cadence-worker-{}", index))
                .spawn(move || {
                    if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                        tracing::debug!("Worker {} keeps default priority: {:?}", index, e);
                    }
                    worker_loop(&shared, &receiver);
                })
                .map_err(|e| crate::Error::SystemResources(format!("spawning worker: {}", e)));
            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    let mut partial = Self { handles, queue };
                    partial.shutdown();
                    return Err(e);
                }
            }
        }
        tracing::debug!("Started {} pipeline workers", count);
        Ok(Self { handles, queue })
    }

    pub(crate) fn shutdown(&mut self) {
        for _ in 0..self.handles.len() {
            let _ = self.queue.send(Task::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &SchedulerShared, receiver: &Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        match task {
            Task::Run(cell) => shared.process(cell),
            Task::Shutdown => break,
        }
    }
}
