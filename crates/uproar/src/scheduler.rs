//! The task scheduler: N worker threads, each owning one ring.
//!
//! A task is a closure run with its worker's proactor. Returning `true`
//! retires the task; `false` requeues it for the next pass, which is
//! how polling tasks wait without blocking their worker.
//!
//! Each worker drains tasks from a pair of queues: a lock-free incoming
//! queue any thread may push to, and a worker-local processing queue.
//! The worker refills the processing queue from the incoming side only
//! when it runs empty, so producers and the consumer rarely touch the
//! same structure. Submission round-robins across workers with one
//! atomic counter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use crossbeam_queue::SegQueue;
use uproar_core::{kdebug, kwarn, Result, UringError};

use crate::proactor::Proactor;
use crate::ring::RingConfig;

pub type Task = Box<dyn FnMut(&mut Proactor) -> bool + Send>;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub ring: RingConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            ring: RingConfig::default(),
        }
    }
}

/// One worker's drive loop state.
struct ActionProcessor {
    incoming: Arc<SegQueue<Task>>,
    processing: VecDeque<Task>,
    proactor: Proactor,
}

impl ActionProcessor {
    fn new(incoming: Arc<SegQueue<Task>>, proactor: Proactor) -> Self {
        Self { incoming, processing: VecDeque::new(), proactor }
    }

    /// Swap sides: only when the local queue is empty does the worker
    /// go back to the shared one.
    fn refill(&mut self) {
        if self.processing.is_empty() {
            while let Some(task) = self.incoming.pop() {
                self.processing.push_back(task);
            }
        }
    }

    /// Run every task currently queued once, then drive the ring.
    fn pass(&mut self) {
        self.refill();
        let count = self.processing.len();
        for _ in 0..count {
            if let Some(mut task) = self.processing.pop_front() {
                if !task(&mut self.proactor) {
                    self.processing.push_back(task);
                }
            }
        }
        if let Err(e) = self.proactor.process_io() {
            kwarn!("worker: process_io failed: {}", e);
        }
    }

    fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Acquire) {
            self.pass();
            thread::yield_now();
        }
        // One closing pass so tasks queued before the flag see a turn,
        // then tear the ring down; unfinished promises fail RingClosed.
        self.pass();
        self.proactor.close();
        kdebug!("worker: stopped");
    }
}

pub struct TaskScheduler {
    queues: Vec<Arc<SegQueue<Task>>>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    next: AtomicUsize,
}

impl TaskScheduler {
    /// Spawn the workers. Every worker builds its ring on its own
    /// thread and reports back; if any ring fails, the whole scheduler
    /// fails and the workers already started are shut down again.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let workers = config.workers.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        for id in 0..workers {
            let incoming: Arc<SegQueue<Task>> = Arc::new(SegQueue::new());
            queues.push(Arc::clone(&incoming));
            let ready = ready_tx.clone();
            let stop = Arc::clone(&shutdown);
            let ring = config.ring;
            let spawned = thread::Builder::new()
                .name(format!("uproar-worker-{}", id))
                .spawn(move || {
                    let proactor = match Proactor::new(ring) {
                        Ok(p) => {
                            let _ = ready.send(Ok(()));
                            p
                        }
                        Err(e) => {
                            let _ = ready.send(Err(e));
                            return;
                        }
                    };
                    kdebug!("worker {}: running", id);
                    ActionProcessor::new(incoming, proactor).run(&stop);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(_) => {
                    Self::abort_startup(&shutdown, handles);
                    return Err(UringError::WorkerStartup);
                }
            }
        }

        for _ in 0..workers {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    Self::abort_startup(&shutdown, handles);
                    return Err(e);
                }
                Err(_) => {
                    Self::abort_startup(&shutdown, handles);
                    return Err(UringError::WorkerStartup);
                }
            }
        }

        Ok(Self { queues, handles, shutdown, next: AtomicUsize::new(0) })
    }

    fn abort_startup(shutdown: &AtomicBool, handles: Vec<JoinHandle<()>>) {
        shutdown.store(true, Ordering::Release);
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub fn workers(&self) -> usize {
        self.queues.len()
    }

    /// Queue a task on the next worker in round-robin order. Fails
    /// synchronously once shutdown has been requested.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnMut(&mut Proactor) -> bool + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(UringError::SchedulerShutdown);
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.queues[idx].push(Box::new(task));
        Ok(())
    }

    /// Convenience for tasks that run exactly once.
    pub fn submit_once<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Proactor) + Send + 'static,
    {
        let mut f = Some(f);
        self.submit(move |proactor| {
            if let Some(f) = f.take() {
                f(proactor);
            }
            true
        })
    }

    /// Ask the workers to stop. Tasks already queued get a final pass;
    /// later submissions fail.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop and wait for every worker to finish.
    pub fn join(mut self) {
        self.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use std::time::{Duration, Instant};

    use uproar_core::Timeout;

    fn try_scheduler(workers: usize) -> Option<TaskScheduler> {
        TaskScheduler::new(SchedulerConfig {
            workers,
            ring: RingConfig { entries: 64 },
        })
        .ok()
    }

    fn wait_for<F: Fn() -> bool>(cond: F, max: Duration) -> bool {
        let deadline = Instant::now() + max;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn incoming_queue_survives_concurrent_producers() {
        // The shared side of the double buffer under pressure from many
        // producers, drained the way a worker drains it.
        let queue: Arc<SegQueue<usize>> = Arc::new(SegQueue::new());
        let mut producers = Vec::new();
        for t in 0..8 {
            let q = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for i in 0..1000 {
                    q.push(t * 1000 + i);
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }
        let mut processing = VecDeque::new();
        while let Some(v) = queue.pop() {
            processing.push_back(v);
        }
        assert_eq!(processing.len(), 8000);
        let distinct: std::collections::HashSet<_> = processing.iter().collect();
        assert_eq!(distinct.len(), 8000);
    }

    #[test]
    fn tasks_round_robin_across_workers() {
        let workers = 2;
        let Some(scheduler) = try_scheduler(workers) else { return };
        let seen: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 * workers {
            let seen = Arc::clone(&seen);
            scheduler
                .submit_once(move |_proactor| {
                    seen.lock().unwrap().push(thread::current().id());
                })
                .unwrap();
        }
        assert!(wait_for(|| seen.lock().unwrap().len() == 2 * workers, Duration::from_secs(5)));
        let mut counts: HashMap<ThreadId, usize> = HashMap::new();
        for id in seen.lock().unwrap().iter() {
            *counts.entry(*id).or_default() += 1;
        }
        assert_eq!(counts.len(), workers);
        assert!(counts.values().all(|&c| c == 2));
        scheduler.join();
    }

    #[test]
    fn returning_false_requeues_the_task() {
        let Some(scheduler) = try_scheduler(1) else { return };
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        scheduler
            .submit(move |_proactor| r.fetch_add(1, Ordering::SeqCst) + 1 >= 3)
            .unwrap();
        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 3, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        scheduler.join();
    }

    #[test]
    fn ring_operations_run_on_workers() {
        let Some(scheduler) = try_scheduler(2) else { return };
        let elapsed: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&elapsed);
        scheduler
            .submit_once(move |proactor| {
                proactor.delay(Timeout::from_millis(10)).on_complete(move |result| {
                    *out.lock().unwrap() = Some(result.unwrap());
                });
            })
            .unwrap();
        assert!(wait_for(|| elapsed.lock().unwrap().is_some(), Duration::from_secs(5)));
        assert!(elapsed.lock().unwrap().unwrap() >= Duration::from_millis(10));
        scheduler.join();
    }

    #[test]
    fn submit_after_shutdown_fails_fast() {
        let Some(scheduler) = try_scheduler(1) else { return };
        scheduler.shutdown();
        let err = scheduler.submit_once(|_proactor| {});
        assert_eq!(err, Err(UringError::SchedulerShutdown));
        scheduler.join();
    }
}
