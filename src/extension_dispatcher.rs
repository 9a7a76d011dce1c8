//! Per-path async dispatcher.
//!
//! Queues are keyed on the scope path the script is defined at, not the path
//! the event was fired from. Each such path gets its own queue and worker
//! thread, created on first use. Jobs for one path run strictly in submission
//! order and never overlap, whichever descendant scope fired them; different
//! paths run in parallel. A worker that
//! sees no work for the idle window removes its own queue and exits; the next
//! dispatch for that path starts a fresh one.
//!
//! Sends happen while holding the queue map lock, and an idle worker only
//! retires after re-checking its channel under the same lock, so a job can
//! never be sent to a worker that has already decided to exit.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::engine::{ExecutionEngine, Invocation};
use crate::error::Result;
use crate::model::{Payload, ScopePath, ScriptDefinition};

/// Return marker bound for async invocations, whose results are discarded.
pub const ASYNC_RETURN_CLASS: &str = "void";

/// One fire-and-forget script run.
#[derive(Debug, Clone)]
pub struct AsyncJob {
    pub script: ScriptDefinition,
    pub event: String,
    /// Scope the event was fired at.
    pub scope: ScopePath,
    pub payload: Payload,
    pub parameters: Payload,
}

/// Executes queued jobs; the result value is discarded.
pub trait JobRunner: Send + Sync {
    fn run(&self, job: &AsyncJob) -> Result<()>;
}

impl JobRunner for ExecutionEngine {
    fn run(&self, job: &AsyncJob) -> Result<()> {
        self.execute(&Invocation {
            script: &job.script,
            event: &job.event,
            scope: &job.scope,
            payload: &job.payload,
            output: None,
            parameters: &job.parameters,
            return_class: ASYNC_RETURN_CLASS,
        })
        .map(|_| ())
    }
}

struct QueueHandle {
    sender: Sender<AsyncJob>,
    generation: u64,
    worker: JoinHandle<()>,
}

struct Shared {
    runner: Arc<dyn JobRunner>,
    idle: Duration,
    queues: Mutex<HashMap<String, QueueHandle>>,
    generations: AtomicU64,
}

pub struct AsyncDispatcher {
    shared: Arc<Shared>,
}

impl AsyncDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, idle: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                runner,
                idle,
                queues: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a job on its script path's queue and return immediately.
    pub fn dispatch(&self, job: AsyncJob) {
        let key = job.script.scope.as_str().to_string();
        let mut queues = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let job = match queues.get(&key) {
            Some(handle) => match handle.sender.send(job) {
                Ok(()) => return,
                // Worker is gone (it panicked outside a job); replace it.
                Err(mpsc::SendError(job)) => job,
            },
            None => job,
        };

        let handle = spawn_worker(&self.shared, key.clone());
        if handle.sender.send(job).is_err() {
            error!(event = "dispatcher.enqueue_failed", path = %key, "Async worker rejected job");
        }
        queues.insert(key, handle);
    }

    /// Script paths that currently have a live queue.
    pub fn active_queues(&self) -> usize {
        self.shared
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Close every queue and wait for queued jobs to finish.
    pub fn shutdown(&self) {
        let handles: Vec<QueueHandle> = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for QueueHandle { sender, worker, .. } in handles {
            drop(sender);
            if worker.join().is_err() {
                warn!(event = "dispatcher.worker_panicked", "Async worker panicked");
            }
        }
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(shared: &Arc<Shared>, key: String) -> QueueHandle {
    let (sender, receiver) = mpsc::channel();
    let generation = shared.generations.fetch_add(1, AtomicOrdering::SeqCst);
    let worker_shared = Arc::clone(shared);
    debug!(event = "dispatcher.queue_created", path = %key, generation, "Created async queue");
    let worker = thread::spawn(move || worker_loop(&worker_shared, &key, generation, &receiver));
    QueueHandle {
        sender,
        generation,
        worker,
    }
}

fn worker_loop(shared: &Shared, key: &str, generation: u64, receiver: &Receiver<AsyncJob>) {
    loop {
        match receiver.recv_timeout(shared.idle) {
            Ok(job) => run_job(shared, &job),
            Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                let mut queues = shared.queues.lock().unwrap_or_else(PoisonError::into_inner);
                if let Ok(job) = receiver.try_recv() {
                    drop(queues);
                    run_job(shared, &job);
                    continue;
                }
                if queues
                    .get(key)
                    .is_some_and(|handle| handle.generation == generation)
                {
                    queues.remove(key);
                }
                debug!(event = "dispatcher.queue_retired", path = %key, generation, "Retired idle async queue");
                return;
            }
        }
    }
}

fn run_job(shared: &Shared, job: &AsyncJob) {
    let script = job.script.id();
    match catch_unwind(AssertUnwindSafe(|| shared.runner.run(job))) {
        Ok(Ok(())) => debug!(
            event = "dispatcher.job_completed",
            script = %script,
            scope = %job.scope,
            extension_event = %job.event,
            "Async script completed"
        ),
        Ok(Err(err)) => warn!(
            event = "dispatcher.job_failed",
            script = %script,
            scope = %job.scope,
            extension_event = %job.event,
            error = %err,
            "Async script failed"
        ),
        Err(_) => error!(
            event = "dispatcher.job_panicked",
            script = %script,
            scope = %job.scope,
            extension_event = %job.event,
            "Async script panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;
    use std::time::Instant;

    use crate::error::Error;
    use crate::metadata::ScriptMetadata;

    #[derive(Default)]
    struct Recording {
        runs: Mutex<Vec<(String, String)>>,
        active: Mutex<HashMap<String, usize>>,
        overlapped: Mutex<bool>,
    }

    impl JobRunner for Recording {
        fn run(&self, job: &AsyncJob) -> Result<()> {
            let path = job.script.scope.to_string();
            {
                let mut active = self.active.lock().expect("lock");
                let count = active.entry(path.clone()).or_default();
                *count += 1;
                if *count > 1 {
                    *self.overlapped.lock().expect("lock") = true;
                }
            }
            thread::sleep(Duration::from_millis(2));
            *self.active.lock().expect("lock").entry(path.clone()).or_default() -= 1;

            let tag = job.payload.get("seq").map(ToString::to_string).unwrap_or_default();
            self.runs.lock().expect("lock").push((path, tag));
            if job.payload.contains_key("fail") {
                return Err(Error::runtime(job.script.id().to_string(), "boom"));
            }
            if job.payload.contains_key("panic") {
                panic!("job panicked");
            }
            Ok(())
        }
    }

    fn job(path: &str, seq: usize) -> AsyncJob {
        fired_at(path, path, seq)
    }

    fn fired_at(path: &str, firing: &str, seq: usize) -> AsyncJob {
        let mut payload = Payload::new();
        payload.insert("seq".into(), seq.into());
        AsyncJob {
            script: ScriptDefinition {
                scope: ScopePath::parse(path).expect("script path"),
                name: "hook".into(),
                source: String::new(),
                content_hash: String::new(),
                enabled: true,
                async_capable: true,
                subscribed_events: BTreeSet::new(),
                metadata: ScriptMetadata::default(),
            },
            event: "TICKET_ASSIGNED".into(),
            scope: ScopePath::parse(firing).expect("firing scope"),
            payload,
            parameters: Payload::new(),
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn same_scope_jobs_run_in_order_without_overlap() {
        let runner = Arc::new(Recording::default());
        let dispatcher = AsyncDispatcher::new(runner.clone(), Duration::from_secs(60));
        for seq in 0..20 {
            dispatcher.dispatch(job("acme", seq));
            dispatcher.dispatch(job("other", seq));
        }
        dispatcher.shutdown();

        let runs = runner.runs.lock().expect("lock");
        for scope in ["acme", "other"] {
            let order: Vec<String> = runs
                .iter()
                .filter(|(s, _)| s == scope)
                .map(|(_, seq)| seq.clone())
                .collect();
            let expected: Vec<String> = (0..20).map(|seq| seq.to_string()).collect();
            assert_eq!(order, expected);
        }
        assert!(!*runner.overlapped.lock().expect("lock"));
    }

    #[test]
    fn one_script_fired_from_sibling_scopes_shares_one_queue() {
        let runner = Arc::new(Recording::default());
        let dispatcher = AsyncDispatcher::new(runner.clone(), Duration::from_secs(60));
        for seq in 0..20 {
            let firing = if seq % 2 == 0 { "acme.a" } else { "acme.b" };
            dispatcher.dispatch(fired_at("acme", firing, seq));
        }
        assert_eq!(dispatcher.active_queues(), 1);
        dispatcher.shutdown();

        let seqs: Vec<String> = runner
            .runs
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, seq)| seq.clone())
            .collect();
        let expected: Vec<String> = (0..20).map(|seq| seq.to_string()).collect();
        assert_eq!(seqs, expected);
        assert!(!*runner.overlapped.lock().expect("lock"));
    }

    #[test]
    fn failing_and_panicking_jobs_do_not_stop_the_worker() {
        let runner = Arc::new(Recording::default());
        let dispatcher = AsyncDispatcher::new(runner.clone(), Duration::from_secs(60));
        let mut failing = job("acme", 0);
        failing.payload.insert("fail".into(), true.into());
        let mut panicking = job("acme", 1);
        panicking.payload.insert("panic".into(), true.into());
        dispatcher.dispatch(failing);
        dispatcher.dispatch(panicking);
        dispatcher.dispatch(job("acme", 2));
        dispatcher.shutdown();

        let seqs: Vec<String> = runner
            .runs
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, seq)| seq.clone())
            .collect();
        assert_eq!(seqs, vec!["0", "1", "2"]);
    }

    #[test]
    fn idle_queues_retire_and_restart_on_demand() {
        let runner = Arc::new(Recording::default());
        let dispatcher = AsyncDispatcher::new(runner.clone(), Duration::from_millis(50));
        dispatcher.dispatch(job("acme", 0));
        assert_eq!(dispatcher.active_queues(), 1);
        wait_for(|| dispatcher.active_queues() == 0);

        dispatcher.dispatch(job("acme", 1));
        wait_for(|| runner.runs.lock().expect("lock").len() == 2);
        dispatcher.shutdown();
    }

    #[test]
    fn concurrent_dispatchers_keep_per_caller_order() {
        let runner = Arc::new(Recording::default());
        let dispatcher = Arc::new(AsyncDispatcher::new(runner.clone(), Duration::from_secs(60)));
        let callers: Vec<_> = (0..4)
            .map(|caller| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || {
                    for seq in 0..10 {
                        dispatcher.dispatch(job("acme", caller * 100 + seq));
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.join().expect("join");
        }
        dispatcher.shutdown();

        let runs = runner.runs.lock().expect("lock");
        assert_eq!(runs.len(), 40);
        for caller in 0..4 {
            let seen: Vec<usize> = runs
                .iter()
                .filter_map(|(_, seq)| seq.parse::<usize>().ok())
                .filter(|seq| seq / 100 == caller)
                .collect();
            let mut sorted = seen.clone();
            sorted.sort_unstable();
            assert_eq!(seen, sorted);
        }
        assert!(!*runner.overlapped.lock().expect("lock"));
    }
}
