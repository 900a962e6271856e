//! Named serial execution queues.
//!
//! An [`EventLoop`] is one OS thread draining a FIFO of jobs. Jobs submitted
//! to the same loop never overlap and run in submission order, which is
//! what stream connections rely on to mutate their credit counters without
//! further coordination.
//!
//! ```text
//! EventLoopGroup
//!   ├── EventLoop "ebb-loop-0"  (thread + unbounded job queue)
//!   └── EventLoop "ebb-loop-1"
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use ebb_core::EventLoopConfig;
use ebb_future::{Future, FutureResult, Promise};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::StreamError;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

struct LoopInner {
    name: String,
    sender: mpsc::UnboundedSender<Message>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a serial queue. Cheap to clone.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

impl EventLoop {
    /// Start a new loop on a dedicated thread named `name`.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let loop_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(&loop_name, receiver))?;

        Ok(Self {
            inner: Arc::new(LoopInner {
                name,
                sender,
                thread_id: handle.thread().id(),
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is this loop's thread.
    pub fn in_event_loop(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Queue `job` behind everything already submitted.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(err) = self.try_execute(job) {
            warn!(error = %err, "dropping job");
        }
    }

    /// Like [`execute`](Self::execute) but reports a stopped loop.
    pub fn try_execute<F>(&self, job: F) -> Result<(), StreamError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .sender
            .send(Message::Run(Box::new(job)))
            .map_err(|_| StreamError::EventLoopShutdown(self.inner.name.clone()))
    }

    /// Run `work` on the loop and resolve the returned future with its
    /// outcome. If the loop has stopped, the future fails with a broken
    /// promise.
    pub fn submit<T, F>(&self, work: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> FutureResult<T> + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        self.execute(move || {
            promise.resolve(work());
        });
        future
    }

    /// Stop the loop after the jobs already queued. Blocks until the
    /// thread exits unless called from the loop itself.
    pub fn shutdown(&self) {
        if self.inner.sender.send(Message::Shutdown).is_err() {
            return;
        }
        if self.in_event_loop() {
            return;
        }
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(event_loop = %self.inner.name, "event loop thread panicked");
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.inner.name)
            .finish()
    }
}

fn run(name: &str, mut receiver: mpsc::UnboundedReceiver<Message>) {
    debug!(event_loop = name, "event loop started");
    while let Some(message) = receiver.blocking_recv() {
        match message {
            Message::Run(job) => {
                // A panicking job must not take the queue down with it.
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(event_loop = name, "job panicked");
                }
            }
            Message::Shutdown => break,
        }
    }
    debug!(event_loop = name, "event loop stopped");
}

/// A fixed set of loops handed out round-robin.
pub struct EventLoopGroup {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    /// Start `threads` loops named `{prefix}-{index}`. At least one loop is
    /// always started.
    pub fn new(threads: usize, prefix: &str) -> std::io::Result<Self> {
        let loops = (0..threads.max(1))
            .map(|i| EventLoop::spawn(format!("{prefix}-{i}")))
            .collect::<std::io::Result<Vec<_>>>()?;
        debug!(threads = loops.len(), prefix, "event loop group started");
        Ok(Self {
            loops,
            next: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &EventLoopConfig) -> std::io::Result<Self> {
        Self::new(config.threads, &config.name_prefix)
    }

    /// The next loop in round-robin order.
    pub fn next(&self) -> &EventLoop {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        &self.loops[index]
    }

    pub fn loops(&self) -> &[EventLoop] {
        &self.loops
    }

    pub fn shutdown(&self) {
        for event_loop in &self.loops {
            event_loop.shutdown();
        }
    }
}

/// Redispatch a future's resolution onto an event loop.
pub trait HopExt<T> {
    /// A future resolving with the same outcome, but whose waiters run on
    /// `event_loop`.
    fn hop_to(&self, event_loop: &EventLoop) -> Future<T>;
}

impl<T: Clone + Send + 'static> HopExt<T> for Future<T> {
    fn hop_to(&self, event_loop: &EventLoop) -> Future<T> {
        let promise = Promise::new();
        let hopped = promise.future();
        let event_loop = event_loop.clone();
        self.add_waiter(move |result| {
            if event_loop.in_event_loop() {
                promise.resolve(result);
            } else {
                event_loop.execute(move || {
                    promise.resolve(result);
                });
            }
        });
        hopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn jobs_run_in_submission_order() {
        let event_loop = EventLoop::spawn("order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            event_loop.execute(move || seen.lock().unwrap().push(i));
        }
        event_loop.submit(|| Ok(())).blocking_await_timeout(WAIT).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
        event_loop.shutdown();
    }

    #[test]
    fn in_event_loop_is_only_true_on_the_loop_thread() {
        let event_loop = EventLoop::spawn("identity").unwrap();
        assert!(!event_loop.in_event_loop());
        let inside = event_loop.clone();
        let on_loop = event_loop
            .submit(move || Ok(inside.in_event_loop()))
            .blocking_await_timeout(WAIT)
            .unwrap();
        assert!(on_loop);
        event_loop.shutdown();
    }

    #[test]
    fn submit_propagates_failure() {
        let event_loop = EventLoop::spawn("failing").unwrap();
        let err = event_loop
            .submit::<u8, _>(|| Err(ebb_future::Error::msg("nope")))
            .blocking_await_timeout(WAIT)
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
        event_loop.shutdown();
    }

    #[test]
    fn panicking_job_does_not_stop_the_loop() {
        let event_loop = EventLoop::spawn("panics").unwrap();
        event_loop.execute(|| panic!("job failure"));
        let value = event_loop
            .submit(|| Ok(3))
            .blocking_await_timeout(WAIT)
            .unwrap();
        assert_eq!(value, 3);
        event_loop.shutdown();
    }

    #[test]
    fn submit_after_shutdown_breaks_the_promise() {
        let event_loop = EventLoop::spawn("stopped").unwrap();
        event_loop.shutdown();
        assert!(event_loop.try_execute(|| {}).is_err());
        let err = event_loop
            .submit(|| Ok(1))
            .blocking_await_timeout(WAIT)
            .unwrap_err();
        assert!(err.is_broken_promise());
    }

    #[test]
    fn group_hands_out_loops_round_robin() {
        let group = EventLoopGroup::new(3, "rr").unwrap();
        let names: Vec<String> = (0..6).map(|_| group.next().name().to_string()).collect();
        assert_eq!(names, vec!["rr-0", "rr-1", "rr-2", "rr-0", "rr-1", "rr-2"]);
        group.shutdown();
    }

    #[test]
    fn group_from_config_never_starts_zero_loops() {
        let config = EventLoopConfig {
            threads: 0,
            name_prefix: "cfg".to_string(),
        };
        let group = EventLoopGroup::from_config(&config).unwrap();
        assert_eq!(group.loops().len(), 1);
        assert_eq!(group.next().name(), "cfg-0");
        group.shutdown();
    }

    #[test]
    fn hop_to_runs_waiters_on_the_loop() {
        let event_loop = EventLoop::spawn("hop").unwrap();
        let promise = Promise::new();
        let hopped = promise.future().hop_to(&event_loop);

        let (tx, rx) = std::sync::mpsc::channel();
        let probe = event_loop.clone();
        hopped.then(move |value: u32| {
            tx.send((value, probe.in_event_loop())).unwrap();
        });

        promise.complete(8);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (8, true));
        event_loop.shutdown();
    }
}
