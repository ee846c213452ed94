//! Demand-driven job polling and fan-out.
//!
//! A `JobStream` polls its `JobSource` on a fixed cadence while it is armed
//! and has at least one subscriber. The subscriber set and the run/stop
//! decision share one lock, so a subscriber arriving while the last one
//! leaves can never leave the loop running with nobody listening, or
//! stopped with somebody waiting.
//!
//! Runs take turns on a poll gate. A run started while its predecessor is
//! still inside a hook waits for that iteration to finish, so the hooks
//! are never called by two runs at once.

use crate::error::{Error, ErrorReporter};
use crate::hooks::JobSource;
use futures::{FutureExt, Stream};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Source<P> = Arc<dyn JobSource<JobParams = P>>;

struct Armed<P> {
    source: Source<P>,
    interval: Duration,
    reporter: Arc<dyn ErrorReporter>,
    runtime: Handle,
}

struct Run {
    generation: u64,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct State<P> {
    subscribers: HashMap<u64, mpsc::UnboundedSender<P>>,
    next_subscriber: u64,
    armed: Option<Armed<P>>,
    running: Option<Run>,
    retired: Vec<JoinHandle<()>>,
    next_generation: u64,
}

struct Shared<P> {
    state: Mutex<State<P>>,
    poll_gate: Arc<tokio::sync::Mutex<()>>,
}

/// Subscription surface of the job poller
pub struct JobStream<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for JobStream<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: Clone + Send + Sync + 'static> Default for JobStream<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send + Sync + 'static> JobStream<P> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    subscribers: HashMap::new(),
                    next_subscriber: 0,
                    armed: None,
                    running: None,
                    retired: Vec::new(),
                    next_generation: 0,
                }),
                poll_gate: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }

    /// Attach a consumer. Polling starts if this is the first subscriber
    /// of an armed stream.
    pub fn subscribe(&self) -> JobSubscription<P> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.shared.state.lock();

        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(id, sender);
        debug!(
            subscriber = id,
            subscribers = state.subscribers.len(),
            "Job subscriber attached"
        );

        if state.subscribers.len() == 1 {
            start_if_ready(&self.shared, &mut state);
        }

        JobSubscription {
            id,
            receiver,
            shared: self.shared.clone(),
        }
    }

    /// Enable polling of `source` every `interval`.
    ///
    /// Must be called from within a tokio runtime; the poll task is spawned
    /// on that runtime. Re-arming replaces the source and supersedes any
    /// run in progress.
    pub fn arm(
        &self,
        source: Source<P>,
        interval: Duration,
        reporter: Arc<dyn ErrorReporter>,
    ) -> crate::Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidArgument("Job refresh interval must be non-zero".to_string()));
        }
        let runtime = Handle::try_current().map_err(|e| {
            Error::Internal(format!("Job stream armed outside a tokio runtime: {}", e))
        })?;

        let mut state = self.shared.state.lock();
        stop_running(&mut state);
        state.armed = Some(Armed {
            source,
            interval,
            reporter,
            runtime,
        });
        info!(
            interval_ms = interval.as_millis() as u64,
            subscribers = state.subscribers.len(),
            "Job stream armed"
        );
        start_if_ready(&self.shared, &mut state);
        Ok(())
    }

    /// Disarm, stop every run, and wait for the poll tasks to exit.
    ///
    /// Open subscriptions are closed; their `recv` returns `None`.
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.shared.state.lock();
            state.armed = None;
            stop_running(&mut state);
            state.subscribers.clear();
            std::mem::take(&mut state.retired)
        };

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Job poll task ended abnormally: {}", e);
            }
        }
        info!("Job stream shut down");
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().armed.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.shared.state.lock().running.is_some()
    }

    /// Generation of the run currently polling, if any
    pub fn generation(&self) -> Option<u64> {
        self.shared.state.lock().running.as_ref().map(|run| run.generation)
    }
}

fn start_if_ready<P>(shared: &Arc<Shared<P>>, state: &mut State<P>)
where
    P: Clone + Send + Sync + 'static,
{
    if state.running.is_some() || state.subscribers.is_empty() {
        return;
    }
    let Some(armed) = state.armed.as_ref() else {
        return;
    };

    state.next_generation += 1;
    let generation = state.next_generation;
    let (stop, stop_rx) = watch::channel(false);

    let handle = armed.runtime.spawn(poll_loop(
        Arc::downgrade(shared),
        shared.poll_gate.clone(),
        generation,
        armed.source.clone(),
        armed.interval,
        armed.reporter.clone(),
        stop_rx,
    ));

    info!(generation, subscribers = state.subscribers.len(), "Job polling started");
    state.running = Some(Run {
        generation,
        stop,
        handle,
    });
}

fn stop_running<P>(state: &mut State<P>) {
    state.retired.retain(|handle| !handle.is_finished());

    if let Some(run) = state.running.take() {
        let _ = run.stop.send(true);
        info!(generation = run.generation, "Job polling stopped");
        state.retired.push(run.handle);
    }
}

/// Deliver to every subscriber if `generation` is still the live run.
/// Returns false once the stream itself is gone.
fn publish<P: Clone>(shared: &Weak<Shared<P>>, generation: u64, params: P) -> bool {
    let Some(shared) = shared.upgrade() else {
        return false;
    };
    let mut state = shared.state.lock();

    match state.running.as_ref() {
        Some(run) if run.generation == generation => {}
        _ => {
            debug!(generation, "Discarding job from superseded run");
            return true;
        }
    }

    state
        .subscribers
        .retain(|_, sender| sender.send(params.clone()).is_ok());
    debug!(generation, subscribers = state.subscribers.len(), "Job published");
    true
}

async fn poll_once<P>(source: &dyn JobSource<JobParams = P>) -> crate::Result<Option<P>>
where
    P: Clone + Send + Sync + 'static,
{
    if source.update_job().await? {
        Ok(Some(source.job_params()?))
    } else {
        Ok(None)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn poll_loop<P>(
    shared: Weak<Shared<P>>,
    gate: Arc<tokio::sync::Mutex<()>>,
    generation: u64,
    source: Source<P>,
    interval: Duration,
    reporter: Arc<dyn ErrorReporter>,
    mut stop: watch::Receiver<bool>,
) where
    P: Clone + Send + Sync + 'static,
{
    let _turn = gate.lock_owned().await;
    debug!(generation, "Job poll loop running");

    loop {
        if *stop.borrow() {
            break;
        }

        let started = Instant::now();
        match AssertUnwindSafe(poll_once(source.as_ref())).catch_unwind().await {
            Ok(Ok(Some(params))) => {
                if !publish(&shared, generation, params) {
                    break;
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => reporter.report(&Error::transient(e)),
            Err(payload) => reporter.report(&Error::transient(Error::Internal(format!(
                "Job hook panicked: {}",
                panic_message(payload)
            )))),
        }

        let elapsed = started.elapsed();
        let remaining = interval.saturating_sub(elapsed);
        if remaining.is_zero() {
            debug!(generation, elapsed_ms = elapsed.as_millis() as u64, "Poll overran interval");
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(generation, "Job poll loop exited");
}

/// One consumer of the job stream. Dropping it detaches; dropping the last
/// subscription stops polling.
pub struct JobSubscription<P> {
    id: u64,
    receiver: mpsc::UnboundedReceiver<P>,
    shared: Arc<Shared<P>>,
}

impl<P> JobSubscription<P> {
    /// Wait for the next job. Returns `None` after the stream shuts down.
    pub async fn recv(&mut self) -> Option<P> {
        self.receiver.recv().await
    }

    /// Take an already delivered job without waiting
    pub fn try_recv(&mut self) -> Option<P> {
        self.receiver.try_recv().ok()
    }
}

impl<P> Stream for JobSubscription<P> {
    type Item = P;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<P>> {
        self.receiver.poll_recv(cx)
    }
}

impl<P> Drop for JobSubscription<P> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if state.subscribers.remove(&self.id).is_some() {
            debug!(
                subscriber = self.id,
                subscribers = state.subscribers.len(),
                "Job subscriber detached"
            );
            if state.subscribers.is_empty() {
                stop_running(&mut state);
            }
        }
    }
}
