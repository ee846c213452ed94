use async_trait::async_trait;
use parking_lot::Mutex;
use pool_core::{
    ChainHooks, DaemonClient, Error, ErrorReporter, JobSource, PoolConfig, Result,
    StratumHandle, WorkerAuthorizer,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ordered record of hook invocations shared between mocks
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: &str) {
        self.0.lock().push(call.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.lock().iter().filter(|c| c.as_str() == call).count()
    }

    /// Position of the first occurrence of `call`
    pub fn position(&self, call: &str) -> Option<usize> {
        self.0.lock().iter().position(|c| c == call)
    }
}

/// Work produced by `MockChain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockJob {
    pub job_id: u64,
    pub coin: String,
}

/// Per-connection state handed out for `MockChain`
#[derive(Debug)]
pub struct MockWorkerContext {
    /// Construction order, starting at 1
    pub serial: usize,
    pub difficulty: Mutex<f64>,
}

/// Scripted outcome of one `update_job` call
#[derive(Debug, Clone)]
pub enum PollStep {
    NoWork,
    NewWork,
    Fail,
    Panic,
    /// Take `Duration` and then report new work
    Slow(Duration),
}

/// Scriptable chain module.
///
/// Health answers come from a queue and default to healthy once it runs
/// dry. Poll steps work the same way and default to `NoWork`.
pub struct MockChain {
    coin: String,
    log: CallLog,
    health: Mutex<VecDeque<bool>>,
    polls: Mutex<VecDeque<PollStep>>,
    pending: Mutex<Option<MockJob>>,
    fail_sync: bool,
    fail_post_init: bool,
    next_job: AtomicU64,
    contexts_created: AtomicUsize,
}

impl MockChain {
    pub fn new(log: CallLog) -> Self {
        Self {
            coin: "bitcoin".to_string(),
            log,
            health: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            pending: Mutex::new(None),
            fail_sync: false,
            fail_post_init: false,
            next_job: AtomicU64::new(0),
            contexts_created: AtomicUsize::new(0),
        }
    }

    pub fn with_health(self, answers: Vec<bool>) -> Self {
        *self.health.lock() = answers.into();
        self
    }

    pub fn with_polls(self, steps: Vec<PollStep>) -> Self {
        *self.polls.lock() = steps.into();
        self
    }

    pub fn with_sync_failure(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    pub fn with_post_init_failure(mut self) -> Self {
        self.fail_post_init = true;
        self
    }

    /// Queue more poll steps on a running chain
    pub fn push_polls(&self, steps: Vec<PollStep>) {
        self.polls.lock().extend(steps);
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    fn stage_job(&self) {
        let job_id = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        *self.pending.lock() = Some(MockJob {
            job_id,
            coin: self.coin.clone(),
        });
    }
}

#[async_trait]
impl JobSource for MockChain {
    type JobParams = MockJob;

    async fn update_job(&self) -> Result<bool> {
        self.log.record("update_job");
        let step = self.polls.lock().pop_front().unwrap_or(PollStep::NoWork);
        match step {
            PollStep::NoWork => Ok(false),
            PollStep::NewWork => {
                self.stage_job();
                Ok(true)
            }
            PollStep::Fail => Err(Error::Daemon("getblocktemplate failed".to_string())),
            PollStep::Panic => panic!("mock chain poll panicked"),
            PollStep::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.stage_job();
                Ok(true)
            }
        }
    }

    fn job_params(&self) -> Result<MockJob> {
        self.log.record("job_params");
        self.pending
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("No staged job".to_string()))
    }
}

#[async_trait]
impl ChainHooks for MockChain {
    type WorkerContext = MockWorkerContext;

    async fn is_daemon_healthy(&self) -> bool {
        self.log.record("health");
        self.health.lock().pop_front().unwrap_or(true)
    }

    async fn ensure_daemons_synced(&self) -> Result<()> {
        self.log.record("sync");
        if self.fail_sync {
            return Err(Error::Daemon("Daemon still in initial block download".to_string()));
        }
        Ok(())
    }

    async fn post_start_init(&self) -> Result<()> {
        self.log.record("postinit");
        if self.fail_post_init {
            return Err(Error::Internal("Mock post-start failure".to_string()));
        }
        Ok(())
    }

    fn new_worker_context(&self) -> MockWorkerContext {
        let serial = self.contexts_created.fetch_add(1, Ordering::SeqCst) + 1;
        // Widen the window in which a racing second construction would show up
        std::thread::sleep(Duration::from_millis(1));
        MockWorkerContext {
            serial,
            difficulty: Mutex::new(1.0),
        }
    }
}

/// Mock daemon connection
pub struct MockDaemon {
    log: CallLog,
    should_fail: bool,
    starts: AtomicU32,
}

impl MockDaemon {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            should_fail: false,
            starts: AtomicU32::new(0),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn start(&self, _config: &PoolConfig) -> Result<()> {
        self.log.record("daemon_start");
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            Err(Error::DaemonStartup("Mock daemon refused connection".to_string()))
        } else {
            Ok(())
        }
    }
}

/// One recorded `authorize` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCall {
    pub pool_id: String,
    pub remote_endpoint: SocketAddr,
    pub worker_name: String,
    pub password: String,
}

/// Authorizer that records its inputs and returns a fixed verdict
pub struct MockAuthorizer {
    verdict: bool,
    should_fail: bool,
    calls: Mutex<Vec<AuthCall>>,
}

impl MockAuthorizer {
    pub fn allowing() -> Self {
        Self {
            verdict: true,
            should_fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn denying() -> Self {
        Self {
            verdict: false,
            ..Self::allowing()
        }
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::allowing()
        }
    }

    pub fn calls(&self) -> Vec<AuthCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WorkerAuthorizer for MockAuthorizer {
    async fn authorize(
        &self,
        pool: &PoolConfig,
        remote_endpoint: SocketAddr,
        worker_name: &str,
        password: &str,
    ) -> Result<bool> {
        self.calls.lock().push(AuthCall {
            pool_id: pool.id.clone(),
            remote_endpoint,
            worker_name: worker_name.to_string(),
            password: password.to_string(),
        });
        if self.should_fail {
            return Err(Error::Authorization("Mock authorizer backend down".to_string()));
        }
        Ok(self.verdict)
    }
}

/// Stratum server handle with a fixed id
pub struct MockStratum {
    server_id: String,
}

impl MockStratum {
    pub fn new(server_id: &str) -> Arc<Self> {
        Arc::new(Self {
            server_id: server_id.to_string(),
        })
    }
}

impl StratumHandle for MockStratum {
    fn server_id(&self) -> String {
        self.server_id.clone()
    }
}

/// Error reporter that keeps every report
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reports as `outer:inner` error categories
    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &Error) {
        let inner = match error {
            Error::TransientPoll(inner) => inner.category(),
            other => other.category(),
        };
        self.reports.lock().push(format!("{}:{}", error.category(), inner));
    }
}
