use std::sync::Mutex;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};

pub mod pinata;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Remote pinning service, seen as one submit call plus two count probes.
pub trait PinService {
    /// Checks credentials before any work is done.
    fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    /// Queues `req.content_hash` for pinning.
    fn submit(&self, req: &PinRequest) -> Result<()>;

    /// Number of pin jobs for `hash` still searching the network.
    fn pending_jobs(&self, hash: &str) -> Result<u64>;

    /// Number of pins for `hash` in the pinned set.
    fn pinned_count(&self, hash: &str) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRequest {
    pub content_hash: String,
    pub display_name: String,
    /// Multiaddrs of nodes already holding the content.
    pub host_nodes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Requested,
    Pending,
    Pinned,
    Failed,
}

impl PinState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PinState::Pinned | PinState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinEvent {
    Requested { hash: String },
    Pending { hash: String, polls: u64 },
    Pinned { hash: String },
    Failed { hash: String },
    SubmitFailed { hash: String, error: String },
}

pub trait PinSink {
    fn emit(&self, ev: PinEvent);
}

/// Logs pin progress.
#[derive(Default)]
pub struct TracingSink;

impl PinSink for TracingSink {
    fn emit(&self, ev: PinEvent) {
        match ev {
            PinEvent::Requested { hash } => info!(%hash, "pin requested"),
            PinEvent::Pending { hash, polls } => info!(%hash, polls, "pin currently pending"),
            PinEvent::Pinned { hash } => info!(%hash, "pinned via pin service"),
            PinEvent::Failed { hash } => warn!(%hash, "pin service did not pin content"),
            PinEvent::SubmitFailed { hash, error } => {
                warn!(%hash, %error, "pin request rejected")
            }
        }
    }
}

/// Keeps every event, for callers that want the history after the fact.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PinEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<PinEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl PinSink for RecordingSink {
    fn emit(&self, ev: PinEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(ev);
        }
    }
}

#[derive(Debug)]
struct PinJob {
    content_hash: String,
    display_name: String,
    state: PinState,
    polls: u64,
}

pub type SleepFn = fn(Duration);

/// Drives one pin request from `Requested` to `Pinned` or `Failed`.
///
/// Polls are strictly sequential: the next probe is issued only after the
/// previous one has answered and the poll interval has elapsed. There is no
/// deadline; callers that need one must impose it from outside.
pub struct PinStatusMachine<'a> {
    service: &'a dyn PinService,
    sink: &'a dyn PinSink,
    poll_interval: Duration,
    sleep: SleepFn,
}

impl<'a> PinStatusMachine<'a> {
    pub fn new(service: &'a dyn PinService, sink: &'a dyn PinSink) -> Self {
        Self {
            service,
            sink,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sleep: std::thread::sleep,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sleep(mut self, sleep: SleepFn) -> Self {
        self.sleep = sleep;
        self
    }

    /// Pins `req.content_hash`, returning it once the service confirms the pin.
    pub fn pin(&self, req: &PinRequest) -> Result<String> {
        let mut job = PinJob {
            content_hash: req.content_hash.clone(),
            display_name: req.display_name.clone(),
            state: PinState::Requested,
            polls: 0,
        };

        if let Err(err) = self.service.submit(req) {
            self.sink.emit(PinEvent::SubmitFailed {
                hash: job.content_hash.clone(),
                error: err.to_string(),
            });
            return Err(Error::pin_submit(&job.content_hash, err));
        }
        self.sink.emit(PinEvent::Requested {
            hash: job.content_hash.clone(),
        });
        job.state = PinState::Pending;

        loop {
            job.state = self.poll(&mut job);
            if job.state.is_terminal() {
                break;
            }
            self.sink.emit(PinEvent::Pending {
                hash: job.content_hash.clone(),
                polls: job.polls,
            });
            (self.sleep)(self.poll_interval);
        }

        if job.state == PinState::Pinned {
            self.sink.emit(PinEvent::Pinned {
                hash: job.content_hash.clone(),
            });
            return Ok(job.content_hash);
        }
        self.sink.emit(PinEvent::Failed {
            hash: job.content_hash.clone(),
        });
        Err(Error::pin_failed(&job.content_hash))
    }

    /// Runs one round of probes and returns the job's next state.
    fn poll(&self, job: &mut PinJob) -> PinState {
        job.polls += 1;
        if self.is_pending(&job.content_hash) {
            return PinState::Pending;
        }
        match self.service.pinned_count(&job.content_hash) {
            Ok(0) => PinState::Failed,
            Ok(_) => PinState::Pinned,
            Err(err) => {
                warn!(
                    hash = %job.content_hash,
                    name = %job.display_name,
                    error = %err,
                    "pinned-set probe failed; polling again"
                );
                PinState::Pending
            }
        }
    }

    fn is_pending(&self, hash: &str) -> bool {
        match self.service.pending_jobs(hash) {
            Ok(count) => count != 0,
            Err(err) => {
                warn!(%hash, error = %err, "pin job probe failed; treating as pending");
                true
            }
        }
    }
}
