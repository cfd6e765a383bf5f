use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyEvent, KeyEventKind};
use tracing::debug;

use crate::execution::{
    CancelFlag, CodeExecutor, ExecutionError, ExecutionOutput, ExecutionRequest,
};

/// Production tick interval: the challenge counts whole seconds
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Unified event type consumed by the app runner
#[derive(Debug)]
pub enum ChallengeEvent {
    Key(KeyEvent),
    Resize,
    Tick,
    RunFinished(RunReport),
}

/// Result of a submission run, tagged with the run that produced it
#[derive(Debug)]
pub struct RunReport {
    pub run_id: u64,
    pub result: Result<ExecutionOutput, ExecutionError>,
}

/// Source of terminal events (keyboard, resize, etc.)
pub trait EventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<ChallengeEvent, RecvTimeoutError>;
}

/// Production event source using crossterm.
///
/// Terminal input and finished runs share one channel; [`Self::sender`]
/// hands out the run side.
pub struct CrosstermEventSource {
    tx: Sender<ChallengeEvent>,
    rx: Receiver<ChallengeEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let input = tx.clone();

        std::thread::spawn(move || loop {
            match event::read() {
                Ok(CtEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                    if input.send(ChallengeEvent::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(CtEvent::Resize(_, _)) => {
                    if input.send(ChallengeEvent::Resize).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        });

        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<ChallengeEvent> {
        self.tx.clone()
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<ChallengeEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedTicker {
    fn default() -> Self {
        Self::new(TICK_INTERVAL)
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<ChallengeEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<ChallengeEvent>) -> Self {
        Self { rx }
    }
}

impl EventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<ChallengeEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Runner that advances the application one event/tick at a time.
///
/// Ticks are produced on the caller's thread against a fixed deadline, so
/// input does not postpone them, there is never more than one outstanding,
/// and dropping the runner cancels them. A loop that falls behind gets one
/// tick and a fresh deadline, never a burst.
pub struct Runner<E: EventSource, T: Ticker> {
    event_source: E,
    ticker: T,
    next_tick: Instant,
}

impl<E: EventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        let next_tick = Instant::now() + ticker.interval();
        Self {
            event_source,
            ticker,
            next_tick,
        }
    }

    /// Blocks until the next event or the tick deadline, whichever is first
    pub fn step(&mut self) -> ChallengeEvent {
        let now = Instant::now();
        if now < self.next_tick {
            match self.event_source.recv_timeout(self.next_tick - now) {
                Ok(ev) => return ev,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(self.next_tick.saturating_duration_since(Instant::now()));
                }
            }
        }

        let interval = self.ticker.interval();
        let now = Instant::now();
        self.next_tick += interval;
        if self.next_tick <= now {
            self.next_tick = now + interval;
        }
        ChallengeEvent::Tick
    }
}

struct PendingRun {
    run_id: u64,
    cancel: CancelFlag,
}

/// Runs submissions on a background thread and posts each result back to the
/// loop as [`ChallengeEvent::RunFinished`], so ticks keep flowing while a
/// program runs. At most one run is in flight; cancelling it tells the
/// executor to stop and makes its report stale.
pub struct SubmissionWorker<X: CodeExecutor> {
    executor: Arc<X>,
    events: Sender<ChallengeEvent>,
    next_id: u64,
    pending: Option<PendingRun>,
}

impl<X: CodeExecutor> SubmissionWorker<X> {
    pub fn new(executor: X, events: Sender<ChallengeEvent>) -> Self {
        Self {
            executor: Arc::new(executor),
            events,
            next_id: 0,
            pending: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    /// Start running `request`; returns the run id, or None while another run is in flight
    pub fn submit(&mut self, request: ExecutionRequest) -> Option<u64> {
        if self.pending.is_some() {
            return None;
        }

        self.next_id += 1;
        let run_id = self.next_id;
        let cancel = CancelFlag::new();

        let executor = Arc::clone(&self.executor);
        let events = self.events.clone();
        let flag = cancel.clone();
        std::thread::spawn(move || {
            let result = executor.execute(&request, &flag);
            // The loop may already be gone; nobody is left to tell.
            let _ = events.send(ChallengeEvent::RunFinished(RunReport { run_id, result }));
        });

        debug!(run_id, "submission started");
        self.pending = Some(PendingRun { run_id, cancel });
        Some(run_id)
    }

    /// Claim a finished run. False for reports of cancelled or unknown runs.
    pub fn finish(&mut self, report: &RunReport) -> bool {
        match &self.pending {
            Some(pending) if pending.run_id == report.run_id => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
            debug!(run_id = pending.run_id, "submission cancelled");
        }
    }
}

impl<X: CodeExecutor> Drop for SubmissionWorker<X> {
    fn drop(&mut self) {
        self.cancel();
    }
}
