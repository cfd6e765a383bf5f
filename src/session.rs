//! Timed challenge attempt with a persistent lockout.
//!
//! A session counts down from the time budget once per tick. Running out of
//! time defeats the attempt and bars new attempts until `defeat + lockout`;
//! that instant is written to the [`KeyValueStore`] so reopening the
//! challenge after a restart still shows the lock. The lock countdown is
//! derived from the clock on every tick, so a stalled tick loop catches up
//! instead of drifting.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::format::{format_countdown, format_lock_countdown};
use crate::store::{decode_timestamp, encode_timestamp, KeyValueStore};

/// Key under which the lockout instant is persisted
pub const LOCK_KEY: &str = "challengeBlockedUntil";
pub const DEFAULT_TIME_BUDGET_SECS: u64 = 600;
pub const DEFAULT_LOCKOUT_SECS: u64 = 2 * 60 * 60;
const MAX_LOCKOUT_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub time_budget_secs: u64,
    pub lockout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            time_budget_secs: DEFAULT_TIME_BUDGET_SECS,
            lockout_secs: DEFAULT_LOCKOUT_SECS,
        }
    }
}

/// Which screen the rendering layer should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Mode {
    Active,
    Defeated,
    Locked,
    Completed,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing moved (completed, or defeated without a lock)
    Idle,
    /// The attempt countdown went down by one second
    Counted,
    /// The attempt ran out of time on this tick
    Defeated,
    /// The lock countdown was refreshed and is still running
    LockCounted,
    /// The lock expired; the rendering layer must reset to a fresh attempt
    ResetRequired,
}

/// Snapshot handed to the rendering layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeView {
    pub mode: Mode,
    pub time_remaining_secs: u64,
    pub lock_remaining_secs: u64,
    pub formatted_countdown: String,
    pub formatted_lock_countdown: String,
}

/// One challenge attempt bound to a store and a clock
#[derive(Debug)]
pub struct ChallengeSession<S: KeyValueStore, C: Clock> {
    store: S,
    clock: C,
    settings: SessionSettings,
    time_remaining_secs: u64,
    timer_running: bool,
    defeated: bool,
    completed: bool,
    lock_until: Option<DateTime<Utc>>,
    lock_remaining_secs: u64,
}

impl<S: KeyValueStore, C: Clock> ChallengeSession<S, C> {
    /// Open a session, restoring a persisted lock if one is still in force.
    ///
    /// An unreadable store starts a fresh attempt: losing a lock is
    /// acceptable, inventing one is not.
    pub fn open(store: S, clock: C, settings: SessionSettings) -> Self {
        let mut session = Self {
            store,
            clock,
            settings,
            time_remaining_secs: settings.time_budget_secs,
            timer_running: true,
            defeated: false,
            completed: false,
            lock_until: None,
            lock_remaining_secs: 0,
        };
        session.restore_lock();
        session
    }

    /// Start over on the same store and clock.
    ///
    /// This is how the rendering layer honours [`TickOutcome::ResetRequired`]:
    /// the old attempt is discarded and the persisted lock is read afresh.
    pub fn restart(&mut self) {
        self.time_remaining_secs = self.settings.time_budget_secs;
        self.timer_running = true;
        self.defeated = false;
        self.completed = false;
        self.lock_until = None;
        self.lock_remaining_secs = 0;
        self.restore_lock();
    }

    fn restore_lock(&mut self) {
        let now = self.clock.now();
        let stored = match self.store.get(LOCK_KEY) {
            Ok(Some(raw)) => match decode_timestamp(&raw) {
                Ok(until) => Some(until),
                Err(e) => {
                    warn!(error = %e, "discarding unreadable lockout timestamp");
                    self.forget_lock();
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read lockout state, starting unlocked");
                None
            }
        };

        match stored {
            Some(until) if until > now => {
                self.lock_until = Some(until);
                self.lock_remaining_secs = remaining_secs(until, now);
                self.timer_running = false;
                info!(
                    lock_until = %encode_timestamp(until),
                    remaining_secs = self.lock_remaining_secs,
                    "restored challenge lockout"
                );
            }
            Some(until) => {
                debug!(lock_until = %encode_timestamp(until), "stored lockout has expired");
                self.forget_lock();
            }
            None => {}
        }
    }

    /// Advance the session by one second
    pub fn tick(&mut self) -> TickOutcome {
        if let Some(until) = self.lock_until {
            let now = self.clock.now();
            self.lock_remaining_secs = remaining_secs(until, now);
            if self.lock_remaining_secs == 0 {
                self.lock_until = None;
                self.forget_lock();
                info!("challenge lockout expired");
                return TickOutcome::ResetRequired;
            }
            return TickOutcome::LockCounted;
        }

        if self.timer_running
            && self.time_remaining_secs > 0
            && !self.completed
            && !self.defeated
        {
            self.time_remaining_secs -= 1;
            if self.time_remaining_secs == 0 {
                self.defeat();
                return TickOutcome::Defeated;
            }
            return TickOutcome::Counted;
        }

        TickOutcome::Idle
    }

    fn defeat(&mut self) {
        let now = self.clock.now();
        let lockout = Duration::seconds(self.settings.lockout_secs.min(MAX_LOCKOUT_SECS) as i64);
        let until = now.checked_add_signed(lockout).unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.defeated = true;
        self.timer_running = false;
        self.lock_until = Some(until);
        self.lock_remaining_secs = remaining_secs(until, now);

        // The in-memory lock still holds for this process if the write fails.
        if let Err(e) = self.store.set(LOCK_KEY, &encode_timestamp(until)) {
            error!(error = %e, "failed to persist challenge lockout");
        }
        info!(lock_until = %encode_timestamp(until), "challenge defeated, lockout started");
    }

    fn forget_lock(&self) {
        if let Err(e) = self.store.delete(LOCK_KEY) {
            warn!(error = %e, "failed to clear lockout state");
        }
    }

    /// Record a successful submission.
    ///
    /// Only an active attempt can complete; anything else is ignored.
    /// Returns whether the attempt is now completed.
    pub fn mark_completed(&mut self) -> bool {
        if self.completed {
            return true;
        }
        if self.defeated || self.is_locked() {
            debug!(mode = %self.mode(), "ignoring completion outside an active attempt");
            return false;
        }

        self.completed = true;
        self.timer_running = false;
        info!(
            time_remaining_secs = self.time_remaining_secs,
            "challenge completed"
        );
        true
    }

    /// A lock holds until a tick (or a restart) observes that it has expired,
    /// so the session never looks Active with its timer stopped.
    pub fn is_locked(&self) -> bool {
        self.lock_until.is_some()
    }

    pub fn mode(&self) -> Mode {
        if self.completed {
            Mode::Completed
        } else if self.defeated {
            Mode::Defeated
        } else if self.is_locked() {
            Mode::Locked
        } else {
            Mode::Active
        }
    }

    pub fn view(&self) -> ChallengeView {
        ChallengeView {
            mode: self.mode(),
            time_remaining_secs: self.time_remaining_secs,
            lock_remaining_secs: self.lock_remaining_secs,
            formatted_countdown: format_countdown(self.time_remaining_secs),
            formatted_lock_countdown: format_lock_countdown(
                i64::try_from(self.lock_remaining_secs).unwrap_or(i64::MAX),
            ),
        }
    }

    pub fn time_remaining_secs(&self) -> u64 {
        self.time_remaining_secs
    }

    pub fn lock_remaining_secs(&self) -> u64 {
        self.lock_remaining_secs
    }

    pub fn lock_until(&self) -> Option<DateTime<Utc>> {
        self.lock_until
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer_running
    }

    pub fn is_defeated(&self) -> bool {
        self.defeated
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }
}

/// Whole seconds left until `until`, rounded up; zero once it has passed
fn remaining_secs(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = until.signed_duration_since(now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}
