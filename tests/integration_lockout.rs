use chrono::{Duration, TimeZone, Utc};
use devclass::clock::{Clock, ManualClock};
use devclass::session::{ChallengeSession, Mode, SessionSettings, TickOutcome, LOCK_KEY};
use devclass::store::{decode_timestamp, KeyValueStore, MemoryStore, SqliteStore};
use tempfile::tempdir;

// Defeat, restart the "process" while locked, and watch the lock run out.
#[test]
fn defeat_survives_restart_then_expires() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("state.db");
    let t0 = Utc.with_ymd_and_hms(2024, 2, 10, 18, 0, 0).unwrap();
    let clock = ManualClock::new(t0);

    let defeated_at = {
        let store = SqliteStore::open(&db).unwrap();
        let mut session = ChallengeSession::open(store, clock.clone(), SessionSettings::default());
        assert_eq!(session.mode(), Mode::Active);
        assert_eq!(session.time_remaining_secs(), 600);

        let mut outcome = TickOutcome::Idle;
        for _ in 0..600 {
            clock.advance_secs(1);
            outcome = session.tick();
        }
        assert_eq!(outcome, TickOutcome::Defeated);
        assert!(session.is_defeated());
        clock.now()
    };

    let store = SqliteStore::open(&db).unwrap();
    let persisted = decode_timestamp(&store.get(LOCK_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(persisted, defeated_at + Duration::seconds(7200));

    clock.set(defeated_at + Duration::seconds(7199));
    let mut session = ChallengeSession::open(store, clock.clone(), SessionSettings::default());
    assert_eq!(session.mode(), Mode::Locked);
    assert_eq!(session.lock_remaining_secs(), 1);
    assert!(!session.is_timer_running());

    clock.advance_secs(1);
    assert_eq!(session.tick(), TickOutcome::ResetRequired);

    let reopened = SqliteStore::open(&db).unwrap();
    assert_eq!(reopened.get(LOCK_KEY).unwrap(), None);

    session.restart();
    assert_eq!(session.mode(), Mode::Active);
    assert_eq!(session.time_remaining_secs(), 600);
}

#[test]
fn reopening_after_expiry_starts_fresh_and_cleans_up() {
    let store = MemoryStore::new();
    let t0 = Utc.with_ymd_and_hms(2024, 2, 10, 18, 0, 0).unwrap();
    let clock = ManualClock::new(t0);

    {
        let mut session =
            ChallengeSession::open(store.clone(), clock.clone(), SessionSettings::default());
        for _ in 0..600 {
            session.tick();
        }
        assert!(!store.is_empty());
    }

    clock.advance_secs(7200);
    let session = ChallengeSession::open(store.clone(), clock, SessionSettings::default());

    assert_eq!(session.mode(), Mode::Active);
    assert_eq!(session.time_remaining_secs(), 600);
    assert!(store.is_empty());
}

#[test]
fn two_sessions_share_one_lock() {
    let store = MemoryStore::new();
    let t0 = Utc.with_ymd_and_hms(2024, 2, 10, 18, 0, 0).unwrap();
    let clock = ManualClock::new(t0);
    let settings = SessionSettings {
        time_budget_secs: 2,
        lockout_secs: 30,
    };

    let mut first = ChallengeSession::open(store.clone(), clock.clone(), settings);
    let second = ChallengeSession::open(store.clone(), clock.clone(), settings);
    first.tick();
    first.tick();

    // The second session was opened before the defeat and keeps its own state.
    assert_eq!(second.mode(), Mode::Active);

    let third = ChallengeSession::open(store, clock, settings);
    assert_eq!(third.mode(), Mode::Locked);
    assert_eq!(third.lock_remaining_secs(), 30);
}
