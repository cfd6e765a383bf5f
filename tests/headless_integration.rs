use std::sync::mpsc::{self, Sender};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use devclass::app::{App, AppAction};
use devclass::clock::ManualClock;
use devclass::execution::{
    CancelFlag, CodeExecutor, ExecutionError, ExecutionOutput, ExecutionRequest,
};
use devclass::exercise::{Exercise, ExerciseBank, Verdict};
use devclass::runtime::{ChallengeEvent, FixedTicker, Runner, TestEventSource};
use devclass::session::{Mode, SessionSettings};
use devclass::store::MemoryStore;

/// Pretends to run the program by printing its single string literal,
/// optionally taking its time about it
#[derive(Default)]
struct QuoteExecutor {
    delay: Duration,
}

impl CodeExecutor for QuoteExecutor {
    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutput, ExecutionError> {
        std::thread::sleep(self.delay);
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        let stdout = request
            .source
            .split('"')
            .nth(1)
            .map(|s| format!("{s}\n"))
            .unwrap_or_default();
        Ok(ExecutionOutput {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

fn hello_exercise() -> Exercise {
    Exercise {
        id: "hello".into(),
        title: "Hello".into(),
        language: "python".into(),
        prompt: "Print hi".into(),
        expected_output: "hi".into(),
        starter_code: "print(".into(),
    }
}

fn build_app(
    settings: SessionSettings,
    executor: QuoteExecutor,
    events: Sender<ChallengeEvent>,
) -> App<MemoryStore, ManualClock, QuoteExecutor> {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap());
    let bank = ExerciseBank::from_exercises(vec![hello_exercise()]).unwrap();
    App::new(
        MemoryStore::new(),
        clock,
        settings,
        bank,
        hello_exercise(),
        executor,
        events,
    )
}

fn char_key(c: char) -> ChallengeEvent {
    ChallengeEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
}

fn ctrl_r() -> ChallengeEvent {
    ChallengeEvent::Key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL))
}

fn dispatch(app: &mut App<MemoryStore, ManualClock, QuoteExecutor>, event: ChallengeEvent) {
    match event {
        ChallengeEvent::Tick => {
            app.on_tick();
        }
        ChallengeEvent::Resize => {}
        ChallengeEvent::RunFinished(report) => app.on_run_finished(report),
        ChallengeEvent::Key(key) => {
            assert_eq!(app.on_key(key), AppAction::Continue);
        }
    }
}

// Headless run through the runtime: type a solution, run it, finish.
#[test]
fn headless_solution_completes_challenge() {
    let (tx, rx) = mpsc::channel();
    let mut app = build_app(SessionSettings::default(), QuoteExecutor::default(), tx.clone());
    let mut runner = Runner::new(
        TestEventSource::new(rx),
        FixedTicker::new(Duration::from_millis(5)),
    );

    for c in "\"hi\")".chars() {
        tx.send(char_key(c)).unwrap();
    }
    tx.send(ctrl_r()).unwrap();

    for _ in 0..1_000u32 {
        dispatch(&mut app, runner.step());
        if app.view().mode == Mode::Completed {
            break;
        }
    }

    assert_eq!(app.source, "print(\"hi\")");
    assert_eq!(app.verdict, Some(Verdict::Pass));
    assert_eq!(app.view().mode, Mode::Completed);
    assert!(app.view().time_remaining_secs <= 600);
}

// A slow program must not pause the countdown while it runs.
#[test]
fn countdown_keeps_running_during_a_slow_submission() {
    let (tx, rx) = mpsc::channel();
    let executor = QuoteExecutor {
        delay: Duration::from_millis(300),
    };
    let mut app = build_app(SessionSettings::default(), executor, tx);
    let mut runner = Runner::new(
        TestEventSource::new(rx),
        FixedTicker::new(Duration::from_millis(20)),
    );

    app.source = "print(\"hi\")".into();
    app.run_submission();
    assert!(app.is_running());

    for _ in 0..1_000u32 {
        dispatch(&mut app, runner.step());
        if !app.is_running() {
            break;
        }
    }

    let view = app.view();
    assert_eq!(view.mode, Mode::Completed);
    assert!(
        view.time_remaining_secs <= 595,
        "countdown stalled at {}",
        view.time_remaining_secs
    );
}

// Running out of time mid-run defeats the attempt; the late result is ignored.
#[test]
fn defeat_during_a_run_discards_its_result() {
    let (tx, rx) = mpsc::channel();
    let executor = QuoteExecutor {
        delay: Duration::from_millis(200),
    };
    let mut app = build_app(
        SessionSettings {
            time_budget_secs: 2,
            lockout_secs: 7200,
        },
        executor,
        tx,
    );
    let mut runner = Runner::new(
        TestEventSource::new(rx),
        FixedTicker::new(Duration::from_millis(5)),
    );

    app.source = "print(\"hi\")".into();
    app.run_submission();

    // Keep pumping until the worker's report has come back through the loop.
    let mut pumped = 0u32;
    while app.view().mode == Mode::Active || pumped < 100 {
        dispatch(&mut app, runner.step());
        pumped += 1;
        assert!(pumped < 2_000, "attempt never ended");
    }

    assert_eq!(app.view().mode, Mode::Defeated);
    assert_eq!(app.verdict, None);
    assert!(!app.is_running());
}

#[test]
fn headless_timeout_defeats_and_locks() {
    let (tx, rx) = mpsc::channel();
    let mut app = build_app(
        SessionSettings {
            time_budget_secs: 3,
            lockout_secs: 7200,
        },
        QuoteExecutor::default(),
        tx,
    );
    let mut runner = Runner::new(
        TestEventSource::new(rx),
        FixedTicker::new(Duration::from_millis(5)),
    );

    for _ in 0..50u32 {
        dispatch(&mut app, runner.step());
        if app.view().mode != Mode::Active {
            break;
        }
    }

    let view = app.view();
    assert_eq!(view.mode, Mode::Defeated);
    assert_eq!(view.formatted_countdown, "00:00");
    assert_eq!(view.formatted_lock_countdown, "02:00:00");
}

#[test]
fn wrong_answer_keeps_attempt_open() {
    let (tx, rx) = mpsc::channel();
    let mut app = build_app(SessionSettings::default(), QuoteExecutor::default(), tx);
    app.source = "print(\"hello\")".into();

    app.run_submission();
    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(ChallengeEvent::RunFinished(report)) => app.on_run_finished(report),
        other => panic!("expected a run report, got {other:?}"),
    }

    assert_eq!(app.verdict, Some(Verdict::Fail));
    assert_eq!(app.view().mode, Mode::Active);
    assert_eq!(app.last_run.as_ref().map(|r| r.stdout.as_str()), Some("hello\n"));
}
