use std::sync::mpsc::Sender;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::exercise::{Exercise, ExerciseAuthority, ExerciseBank, Verdict};
use crate::execution::{CodeExecutor, ExecutionOutput, ExecutionRequest};
use crate::runtime::{ChallengeEvent, RunReport, SubmissionWorker};
use crate::session::{ChallengeSession, ChallengeView, Mode, SessionSettings, TickOutcome};
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Continue,
    Quit,
}

/// Everything the challenge screen shows, driven by ticks, key presses and
/// finished runs
pub struct App<S: KeyValueStore, C: Clock, X: CodeExecutor> {
    pub session: ChallengeSession<S, C>,
    pub bank: ExerciseBank,
    pub exercise: Exercise,
    pub source: String,
    pub last_run: Option<ExecutionOutput>,
    pub verdict: Option<Verdict>,
    pub status: Option<String>,
    runs: SubmissionWorker<X>,
}

impl<S: KeyValueStore, C: Clock, X: CodeExecutor> App<S, C, X> {
    /// `events` is where finished runs are posted; it should feed the loop's event source
    pub fn new(
        store: S,
        clock: C,
        settings: SessionSettings,
        bank: ExerciseBank,
        exercise: Exercise,
        executor: X,
        events: Sender<ChallengeEvent>,
    ) -> Self {
        let session = ChallengeSession::open(store, clock, settings);
        info!(exercise = %exercise.id, mode = %session.mode(), "challenge opened");

        Self {
            session,
            bank,
            source: exercise.starter_code.clone(),
            exercise,
            last_run: None,
            verdict: None,
            status: None,
            runs: SubmissionWorker::new(executor, events),
        }
    }

    pub fn view(&self) -> ChallengeView {
        self.session.view()
    }

    pub fn is_running(&self) -> bool {
        self.runs.is_running()
    }

    pub fn on_tick(&mut self) -> TickOutcome {
        let outcome = self.session.tick();
        match outcome {
            TickOutcome::Defeated => self.runs.cancel(),
            TickOutcome::ResetRequired => self.force_reset(),
            _ => {}
        }
        outcome
    }

    /// Throw away the current attempt and everything typed into it
    pub fn force_reset(&mut self) {
        self.runs.cancel();
        self.session.restart();
        self.source = self.exercise.starter_code.clone();
        self.last_run = None;
        self.verdict = None;
        self.status = None;
        info!(exercise = %self.exercise.id, mode = %self.session.mode(), "challenge reset");
    }

    pub fn on_key(&mut self, key: KeyEvent) -> AppAction {
        if key.code == KeyCode::Esc
            || (key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c'))
        {
            return AppAction::Quit;
        }

        if self.session.mode() != Mode::Active {
            return AppAction::Continue;
        }

        match key.code {
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.run_submission();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.source.push(c)
            }
            KeyCode::Enter => self.source.push('\n'),
            KeyCode::Tab => self.source.push_str("    "),
            KeyCode::Backspace => {
                self.source.pop();
            }
            _ => {}
        }

        AppAction::Continue
    }

    /// Start running the editor contents; the verdict arrives with the run's report
    pub fn run_submission(&mut self) {
        if self.session.mode() != Mode::Active {
            return;
        }

        let request = ExecutionRequest {
            language: self.exercise.language.clone(),
            source: self.source.clone(),
        };

        match self.runs.submit(request) {
            Some(run_id) => {
                info!(exercise = %self.exercise.id, run_id, "submission started");
                self.status = None;
            }
            None => debug!(exercise = %self.exercise.id, "submission already running"),
        }
    }

    /// Judge a finished run, unless the attempt it belonged to is over
    pub fn on_run_finished(&mut self, report: RunReport) {
        if !self.runs.finish(&report) {
            debug!(run_id = report.run_id, "dropping report of a cancelled run");
            return;
        }
        if self.session.mode() != Mode::Active {
            debug!(run_id = report.run_id, mode = %self.session.mode(), "attempt ended before the run finished");
            return;
        }

        match report.result {
            Ok(output) => {
                let verdict = self.bank.judge(&self.exercise, &output.stdout);
                info!(
                    exercise = %self.exercise.id,
                    exit_code = output.exit_code,
                    verdict = %verdict,
                    "submission judged"
                );
                if verdict == Verdict::Pass {
                    self.session.mark_completed();
                }
                self.status = None;
                self.verdict = Some(verdict);
                self.last_run = Some(output);
            }
            Err(e) => {
                warn!(exercise = %self.exercise.id, error = %e, "submission could not run");
                self.status = Some(e.to_string());
            }
        }
    }
}
